//! Reconnect policy for the shared store connection.

use std::time::Duration;

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server actively refused the connection
    Refused,
    /// Any other transport failure (timeout, reset, dropped link)
    Transport,
}

/// Reconnect bookkeeping, carried across attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempt number within the current outage, starting at 1
    pub attempt: u32,
    /// Sum of the delays scheduled during the current outage
    pub total_retry_time: Duration,
    /// Successful connections over the handle's lifetime
    pub times_connected: u32,
}

impl RetryState {
    /// Record a successful connection and close the current outage.
    pub fn on_connected(&mut self) {
        self.times_connected = self.times_connected.saturating_add(1);
        self.attempt = 0;
        self.total_retry_time = Duration::ZERO;
    }

    /// Record a failed attempt; returns the attempt number.
    pub fn on_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Account for a scheduled retry delay.
    pub fn on_scheduled(&mut self, delay: Duration) {
        self.total_retry_time = self.total_retry_time.saturating_add(delay);
    }
}

/// Why the manager stopped reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Refused,
    RetryTimeExhausted,
    MaxReconnects,
}

impl StopReason {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Refused => "connection refused",
            Self::RetryTimeExhausted => "retry time exhausted",
            Self::MaxReconnects => "maximum number of reconnects reached",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Outcome of consulting the policy after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    Stop(StopReason),
}

/// Bounded reconnect policy.
///
/// The delay for attempt `n` is `max(n * delay_step, delay_floor)`, so with
/// the defaults every retry waits 30 s until attempt 300.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Give up once the scheduled delays of one outage exceed this
    pub max_retry_time: Duration,
    /// Give up once the handle has connected more than this many times
    pub max_times_connected: u32,
    pub delay_step: Duration,
    pub delay_floor: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(60 * 60),
            max_times_connected: 100,
            delay_step: Duration::from_millis(100),
            delay_floor: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_step.saturating_mul(attempt).max(self.delay_floor)
    }

    /// Decide what to do after a failure.
    ///
    /// Checks run in order: refusal, cumulative retry time, connect count.
    #[must_use]
    pub fn decide(&self, state: &RetryState, failure: FailureKind) -> ReconnectDecision {
        if failure == FailureKind::Refused {
            return ReconnectDecision::Stop(StopReason::Refused);
        }
        if state.total_retry_time > self.max_retry_time {
            return ReconnectDecision::Stop(StopReason::RetryTimeExhausted);
        }
        if state.times_connected > self.max_times_connected {
            return ReconnectDecision::Stop(StopReason::MaxReconnects);
        }
        ReconnectDecision::RetryAfter(self.delay_for(state.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_stops_immediately() {
        let policy = ReconnectPolicy::default();
        let state = RetryState {
            attempt: 1,
            ..Default::default()
        };
        assert_eq!(
            policy.decide(&state, FailureKind::Refused),
            ReconnectDecision::Stop(StopReason::Refused)
        );
    }

    #[test]
    fn test_retry_time_ceiling() {
        let policy = ReconnectPolicy::default();
        let state = RetryState {
            attempt: 121,
            total_retry_time: Duration::from_secs(3601),
            times_connected: 1,
        };
        assert_eq!(
            policy.decide(&state, FailureKind::Transport),
            ReconnectDecision::Stop(StopReason::RetryTimeExhausted)
        );

        let at_limit = RetryState {
            total_retry_time: Duration::from_secs(3600),
            ..state
        };
        assert!(matches!(
            policy.decide(&at_limit, FailureKind::Transport),
            ReconnectDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn test_connect_count_ceiling() {
        let policy = ReconnectPolicy::default();
        let state = RetryState {
            attempt: 1,
            total_retry_time: Duration::ZERO,
            times_connected: 101,
        };
        assert_eq!(
            policy.decide(&state, FailureKind::Transport),
            ReconnectDecision::Stop(StopReason::MaxReconnects)
        );
    }

    #[test]
    fn test_delay_curve() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(300), Duration::from_secs(30));
        assert_eq!(policy.delay_for(301), Duration::from_millis(30_100));

        let tuned = ReconnectPolicy {
            delay_floor: Duration::from_millis(50),
            ..policy
        };
        assert_eq!(tuned.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_state_bookkeeping() {
        let mut state = RetryState::default();
        assert_eq!(state.on_failure(), 1);
        state.on_scheduled(Duration::from_secs(30));
        assert_eq!(state.on_failure(), 2);
        state.on_scheduled(Duration::from_secs(30));
        assert_eq!(state.total_retry_time, Duration::from_secs(60));

        state.on_connected();
        assert_eq!(state.attempt, 0);
        assert_eq!(state.total_retry_time, Duration::ZERO);
        assert_eq!(state.times_connected, 1);
    }
}
