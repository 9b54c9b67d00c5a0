//! Hashcache operator CLI
//!
//! Runs one facade operation against the configured cache server.

mod commands;

use anyhow::{Result, bail};
use clap::Parser;
use hashcache::config::SettingsOverrides;
use hashcache::{CacheFacade, ConfigOverrides};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "hashcache")]
#[command(about = "Read and write hash keys through the cache facade")]
struct Args {
    /// Cache host (REDIS_INSTANCE_HOST still wins)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Cache port (REDIS_INSTANCE_PORT still wins)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// JSON file with settings/constants overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dry-run writes against a throwaway in-process store instead of Redis.
    /// The store dies with the process, so only write commands are accepted.
    #[arg(long, global = true)]
    memory: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn check(&self) -> Result<()> {
        if self.memory && self.command.reads_existing_data() {
            bail!("--memory starts from an empty store; only write and multi-write are allowed");
        }
        Ok(())
    }

    fn overrides(&self) -> Result<ConfigOverrides> {
        let mut overrides = match &self.config {
            Some(path) => ConfigOverrides::from_file(path)?,
            None => ConfigOverrides::default(),
        };

        if self.host.is_some() || self.port.is_some() {
            let settings = overrides.settings.get_or_insert_with(SettingsOverrides::default);
            if let Some(host) = &self.host {
                settings.host = Some(host.clone());
            }
            if let Some(port) = self.port {
                settings.port = Some(port);
            }
        }

        Ok(overrides)
    }
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("hashcache=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.json_logs)?;
    args.check()?;

    let overrides = args.overrides()?;
    let cache = if args.memory {
        debug!("Using in-memory store");
        CacheFacade::in_memory(overrides).0
    } else {
        let cache = hashcache::create(overrides);
        info!(
            endpoint = %cache.config().settings.endpoint(),
            version = hashcache::VERSION,
            "Using cache server"
        );
        cache
    };

    let output = args.command.execute(&cache).await?;
    println!("{output}");

    cache.reset().await?;
    Ok(())
}
