//! Subcommands and their execution against a facade.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use hashcache::{CacheFacade, KeyTtl};
use serde_json::Value;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write one field; arms the key's TTL only if the key is new
    Write {
        key: String,
        field: String,
        /// JSON value (bare words are stored as strings)
        value: String,
    },

    /// Write several fields and always set the key's TTL
    MultiWrite {
        key: String,
        /// Pairs written as field=value
        #[arg(required = true, value_name = "FIELD=VALUE")]
        pairs: Vec<String>,
        /// Expiry in minutes
        #[arg(short, long, default_value = "30")]
        expires: u64,
    },

    /// Write one field into a key that must already exist
    PutResult {
        key: String,
        field: String,
        value: String,
    },

    /// Read one field
    Get { key: String, field: String },

    /// Read every field of a key
    GetAll {
        key: String,
        /// Print stored strings instead of parsed JSON
        #[arg(long)]
        raw: bool,
    },

    /// Delete a key
    Del { key: String },

    /// Show a key's remaining lifetime
    Ttl { key: String },
}

/// Parse a CLI value as JSON, falling back to a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_pair(pair: &str) -> Result<(String, Value)> {
    let Some((field, value)) = pair.split_once('=') else {
        bail!("expected FIELD=VALUE, got {pair:?}");
    };
    if field.is_empty() {
        bail!("empty field name in {pair:?}");
    }
    Ok((field.to_string(), parse_value(value)))
}

fn describe_ttl(ttl: KeyTtl) -> String {
    match ttl {
        KeyTtl::Missing => "key does not exist".to_string(),
        KeyTtl::Persistent => "no expiry".to_string(),
        KeyTtl::Expires(d) => format!("{}s", d.as_secs()),
    }
}

impl Command {
    /// Whether the command only makes sense against data written earlier
    pub fn reads_existing_data(&self) -> bool {
        !matches!(self, Self::Write { .. } | Self::MultiWrite { .. })
    }

    /// Run the command, returning what to print
    pub async fn execute(self, cache: &CacheFacade) -> Result<String> {
        match self {
            Self::Write { key, field, value } => {
                let report = cache
                    .cache_write(&key, &field, &parse_value(&value))
                    .await
                    .with_context(|| format!("write {key}.{field}"))?;
                Ok(match report.expiry_set {
                    Some(ttl) => format!("OK (new key, expires in {}s)", ttl.as_secs()),
                    None => "OK".to_string(),
                })
            }

            Self::MultiWrite {
                key,
                pairs,
                expires,
            } => {
                let fields = pairs
                    .iter()
                    .map(String::as_str)
                    .map(parse_pair)
                    .collect::<Result<Vec<_>>>()?;
                let report = cache
                    .cache_multi_write(&key, fields, expires)
                    .await
                    .with_context(|| format!("multi-write {key}"))?;
                Ok(format!("OK ({} fields)", report.fields_written))
            }

            Self::PutResult { key, field, value } => {
                cache
                    .cache_esb_result(&key, &field, &parse_value(&value))
                    .await
                    .with_context(|| format!("put-result {key}.{field}"))?;
                Ok("OK".to_string())
            }

            Self::Get { key, field } => {
                let value: Value = cache.fetch_esb_result(&key, &field).await?;
                Ok(serde_json::to_string_pretty(&value)?)
            }

            Self::GetAll { key, raw } => {
                if raw {
                    let fields = cache.fetch_objects(&key).await?;
                    Ok(serde_json::to_string_pretty(&fields)?)
                } else {
                    let fields = cache.fetch_objects_json(&key).await?;
                    Ok(serde_json::to_string_pretty(&fields)?)
                }
            }

            Self::Del { key } => {
                let removed = cache.delete_key(&key).await?;
                Ok(format!("{removed}"))
            }

            Self::Ttl { key } => Ok(describe_ttl(cache.ttl(&key).await?)),
        }
    }
}
