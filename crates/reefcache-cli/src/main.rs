//! reefcache - fetch through the local cache from the command line.
//!
//! The binary is the hosting environment for the core: it builds the stores
//! against a directory-backed medium, injects the HTTP fetch capability and
//! wires up logging.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::{Parser, Subcommand, ValueEnum};
use reefcache_core::api::{ApiClient, JsonBody};
use reefcache_core::store::FileMedium;
use reefcache_core::sync::{FetchMode, FetchOptions};
use reefcache_core::{Config, Stores, SystemClock};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "reefcache", version, about = "Fetch through the local API cache")]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a path from the API through the cache
    Get {
        path: String,
        /// Cache key (defaults to the path)
        #[arg(long)]
        key: Option<String>,
        #[arg(long, value_enum, default_value_t = Mode::Network)]
        mode: Mode,
        /// Override the configured cache TTL
        #[arg(long)]
        ttl_secs: Option<i64>,
        /// Treat an empty cached payload as a miss
        #[arg(long)]
        non_empty: bool,
        /// Keep a `data` envelope instead of unwrapping it
        #[arg(long)]
        raw: bool,
    },
    /// Print a cached entry
    Show { key: String },
    /// List stored keys
    Keys,
    /// Remove stored data, optionally only one namespace
    Clear { namespace: Option<String> },
    /// Store an access token for subsequent requests
    Login {
        token: String,
        #[arg(long, default_value_t = 30)]
        ttl_mins: i64,
    },
    /// Forget session tokens
    Logout,
    /// Print the retained conversation messages
    Messages,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Always try the API, fall back to cache on failure
    Network,
    /// Use the cache when it is usable, otherwise the API
    Cache,
    /// Never touch the API
    Offline,
}

impl From<Mode> for FetchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Network => FetchMode::NetworkFirst,
            Mode::Cache => FetchMode::CacheFirst,
            Mode::Offline => FetchMode::CacheOnly,
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "reefcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn seconds(secs: i64) -> Result<TimeDelta> {
    TimeDelta::try_seconds(secs).with_context(|| format!("{} seconds is out of range", secs))
}

fn minutes(mins: i64) -> Result<TimeDelta> {
    TimeDelta::try_minutes(mins).with_context(|| format!("{} minutes is out of range", mins))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref());

    let config = Config::load().context("Failed to load configuration")?;
    let storage_dir = config
        .storage_dir()
        .unwrap_or_else(|_| PathBuf::from("./reefcache-data"));
    let medium = FileMedium::open(&storage_dir)
        .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?;
    let stores = Stores::open(&config, Arc::new(medium), Arc::new(SystemClock));
    info!(storage = %storage_dir.display(), "reefcache starting");

    let result = run(cli.command, &config, &stores).await;

    stores.shutdown();
    result
}

async fn run(command: Command, config: &Config, stores: &Stores) -> Result<()> {
    match command {
        Command::Get {
            path,
            key,
            mode,
            ttl_secs,
            non_empty,
            raw,
        } => {
            let api = ApiClient::new(config)?.with_tokens(stores.tokens().clone());
            let key = key.unwrap_or_else(|| path.clone());
            let mut options = FetchOptions::new().mode(mode.into());
            if let Some(secs) = ttl_secs {
                options = options.ttl(seconds(secs)?);
            }
            if non_empty {
                options = options.require_non_empty();
            }
            let decoder = if raw { JsonBody::raw() } else { JsonBody::enveloped() };

            let fetched = stores
                .sync()
                .fetch_or_cache(&key, || api.get(&path), &decoder, &options)
                .await?;
            print_json(&fetched)
        }
        Command::Show { key } => match stores.cache().entry(&key) {
            Some(entry) => print_json(&entry),
            None => {
                eprintln!("{} is not cached", key);
                Ok(())
            }
        },
        Command::Keys => {
            let mut keys = stores.kv().keys();
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
            Ok(())
        }
        Command::Clear { namespace } => {
            match namespace {
                Some(ns) => stores.kv().clear_namespace(&ns),
                None => stores.kv().clear(),
            }
            Ok(())
        }
        Command::Login { token, ttl_mins } => {
            stores.tokens().set_tokens(&token, minutes(ttl_mins)?, None);
            eprintln!("Token stored, valid for {} minutes", ttl_mins);
            Ok(())
        }
        Command::Logout => {
            stores.logout();
            Ok(())
        }
        Command::Messages => print_json(&stores.messages().messages()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_out_of_range_are_errors() {
        assert_eq!(seconds(90).unwrap(), TimeDelta::seconds(90));
        assert_eq!(minutes(30).unwrap(), TimeDelta::minutes(30));

        let err = seconds(i64::MAX).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(minutes(i64::MAX).is_err());
    }

    #[test]
    fn test_cli_parses_get_options() {
        let cli = Cli::try_parse_from([
            "reefcache",
            "get",
            "/fish",
            "--mode",
            "cache",
            "--ttl-secs",
            "60",
            "--non-empty",
        ])
        .unwrap();
        match cli.command {
            Command::Get {
                path,
                mode,
                ttl_secs,
                non_empty,
                ..
            } => {
                assert_eq!(path, "/fish");
                assert_eq!(FetchMode::from(mode), FetchMode::CacheFirst);
                assert_eq!(ttl_secs, Some(60));
                assert!(non_empty);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
