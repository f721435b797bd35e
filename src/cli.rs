//! CLI interface for taskloom

use crate::logging::{init_logging, LogConfig};
use crate::server::{self, AppState, Job};
use crate::settings::EnginePaths;
use crate::task::TaskRegistry;
use crate::watcher::{DagWatcher, DEFAULT_INTERVAL_MINUTES};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// taskloom - Local DAG workflow engine for typed data pipelines
#[derive(Parser, Debug)]
#[command(name = "taskloom")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local DAG workflow engine for typed data pipelines", long_about = None)]
pub struct Cli {
    /// Directory holding persisted DAGs
    #[arg(
        short = 'd',
        long = "dag-dir",
        alias = "dag_dir",
        default_value = ".dags",
        global = true
    )]
    pub dag_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the registration API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },

    /// Scan the dags directory on an interval and launch persisted DAGs
    Watch {
        /// Scan interval in minutes
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
        interval: u64,
    },

    /// Register a persisted DAG file with a running registration service
    Register {
        /// Path to a snapshot produced by Pipeline::dump
        dag_file: PathBuf,

        /// Registration name
        #[arg(long)]
        name: String,

        /// Base URL of the registration service
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Trigger interval in minutes
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
        minutes: u64,

        /// Replace an existing registration with the same name
        #[arg(long)]
        replace: bool,
    },
}

/// Startup banner with the engine and host language versions.
pub fn banner() -> String {
    format!(
        "taskloom {} (rust {})\nThe easiest way to author data workflows with minimal setup",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_RUST_VERSION"),
    )
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        init_logging(&LogConfig::new(&self.log_level, &self.log_format))
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        println!("{}", banner());

        match &self.command {
            None => Ok(()),
            Some(Commands::Serve { addr }) => {
                let paths = EnginePaths::with_dags_dir(&self.dag_dir);
                paths.ensure()?;
                server::serve(*addr, Arc::new(AppState { paths })).await
            }
            Some(Commands::Watch { interval }) => {
                let paths = EnginePaths::with_dags_dir(&self.dag_dir);
                paths.ensure()?;
                let registry = Arc::new(TaskRegistry::new());
                let mut watcher =
                    DagWatcher::new(&paths.dags_dir, registry, *interval).await?;
                watcher.start().await?;
                tokio::signal::ctrl_c().await?;
                info!("shutting down watcher");
                watcher.shutdown().await?;
                Ok(())
            }
            Some(Commands::Register {
                dag_file,
                name,
                server,
                minutes,
                replace,
            }) => {
                let bytes = std::fs::read(dag_file)?;
                let job = Job {
                    name: name.clone(),
                    trigger: "interval".to_string(),
                    minutes: *minutes,
                    max_instances: 1,
                    executor: "default".to_string(),
                    jobstore: "default".to_string(),
                    replace_existing: *replace,
                    dag: BASE64.encode(&bytes),
                };
                let url = format!("{}/register", server.trim_end_matches('/'));
                let response = reqwest::Client::new().post(&url).json(&job).send().await?;
                if !response.status().is_success() {
                    anyhow::bail!("registration of '{}' failed: {}", name, response.status());
                }
                println!("registered '{}' with {}", name, server);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_subcommand() {
        let cli = Cli::parse_from(["taskloom"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.dag_dir, PathBuf::from(".dags"));
    }

    #[test]
    fn test_cli_dag_dir_override() {
        let cli = Cli::parse_from(["taskloom", "-d", "/tmp/dags"]);
        assert_eq!(cli.dag_dir, PathBuf::from("/tmp/dags"));
    }

    #[test]
    fn test_cli_serve_command() {
        let cli = Cli::parse_from(["taskloom", "serve", "--addr", "0.0.0.0:9000"]);
        assert!(matches!(cli.command, Some(Commands::Serve { addr }) if addr.port() == 9000));
    }

    #[test]
    fn test_cli_watch_command() {
        let cli = Cli::parse_from(["taskloom", "watch", "--interval", "2"]);
        assert!(matches!(cli.command, Some(Commands::Watch { interval: 2 })));
    }

    #[test]
    fn test_cli_register_command() {
        let cli = Cli::parse_from([
            "taskloom", "register", "etl.dag", "--name", "etl", "--replace",
        ]);
        match cli.command {
            Some(Commands::Register { name, replace, .. }) => {
                assert_eq!(name, "etl");
                assert!(replace);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_banner_mentions_versions() {
        let banner = banner();
        assert!(banner.contains(env!("CARGO_PKG_VERSION")));
        assert!(banner.contains("rust"));
    }
}
