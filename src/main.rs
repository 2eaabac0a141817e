//! modelmux - task-aware model routing with circuit breakers and
//! credential rotation
//!
//! The binary hosts the read-only admin surface (health and catalog
//! endpoints) and config tooling. Services embedding the library construct
//! their own `ModelRouter` and credential pools.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modelmux::admin;
use modelmux::catalog::Catalog;
use modelmux::config::Config;
use modelmux::router::ModelRouter;

#[derive(Parser)]
#[command(name = "modelmux")]
#[command(about = "Task-aware model routing with circuit breakers and credential rotation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show the task-to-model catalog and fallback chains
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelmux=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let mut config = Config::from_file_with_env(&config)?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            let catalog = Arc::new(Catalog::builtin());
            let router = Arc::new(ModelRouter::new(catalog, config.breakers));

            admin::run_server(&config, router).await
        }

        Commands::Check { config: path } => {
            let config = Config::from_file_with_env(&path)?;

            println!("config ok: {}", path);
            println!("  listen: {}", config.server.listen);
            println!(
                "  breakers: {} consecutive failures / {}s recovery / {}ms latency ceiling",
                config.breakers.failure_threshold,
                config.breakers.recovery_timeout_seconds,
                config.breakers.latency_threshold_ms
            );
            if config.credentials.is_empty() {
                println!("  credentials: none configured");
            }
            for pool in &config.credentials {
                println!(
                    "  credentials[{}]: {} key(s)",
                    pool.provider,
                    pool.keys.len()
                );
            }

            Ok(())
        }

        Commands::Models => {
            let catalog = Catalog::builtin();

            let mut mappings: Vec<_> = catalog.mappings().collect();
            mappings.sort_by_key(|m| m.task.as_str());

            for mapping in mappings {
                let fallbacks: Vec<&str> = mapping
                    .fallbacks
                    .iter()
                    .map(|m| m.model_id.as_str())
                    .collect();
                println!(
                    "{:<14} {:<32} fallbacks: {}",
                    mapping.task,
                    mapping.primary.model_id,
                    if fallbacks.is_empty() {
                        "none".to_string()
                    } else {
                        fallbacks.join(", ")
                    }
                );
            }

            Ok(())
        }
    }
}
