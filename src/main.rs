// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chainflow_rs::chainflow::config::ConfigLoader;
use chainflow_rs::chainflow::engine::{Engine, UnitContext};
use chainflow_rs::chainflow::registry::GraphRegistry;
use chainflow_rs::chainflow::server;
use chainflow_rs::runtime::ProcessRunner;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a configuration file and report what it defines
    Validate {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one unit through a chain
    Run {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Chain to start
        #[arg(long)]
        chain: String,

        /// Directory of the content being processed
        #[arg(long)]
        unit_path: Option<PathBuf>,

        /// Display name of the unit
        #[arg(long)]
        name: Option<String>,
    },
    /// Start the chain registered for a watched location
    Trigger {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Watched location path
        #[arg(long)]
        path: String,

        /// Content type observed at the path
        #[arg(long)]
        content_type: String,
    },
    /// Serve the HTTP decision surface
    Serve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
}

/// Load the configuration and build an engine backed by child processes
async fn build_engine(config: &Path) -> anyhow::Result<Engine> {
    let document = ConfigLoader::new()
        .load_document(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let settings = document.settings.with_env_overrides();
    let runner = ProcessRunner::new().with_script_dir(settings.script_dir.clone());

    let registry = GraphRegistry::new(settings);
    let version = registry
        .install_all(document.batches)
        .await
        .context("Configuration rejected")?;
    log::info!("Installed graph v{}", version);

    Ok(Engine::new(registry, Arc::new(runner)))
}

/// Install a `tracing` subscriber for the HTTP layer
///
/// `log` output already goes through env_logger, so the subscriber is set
/// directly rather than through `try_init`, which would also claim the `log`
/// facade and fail.
fn init_tracing() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt().finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { config } => {
            let engine = build_engine(&config).await?;
            let graph = engine.registry().snapshot().await;
            println!("Configuration OK: {}", config.display());
            let batches = engine.registry().batch_names().await;
            println!("  batches:           {}", batches.join(", "));
            println!("  links:             {}", graph.links().len());
            println!("  chains:            {}", graph.chains().len());
            println!("  content types:     {}", graph.content_types().len());
            println!("  watched locations: {}", graph.watched_locations().len());
        }
        Commands::Run {
            config,
            chain,
            unit_path,
            name,
        } => {
            let engine = build_engine(&config).await?;
            let context = UnitContext {
                name,
                path: unit_path,
                ..Default::default()
            };
            let unit = engine.run_unit(&chain, context).await?;
            println!("{}", serde_json::to_string_pretty(&unit)?);
        }
        Commands::Trigger {
            config,
            path,
            content_type,
        } => {
            let engine = build_engine(&config).await?;
            match engine
                .trigger(&path, &content_type, UnitContext::for_path(&path))
                .await?
            {
                Some(id) => {
                    let unit = engine.wait_for_rest(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&unit)?);
                }
                None => println!("No watched location for {} ({})", path, content_type),
            }
        }
        Commands::Serve { config, port } => {
            init_tracing()?;
            let engine = build_engine(&config).await?;
            let restored = engine.recover().await?;
            if restored > 0 {
                log::info!("Restored {} units awaiting a decision", restored);
            }
            server::serve(engine, port).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_installs_alongside_env_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
        init_tracing().unwrap();
        assert!(tracing::dispatcher::has_been_set());
    }
}
