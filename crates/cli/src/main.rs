//! Prism CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP/WebSocket gateway
//! - `config` — Print the effective configuration (secrets redacted)
//! - `tools`  — List the built-in tool catalog

use clap::{Parser, Subcommand};
use prism_config::AppConfig;

#[derive(Parser)]
#[command(
    name = "prism",
    about = "Prism — multi-party conversational orchestration core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration
    Config,

    /// List the built-in tool catalog
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    // LOG_LEVEL feeds the filter unless the flag or RUST_LOG wins.
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            prism_gateway::start(config).await?;
        }
        Commands::Config => {
            println!("{config:#?}");
        }
        Commands::Tools => {
            let registry = prism_tools::default_registry();
            for definition in registry.definitions() {
                println!(
                    "{:<12} [{}] {}",
                    definition.name, definition.category, definition.description
                );
            }
        }
    }

    Ok(())
}
