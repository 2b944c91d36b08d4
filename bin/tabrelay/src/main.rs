mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabrelay")]
#[command(about = "Browser agent control plane", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent gateway (HTTP API and controller socket)
    Serve {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Run the browser-side controller against a Chrome DevTools endpoint
    Controller {
        /// DevTools HTTP endpoint or browser WebSocket URL
        #[arg(long, default_value = "http://127.0.0.1:9222")]
        cdp: String,
    },

    /// Show configuration, identity and quota
    Status,

    /// Show today's quota usage
    Quota {
        /// Identity to inspect (defaults to this install's identity)
        #[arg(long)]
        identity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Controller { cdp } => {
            commands::controller::run(&cdp).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Quota { identity } => {
            commands::quota::run(identity).await?;
        }
    }

    Ok(())
}
