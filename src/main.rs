use anyhow::Result;
use arena_auth::{api, config, utils};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "arena-auth", version, about = "Arena platform session & security core")]
struct AppCli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session API server
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    match args.command {
        Commands::Serve { port } => {
            // Missing AUTH_TOKEN_SECRET aborts here, before anything binds.
            let config = config::ServerConfig::from_env()?;
            info!("starting session API on port {port}");
            api::serve(config, port).await?;
        }
    }

    Ok(())
}
