use bgtask::application::commands::{Cli, Commands};
use bgtask::utils::setup_logging;
use clap::Parser;
use dotenvy::dotenv;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    // The host logs its life cycle; UI commands stay quiet unless something goes wrong.
    let level = match cli.command {
        Commands::Host => "info",
        _ => "warn",
    };
    setup_logging(level);

    if let Err(e) = cli.run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
