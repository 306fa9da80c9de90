use clap::Parser;
use tracing::error;

use webhook_cli::{init_logging, run_cli, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(e) = run_cli(cli).await {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}
