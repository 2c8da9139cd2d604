use clap::Parser;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

use slicekit::cli::{self, Cli};
use slicekit::config::ConfigLoader;
use slicekit::error::SliceError;
use slicekit::subprocess::ProcessError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli::get_log_level(cli.verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("slicekit started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().await?;
    debug!("Loaded configuration: {:?}", config);

    cli::execute_command(cli.command, config, cli.dry_run).await
}

/// The failing command's exit code when there is one, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<SliceError>() {
        err.exit_code()
    } else if let Some(err) = err.downcast_ref::<ProcessError>() {
        err.exit_code()
    } else {
        1
    }
}
