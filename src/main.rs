use clap::Parser;
use pagethumb::{setup_logging, Cli, CliRunner};
use tokio::signal;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    debug!("Starting pagethumb v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };
    debug!("Cache directory: {}", config.cache_directory.display());
    debug!("Render timeout: {:?}", config.render_timeout);

    let cli_runner = CliRunner::new(config)?;

    // The command future is dropped on interrupt, which kills a running renderer.
    let result = tokio::select! {
        result = cli_runner.run(args.command) => Some(result),
        _ = signal::ctrl_c() => None,
    };

    match result {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
        None => {
            info!("Interrupted");
            std::process::exit(130);
        }
    }

    Ok(())
}
