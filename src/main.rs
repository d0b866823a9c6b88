//! sshsweep command-line entry point.

use clap::Parser;
use sshsweep::cli::{Cli, Commands};
use sshsweep::output;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Check(cmd) => cmd.execute(cli.verbose, cli.quiet).await,
        Commands::Extract(cmd) => cmd.execute(cli.quiet),
    };

    if let Err(e) = result {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    // RUST_LOG wins so russh internals can be traced on demand.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("sshsweep=debug,russh=info")
    } else {
        EnvFilter::new("sshsweep=warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
