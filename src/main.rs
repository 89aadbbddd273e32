//! Control plane certificate bootstrap CLI

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use controlplane::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let command = format!("{:?}", cli.command).to_lowercase();
    if let Err(e) = cli.run() {
        tracing::error!(command = %command, error = %e, "Certificate bootstrap failed");
        return Err(anyhow::Error::new(e).context(format!("{} failed", command)));
    }
    Ok(())
}
