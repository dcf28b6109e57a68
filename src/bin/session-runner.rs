use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use multiturn_runner::{Registry, SessionRunner};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "session-runner",
    about = "Serve execute/check/reset requests for multi-turn backend sessions over stdin/stdout."
)]
struct Args {
    /// Backend registry file (YAML or JSON). Defaults to the built-in registry.
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Log filter directive, overriding RUST_LOG.
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = args
        .log_filter
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = match &args.registry {
        Some(path) => Registry::load(path)?,
        None => Registry::builtin().clone(),
    };
    tracing::info!(
        classes = registry.len(),
        stateless = ?registry.stateless_classes().collect::<Vec<_>>(),
        "session runner ready"
    );

    let mut runner = SessionRunner::with_builtin_backends(Arc::new(registry));
    let stats = runner
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    tracing::debug!(?stats, "session runner stopped");
    Ok(())
}
