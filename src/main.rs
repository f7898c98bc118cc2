use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use interoperator_webhook::config::ProcessEnv;
use interoperator_webhook::webhook::{bootstrap, WebhookRegistry};
use interoperator_webhook::Manager;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bootstrap and run the admission webhook server
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("interoperator-webhook v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run(run_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Collect the builders and handlers of every resource that takes part in
/// admission. Resource owners add their `register_builder` and
/// `register_handlers` calls here; an empty registry serves only `/healthz`.
fn register_webhooks(_registry: &mut WebhookRegistry) {}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_format);

    // Both ring and aws-lc-rs end up in the dependency graph.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    info!(
        "Starting interoperator webhook v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = kube::Config::infer()
        .await
        .context("failed to infer Kubernetes configuration")?;
    let mut manager = Manager::from_kube_config(config)?;
    info!("Connected to Kubernetes cluster");

    let mut registry = WebhookRegistry::new();
    register_webhooks(&mut registry);
    info!("{} webhook builder(s) registered", registry.len());

    bootstrap::add(&mut manager, &registry, &ProcessEnv)
        .context("failed to bootstrap webhook server")?;

    manager.start().await?;
    Ok(())
}
