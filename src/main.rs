mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kubesight_analysis::{AnalysisError, HttpReasoningClient};
use kubesight_k8s::KubeClient;
use kubesight_logs::{DemoSource, KubeSource, SessionRegistry};
use kubesight_server::AppState;

use crate::config::Config;

/// Kubesight - live Kubernetes logs with redaction and failure analysis
#[derive(Parser, Debug)]
#[command(name = "kubesight")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.config/kubesight/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:7878
    #[arg(long)]
    bind: Option<String>,

    /// Kubernetes context name
    #[arg(long)]
    context: Option<String>,

    /// Serve demo scenarios only, without connecting to a cluster
    #[arg(long)]
    demo_only: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(context) = args.context {
        config.kube.context = Some(context);
    }
    if args.demo_only {
        config.kube.enabled = false;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level);

    let redactor = config.redactor().context("Failed to build redaction rules")?;
    let (min_delay, max_delay) = config.stream.demo_delays();
    let shutdown = CancellationToken::new();
    let mut state = AppState::new(
        SessionRegistry::new(),
        Arc::new(DemoSource::new(min_delay, max_delay)),
    )
    .with_redactor(redactor)
    .with_trigger(config.trigger.clone())
    .with_keepalive(config.server.keepalive())
    .with_shutdown(shutdown.clone());

    if config.kube.enabled {
        match KubeClient::connect(config.kube.context.as_deref()).await {
            Ok(client) => {
                let label = config.cluster_label(client.context());
                let source = KubeSource::new(client, Some(config.stream.tail_lines));
                state = state.with_cluster(Arc::new(source), label);
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "No cluster connection, serving demo scenarios only");
            }
        }
    } else {
        tracing::info!("Demo-only mode, not connecting to a cluster");
    }

    match HttpReasoningClient::new(&config.analysis) {
        Ok(client) => {
            tracing::info!(
                provider = config.analysis.provider.name(),
                model = config.analysis.model(),
                "Analysis enabled"
            );
            state = state.with_reasoning(Arc::new(client));
        }
        Err(AnalysisError::Disabled) => tracing::info!("Analysis disabled"),
        Err(e) => tracing::warn!(error = %e, "Analysis unavailable"),
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tokio::spawn(wait_for_signal(shutdown));

    kubesight_server::serve(listener, state)
        .await
        .context("Server error")
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutting down");
    shutdown.cancel();
}
