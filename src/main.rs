mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use convertly_core::advisor::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use convertly_core::advisor::GeminiAdvisor;
use convertly_core::AdvisorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convertly-server", version, about = "HTTP front for the compression settings advisor")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CONVERTLY_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Gemini API key (falls back to GOOGLE_API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "CONVERTLY_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the generative language API
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Advisor request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let key = cli
        .api_key
        .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
        .context("set GEMINI_API_KEY (or GOOGLE_API_KEY) or pass --api-key")?;
    let config = AdvisorConfig::new()
        .with_endpoint(cli.endpoint)
        .with_model(cli.model)
        .with_api_key(key)
        .with_timeout(Duration::from_secs(cli.timeout));
    let advisor = GeminiAdvisor::new(config)?;

    let app = routes::router(Arc::new(advisor));
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!(addr = %cli.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
