use anyhow::{Context, Result};
use std::sync::Arc;
use windguru_uploader::config::Config;
use windguru_uploader::http::{self, HttpState};
use windguru_uploader::log::{Logger, TracingLogger};
use windguru_uploader::service::UploadService;
use windguru_uploader::transport::ReqwestTransport;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,windguru_uploader=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let config = Config::from_env().context("invalid WindGuru configuration")?;

    let transport = ReqwestTransport::new().context("failed to build HTTP client")?;
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
    let service = UploadService::start(&config.upload, transport, logger)?;

    let app = http::router(HttpState {
        submitter: service.submitter(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(bind=%config.http_bind, "windguru-uploader HTTP listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server exited");
        }
    }

    service.shutdown().await;
    Ok(())
}
