mod config;
mod error;
mod rate_limit;
mod server;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use rate_limit::RateLimiter;
use server::MedalertServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries MCP JSON-RPC, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env file");
        }
    }

    info!("starting medalert MCP server");

    let config = Config::from_env()?;
    info!(
        ocr_url = %config.ocr.api_url,
        ocr_timeout_ms = config.ocr.timeout.as_millis(),
        ocr_key_set = !config.ocr.api_key.is_empty(),
        gemini_url = %config.gemini.base_url,
        gemini_key_set = !config.gemini.api_key.is_empty(),
        gemini_max_retries = config.gemini.max_retries,
        extraction_model = %config.pipeline.extraction_model,
        analysis_model = %config.pipeline.analysis_model,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );

    let pipeline = config.build_pipeline()?;
    if pipeline.cache().is_available().await {
        info!("redis connected, ocr cache enabled");
    } else {
        info!("redis unavailable, running without ocr cache");
    }

    let limiter = RateLimiter::from_env();
    if let Some(limiter) = &limiter {
        info!(rps = limiter.rps(), "rate limiting enabled");
    }

    let server = MedalertServer::new(Arc::new(pipeline), limiter);

    if let Some(addr) = config.tcp_listen_addr {
        let listener = TcpListener::bind(addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
