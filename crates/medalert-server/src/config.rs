use std::net::SocketAddr;

use medalert_common::cache::{ScanCache, DEFAULT_TTL_SECS};
use medalert_common::gemini::GeminiClientConfig;
use medalert_common::ocr_space::OcrSpaceConfig;
use medalert_common::pipeline::{PipelineConfig, ScanPipeline};
use medalert_common::redis::RedisCache;

use crate::error::AppError;

/// Server configuration, read once at startup.
///
/// Provider API keys are not checked here; a missing key shows up as a failed
/// provider call on the first scan.
#[derive(Debug, Clone)]
pub struct Config {
    pub ocr: OcrSpaceConfig,
    pub gemini: GeminiClientConfig,
    pub pipeline: PipelineConfig,
    /// Redis connection URL. `None` disables the OCR cache.
    pub redis_url: Option<String>,
    pub scan_cache_ttl_secs: u64,
    /// Serve MCP over TCP on this address instead of stdio.
    pub tcp_listen_addr: Option<SocketAddr>,
}

impl Config {
    /// Optional:
    /// - `REDIS_URL`
    /// - `SCAN_CACHE_TTL_SECS` (default: 86400)
    /// - `MCP_TCP_LISTEN_ADDR` (e.g. "127.0.0.1:7400")
    ///
    /// Provider variables are documented on `OcrSpaceConfig`, `GeminiClientConfig`
    /// and `PipelineConfig`.
    pub fn from_env() -> Result<Self, AppError> {
        let scan_cache_ttl_secs = match std::env::var("SCAN_CACHE_TTL_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::Config(format!("SCAN_CACHE_TTL_SECS must be a number of seconds, got {raw:?}"))
            })?,
            Err(_) => DEFAULT_TTL_SECS,
        };

        let tcp_listen_addr = match std::env::var("MCP_TCP_LISTEN_ADDR") {
            Ok(raw) => Some(raw.parse::<SocketAddr>().map_err(|e| {
                AppError::Config(format!("MCP_TCP_LISTEN_ADDR {raw:?} is not a socket address: {e}"))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            ocr: OcrSpaceConfig::from_env(),
            gemini: GeminiClientConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            redis_url: std::env::var("REDIS_URL").ok(),
            scan_cache_ttl_secs,
            tcp_listen_addr,
        })
    }

    pub fn scan_cache(&self) -> ScanCache {
        ScanCache::new(
            RedisCache::new(self.redis_url.as_deref()),
            self.scan_cache_ttl_secs,
        )
    }

    pub fn build_pipeline(&self) -> Result<ScanPipeline, AppError> {
        Ok(ScanPipeline::from_configs(
            self.ocr.clone(),
            self.gemini.clone(),
            self.pipeline.clone(),
            self.scan_cache(),
        )?)
    }
}
