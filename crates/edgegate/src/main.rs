use std::process::ExitCode;

use edgegate::prelude::*;
use edgegate::wait_until_ready;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edgegate: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "edgegate terminated");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    if let Some(url) = &config.health_check {
        tracing::info!(url, "waiting for dependency");
        let check = HttpHealthCheck::new(url.as_str())?;
        wait_until_ready(&check, &config.health_policy().validated()).await?;
    }

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)
        .map_err(|e| GatewayError::Startup(format!("metrics registration: {e}")))?;

    let bus = MemoryBus::new();
    let auth = AuthCache::new(
        MemoryCache::new(),
        config.identity_store(),
        AuthCacheConfig {
            ttl: config.auth_cache_ttl,
        },
    );
    if config.things.is_empty() {
        tracing::warn!("no things configured, every device will be rejected");
    }

    let gateway = GatewayBuilder::new()
        .mqtt_addr(&config.mqtt_addr)
        .ws_addr(&config.ws_addr)
        .instance(&config.instance)
        .subject_prefix(&config.subject_prefix)
        .forwarder_timeout(config.forwarder_timeout)
        .build(
            auth,
            config.policy(),
            Instrumented::new(bus.clone(), metrics),
            &bus,
            JsonLinesEventStore::new(tokio::io::stdout()),
        )
        .await?;

    let result = gateway.run().await;
    log_metrics(&registry);
    result
}

fn log_metrics(registry: &Registry) {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buf) {
        tracing::debug!(error = %e, "failed to encode metrics");
        return;
    }
    tracing::debug!(metrics = %String::from_utf8_lossy(&buf), "final metrics");
}
