//! Backend connection at startup

use historian_store::{
    BackendRegistry, MemoryBackend, MetricsBackend, SqliteBackend, StorageBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::{BackendConfig, BackendSpec};
use crate::error::Result;

/// Open one configured backend
pub async fn connect_backend(config: &BackendConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match &config.spec {
        BackendSpec::Memory => Arc::new(MemoryBackend::new()),
        BackendSpec::Sqlite { path } => Arc::new(SqliteBackend::connect(path).await?),
        BackendSpec::Metrics(metrics) => Arc::new(MetricsBackend::new(metrics.clone())?),
    };
    Ok(backend)
}

/// Connect every backend, retrying failures every `interval`
///
/// Returns false when `shutdown` fired before all backends came up.
pub async fn connect_all_with_retry(
    configs: &[BackendConfig],
    registry: &BackendRegistry,
    interval: Duration,
    shutdown: &Notify,
) -> bool {
    for config in configs {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match connect_backend(config).await {
                Ok(backend) => {
                    info!(backend_id = %config.id, kind = backend.kind().as_str(), attempt, "Backend connected");
                    registry.insert(config.id.clone(), backend);
                    break;
                }
                Err(e) => {
                    warn!(
                        backend_id = %config.id,
                        attempt,
                        error = %e,
                        retry_ms = interval.as_millis() as u64,
                        "Backend connection failed, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.notified() => return false,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }
    true
}
