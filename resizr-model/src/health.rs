//! `HealthProbe` (spec.md §4.8): on-demand or periodic pings of the two
//! external stores, rolled up into a single service status.

use std::sync::Arc;

use serde::Serialize;

use crate::metadata_store::MetadataStore;
use crate::object_store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Connected,
    Healthy,
    Degraded,
    Disconnected,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            OverallStatus::Healthy => 200,
            OverallStatus::Degraded => 206,
            OverallStatus::Unhealthy => 503,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub services: Services,
}

#[derive(Debug, Clone, Serialize)]
pub struct Services {
    pub metadata_store: ServiceStatus,
    pub object_store: ServiceStatus,
}

/// Key used for the liveness probe ping; never written for real.
const PROBE_KEY: &str = "__health_probe__";

pub struct HealthProbe {
    metadata_store: Arc<dyn MetadataStore>,
    object_store: Arc<dyn ObjectStore>,
}

impl HealthProbe {
    pub fn new(metadata_store: Arc<dyn MetadataStore>, object_store: Arc<dyn ObjectStore>) -> Self {
        HealthProbe {
            metadata_store,
            object_store,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let metadata_status = self.probe_metadata_store().await;
        let object_status = self.probe_object_store().await;

        let statuses = [metadata_status, object_status];
        let status = if statuses
            .iter()
            .all(|s| matches!(s, ServiceStatus::Connected | ServiceStatus::Healthy))
        {
            OverallStatus::Healthy
        } else if statuses
            .iter()
            .any(|s| matches!(s, ServiceStatus::Disconnected | ServiceStatus::Timeout))
            && !statuses
                .iter()
                .all(|s| matches!(s, ServiceStatus::Disconnected | ServiceStatus::Timeout))
        {
            OverallStatus::Degraded
        } else if statuses
            .iter()
            .all(|s| matches!(s, ServiceStatus::Disconnected | ServiceStatus::Timeout))
        {
            OverallStatus::Unhealthy
        } else {
            OverallStatus::Degraded
        };

        HealthReport {
            status,
            services: Services {
                metadata_store: metadata_status,
                object_store: object_status,
            },
        }
    }

    async fn probe_metadata_store(&self) -> ServiceStatus {
        match tokio::time::timeout(
            std::time::Duration::from_secs(3),
            self.metadata_store.exists(PROBE_KEY),
        )
        .await
        {
            Ok(Ok(_)) => ServiceStatus::Connected,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "metadata store health probe failed");
                ServiceStatus::Disconnected
            }
            Err(_) => ServiceStatus::Timeout,
        }
    }

    async fn probe_object_store(&self) -> ServiceStatus {
        match tokio::time::timeout(
            std::time::Duration::from_secs(3),
            self.object_store.exists(PROBE_KEY),
        )
        .await
        {
            Ok(Ok(_)) => ServiceStatus::Healthy,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "object store health probe failed");
                ServiceStatus::Disconnected
            }
            Err(_) => ServiceStatus::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryMetadataStore, InMemoryObjectStore};

    #[tokio::test]
    async fn healthy_when_both_stores_respond() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let probe = HealthProbe::new(metadata, objects);
        let report = probe.check().await;
        assert_eq!(report.status, OverallStatus::Healthy);
        assert_eq!(report.status.http_status(), 200);
    }
}
