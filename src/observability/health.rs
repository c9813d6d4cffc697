//! Health, readiness and liveness reporting
//!
//! [`HealthMonitor`] checks the vector store and the LLM provider and looks
//! at how long ago the last question was answered. The HTTP routes in
//! [`crate::api`] serve its reports.

use crate::llm::provider::LlmProvider;
use crate::observability::metrics::metrics;
use crate::rag::VectorStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Idle time after which activity is reported as stale
pub const STALE_AFTER_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Healthy,
    /// Working but idle; does not make the service unhealthy
    Stale,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub last_check: u64,
}

impl HealthCheck {
    fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            response_time_ms: None,
            last_check: current_timestamp(),
        }
    }

    fn timed(mut self, start: Instant) -> Self {
        self.response_time_ms = Some(start.elapsed().as_millis() as u64);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// `healthy` or `degraded`
    pub status: String,
    pub timestamp: u64,
    pub service_id: String,
    pub uptime_seconds: u64,
    pub checks: BTreeMap<String, HealthCheck>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
    pub timestamp: u64,
}

pub struct HealthMonitor {
    service_id: String,
    store: Option<Arc<dyn VectorStore>>,
    llm: Option<Arc<dyn LlmProvider>>,
    additional_checks: RwLock<BTreeMap<String, HealthCheck>>,
}

impl HealthMonitor {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            store: None,
            llm: None,
            additional_checks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn add_health_check(&self, name: impl Into<String>, check: HealthCheck) {
        self.additional_checks.write().await.insert(name.into(), check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    pub async fn health_status(&self) -> HealthStatus {
        let mut checks = BTreeMap::new();
        if self.store.is_some() {
            checks.insert("vector_store".to_string(), self.check_store().await);
        }
        if self.llm.is_some() {
            checks.insert("llm".to_string(), self.check_llm().await);
        }
        checks.insert(
            "activity".to_string(),
            check_activity(metrics().seconds_since_last_answer()),
        );
        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let healthy = checks
            .values()
            .all(|check| check.status != CheckStatus::Unhealthy);
        metrics().update_health_status(healthy);

        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            service_id: self.service_id.clone(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    /// Ready when the store and the LLM provider both answer
    pub async fn readiness(&self) -> ReadinessResponse {
        let store_ready = match &self.store {
            Some(_) => self.check_store().await.status == CheckStatus::Healthy,
            None => true,
        };
        let llm_ready = match &self.llm {
            Some(_) => self.check_llm().await.status == CheckStatus::Healthy,
            None => true,
        };
        ReadinessResponse {
            ready: store_ready && llm_ready,
            timestamp: current_timestamp(),
        }
    }

    pub fn liveness(&self) -> LivenessResponse {
        LivenessResponse {
            alive: true,
            timestamp: current_timestamp(),
        }
    }

    async fn check_store(&self) -> HealthCheck {
        let Some(store) = &self.store else {
            return HealthCheck::new(CheckStatus::Healthy, "No vector store configured");
        };
        let start = Instant::now();
        match store.health_check().await {
            Ok(()) => {
                debug!(store = store.name(), "Vector store healthy");
                HealthCheck::new(CheckStatus::Healthy, format!("{} store reachable", store.name()))
                    .timed(start)
            }
            Err(e) => {
                warn!(store = store.name(), error = %e, "Vector store health check failed");
                HealthCheck::new(CheckStatus::Unhealthy, format!("Vector store check failed: {e}"))
                    .timed(start)
            }
        }
    }

    async fn check_llm(&self) -> HealthCheck {
        let Some(llm) = &self.llm else {
            return HealthCheck::new(CheckStatus::Healthy, "No LLM provider configured");
        };
        let start = Instant::now();
        match llm.health_check().await {
            Ok(()) => {
                HealthCheck::new(CheckStatus::Healthy, format!("{} provider ready", llm.name()))
                    .timed(start)
            }
            Err(e) => {
                warn!(provider = llm.name(), error = %e, "LLM provider not ready");
                HealthCheck::new(CheckStatus::Unhealthy, format!("LLM provider not ready: {e}"))
                    .timed(start)
            }
        }
    }
}

fn check_activity(seconds_since_last_answer: Option<u64>) -> HealthCheck {
    match seconds_since_last_answer {
        None => HealthCheck::new(CheckStatus::Healthy, "No questions answered yet"),
        Some(idle) if idle > STALE_AFTER_SECONDS => HealthCheck::new(
            CheckStatus::Stale,
            format!("No question answered for {idle} seconds"),
        ),
        Some(_) => HealthCheck::new(CheckStatus::Healthy, "Recent question activity"),
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::InMemoryStore;
    use crate::testing::mocks::MockLlmProvider;

    #[test]
    fn test_activity_check() {
        assert_eq!(check_activity(None).status, CheckStatus::Healthy);
        assert_eq!(check_activity(Some(30)).status, CheckStatus::Healthy);
        assert_eq!(check_activity(Some(301)).status, CheckStatus::Stale);
    }

    #[tokio::test]
    async fn test_healthy_components() {
        let monitor = HealthMonitor::new("ask-daf-test")
            .with_store(Arc::new(InMemoryStore::new(8)))
            .with_llm(Arc::new(MockLlmProvider::single_response("ok")));

        let status = monitor.health_status().await;
        assert!(status.is_healthy());
        assert_eq!(status.service_id, "ask-daf-test");
        assert!(status.checks.contains_key("vector_store"));
        assert!(status.checks.contains_key("llm"));
        assert!(monitor.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failing_llm_degrades_and_blocks_readiness() {
        let monitor = HealthMonitor::new("ask-daf-test")
            .with_llm(Arc::new(MockLlmProvider::with_failure()));

        let status = monitor.health_status().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.checks["llm"].status, CheckStatus::Unhealthy);
        assert!(!monitor.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_stale_check_is_not_unhealthy() {
        let monitor = HealthMonitor::new("ask-daf-test");
        monitor
            .add_health_check("ledger", HealthCheck::new(CheckStatus::Stale, "Ledger not reloaded"))
            .await;
        assert!(monitor.health_status().await.is_healthy());

        monitor.remove_health_check("ledger").await;
        assert!(!monitor.health_status().await.checks.contains_key("ledger"));
    }

    #[test]
    fn test_liveness() {
        assert!(HealthMonitor::new("x").liveness().alive);
    }
}
