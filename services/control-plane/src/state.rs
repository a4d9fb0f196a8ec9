//! Application state shared across request handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use berth_scheduler::{LocalRunner, MemoryScheduler, Scheduler, SchedulerError};
use berth_sslcert::{CertManager, MemoryCertManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{Config, RunnerBackend, SchedulerBackend};

/// Progress of the most recent deploy of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Running,
    Succeeded,
    Failed,
}

/// Outcome of the most recent deploy of an app.
#[derive(Debug, Clone, Serialize)]
pub struct DeployRecord {
    pub id: String,
    pub release: String,
    pub state: DeployState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    scheduler: Arc<dyn Scheduler>,
    certs: Arc<dyn CertManager>,
    submit_timeout: Duration,
    deploys: RwLock<HashMap<String, DeployRecord>>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(scheduler: Arc<dyn Scheduler>, certs: Arc<dyn CertManager>, submit_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                scheduler,
                certs,
                submit_timeout,
                deploys: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Build the configured backend and its collaborators.
    pub fn from_config(config: &Config) -> Self {
        let certs: Arc<dyn CertManager> = Arc::new(MemoryCertManager::new(config.cert_path.clone()));
        let scheduler: Arc<dyn Scheduler> = match config.scheduler {
            SchedulerBackend::Memory => {
                let mut scheduler = MemoryScheduler::new().with_cert_manager(certs.clone());
                if config.runner == RunnerBackend::Local {
                    scheduler = scheduler.with_runner(Arc::new(LocalRunner::new()));
                }
                Arc::new(scheduler)
            }
        };
        Self::new(scheduler, certs, config.submit_timeout)
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn certs(&self) -> &Arc<dyn CertManager> {
        &self.inner.certs
    }

    pub fn submit_timeout(&self) -> Duration {
        self.inner.submit_timeout
    }

    /// Record that a deploy of `release` started and return its id.
    pub async fn begin_deploy(&self, app_id: &str, release: &str) -> String {
        let id = format!("dep_{}", Uuid::new_v4().simple());
        let mut deploys = self.inner.deploys.write().await;
        deploys.insert(
            app_id.to_string(),
            DeployRecord {
                id: id.clone(),
                release: release.to_string(),
                state: DeployState::Running,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        id
    }

    /// Record the outcome of deploy `deploy_id`.
    pub async fn finish_deploy(&self, app_id: &str, deploy_id: &str, err: Option<SchedulerError>) {
        let mut deploys = self.inner.deploys.write().await;
        let Some(record) = deploys.get_mut(app_id) else {
            return;
        };
        // A newer deploy has replaced this one.
        if record.id != deploy_id {
            return;
        }
        record.state = if err.is_some() {
            DeployState::Failed
        } else {
            DeployState::Succeeded
        };
        record.error = err.map(|e| e.to_string());
        record.finished_at = Some(Utc::now());
    }

    pub async fn latest_deploy(&self, app_id: &str) -> Option<DeployRecord> {
        let deploys = self.inner.deploys.read().await;
        deploys.get(app_id).cloned()
    }

    /// Drop deploy history of a removed app.
    pub async fn forget_deploys(&self, app_id: &str) {
        self.inner.deploys.write().await.remove(app_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::from_config(&Config::default())
    }

    #[tokio::test]
    async fn test_superseded_deploy_of_same_release() {
        let state = state();
        let first = state.begin_deploy("app_1", "v1").await;
        let second = state.begin_deploy("app_1", "v1").await;
        assert_ne!(first, second);

        state
            .finish_deploy("app_1", &first, Some(SchedulerError::Deployment("old".into())))
            .await;
        let record = state.latest_deploy("app_1").await.unwrap();
        assert_eq!(record.id, second);
        assert_eq!(record.state, DeployState::Running);

        state.finish_deploy("app_1", &second, None).await;
        let record = state.latest_deploy("app_1").await.unwrap();
        assert_eq!(record.state, DeployState::Succeeded);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_forget_deploys() {
        let state = state();
        let id = state.begin_deploy("app_1", "v1").await;
        state.forget_deploys("app_1").await;
        assert!(state.latest_deploy("app_1").await.is_none());

        // A deploy still running when its app was removed does not resurrect it.
        state.finish_deploy("app_1", &id, None).await;
        assert!(state.latest_deploy("app_1").await.is_none());
    }
}
