//! In-memory scheduler backend.
//!
//! `MemoryScheduler` keeps desired state and simulated instances in memory.
//! It narrates deployments the way a real backend would and is used for
//! development and tests. One-off processes are delegated to a [`Runner`],
//! which is [`DisabledRunner`] unless one is supplied.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use berth_sslcert::CertManager;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::app::{App, Instance, Process};
use crate::context::Context;
use crate::error::{Result, SchedulerError};
use crate::exposure::HttpsExposure;
use crate::local::DisabledRunner;
use crate::scheduler::{Runner, Scheduler};
use crate::status::{Status, StatusStream};

/// State reported for simulated instances.
pub const RUNNING: &str = "RUNNING";

struct AppRecord {
    release: String,
    processes: BTreeMap<String, ProcessRecord>,
}

struct ProcessRecord {
    process: Arc<Process>,
    instances: Vec<Instance>,
}

/// Work computed for one process before any state changes.
struct PlannedProcess {
    process: Arc<Process>,
    cert_arn: Option<String>,
}

/// In-memory scheduler.
pub struct MemoryScheduler {
    runner: Arc<dyn Runner>,
    certs: Option<Arc<dyn CertManager>>,
    failing_images: HashSet<String>,
    apps: RwLock<HashMap<String, AppRecord>>,
    instance_counter: AtomicU64,
}

impl MemoryScheduler {
    /// Create an empty scheduler that refuses one-off processes.
    pub fn new() -> Self {
        Self {
            runner: Arc::new(DisabledRunner),
            certs: None,
            failing_images: HashSet::new(),
            apps: RwLock::new(HashMap::new()),
            instance_counter: AtomicU64::new(0),
        }
    }

    /// Use `runner` for one-off processes.
    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = runner;
        self
    }

    /// Resolve HTTPS certificates through `certs`. Without a certificate
    /// manager, HTTPS exposures are rejected.
    pub fn with_cert_manager(mut self, certs: Arc<dyn CertManager>) -> Self {
        self.certs = Some(certs);
        self
    }

    /// Fail every deployment of `image` as if it could not be pulled.
    pub fn with_failing_image(mut self, image: impl Into<String>) -> Self {
        self.failing_images.insert(image.into());
        self
    }

    /// Desired instance count last submitted for a process.
    pub async fn desired_instances(&self, app_id: &str, process_type: &str) -> Option<u32> {
        let apps = self.apps.read().await;
        apps.get(app_id)
            .and_then(|record| record.processes.get(process_type))
            .map(|record| record.process.instances)
    }

    fn next_instance(&self, process: &Arc<Process>) -> Instance {
        let n = self.instance_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Instance {
            process: process.clone(),
            id: format!("i-{n:08x}"),
            state: RUNNING.to_string(),
            updated_at: Utc::now(),
        }
    }

    async fn narrate(&self, ctx: &Context, stream: &dyn StatusStream, message: String) {
        if let Err(e) = stream.publish(ctx, Status::new(message)).await {
            warn!(error = %e, "Failed to publish deployment status");
        }
    }

    /// Check every process and resolve external references. Nothing is
    /// changed if this fails.
    async fn plan(&self, ctx: &Context, app: &App, stream: &dyn StatusStream) -> Result<Vec<PlannedProcess>> {
        let mut planned = Vec::with_capacity(app.processes.len());

        for process in &app.processes {
            ctx.check()?;

            let exists = {
                let apps = self.apps.read().await;
                apps.get(&app.id)
                    .is_some_and(|record| record.processes.contains_key(&process.process_type))
            };
            let verb = if exists { "updating" } else { "creating" };
            self.narrate(ctx, stream, format!("{verb} {}", process.process_type)).await;

            let image = process.image.to_string();
            if self.failing_images.contains(&image) {
                return Err(SchedulerError::Deployment(format!("image pull failed: {image}")));
            }

            let cert_arn = match &process.exposure {
                Some(exposure) => match exposure.kind.downcast_ref::<HttpsExposure>() {
                    Some(https) => Some(self.resolve_cert(process, &https.cert).await?),
                    None => None,
                },
                None => None,
            };
            if let Some(arn) = &cert_arn {
                self.narrate(ctx, stream, format!("{}: using certificate {arn}", process.process_type))
                    .await;
            }

            planned.push(PlannedProcess {
                process: Arc::new(process.clone()),
                cert_arn,
            });
        }

        Ok(planned)
    }

    async fn resolve_cert(&self, process: &Process, cert: &str) -> Result<String> {
        let Some(certs) = &self.certs else {
            return Err(SchedulerError::UnsupportedExposure(format!(
                "process {} requests https but no certificate manager is configured",
                process.process_type
            )));
        };
        let metadata = certs
            .metadata(cert)
            .await
            .map_err(|e| SchedulerError::Deployment(format!("certificate {cert}: {e}")))?;
        Ok(metadata.arn)
    }

    /// Converge stored state to `planned`. Returns `(type, running, desired)`
    /// per process.
    async fn apply(&self, app: &App, planned: Vec<PlannedProcess>) -> Vec<(String, usize, u32)> {
        let mut apps = self.apps.write().await;
        let record = apps.entry(app.id.clone()).or_insert_with(|| AppRecord {
            release: app.release.clone(),
            processes: BTreeMap::new(),
        });

        let rolled = record.release != app.release;
        record.release = app.release.clone();

        let wanted: HashSet<&str> = planned.iter().map(|p| p.process.process_type.as_str()).collect();
        record.processes.retain(|process_type, _| {
            let keep = wanted.contains(process_type.as_str());
            if !keep {
                info!(app_id = %app.id, process_type = %process_type, "Removing process");
            }
            keep
        });

        let mut summary = Vec::with_capacity(planned.len());
        for PlannedProcess { process, cert_arn } in planned {
            let desired = process.instances;
            let process_type = process.process_type.clone();

            let entry = record
                .processes
                .entry(process_type.clone())
                .or_insert_with(|| ProcessRecord {
                    process: process.clone(),
                    instances: Vec::new(),
                });

            if rolled {
                entry.instances.clear();
            }
            entry.instances.truncate(desired as usize);
            while entry.instances.len() < desired as usize {
                entry.instances.push(self.next_instance(&process));
            }
            for instance in &mut entry.instances {
                instance.process = process.clone();
            }
            entry.process = process;

            debug!(
                app_id = %app.id,
                process_type = %process_type,
                desired,
                cert_arn = ?cert_arn,
                "Process converged"
            );
            summary.push((process_type, entry.instances.len(), desired));
        }

        summary
    }

    async fn converge(&self, ctx: &Context, app: &App, stream: &dyn StatusStream) -> Result<()> {
        let planned = self.plan(ctx, app, stream).await?;
        ctx.check()?;

        for (process_type, running, desired) in self.apply(app, planned).await {
            self.narrate(ctx, stream, format!("{process_type}: {running}/{desired} running"))
                .await;
        }
        Ok(())
    }
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for MemoryScheduler {
    async fn run(
        &self,
        ctx: &Context,
        app: &App,
        process: &Process,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        self.runner.run(ctx, app, process, input, output).await
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn submit(&self, ctx: &Context, app: &App, stream: Arc<dyn StatusStream>) -> Result<()> {
        info!(app_id = %app.id, app = %app.name, release = %app.release, "Submitting app");

        if let Err(e) = app.validate().and_then(|_| ctx.check()) {
            stream.done(Err(e.clone()));
            return Err(e);
        }

        match self.converge(ctx, app, stream.as_ref()).await {
            Ok(()) => {
                info!(app_id = %app.id, release = %app.release, "App converged");
                stream.done(Ok(()));
                Ok(())
            }
            Err(e) if e.is_cancellation() || matches!(e, SchedulerError::UnsupportedExposure(_)) => {
                warn!(app_id = %app.id, error = %e, "Submit aborted");
                stream.done(Err(e.clone()));
                Err(e)
            }
            Err(e) => {
                warn!(app_id = %app.id, release = %app.release, error = %e, "Deployment failed");
                stream.done(Err(e));
                Ok(())
            }
        }
    }

    async fn remove(&self, ctx: &Context, app_id: &str) -> Result<()> {
        ctx.check()?;
        let mut apps = self.apps.write().await;
        if apps.remove(app_id).is_some() {
            info!(app_id = %app_id, "Removed app");
        } else {
            debug!(app_id = %app_id, "Remove called for unknown app");
        }
        Ok(())
    }

    async fn instances(&self, ctx: &Context, app_id: &str) -> Result<Vec<Instance>> {
        ctx.check()?;
        let apps = self.apps.read().await;
        let record = apps
            .get(app_id)
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))?;
        Ok(record
            .processes
            .values()
            .flat_map(|p| p.instances.iter().cloned())
            .collect())
    }

    async fn stop(&self, ctx: &Context, instance_id: &str) -> Result<()> {
        ctx.check()?;
        let mut apps = self.apps.write().await;
        for (app_id, record) in apps.iter_mut() {
            for process in record.processes.values_mut() {
                if let Some(slot) = process.instances.iter_mut().find(|i| i.id == instance_id) {
                    let replacement = self.next_instance(&process.process);
                    info!(
                        app_id = %app_id,
                        instance_id = %instance_id,
                        replacement = %replacement.id,
                        "Stopped instance"
                    );
                    *slot = replacement;
                    return Ok(());
                }
            }
        }
        Err(SchedulerError::InstanceNotFound(instance_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::Exposure;
    use crate::image::Image;
    use crate::status::JsonLinesStatusStream;

    fn app(instances: u32) -> App {
        App::new("app_1", "acme", "v1").with_process(
            Process::new("web", Image::new("acme/web"))
                .with_instances(instances)
                .with_exposure(Exposure::http(true)),
        )
    }

    async fn submit(scheduler: &MemoryScheduler, app: &App) -> Result<()> {
        let stream: Arc<dyn StatusStream> = Arc::new(JsonLinesStatusStream::new(Vec::new()));
        scheduler.submit(&Context::new(), app, stream.clone()).await?;
        stream.wait().await;
        match stream.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[tokio::test]
    async fn test_scale_up_and_down() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();

        submit(&scheduler, &app(3)).await.unwrap();
        assert_eq!(scheduler.instances(&ctx, "app_1").await.unwrap().len(), 3);

        submit(&scheduler, &app(1)).await.unwrap();
        assert_eq!(scheduler.instances(&ctx, "app_1").await.unwrap().len(), 1);
        assert_eq!(scheduler.desired_instances("app_1", "web").await, Some(1));
    }

    #[tokio::test]
    async fn test_resubmit_keeps_instances() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();

        submit(&scheduler, &app(2)).await.unwrap();
        let mut before: Vec<_> = scheduler.instances(&ctx, "app_1").await.unwrap().into_iter().map(|i| i.id).collect();
        submit(&scheduler, &app(2)).await.unwrap();
        let mut after: Vec<_> = scheduler.instances(&ctx, "app_1").await.unwrap().into_iter().map(|i| i.id).collect();

        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_new_release_replaces_instances() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();

        submit(&scheduler, &app(1)).await.unwrap();
        let before = scheduler.instances(&ctx, "app_1").await.unwrap();

        let mut next = app(1);
        next.release = "v2".into();
        submit(&scheduler, &next).await.unwrap();
        let after = scheduler.instances(&ctx, "app_1").await.unwrap();

        assert_eq!(after.len(), 1);
        assert_ne!(before[0].id, after[0].id);
    }

    #[tokio::test]
    async fn test_dropped_process_is_removed() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();

        let both = app(1).with_process(Process::new("worker", Image::new("acme/web")));
        submit(&scheduler, &both).await.unwrap();
        assert_eq!(scheduler.instances(&ctx, "app_1").await.unwrap().len(), 2);

        submit(&scheduler, &app(1)).await.unwrap();
        let instances = scheduler.instances(&ctx, "app_1").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].process.process_type, "web");
        assert_eq!(scheduler.desired_instances("app_1", "worker").await, None);
    }

    #[tokio::test]
    async fn test_https_without_cert_manager() {
        let scheduler = MemoryScheduler::new();
        let app = App::new("app_1", "acme", "v1").with_process(
            Process::new("web", Image::new("acme/web")).with_exposure(Exposure::https(true, "acme")),
        );

        let stream: Arc<dyn StatusStream> = Arc::new(JsonLinesStatusStream::new(Vec::new()));
        let err = scheduler
            .submit(&Context::new(), &app, stream.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnsupportedExposure(_)));
        assert_eq!(stream.err(), Some(err));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();

        submit(&scheduler, &app(1)).await.unwrap();
        scheduler.remove(&ctx, "app_1").await.unwrap();
        scheduler.remove(&ctx, "app_1").await.unwrap();

        let err = scheduler.instances(&ctx, "app_1").await.unwrap_err();
        assert_eq!(err, SchedulerError::AppNotFound("app_1".into()));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let scheduler = MemoryScheduler::new();
        let ctx = Context::new();
        ctx.cancel();

        let stream: Arc<dyn StatusStream> = Arc::new(JsonLinesStatusStream::new(Vec::new()));
        let err = scheduler.submit(&ctx, &app(1), stream.clone()).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(stream.wait().is_ready());
        assert_eq!(stream.err(), Some(SchedulerError::Cancelled));

        assert!(scheduler.instances(&ctx, "app_1").await.unwrap_err().is_cancellation());
    }
}
