//! The backend contract.
//!
//! A backend is any type implementing [`Scheduler`] over some cluster
//! substrate. Backends are selected by configuration at process start and
//! used behind `Arc<dyn Scheduler>`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::app::{App, Instance, Process};
use crate::context::Context;
use crate::error::Result;
use crate::status::StatusStream;

/// Runs one-off processes.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `process` once, attached to `input` and `output`.
    ///
    /// Returns when the process exits. Standard output and standard error
    /// are both written to `output`.
    async fn run(
        &self,
        ctx: &Context,
        app: &App,
        process: &Process,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;
}

/// Deploys and controls apps on a cluster.
#[async_trait]
pub trait Scheduler: Runner {
    /// Create `app`, or converge it to the given desired state if it exists.
    ///
    /// Progress is published to `stream`, and `stream.done` is called exactly
    /// once. An `Err` return means the deployment could not be started; the
    /// deployment's own outcome is reported through the stream.
    async fn submit(&self, ctx: &Context, app: &App, stream: Arc<dyn StatusStream>) -> Result<()>;

    /// Remove the app and all of its processes. Removing an unknown app is
    /// not an error.
    async fn remove(&self, ctx: &Context, app_id: &str) -> Result<()>;

    /// List the running instances of an app, in no particular order.
    async fn instances(&self, ctx: &Context, app_id: &str) -> Result<Vec<Instance>>;

    /// Stop one instance. The backend starts a replacement; desired state is
    /// unchanged.
    async fn stop(&self, ctx: &Context, instance_id: &str) -> Result<()>;
}
