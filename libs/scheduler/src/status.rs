//! Status streaming for in-flight deployments.
//!
//! A [`StatusStream`] narrates a [`Scheduler::submit`](crate::Scheduler::submit)
//! call. The backend publishes zero or more human readable [`Status`] lines
//! and then finalizes the stream exactly once with the deployment outcome.
//! Consumers wait on [`StatusStream::wait`] and read [`StatusStream::err`]
//! once it is ready.
//!
//! ## Lifecycle
//!
//! ```text
//! Open --done(result)--> Closed(result)
//! ```
//!
//! - `publish` while open writes one record to the sink.
//! - `publish` once closed is a no-op that returns `Ok(())` and logs a warning.
//! - `done` once closed is ignored and logs a warning.
//!
//! ## Wire format
//!
//! [`JsonLinesStatusStream`] writes one JSON object per line:
//!
//! ```text
//! {"status":"creating web"}
//! {"status":"web: 2/2 running"}
//! ```
//!
//! HTTP transports should serve it with [`CONTENT_TYPE`] and flush after every
//! record. There is no terminal record; closing the body is the signal.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::warn;

use crate::context::Context;
use crate::error::{Result, SchedulerError};

/// Content type for a newline-delimited stream of status records.
pub const CONTENT_TYPE: &str = "application/json; boundary=NL";

/// A human readable progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Progress message, e.g. `web: 2/2 running`.
    pub message: String,
}

impl Status {
    /// Create a status update.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&str> for Status {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Status {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A single record on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: String,
}

impl StatusRecord {
    /// Encode as one newline-terminated JSON line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode a single line, with or without its trailing newline.
    pub fn decode_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl From<&Status> for StatusRecord {
    fn from(status: &Status) -> Self {
        Self {
            status: status.message.clone(),
        }
    }
}

/// Publishes progress while a scheduler is executing.
#[async_trait]
pub trait StatusStream: Send + Sync {
    /// Publish an update. A no-op returning `Ok(())` once the stream is done.
    async fn publish(&self, ctx: &Context, status: Status) -> Result<()>;

    /// Finalize the stream with the deployment outcome and wake all waiters.
    fn done(&self, result: Result<()>);

    /// Handle that becomes ready once [`done`](Self::done) is called.
    fn wait(&self) -> DoneSignal;

    /// Error passed to [`done`](Self::done). `None` on success and before
    /// the stream is done; read it only after [`wait`](Self::wait) is ready.
    fn err(&self) -> Option<SchedulerError>;
}

type Outcome = Option<Result<()>>;

/// Readiness handle returned by [`StatusStream::wait`].
///
/// Any number of handles can be taken, before or after the stream is done;
/// readiness is sticky. Awaiting the handle directly is equivalent to
/// [`DoneSignal::ready`].
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<Outcome>,
}

impl DoneSignal {
    /// Returns true if the stream is done.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait until the stream is done.
    ///
    /// Also resolves if the stream is dropped without being finalized.
    pub async fn ready(mut self) {
        let _ = self.rx.wait_for(Option::is_some).await;
    }
}

impl IntoFuture for DoneSignal {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.ready())
    }
}

/// Exactly-once finalization state shared by stream implementations.
///
/// The open/closed flag and the outcome live in one `watch` channel, so
/// checking for closure and closing go through the same lock.
#[derive(Debug)]
pub struct Finalizer {
    tx: watch::Sender<Outcome>,
}

impl Finalizer {
    /// Create open finalization state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Record `result` and close. Returns false if already closed, in which
    /// case `result` is discarded.
    pub fn finalize(&self, result: Result<()>) -> bool {
        self.tx.send_if_modified(|outcome| {
            if outcome.is_some() {
                return false;
            }
            *outcome = Some(result);
            true
        })
    }

    /// Returns true once closed.
    pub fn is_finalized(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Readiness handle for this state.
    pub fn signal(&self) -> DoneSignal {
        DoneSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Recorded error, if closed with one.
    pub fn err(&self) -> Option<SchedulerError> {
        self.tx
            .borrow()
            .as_ref()
            .and_then(|outcome| outcome.as_ref().err().cloned())
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Status stream writing newline-delimited JSON records to a byte sink.
pub struct JsonLinesStatusStream<W> {
    sink: Mutex<W>,
    state: Finalizer,
}

impl<W> JsonLinesStatusStream<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create an open stream around `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            state: Finalizer::new(),
        }
    }

    /// Consume the stream and return the sink.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }

    /// Shut down the sink once the stream is done.
    ///
    /// Waits for an in-flight publish to finish writing, so every record
    /// accepted before `done` reaches the sink ahead of the shutdown.
    pub async fn close(&self) -> Result<()> {
        self.state.signal().ready().await;
        let mut sink = self.sink.lock().await;
        sink.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> StatusStream for JsonLinesStatusStream<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, ctx: &Context, status: Status) -> Result<()> {
        let mut sink = self.sink.lock().await;

        if self.state.is_finalized() {
            warn!(
                request_id = ctx.request_id().unwrap_or("-"),
                status = %status,
                "Publish called on a finalized stream"
            );
            return Ok(());
        }

        let line = StatusRecord::from(&status).encode()?;
        sink.write_all(&line).await?;
        sink.flush().await?;
        Ok(())
    }

    fn done(&self, result: Result<()>) {
        if !self.state.finalize(result) {
            warn!("Done called on a finalized stream; ignoring");
        }
    }

    fn wait(&self) -> DoneSignal {
        self.state.signal()
    }

    fn err(&self) -> Option<SchedulerError> {
        self.state.err()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::task::{Context as TaskContext, Poll};
    use std::time::Duration;

    use super::*;

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn lines(buf: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(buf)
            .lines()
            .map(|line| StatusRecord::decode_line(line).unwrap().status)
            .collect()
    }

    #[tokio::test]
    async fn test_publish_in_order() {
        let ctx = Context::new();
        let stream = JsonLinesStatusStream::new(Vec::new());

        for i in 0..5 {
            stream.publish(&ctx, format!("step {i}").into()).await.unwrap();
        }
        stream.done(Ok(()));

        let buf = stream.into_inner();
        assert_eq!(
            String::from_utf8_lossy(&buf).lines().next(),
            Some(r#"{"status":"step 0"}"#)
        );
        assert_eq!(
            lines(&buf),
            vec!["step 0", "step 1", "step 2", "step 3", "step 4"]
        );
    }

    #[tokio::test]
    async fn test_done_ok() {
        let stream = JsonLinesStatusStream::new(Vec::new());
        let before = stream.wait();
        assert!(!before.is_ready());

        stream.done(Ok(()));

        before.await;
        stream.wait().await;
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn test_done_err() {
        let stream = JsonLinesStatusStream::new(Vec::new());
        stream.done(Err(SchedulerError::Deployment("image pull failed".into())));

        stream.wait().await;
        let err = stream.err().unwrap();
        assert!(err.to_string().contains("image pull failed"));
    }

    #[tokio::test]
    async fn test_publish_after_done_is_dropped() {
        let ctx = Context::new();
        let stream = JsonLinesStatusStream::new(Vec::new());

        stream.publish(&ctx, "creating web".into()).await.unwrap();
        stream.done(Ok(()));
        stream.publish(&ctx, "late".into()).await.unwrap();

        assert_eq!(lines(&stream.into_inner()), vec!["creating web"]);
    }

    #[tokio::test]
    async fn test_second_done_is_ignored() {
        let stream = JsonLinesStatusStream::new(Vec::new());
        stream.done(Err(SchedulerError::Deployment("first".into())));
        stream.done(Ok(()));
        stream.done(Err(SchedulerError::Deployment("third".into())));

        assert_eq!(
            stream.err(),
            Some(SchedulerError::Deployment("first".into()))
        );
    }

    #[tokio::test]
    async fn test_close_ends_reader() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let stream = Arc::new(JsonLinesStatusStream::new(writer));

        let closer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.close().await })
        };

        stream.publish(&Context::new(), "creating web".into()).await.unwrap();
        stream.done(Ok(()));
        closer.await.unwrap().unwrap();

        // The sink stays owned by `stream`; EOF comes from the shutdown.
        let mut buf = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(lines(buf.as_bytes()), vec!["creating web"]);
    }

    #[tokio::test]
    async fn test_write_error_is_returned() {
        let stream = JsonLinesStatusStream::new(BrokenPipe);
        let err = stream
            .publish(&Context::new(), "creating web".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Io(_)));
    }

    #[tokio::test]
    async fn test_many_waiters() {
        let stream = Arc::new(JsonLinesStatusStream::new(Vec::new()));

        let mut waiters = Vec::new();
        for _ in 0..16 {
            let signal = stream.wait();
            waiters.push(tokio::spawn(async move { signal.await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.done(Ok(()));

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter was not woken")
                .unwrap();
        }

        // Late waiters see readiness immediately.
        assert!(stream.wait().is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publish_racing_done() {
        for _ in 0..50 {
            let stream = Arc::new(JsonLinesStatusStream::new(Vec::new()));

            let publisher = {
                let stream = stream.clone();
                tokio::spawn(async move {
                    let ctx = Context::new();
                    for i in 0..20 {
                        stream.publish(&ctx, format!("step {i}").into()).await.unwrap();
                    }
                })
            };
            let finalizer = {
                let stream = stream.clone();
                tokio::spawn(async move { stream.done(Ok(())) })
            };

            publisher.await.unwrap();
            finalizer.await.unwrap();

            let stream = Arc::try_unwrap(stream).ok().unwrap();
            let written = lines(&stream.into_inner());
            assert!(written.len() <= 20);
            for (i, line) in written.iter().enumerate() {
                assert_eq!(line, &format!("step {i}"));
            }
        }
    }

    #[test]
    fn test_status_display() {
        let status = Status::from("web: 2/2 running");
        assert_eq!(status.to_string(), "web: 2/2 running");
    }
}
