//! Host-process runner.
//!
//! Runs a process's command directly on the local host with the merged app
//! and process environment. The image is not pulled and resource limits are
//! not enforced, which makes this runner suitable for development and tests
//! only. [`DisabledRunner`] is the default wherever a runner is optional.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::app::{self, App, Process};
use crate::context::Context;
use crate::error::{Result, SchedulerError};
use crate::scheduler::Runner;

const COPY_BUF_SIZE: usize = 8 * 1024;

/// Runner that refuses to run anything.
///
/// Default runner of backends that have no isolated substrate for one-off
/// processes.
#[derive(Debug, Clone, Default)]
pub struct DisabledRunner;

#[async_trait]
impl Runner for DisabledRunner {
    async fn run(
        &self,
        _ctx: &Context,
        app: &App,
        process: &Process,
        _input: &mut (dyn AsyncRead + Send + Unpin),
        _output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        Err(SchedulerError::Unsupported(format!(
            "one-off processes are disabled (process {} of app {})",
            process.process_type, app.name
        )))
    }
}

/// Runner executing processes as host processes.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a local runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(
        &self,
        ctx: &Context,
        app: &App,
        process: &Process,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        ctx.check()?;

        let Some((program, args)) = process.command.split_first() else {
            return Err(SchedulerError::InvalidApp(format!(
                "process {} of app {} has no command",
                process.process_type, app.name
            )));
        };

        info!(
            app = %app.name,
            release = %app.release,
            process_type = %process.process_type,
            image = %process.image,
            command = ?process.command,
            "Running process"
        );
        if process.memory_limit > 0 || process.cpu_shares > 0 || process.nproc > 0 {
            debug!(
                memory_limit = process.memory_limit,
                cpu_shares = process.cpu_shares,
                nproc = process.nproc,
                "Resource limits are not enforced for host processes"
            );
        }

        let mut child = Command::new(program)
            .args(args)
            .envs(app::env(app, process))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SchedulerError::Infrastructure(format!("failed to start {program}: {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let attached = async {
            let exited = async {
                drain(stdout, stderr, output).await?;
                Ok::<_, SchedulerError>(child.wait().await?)
            };
            let feeding = feed(input, stdin);
            tokio::pin!(exited, feeding);

            // Input may stay open after the process exits; stop feeding then.
            let mut fed = false;
            loop {
                tokio::select! {
                    status = &mut exited => break status,
                    result = &mut feeding, if !fed => {
                        result?;
                        fed = true;
                    }
                }
            }
        };

        // Dropping `child` on cancellation kills it.
        let status = tokio::select! {
            status = attached => status?,
            err = ctx.done() => return Err(err),
        };

        debug!(process_type = %process.process_type, status = %status, "Process exited");
        if status.success() {
            Ok(())
        } else {
            Err(SchedulerError::ExitStatus(status.code()))
        }
    }
}

async fn feed(input: &mut (dyn AsyncRead + Send + Unpin), stdin: Option<ChildStdin>) -> Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match tokio::io::copy(input, &mut stdin).await {
        Ok(_) => {}
        // The process exited without reading all of its input.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Err(e) => return Err(e.into()),
    }
    // Closing stdin delivers EOF.
    drop(stdin);
    Ok(())
}

async fn drain(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    output: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<()> {
    let mut out_done = stdout.is_none();
    let mut err_done = stderr.is_none();
    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut out_buf = vec![0u8; COPY_BUF_SIZE];
    let mut err_buf = vec![0u8; COPY_BUF_SIZE];

    while !(out_done && err_done) {
        tokio::select! {
            n = read_some(&mut stdout, &mut out_buf), if !out_done => {
                let n = n?;
                if n == 0 {
                    out_done = true;
                } else {
                    output.write_all(&out_buf[..n]).await?;
                }
            }
            n = read_some(&mut stderr, &mut err_buf), if !err_done => {
                let n = n?;
                if n == 0 {
                    err_done = true;
                } else {
                    output.write_all(&err_buf[..n]).await?;
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}
