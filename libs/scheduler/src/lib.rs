//! # berth-scheduler
//!
//! The contract between the berth control plane and the cluster backends
//! that run apps.
//!
//! ## Overview
//!
//! - [`App`], [`Process`] and [`Exposure`] describe one release's desired
//!   state; [`Instance`] is a runtime observation.
//! - [`Scheduler`] is implemented once per backend. Backends are selected by
//!   configuration and used as `Arc<dyn Scheduler>`.
//! - [`StatusStream`] narrates a [`Scheduler::submit`] call to the caller and
//!   carries its final outcome.
//!
//! ```text
//! control plane                      backend task
//! -------------                      ------------
//! stream = JsonLinesStatusStream(w)
//! submit(ctx, app, stream) --------> publish("creating web")
//!                                    publish("web: 2/2 running")
//! stream.wait().await <------------- done(Ok(()))
//! stream.err()
//! ```
//!
//! ## Modules
//!
//! - `app`: data model and env/label merging
//! - `exposure`: exposure kinds (`http`, `https`)
//! - `status`: status streaming
//! - `scheduler`: the `Runner` and `Scheduler` traits
//! - `local`: host-process runner
//! - `memory`: in-memory backend

pub mod app;
pub mod context;
mod error;
pub mod exposure;
pub mod image;
pub mod local;
pub mod memory;
pub mod scheduler;
pub mod status;

pub use app::{App, Instance, Process};
pub use context::Context;
pub use error::{Result, SchedulerError};
pub use exposure::{Exposure, ExposureType, HttpExposure, HttpsExposure};
pub use image::{Image, ImageError};
pub use local::{DisabledRunner, LocalRunner};
pub use memory::MemoryScheduler;
pub use scheduler::{Runner, Scheduler};
pub use status::{DoneSignal, JsonLinesStatusStream, Status, StatusRecord, StatusStream, CONTENT_TYPE};
