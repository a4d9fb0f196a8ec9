//! Desired-state data model for a deployable app.
//!
//! Values here are plain data, constructed fresh by the caller for every
//! operation. They carry no backend state.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::exposure::Exposure;
use crate::image::Image;

/// A release of an app: every process that should be running.
#[derive(Debug, Clone)]
pub struct App {
    /// Stable identifier of the app.
    pub id: String,

    /// Identifier of the deployed version.
    pub release: String,

    /// Name of the app.
    pub name: String,

    /// App-wide environment.
    pub env: BTreeMap<String, String>,

    /// App-wide labels.
    pub labels: BTreeMap<String, String>,

    /// Processes belonging to this app, addressed by type.
    pub processes: Vec<Process>,
}

impl App {
    /// Create an app with no environment, labels or processes.
    pub fn new(id: impl Into<String>, name: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            release: release.into(),
            name: name.into(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            processes: Vec::new(),
        }
    }

    /// Add a process.
    pub fn with_process(mut self, process: Process) -> Self {
        self.processes.push(process);
        self
    }

    /// Look up a process by type.
    pub fn process(&self, process_type: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.process_type == process_type)
    }

    /// Check that process types are non-empty and unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for process in &self.processes {
            if process.process_type.is_empty() {
                return Err(SchedulerError::InvalidApp(format!(
                    "app {} has a process with an empty type",
                    self.name
                )));
            }
            if !seen.insert(process.process_type.as_str()) {
                return Err(SchedulerError::InvalidApp(format!(
                    "app {} has duplicate process type {}",
                    self.name, process.process_type
                )));
            }
        }
        Ok(())
    }
}

/// A single role within an app.
#[derive(Debug, Clone)]
pub struct Process {
    /// Role name, e.g. `web` or `worker`.
    pub process_type: String,

    /// Image to run.
    pub image: Image,

    /// Argument vector to execute.
    pub command: Vec<String>,

    /// Process-level environment overrides.
    pub env: BTreeMap<String, String>,

    /// Process-level label overrides.
    pub labels: BTreeMap<String, String>,

    /// Inbound traffic settings. `None` means no inbound traffic.
    pub exposure: Option<Exposure>,

    /// Desired number of replicas.
    pub instances: u32,

    /// Memory limit in bytes.
    pub memory_limit: u64,

    /// Relative CPU weight, conventionally out of 1024.
    pub cpu_shares: u32,

    /// Maximum number of OS processes/threads (`ulimit -u`).
    pub nproc: u32,
}

impl Process {
    /// Create a process with a single instance and no limits.
    pub fn new(process_type: impl Into<String>, image: Image) -> Self {
        Self {
            process_type: process_type.into(),
            image,
            command: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            exposure: None,
            instances: 1,
            memory_limit: 0,
            cpu_shares: 0,
            nproc: 0,
        }
    }

    /// Set the command.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the desired instance count.
    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }

    /// Set the exposure.
    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.exposure = Some(exposure);
        self
    }
}

/// One running replica of a process, as observed from a backend.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Process this instance belongs to.
    pub process: Arc<Process>,

    /// Runtime-assigned ID.
    pub id: String,

    /// Backend-defined state, e.g. `RUNNING`.
    pub state: String,

    /// When this instance was last observed.
    pub updated_at: DateTime<Utc>,
}

/// Merge the app environment with the process environment. Process values
/// win on collision.
pub fn env(app: &App, process: &Process) -> BTreeMap<String, String> {
    merge(&app.env, &process.env)
}

/// Merge the app labels with the process labels. Process values win on
/// collision.
pub fn labels(app: &App, process: &Process) -> BTreeMap<String, String> {
    merge(&app.labels, &process.labels)
}

fn merge(left: &BTreeMap<String, String>, right: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = left.clone();
    merged.extend(right.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
