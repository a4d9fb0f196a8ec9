use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;

/// Scheduler backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    /// In-memory backend.
    Memory,
}

impl FromStr for SchedulerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            other => bail!("unknown scheduler backend: {other}"),
        }
    }
}

/// Where one-off processes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerBackend {
    /// One-off processes are refused.
    #[default]
    Disabled,
    /// Commands run unisolated on the control plane's host.
    Local,
}

impl FromStr for RunnerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "" => Ok(Self::Disabled),
            "local" => Ok(Self::Local),
            other => bail!("unknown runner: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub scheduler: SchedulerBackend,
    pub runner: RunnerBackend,
    pub submit_timeout: Duration,
    pub cert_path: String,
    /// Browser origins allowed by CORS. Empty disables CORS.
    pub allowed_origins: Vec<HeaderValue>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let listen_addr = match lookup("BERTH_LISTEN_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid BERTH_LISTEN_ADDR: {addr}"))?,
            None => defaults.listen_addr,
        };

        let log_level = lookup("BERTH_LOG_LEVEL").unwrap_or(defaults.log_level);

        let scheduler = match lookup("BERTH_SCHEDULER") {
            Some(s) => s.parse()?,
            None => defaults.scheduler,
        };

        let runner = match lookup("BERTH_RUNNER") {
            Some(s) => s.parse()?,
            None => defaults.runner,
        };

        let submit_timeout = match lookup("BERTH_SUBMIT_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse()
                .map(Duration::from_secs)
                .with_context(|| format!("invalid BERTH_SUBMIT_TIMEOUT_SECS: {secs}"))?,
            None => defaults.submit_timeout,
        };

        let cert_path = lookup("BERTH_CERT_PATH").unwrap_or(defaults.cert_path);

        let allowed_origins = match lookup("BERTH_ALLOWED_ORIGINS") {
            Some(origins) => parse_origins(&origins)?,
            None => defaults.allowed_origins,
        };

        Ok(Self {
            listen_addr,
            log_level,
            scheduler,
            runner,
            submit_timeout,
            cert_path,
            allowed_origins,
        })
    }
}

/// Parse a comma-separated origin list. Wildcards are rejected.
fn parse_origins(origins: &str) -> Result<Vec<HeaderValue>> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            if origin == "*" {
                bail!("BERTH_ALLOWED_ORIGINS must list origins explicitly");
            }
            HeaderValue::from_str(origin).with_context(|| format!("invalid origin: {origin}"))
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            scheduler: SchedulerBackend::Memory,
            runner: RunnerBackend::Disabled,
            submit_timeout: Duration::from_secs(600),
            cert_path: "/berth/".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("memory".parse::<SchedulerBackend>().unwrap(), SchedulerBackend::Memory);
        assert_eq!(" Memory ".parse::<SchedulerBackend>().unwrap(), SchedulerBackend::Memory);
        assert!("ecs".parse::<SchedulerBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.runner, RunnerBackend::Disabled);
        assert_eq!(config.submit_timeout, Duration::from_secs(600));
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_runner_opt_in() {
        let config = config(&[("BERTH_RUNNER", "local")]).unwrap();
        assert_eq!(config.runner, RunnerBackend::Local);
        assert!("docker".parse::<RunnerBackend>().is_err());
    }

    #[test]
    fn test_submit_timeout() {
        let config = config(&[("BERTH_SUBMIT_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_submit_timeout_is_an_error() {
        let err = config(&[("BERTH_SUBMIT_TIMEOUT_SECS", "10m")]).unwrap_err();
        assert!(err.to_string().contains("BERTH_SUBMIT_TIMEOUT_SECS"));
        assert!(config(&[("BERTH_SUBMIT_TIMEOUT_SECS", "-1")]).is_err());
    }

    #[test]
    fn test_allowed_origins() {
        let config = config(&[(
            "BERTH_ALLOWED_ORIGINS",
            "https://console.acme.test, https://ops.acme.test,",
        )])
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec![
                HeaderValue::from_static("https://console.acme.test"),
                HeaderValue::from_static("https://ops.acme.test"),
            ]
        );
    }

    #[test]
    fn test_wildcard_origin_is_rejected() {
        assert!(config(&[("BERTH_ALLOWED_ORIGINS", "*")]).is_err());
    }
}
