use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::builder::ControlPlaneSettings;

/// What to do when an existing Deployment no longer matches the cluster template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Leave the Deployment alone and log the drift.
    #[default]
    Ignore,
    /// Rewrite the operator-owned fields when the recorded template hash differs.
    Replace,
}

impl FromStr for DriftPolicy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "replace" => Ok(Self::Replace),
            other => anyhow::bail!("unknown drift policy '{other}' (expected ignore|replace)"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub namespace: Option<String>,
    pub control_plane: Option<ControlPlaneSettings>,
    pub drift_policy: Option<DriftPolicy>,
    pub reconcile_timeout_secs: Option<u64>,
    pub error_requeue_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    pub control_plane: ControlPlaneSettings,
    pub drift_policy: DriftPolicy,
    pub reconcile_timeout: Duration,
    pub error_requeue: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            control_plane: ControlPlaneSettings::default(),
            drift_policy: DriftPolicy::Ignore,
            reconcile_timeout: Duration::from_secs(30),
            error_requeue: Duration::from_secs(15),
        }
    }
}

impl OperatorConfig {
    /// File (explicit path, else the default location if present), then env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file_cfg = match explicit {
            Some(path) => read_file(path)?,
            None => {
                let path = config_file_path();
                debug!(path=?path, exists=path.exists(), "config.load.attempt");
                if path.exists() { read_file(&path)? } else { FileConfig::default() }
            }
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_file(file: FileConfig) -> Self {
        let d = Self::default();
        Self {
            namespace: file.namespace.filter(|ns| !ns.is_empty()),
            control_plane: file.control_plane.unwrap_or(d.control_plane),
            drift_policy: file.drift_policy.unwrap_or(d.drift_policy),
            reconcile_timeout: file.reconcile_timeout_secs.map(Duration::from_secs).unwrap_or(d.reconcile_timeout),
            error_requeue: file.error_requeue_secs.map(Duration::from_secs).unwrap_or(d.error_requeue),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(ns) = env_nonempty("WORKER_OPERATOR_NAMESPACE") { self.namespace = Some(ns); }
        if let Some(addr) = env_nonempty("WORKER_OPERATOR_CONTROLLER_ADDR") { self.control_plane.addr = addr; }
        if let Some(auth) = env_nonempty("WORKER_OPERATOR_CONTROLLER_AUTH") { self.control_plane.auth = auth; }
        if let Some(p) = env_nonempty("WORKER_OPERATOR_DRIFT_POLICY") {
            self.drift_policy = p.parse().context("WORKER_OPERATOR_DRIFT_POLICY")?;
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> { std::env::var(key).ok().filter(|v| !v.is_empty()) }

fn read_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("read config {path:?}"))?;
    let cfg = toml::from_str(&content).with_context(|| format!("failed to parse config {path:?}"))?;
    debug!(path=?path, "config.parse.success");
    Ok(cfg)
}

pub fn config_dir() -> PathBuf { dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("worker-operator") }
pub fn config_file_path() -> PathBuf { config_dir().join("config.toml") }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_policy_parses() {
        assert_eq!("Replace".parse::<DriftPolicy>().unwrap(), DriftPolicy::Replace);
        assert_eq!(" ignore ".parse::<DriftPolicy>().unwrap(), DriftPolicy::Ignore);
        assert!("rewrite".parse::<DriftPolicy>().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file: FileConfig = toml::from_str("drift_policy = \"replace\"\n[control_plane]\naddr = \"0.0.0.0:9090\"\n").unwrap();
        let cfg = OperatorConfig::from_file(file);
        assert_eq!(cfg.drift_policy, DriftPolicy::Replace);
        assert_eq!(cfg.control_plane.addr, "0.0.0.0:9090");
        assert_eq!(cfg.control_plane.auth, "worker:worker");
        assert_eq!(cfg.reconcile_timeout, Duration::from_secs(30));
        assert!(cfg.namespace.is_none());
    }
}
