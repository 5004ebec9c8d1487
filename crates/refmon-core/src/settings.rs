use crate::paths;
use crate::probes::FsOperation;
use crate::state::MonitorState;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Service configuration. Every field has a default, so a partial file (or
/// none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorSettings {
    pub initial_state: MonitorState,
    /// Effective uid allowed to run management operations.
    pub admin_euid: u32,
    pub log_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    /// Per-operation override of the hook symbol.
    pub probe_symbols: HashMap<FsOperation, String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            initial_state: MonitorState::On,
            admin_euid: 0,
            log_path: None,
            socket_path: None,
            probe_symbols: HashMap::new(),
        }
    }
}

impl MonitorSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let settings = serde_json::from_str(&data)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        Ok(settings)
    }

    /// Load `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn resolved_log_path(&self) -> Result<PathBuf> {
        match &self.log_path {
            Some(p) => Ok(p.clone()),
            None => paths::audit_log_path(),
        }
    }

    pub fn resolved_socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(p) => Ok(p.clone()),
            None => paths::ipc_socket_path(),
        }
    }
}
