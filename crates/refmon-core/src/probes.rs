//! Interception probe table.
//!
//! The core does not install hooks itself. It owns a fixed table of
//! `{operation, hook symbol}` registrations and tells the installation layer,
//! through [`ProbeControl`], to enable or disable the whole batch whenever the
//! monitor moves between enforcing and non-enforcing states.

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FsOperation {
    Open,
    Write,
    Create,
    Unlink,
    Rename,
    Mkdir,
    Rmdir,
    Link,
    Symlink,
    Lseek,
}

impl FsOperation {
    pub const ALL: [FsOperation; 10] = [
        FsOperation::Open,
        FsOperation::Write,
        FsOperation::Create,
        FsOperation::Unlink,
        FsOperation::Rename,
        FsOperation::Mkdir,
        FsOperation::Rmdir,
        FsOperation::Link,
        FsOperation::Symlink,
        FsOperation::Lseek,
    ];

    /// Kernel symbol the probe for this operation attaches to by default.
    pub fn default_symbol(self) -> &'static str {
        match self {
            FsOperation::Open => "vfs_open",
            FsOperation::Write => "vfs_write",
            FsOperation::Create => "security_inode_create",
            FsOperation::Unlink => "security_inode_unlink",
            FsOperation::Rename => "security_inode_rename",
            FsOperation::Mkdir => "security_inode_mkdir",
            FsOperation::Rmdir => "security_inode_rmdir",
            FsOperation::Link => "security_inode_link",
            FsOperation::Symlink => "security_inode_symlink",
            FsOperation::Lseek => "vfs_llseek",
        }
    }

    /// Operations carrying a second path that is checked as well.
    pub fn has_secondary_path(self) -> bool {
        matches!(self, FsOperation::Rename | FsOperation::Link)
    }
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsOperation::Open => "open",
            FsOperation::Write => "write",
            FsOperation::Create => "create",
            FsOperation::Unlink => "unlink",
            FsOperation::Rename => "rename",
            FsOperation::Mkdir => "mkdir",
            FsOperation::Rmdir => "rmdir",
            FsOperation::Link => "link",
            FsOperation::Symlink => "symlink",
            FsOperation::Lseek => "lseek",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeRegistration {
    pub op: FsOperation,
    pub symbol: String,
}

/// Build the registration table, one entry per operation, applying any
/// symbol overrides from the settings.
pub fn registrations(overrides: &HashMap<FsOperation, String>) -> Vec<ProbeRegistration> {
    FsOperation::ALL
        .iter()
        .map(|op| ProbeRegistration {
            op: *op,
            symbol: overrides
                .get(op)
                .cloned()
                .unwrap_or_else(|| op.default_symbol().to_string()),
        })
        .collect()
}

/// The interception-installation layer, as seen by the core.
pub trait ProbeControl {
    fn enable(&self, probes: &[ProbeRegistration]) -> Result<()>;
    fn disable(&self, probes: &[ProbeRegistration]) -> Result<()>;
}

/// Installation layer that only records transitions in the service log.
/// Used when hooks are driven externally through the `Intercept` request.
#[derive(Debug, Default)]
pub struct LoggedProbes;

impl ProbeControl for LoggedProbes {
    fn enable(&self, probes: &[ProbeRegistration]) -> Result<()> {
        info!(count = probes.len(), "interception probes enabled");
        Ok(())
    }

    fn disable(&self, probes: &[ProbeRegistration]) -> Result<()> {
        info!(count = probes.len(), "interception probes disabled");
        Ok(())
    }
}

/// Batch enable/disable over the registration table.
///
/// `sync` is idempotent: the installation layer is only called when the
/// requested direction differs from the last one that succeeded.
pub struct ProbeTable {
    registrations: Vec<ProbeRegistration>,
    control: Arc<dyn ProbeControl + Send + Sync>,
    enabled: Mutex<bool>,
}

impl ProbeTable {
    pub fn new(
        registrations: Vec<ProbeRegistration>,
        control: Arc<dyn ProbeControl + Send + Sync>,
    ) -> Self {
        Self {
            registrations,
            control,
            enabled: Mutex::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }

    /// Bring the probes in line with `enforcing`. Failures are logged and
    /// leave the recorded direction unchanged so the next call retries.
    pub fn sync(&self, enforcing: bool) {
        let mut enabled = self.enabled.lock();
        if *enabled == enforcing {
            debug!(enforcing, "probe table already in requested state");
            return;
        }
        let result = if enforcing {
            self.control.enable(&self.registrations)
        } else {
            self.control.disable(&self.registrations)
        };
        match result {
            Ok(()) => *enabled = enforcing,
            Err(e) => error!(enforcing, error = %e, "probe toggling failed"),
        }
    }
}

impl fmt::Debug for ProbeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeTable")
            .field("registrations", &self.registrations.len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
