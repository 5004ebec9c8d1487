//! Turns an intercepted filesystem call into an allow/deny verdict.
//!
//! The decision runs synchronously in the context that trapped the call, so
//! it only takes the monitor lock briefly and never performs I/O. Audit work
//! for a denial is handed off to an [`AuditSink`] and never awaited.

use crate::identity::CallerIdentity;
use crate::matcher;
use crate::monitor::ReferenceMonitor;
use crate::probes::FsOperation;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Raw `open(2)` flags of an intercepted open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(libc::O_RDONLY);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(libc::O_WRONLY);
    pub const READ_WRITE: OpenFlags = OpenFlags(libc::O_RDWR);

    pub fn with(self, extra: i32) -> Self {
        OpenFlags(self.0 | extra)
    }

    /// Opens that can modify the target: write or read-write access, or
    /// any of create, append, truncate. Pure reads are never checked.
    pub fn may_modify(self) -> bool {
        let access = self.0 & libc::O_ACCMODE;
        access == libc::O_WRONLY
            || access == libc::O_RDWR
            || self.0 & (libc::O_CREAT | libc::O_APPEND | libc::O_TRUNC) != 0
    }
}

/// Everything the interception layer knows about one trapped call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptedCall {
    pub op: FsOperation,
    pub path: String,
    /// New path for rename and link.
    #[serde(default)]
    pub secondary_path: Option<String>,
    #[serde(default)]
    pub open_flags: Option<OpenFlags>,
    /// Working directory of the caller, for relative paths.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    pub caller: CallerIdentity,
}

impl InterceptedCall {
    pub fn new(op: FsOperation, path: impl Into<String>, caller: CallerIdentity) -> Self {
        Self {
            op,
            path: path.into(),
            secondary_path: None,
            open_flags: None,
            cwd: None,
            caller,
        }
    }

    pub fn open(path: impl Into<String>, flags: OpenFlags, caller: CallerIdentity) -> Self {
        Self {
            open_flags: Some(flags),
            ..Self::new(FsOperation::Open, path, caller)
        }
    }

    pub fn with_secondary(mut self, path: impl Into<String>) -> Self {
        self.secondary_path = Some(path.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_denied(self) -> bool {
        self == Verdict::Deny
    }

    /// Errno the trapped call must fail with, or 0 to let it proceed.
    pub fn errno(self) -> i32 {
        match self {
            Verdict::Allow => 0,
            Verdict::Deny => libc::EACCES,
        }
    }
}

/// Receives one request per denied access. Must not block.
pub trait AuditSink {
    fn schedule(&self, identity: CallerIdentity);
}

pub struct InterceptionDispatcher {
    monitor: Arc<ReferenceMonitor>,
    audit: Arc<dyn AuditSink + Send + Sync>,
}

impl InterceptionDispatcher {
    pub fn new(monitor: Arc<ReferenceMonitor>, audit: Arc<dyn AuditSink + Send + Sync>) -> Self {
        Self { monitor, audit }
    }

    pub fn monitor(&self) -> &Arc<ReferenceMonitor> {
        &self.monitor
    }

    /// Verdict for `call`, without side effects.
    pub fn decide(&self, call: &InterceptedCall) -> Verdict {
        if call.op == FsOperation::Open {
            if let Some(flags) = call.open_flags {
                if !flags.may_modify() {
                    return Verdict::Allow;
                }
            }
        }

        let cwd = call.cwd.as_deref();
        let primary = candidate(&call.path, cwd);
        let secondary = match (&call.secondary_path, call.op.has_secondary_path()) {
            (Some(p), true) => Some(candidate(p, cwd)),
            _ => None,
        };
        // A blacklisted parent is a prefix of the target, so checking the
        // target also covers deletes inside a protected directory.
        let protected = match secondary.as_deref() {
            Some(s) => self.monitor.any_protected(&[primary.as_ref(), s]),
            None => self.monitor.any_protected(&[primary.as_ref()]),
        };
        if protected {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }

    /// Decide and, on denial, schedule exactly one audit record.
    pub fn dispatch(&self, call: InterceptedCall) -> Verdict {
        let verdict = self.decide(&call);
        if verdict.is_denied() {
            warn!(
                op = %call.op,
                path = %call.path,
                tid = call.caller.tid,
                euid = call.caller.euid,
                "access to protected path blocked"
            );
            self.audit.schedule(call.caller);
        }
        verdict
    }
}

/// Absolute, already-normal paths are borrowed; anything else is normalised.
fn candidate<'a>(path: &'a str, cwd: Option<&std::path::Path>) -> Cow<'a, str> {
    let needs_work = !path.starts_with(matcher::SEPARATOR)
        || path.contains("//")
        || path.contains("/./")
        || path.contains("/../")
        || path.ends_with("/.")
        || path.ends_with("/..");
    if needs_work {
        Cow::Owned(matcher::normalize(path, cwd))
    } else {
        Cow::Borrowed(path)
    }
}
