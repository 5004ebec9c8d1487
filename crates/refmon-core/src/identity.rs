use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Who is asking for a management operation. Only the effective uid matters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub euid: u32,
}

impl Principal {
    pub fn new(euid: u32) -> Self {
        Self { euid }
    }

    pub fn current() -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail.
        Self::new(unsafe { libc::geteuid() })
    }
}

/// Identity of the task that triggered an intercepted call.
///
/// Captured synchronously where the call is trapped: these values are only
/// meaningful in that context, so the snapshot is copied before any deferral.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub tid: i32,
    pub tgid: i32,
    pub uid: u32,
    pub euid: u32,
    pub exe_path: String,
}

impl CallerIdentity {
    /// Snapshot of the calling thread of this process.
    pub fn current() -> Self {
        // SAFETY: these calls have no preconditions and cannot fail.
        let (tid, tgid, uid, euid) = unsafe {
            (
                libc::syscall(libc::SYS_gettid) as i32,
                libc::getpid(),
                libc::getuid(),
                libc::geteuid(),
            )
        };
        let exe_path = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            tid,
            tgid,
            uid,
            euid,
            exe_path,
        }
    }

    pub fn exe(&self) -> PathBuf {
        PathBuf::from(&self.exe_path)
    }
}
