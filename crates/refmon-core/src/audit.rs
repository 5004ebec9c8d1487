//! Deferred audit trail of denied accesses.
//!
//! The decision path only enqueues an owned [`CallerIdentity`]. A dedicated
//! worker thread fingerprints the offending executable and appends one row
//! per denial to the log sink:
//!
//! ```text
//! tid, tgid, uid, euid, exe_path, fingerprint
//! ```
//!
//! Sink failures stay inside the worker; they are reported through `tracing`
//! and never reach the caller that was denied.

use crate::dispatch::AuditSink;
use crate::error::MonitorError;
use crate::identity::CallerIdentity;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub tid: i32,
    pub tgid: i32,
    pub uid: u32,
    pub euid: u32,
    pub exe_path: String,
    pub fingerprint: String,
}

impl LogRecord {
    pub fn new(identity: CallerIdentity, fingerprint: String) -> Self {
        Self {
            tid: identity.tid,
            tgid: identity.tgid,
            uid: identity.uid,
            euid: identity.euid,
            exe_path: identity.exe_path,
            fingerprint,
        }
    }

    /// One newline-terminated row. Line breaks inside the path are escaped so
    /// a record always occupies exactly one line.
    pub fn to_row(&self) -> String {
        let exe = self.exe_path.replace('\n', "\\n").replace('\r', "\\r");
        format!(
            "{}, {}, {}, {}, {}, {}\n",
            self.tid, self.tgid, self.uid, self.euid, exe, self.fingerprint
        )
    }
}

/// SHA-256 over the executable's content. When the file cannot be read the
/// digest of the path string is used instead, so the value identifies the
/// program for correlation but is not an integrity guarantee.
pub fn fingerprint(exe: &Path) -> String {
    match hash_file(exe) {
        Ok(digest) => digest,
        Err(e) => {
            debug!(exe = %exe.display(), error = %e, "fingerprinting path string instead of content");
            hex::encode(Sha256::digest(exe.display().to_string().as_bytes()))
        }
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Append-only file sink. Records are only ever appended; the sink never
/// truncates, rotates or removes what it has written.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write `record` with a single `write_all` on an `O_APPEND` descriptor,
    /// so concurrent appenders never interleave inside a row.
    pub fn append(&self, record: &LogRecord) -> Result<(), MonitorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MonitorError::LoggingFailure(format!("open {}: {e}", self.path.display())))?;
        file.write_all(record.to_row().as_bytes())
            .map_err(|e| MonitorError::LoggingFailure(format!("write: {e}")))?;
        file.flush()
            .map_err(|e| MonitorError::LoggingFailure(format!("flush: {e}")))?;
        Ok(())
    }
}

/// Worker-local memo of executable fingerprints, keyed by path and
/// invalidated when the file's size or mtime changes.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<PathBuf, CachedFingerprint>,
    misses: usize,
}

#[derive(Debug)]
struct CachedFingerprint {
    len: u64,
    modified: Option<SystemTime>,
    digest: String,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(&mut self, exe: &Path) -> String {
        let meta = match fs::metadata(exe) {
            Ok(meta) => meta,
            // Unreadable files fall back to the path digest, which is cheap.
            Err(_) => return fingerprint(exe),
        };
        let modified = meta.modified().ok();
        if let Some(hit) = self.entries.get(exe) {
            if hit.len == meta.len() && hit.modified == modified {
                return hit.digest.clone();
            }
        }
        self.misses += 1;
        let digest = fingerprint(exe);
        self.entries.insert(
            exe.to_path_buf(),
            CachedFingerprint {
                len: meta.len(),
                modified,
                digest: digest.clone(),
            },
        );
        digest
    }

    /// How many lookups had to hash the file.
    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// Producer side of the audit queue. Cheap to clone; `schedule` never blocks.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<CallerIdentity>,
}

/// Consumer side: the worker thread draining the queue into the sink.
#[derive(Debug)]
pub struct AuditWorker {
    handle: JoinHandle<usize>,
}

impl AuditLogger {
    /// Start the worker thread. It exits once every `AuditLogger` clone has
    /// been dropped and the queue is drained.
    pub fn spawn(sink: AuditLog) -> io::Result<(AuditLogger, AuditWorker)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CallerIdentity>();
        let handle = std::thread::Builder::new()
            .name("audit-writer".into())
            .spawn(move || {
                let mut written = 0usize;
                let mut fingerprints = FingerprintCache::new();
                while let Some(identity) = rx.blocking_recv() {
                    let fp = fingerprints.fingerprint(&identity.exe());
                    let record = LogRecord::new(identity, fp);
                    match sink.append(&record) {
                        Ok(()) => written += 1,
                        Err(e) => error!(error = %e, tid = record.tid, "dropping audit record"),
                    }
                }
                debug!(written, "audit worker exiting");
                written
            })?;
        Ok((AuditLogger { tx }, AuditWorker { handle }))
    }

    pub fn schedule_log_entry(&self, identity: CallerIdentity) {
        if self.tx.send(identity).is_err() {
            warn!("audit worker gone; denial not recorded");
        }
    }
}

impl AuditSink for AuditLogger {
    fn schedule(&self, identity: CallerIdentity) {
        self.schedule_log_entry(identity);
    }
}

impl AuditWorker {
    /// Wait for the queue to drain. Returns how many records reached the sink.
    pub fn join(self) -> usize {
        match self.handle.join() {
            Ok(n) => n,
            Err(_) => {
                error!("audit worker panicked");
                0
            }
        }
    }
}
