//! The reference monitor: operating state, blacklist and the password-gated
//! management operations over them.

use crate::blacklist::{Blacklist, BlacklistEntry, EntryKind};
use crate::credential::CredentialGate;
use crate::error::{MonitorError, MonitorResult};
use crate::identity::Principal;
use crate::matcher;
use crate::probes::ProbeTable;
use crate::state::MonitorState;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// State and blacklist live under one lock so that "read state, decide,
/// mutate" is a single critical section.
#[derive(Debug)]
struct Guarded {
    state: MonitorState,
    blacklist: Blacklist,
}

#[derive(Debug)]
pub struct ReferenceMonitor {
    inner: Mutex<Guarded>,
    gate: CredentialGate,
    probes: ProbeTable,
    // Serialises switch_state so the probe direction follows the last
    // installed state.
    switch_lock: Mutex<()>,
    base_dir: PathBuf,
}

impl ReferenceMonitor {
    pub fn new(initial: MonitorState, gate: CredentialGate, probes: ProbeTable) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let monitor = Self {
            inner: Mutex::new(Guarded {
                state: initial,
                blacklist: Blacklist::new(),
            }),
            gate,
            probes,
            switch_lock: Mutex::new(()),
            base_dir,
        };
        monitor.probes.sync(initial.is_enforcing());
        info!(state = %initial, "reference monitor initialised");
        monitor
    }

    /// Directory relative blacklist paths are resolved against.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn switch_state(
        &self,
        raw_state: i32,
        password: &str,
        caller: &Principal,
    ) -> MonitorResult<MonitorState> {
        let requested = MonitorState::try_from(raw_state).inspect_err(|_| {
            warn!(raw_state, "rejected switch to unknown state");
        })?;
        self.gate.authorize(caller, password).inspect_err(|e| {
            warn!(euid = caller.euid, error = %e, "state switch denied");
        })?;

        let _serial = self.switch_lock.lock();
        let previous = {
            let mut guard = self.inner.lock();
            std::mem::replace(&mut guard.state, requested)
        };
        self.probes.sync(requested.is_enforcing());
        info!(from = %previous, to = %requested, "monitor state changed");
        Ok(requested)
    }

    pub fn add_path(&self, path: &str, password: &str, caller: &Principal) -> MonitorResult<()> {
        self.ensure_reconfigurable()?;
        self.gate.authorize(caller, password).inspect_err(|e| {
            warn!(euid = caller.euid, error = %e, "blacklist add denied");
        })?;
        let resolved = self.resolve(path)?;
        let kind = EntryKind::probe(Path::new(&resolved));
        let entry = BlacklistEntry::new(resolved.clone(), kind);

        {
            let mut guard = self.inner.lock();
            if !guard.state.is_reconfigurable() {
                return Err(MonitorError::NotReconfigurable);
            }
            guard.blacklist.insert(entry)?;
        }
        info!(path = %resolved, ?kind, "path added to blacklist");
        Ok(())
    }

    pub fn remove_path(&self, path: &str, password: &str, caller: &Principal) -> MonitorResult<()> {
        self.ensure_reconfigurable()?;
        self.gate.authorize(caller, password).inspect_err(|e| {
            warn!(euid = caller.euid, error = %e, "blacklist remove denied");
        })?;
        let resolved = self.resolve(path)?;

        let result = {
            let mut guard = self.inner.lock();
            if !guard.state.is_reconfigurable() {
                return Err(MonitorError::NotReconfigurable);
            }
            guard.blacklist.remove(&resolved)
        };
        match result {
            Ok(_) => {
                info!(path = %resolved, "path removed from blacklist");
                Ok(())
            }
            Err(e) => {
                debug!(path = %resolved, "path not found in blacklist");
                Err(e)
            }
        }
    }

    pub fn query_state(&self) -> MonitorState {
        self.inner.lock().state
    }

    pub fn blacklist_size(&self) -> usize {
        self.inner.lock().blacklist.len()
    }

    pub fn enumerate_blacklist(&self) -> Vec<BlacklistEntry> {
        self.inner.lock().blacklist.iter().cloned().collect()
    }

    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }

    /// Privilege check alone, for requests that need no password.
    pub fn is_administrator(&self, caller: &Principal) -> bool {
        self.gate.check_privilege(caller)
    }

    /// Is `candidate` under a blacklisted prefix while enforcement is on?
    pub fn is_protected(&self, candidate: &str) -> bool {
        self.any_protected(&[candidate])
    }

    /// Decide for several paths of one call under a single lock acquisition.
    pub fn any_protected(&self, candidates: &[&str]) -> bool {
        let guard = self.inner.lock();
        if guard.blacklist.is_empty() || !guard.state.is_enforcing() {
            return false;
        }
        candidates
            .iter()
            .any(|c| guard.blacklist.find_protecting(c).is_some())
    }

    /// Bulk teardown at unload: drop every entry and disable the probes.
    pub fn teardown(&self) {
        let _serial = self.switch_lock.lock();
        let dropped = {
            let mut guard = self.inner.lock();
            let n = guard.blacklist.len();
            guard.blacklist.clear();
            n
        };
        self.probes.sync(false);
        info!(entries = dropped, "reference monitor torn down");
    }

    fn ensure_reconfigurable(&self) -> MonitorResult<()> {
        let state = self.query_state();
        if state.is_reconfigurable() {
            Ok(())
        } else {
            debug!(%state, "blacklist mutation outside reconfiguration state");
            Err(MonitorError::NotReconfigurable)
        }
    }

    /// Absolute paths are kept byte-for-byte. Relative paths are resolved
    /// against the base directory, through the filesystem when they exist.
    fn resolve(&self, path: &str) -> MonitorResult<String> {
        if path.is_empty() || path.contains('\0') {
            return Err(MonitorError::InvalidPath(path.to_string()));
        }
        if path.starts_with(matcher::SEPARATOR) {
            return Ok(path.to_string());
        }
        Ok(matcher::resolve_relative(path, &self.base_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::PasswordDigest;
    use crate::probes::{registrations, LoggedProbes};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn monitor(initial: MonitorState) -> ReferenceMonitor {
        let gate = CredentialGate::new(PasswordDigest::from_secret("pw1"), 0);
        let probes = ProbeTable::new(registrations(&HashMap::new()), Arc::new(LoggedProbes));
        ReferenceMonitor::new(initial, gate, probes)
    }

    const ROOT: Principal = Principal { euid: 0 };

    #[test]
    fn switch_checks_state_then_privilege_then_password() {
        let m = monitor(MonitorState::On);
        let user = Principal::new(1000);
        assert_eq!(m.switch_state(9, "wrong", &user), Err(MonitorError::InvalidState(9)));
        assert_eq!(m.switch_state(1, "wrong", &user), Err(MonitorError::PermissionDenied));
        assert_eq!(m.switch_state(1, "wrong", &ROOT), Err(MonitorError::InvalidCredential));
        assert_eq!(m.query_state(), MonitorState::On);
        assert_eq!(m.switch_state(1, "pw1", &ROOT), Ok(MonitorState::Off));
    }

    #[test]
    fn add_checks_reconfigurable_before_credentials() {
        let m = monitor(MonitorState::On);
        let user = Principal::new(1000);
        assert_eq!(m.add_path("/x", "wrong", &user), Err(MonitorError::NotReconfigurable));
        m.switch_state(3, "pw1", &ROOT).unwrap();
        assert_eq!(m.add_path("/x", "wrong", &user), Err(MonitorError::PermissionDenied));
        assert_eq!(m.add_path("/x", "wrong", &ROOT), Err(MonitorError::InvalidCredential));
        assert_eq!(m.add_path("", "pw1", &ROOT), Err(MonitorError::InvalidPath(String::new())));
        assert_eq!(m.blacklist_size(), 0);
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        std::fs::create_dir(base.join("vault")).unwrap();
        let m = monitor(MonitorState::RecOn).with_base_dir(&base);
        m.add_path("vault/", "pw1", &ROOT).unwrap();
        m.add_path("missing/../later.txt", "pw1", &ROOT).unwrap();
        let entries = m.enumerate_blacklist();
        assert_eq!(entries[0].path, format!("{}/vault/", base.display()));
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].path, format!("{}/later.txt", base.display()));
        assert_eq!(entries[1].kind, EntryKind::Unknown);
        m.remove_path("vault/", "pw1", &ROOT).unwrap();
        assert_eq!(m.blacklist_size(), 1);
    }

    #[test]
    fn teardown_clears_everything() {
        let m = monitor(MonitorState::RecOn);
        m.add_path("/a", "pw1", &ROOT).unwrap();
        m.teardown();
        assert_eq!(m.blacklist_size(), 0);
        assert!(!m.probes().is_enabled());
    }
}
