//! End-to-end behaviour of the monitor, dispatcher and audit trail.

use anyhow::Result;
use parking_lot::Mutex;
use refmon_core::audit::{AuditLog, AuditLogger};
use refmon_core::credential::{CredentialGate, PasswordDigest};
use refmon_core::dispatch::{
    AuditSink, InterceptedCall, InterceptionDispatcher, OpenFlags, Verdict,
};
use refmon_core::identity::{CallerIdentity, Principal};
use refmon_core::probes::{registrations, FsOperation, ProbeControl, ProbeRegistration, ProbeTable};
use refmon_core::{MonitorError, MonitorState, ReferenceMonitor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PW: &str = "pw1";
const ROOT: Principal = Principal { euid: 0 };

#[derive(Default)]
struct CountingProbes {
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl ProbeControl for CountingProbes {
    fn enable(&self, _: &[ProbeRegistration]) -> Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self, _: &[ProbeRegistration]) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    scheduled: Mutex<Vec<CallerIdentity>>,
}

impl AuditSink for RecordingSink {
    fn schedule(&self, identity: CallerIdentity) {
        self.scheduled.lock().push(identity);
    }
}

fn monitor_with(initial: MonitorState) -> (Arc<ReferenceMonitor>, Arc<CountingProbes>) {
    let control = Arc::new(CountingProbes::default());
    let probes = ProbeTable::new(registrations(&HashMap::new()), control.clone());
    let gate = CredentialGate::new(PasswordDigest::from_secret(PW), 0);
    (Arc::new(ReferenceMonitor::new(initial, gate, probes)), control)
}

fn caller() -> CallerIdentity {
    CallerIdentity {
        tid: 1201,
        tgid: 1200,
        uid: 1000,
        euid: 1000,
        exe_path: "/usr/bin/editor".into(),
    }
}

#[test]
fn repeated_switch_to_on_enables_probes_once() {
    let (m, probes) = monitor_with(MonitorState::Off);
    assert_eq!(probes.enables.load(Ordering::SeqCst), 0);
    assert_eq!(m.switch_state(0, PW, &ROOT), Ok(MonitorState::On));
    assert_eq!(m.switch_state(0, PW, &ROOT), Ok(MonitorState::On));
    assert_eq!(probes.enables.load(Ordering::SeqCst), 1);

    // REC_ON is still enforcing: no reconciliation needed.
    m.switch_state(2, PW, &ROOT).unwrap();
    assert_eq!(probes.enables.load(Ordering::SeqCst), 1);
    assert_eq!(probes.disables.load(Ordering::SeqCst), 0);

    m.switch_state(3, PW, &ROOT).unwrap();
    m.switch_state(1, PW, &ROOT).unwrap();
    assert_eq!(probes.disables.load(Ordering::SeqCst), 1);
    assert!(!m.probes().is_enabled());
}

#[test]
fn wrong_password_rejects_every_mutation() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    for bad in ["", "pw", "pw1 ", "PW1", "pw2"] {
        assert_eq!(m.switch_state(1, bad, &ROOT), Err(MonitorError::InvalidCredential));
        assert_eq!(m.add_path("/srv/a", bad, &ROOT), Err(MonitorError::InvalidCredential));
        assert_eq!(m.remove_path("/srv/a", bad, &ROOT), Err(MonitorError::InvalidCredential));
    }
    assert_eq!(m.query_state(), MonitorState::RecOn);
    assert_eq!(m.blacklist_size(), 0);

    m.add_path("/srv/a", PW, &ROOT).unwrap();
    m.remove_path("/srv/a", PW, &ROOT).unwrap();
    m.switch_state(1, PW, &ROOT).unwrap();
}

#[test]
fn unprivileged_caller_is_denied_with_same_message() {
    let (m, _) = monitor_with(MonitorState::RecOff);
    let user = Principal::new(1000);
    let denied = m.add_path("/srv/a", PW, &user).unwrap_err();
    let bad_pw = m.add_path("/srv/a", "nope", &ROOT).unwrap_err();
    assert_eq!(denied, MonitorError::PermissionDenied);
    assert_eq!(bad_pw, MonitorError::InvalidCredential);
    assert_eq!(denied.to_string(), bad_pw.to_string());
}

#[test]
fn blacklist_changes_only_in_reconfiguration_states() {
    for state in MonitorState::ALL {
        let (m, _) = monitor_with(state);
        let added = m.add_path("/etc/shadow", PW, &ROOT);
        let removed = m.remove_path("/etc/passwd", PW, &ROOT);
        if state.is_reconfigurable() {
            assert_eq!(added, Ok(()));
            assert_eq!(removed, Err(MonitorError::NotFound("/etc/passwd".into())));
        } else {
            assert_eq!(added, Err(MonitorError::NotReconfigurable));
            assert_eq!(removed, Err(MonitorError::NotReconfigurable));
        }
    }
}

#[test]
fn duplicate_add_leaves_size_unchanged() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/data/x", PW, &ROOT).unwrap();
    assert_eq!(
        m.add_path("/data/x", PW, &ROOT),
        Err(MonitorError::AlreadyExists("/data/x".into()))
    );
    assert_eq!(m.blacklist_size(), 1);
}

#[test]
fn remove_restores_previous_content_in_order() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    for p in ["/a", "/b", "/c"] {
        m.add_path(p, PW, &ROOT).unwrap();
    }
    let before: Vec<String> = m.enumerate_blacklist().into_iter().map(|e| e.path).collect();
    m.add_path("/d", PW, &ROOT).unwrap();
    m.remove_path("/d", PW, &ROOT).unwrap();
    let after: Vec<String> = m.enumerate_blacklist().into_iter().map(|e| e.path).collect();
    assert_eq!(before, after);

    m.remove_path("/b", PW, &ROOT).unwrap();
    let after: Vec<String> = m.enumerate_blacklist().into_iter().map(|e| e.path).collect();
    assert_eq!(after, vec!["/a".to_string(), "/c".to_string()]);
}

#[test]
fn directory_entry_protects_its_subtree_only() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/home/user/secret/", PW, &ROOT).unwrap();
    assert!(m.is_protected("/home/user/secret/file.txt"));
    assert!(!m.is_protected("/home/user/secret2/file.txt"));
    assert!(m.is_protected("/home/user/secret"));
    assert!(!m.is_protected("/home/user"));
}

#[test]
fn protection_follows_enforcement_state() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/srv/keys", PW, &ROOT).unwrap();
    assert!(m.is_protected("/srv/keys"));

    m.switch_state(1, PW, &ROOT).unwrap();
    assert!(!m.is_protected("/srv/keys"));
    assert!(!m.is_protected("/srv/keys/id_rsa"));

    m.switch_state(0, PW, &ROOT).unwrap();
    assert!(m.is_protected("/srv/keys"));
    assert!(m.is_protected("/srv/keys/id_rsa"));
    assert_eq!(m.blacklist_size(), 1);
}

#[test]
fn end_to_end_scenario() {
    let (m, _) = monitor_with(MonitorState::On);
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = InterceptionDispatcher::new(m.clone(), sink.clone());

    assert_eq!(m.switch_state(2, PW, &ROOT), Ok(MonitorState::RecOn));
    assert_eq!(m.add_path("/tmp/secret", PW, &ROOT), Ok(()));
    assert_eq!(m.blacklist_size(), 1);
    assert_eq!(
        m.add_path("/tmp/secret", PW, &ROOT),
        Err(MonitorError::AlreadyExists("/tmp/secret".into()))
    );
    assert_eq!(m.blacklist_size(), 1);
    assert_eq!(m.switch_state(0, PW, &ROOT), Ok(MonitorState::On));

    let write = InterceptedCall::open("/tmp/secret/x", OpenFlags::WRITE_ONLY, caller());
    assert_eq!(dispatcher.dispatch(write), Verdict::Deny);
    let read = InterceptedCall::open("/tmp/secret/x", OpenFlags::READ_ONLY, caller());
    assert_eq!(dispatcher.dispatch(read), Verdict::Allow);

    let scheduled = sink.scheduled.lock();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0], caller());
}

#[test]
fn dispatcher_checks_every_path_of_a_call() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/vault/", PW, &ROOT).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let d = InterceptionDispatcher::new(m.clone(), sink.clone());

    let rename_in = InterceptedCall::new(FsOperation::Rename, "/tmp/a", caller()).with_secondary("/vault/a");
    assert_eq!(d.dispatch(rename_in), Verdict::Deny);
    let rename_out = InterceptedCall::new(FsOperation::Rename, "/vault/a", caller()).with_secondary("/tmp/a");
    assert_eq!(d.dispatch(rename_out), Verdict::Deny);
    let link = InterceptedCall::new(FsOperation::Link, "/etc/hosts", caller()).with_secondary("/vault/h");
    assert_eq!(d.dispatch(link), Verdict::Deny);
    let relative = InterceptedCall::new(FsOperation::Unlink, "../vault/a", caller()).with_cwd("/tmp");
    assert_eq!(d.dispatch(relative), Verdict::Deny);
    let elsewhere = InterceptedCall::new(FsOperation::Mkdir, "/tmp/new", caller());
    assert_eq!(d.dispatch(elsewhere), Verdict::Allow);

    assert_eq!(sink.scheduled.lock().len(), 4);
}

#[test]
fn deletes_inside_protected_directory_are_denied() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/var/spool/", PW, &ROOT).unwrap();
    let d = InterceptionDispatcher::new(m.clone(), Arc::new(RecordingSink::default()));

    let inside = InterceptedCall::new(FsOperation::Unlink, "/var/spool/../spool/job", caller());
    assert_eq!(d.decide(&inside), Verdict::Deny);
    let nested = InterceptedCall::new(FsOperation::Rmdir, "/var/spool/queue/old", caller());
    assert_eq!(d.decide(&nested), Verdict::Deny);
    let dir_itself = InterceptedCall::new(FsOperation::Rmdir, "/var/spool", caller());
    assert_eq!(d.decide(&dir_itself), Verdict::Deny);
    let sibling = InterceptedCall::new(FsOperation::Unlink, "/var/spool2/job", caller());
    assert_eq!(d.decide(&sibling), Verdict::Allow);
    let parent = InterceptedCall::new(FsOperation::Rmdir, "/var", caller());
    assert_eq!(d.decide(&parent), Verdict::Allow);
}

#[test]
fn repeated_denials_all_stay_in_the_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    let (logger, worker) = AuditLogger::spawn(AuditLog::new(&log_path)).unwrap();

    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/tmp/secret", PW, &ROOT).unwrap();
    let d = InterceptionDispatcher::new(m.clone(), Arc::new(logger));
    for _ in 0..200 {
        let w = InterceptedCall::open("/tmp/secret", OpenFlags::WRITE_ONLY, caller());
        assert_eq!(d.dispatch(w), Verdict::Deny);
    }
    drop(d);
    assert_eq!(worker.join(), 200);

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read_to_string(&log_path).unwrap().lines().count(), 200);
}

#[test]
fn denials_reach_the_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    let (logger, worker) = AuditLogger::spawn(AuditLog::new(&log_path)).unwrap();

    let (m, _) = monitor_with(MonitorState::RecOn);
    m.add_path("/tmp/secret", PW, &ROOT).unwrap();
    let d = InterceptionDispatcher::new(m.clone(), Arc::new(logger));
    let w = InterceptedCall::open("/tmp/secret", OpenFlags::READ_WRITE, caller());
    assert_eq!(d.dispatch(w), Verdict::Deny);
    let trunc = InterceptedCall::open("/tmp/secret", OpenFlags::READ_ONLY.with(libc::O_TRUNC), caller());
    assert_eq!(d.dispatch(trunc), Verdict::Deny);
    drop(d);
    assert_eq!(worker.join(), 2);

    let content = std::fs::read_to_string(&log_path).unwrap();
    for row in content.lines() {
        let fields: Vec<&str> = row.split(", ").collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(&fields[..5], &["1201", "1200", "1000", "1000", "/usr/bin/editor"]);
        assert_eq!(fields[5].len(), 64);
    }
}

#[test]
fn concurrent_readers_and_writers_stay_consistent() {
    let (m, _) = monitor_with(MonitorState::RecOn);
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let m = m.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let p = format!("/w{t}/{i}");
                    m.add_path(&p, PW, &ROOT).unwrap();
                    assert!(m.is_protected(&format!("{p}/child")));
                }
            })
        })
        .collect();
    let reader = {
        let m = m.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                let size = m.blacklist_size();
                assert!(size <= 200);
                assert_eq!(m.query_state(), MonitorState::RecOn);
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(m.blacklist_size(), 200);
}
