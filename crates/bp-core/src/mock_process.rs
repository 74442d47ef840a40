//! Mock processes and process tables for testing.
//!
//! # Example
//!
//! ```ignore
//! use bp_core::mock_process::{MockProcess, MockProcessTable};
//!
//! let table = MockProcessTable::new()
//!     .with_process(1234, 1, "calc")
//!     .with_process(1300, 1234, "calc-helper");
//!
//! let process = MockProcess::running(1234);
//! process.exit_with(-9);
//! ```

use crate::process::{MonitoredProcess, ProcessTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct MockEntry {
    pid: u32,
    ppid: u32,
    comm: String,
}

/// An in-memory process table.
#[derive(Debug, Default)]
pub struct MockProcessTable {
    entries: Mutex<Vec<MockEntry>>,
}

impl MockProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_process(self, pid: u32, ppid: u32, comm: &str) -> Self {
        self.add_process(pid, ppid, comm);
        self
    }

    /// Insert a process after construction (e.g. to simulate a fork).
    pub fn add_process(&self, pid: u32, ppid: u32, comm: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(MockEntry {
                pid,
                ppid,
                comm: comm.to_string(),
            });
        }
    }

    pub fn remove_process(&self, pid: u32) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|entry| entry.pid != pid);
        }
    }

    fn snapshot(&self) -> Vec<MockEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProcessTable for MockProcessTable {
    fn children_of(&self, pid: u32) -> Vec<u32> {
        self.snapshot()
            .into_iter()
            .filter(|entry| entry.ppid == pid)
            .map(|entry| entry.pid)
            .collect()
    }

    fn exists(&self, pid: u32) -> bool {
        self.snapshot().iter().any(|entry| entry.pid == pid)
    }

    fn pids_named(&self, comm: &str) -> Vec<u32> {
        self.snapshot()
            .into_iter()
            .filter(|entry| entry.comm == comm)
            .map(|entry| entry.pid)
            .collect()
    }
}

/// A scripted [`MonitoredProcess`].
///
/// Clones share state, so a test can keep a handle after moving the
/// process into a search and flip it to exited mid-run.
#[derive(Debug, Clone)]
pub struct MockProcess {
    pid: u32,
    exit_code: Arc<Mutex<Option<i32>>>,
    killed: Arc<AtomicBool>,
}

impl MockProcess {
    pub fn running(pid: u32) -> Self {
        MockProcess {
            pid,
            exit_code: Arc::new(Mutex::new(None)),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn exited(pid: u32, exit_code: i32) -> Self {
        let process = Self::running(pid);
        process.exit_with(exit_code);
        process
    }

    pub fn exit_with(&self, exit_code: i32) {
        if let Ok(mut code) = self.exit_code.lock() {
            *code = Some(exit_code);
        }
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl MonitoredProcess for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|code| *code)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.exit_with(-libc::SIGTERM);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookups() {
        let table = MockProcessTable::new()
            .with_process(10, 1, "calc")
            .with_process(11, 10, "calc")
            .with_process(12, 1, "editor");

        assert_eq!(table.children_of(10), vec![11]);
        assert!(table.exists(12));
        assert!(!table.exists(13));
        assert_eq!(table.pids_named("calc"), vec![10, 11]);

        table.remove_process(11);
        assert!(table.children_of(10).is_empty());
    }

    #[test]
    fn process_clones_share_exit_state() {
        let handle = MockProcess::running(5);
        let mut moved = handle.clone();
        assert_eq!(moved.try_exit_code(), None);

        handle.exit_with(3);
        assert_eq!(moved.try_exit_code(), Some(3));
    }

    #[test]
    fn kill_marks_process_terminated() {
        let handle = MockProcess::running(5);
        let mut moved = handle.clone();
        moved.kill().unwrap();
        assert!(handle.was_killed());
        assert_eq!(moved.try_exit_code(), Some(-libc::SIGTERM));
    }
}
