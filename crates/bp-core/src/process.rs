//! Process table access and connection-to-pid resolution.
//!
//! The pid-based search filters need two things from the operating system:
//! the pid owning a bus connection (asked of the bus daemon) and the
//! recursive children of a pid (read from `/proc`). Children are cached for
//! a single discovery pass only; processes fork and exit between passes.

use crate::bus::{Bus, BusError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while reading the process table.
#[derive(Debug, Error)]
pub enum ProcTableError {
    #[error("I/O error reading /proc/{pid}: {source}")]
    IoError {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error for /proc/{pid}/stat: {message}")]
    ParseError { pid: u32, message: String },
}

/// Read-only view of the operating system process table.
pub trait ProcessTable: Send + Sync + fmt::Debug {
    /// Direct children of `pid`.
    fn children_of(&self, pid: u32) -> Vec<u32>;

    /// Whether a process with `pid` currently exists.
    fn exists(&self, pid: u32) -> bool;

    /// Pids whose command name equals `comm`.
    fn pids_named(&self, comm: &str) -> Vec<u32>;
}

/// Process table backed by `/proc`.
///
/// Every call rescans `/proc`; callers that need a consistent snapshot
/// across many lookups should go through [`PidResolver`], which caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFsTable;

impl ProcFsTable {
    /// Scan `/proc` and return `(pid, ppid, comm)` for every readable process.
    #[cfg(target_os = "linux")]
    fn scan(&self) -> Vec<(u32, u32, String)> {
        let proc = Path::new("/proc");
        let Ok(entries) = fs::read_dir(proc) else {
            return Vec::new();
        };

        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u32>().ok())
            .filter_map(|pid| read_stat(pid).ok().map(|(ppid, comm)| (pid, ppid, comm)))
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    fn scan(&self) -> Vec<(u32, u32, String)> {
        Vec::new()
    }
}

impl ProcessTable for ProcFsTable {
    fn children_of(&self, pid: u32) -> Vec<u32> {
        self.scan()
            .into_iter()
            .filter(|(_, ppid, _)| *ppid == pid)
            .map(|(child, _, _)| child)
            .collect()
    }

    fn exists(&self, pid: u32) -> bool {
        pid_exists(pid)
    }

    fn pids_named(&self, comm: &str) -> Vec<u32> {
        self.scan()
            .into_iter()
            .filter(|(_, _, name)| name == comm)
            .map(|(pid, _, _)| pid)
            .collect()
    }
}

/// Read `(ppid, comm)` from `/proc/<pid>/stat`.
fn read_stat(pid: u32) -> Result<(u32, String), ProcTableError> {
    let path = format!("/proc/{}/stat", pid);
    let content =
        fs::read_to_string(&path).map_err(|e| ProcTableError::IoError { pid, source: e })?;
    parse_stat(&content, pid)
}

/// Parse `(ppid, comm)` out of a `/proc/<pid>/stat` line.
pub fn parse_stat(content: &str, pid: u32) -> Result<(u32, String), ProcTableError> {
    // comm may contain spaces and parentheses; the last ')' closes it
    let open_paren = content.find('(').ok_or_else(|| ProcTableError::ParseError {
        pid,
        message: "missing '(' in stat".to_string(),
    })?;

    let close_paren = content
        .rfind(')')
        .filter(|close| *close > open_paren)
        .ok_or_else(|| ProcTableError::ParseError {
            pid,
            message: "missing ')' in stat".to_string(),
        })?;

    let comm = content[open_paren + 1..close_paren].to_string();
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();

    // state, ppid, ...
    if fields.len() < 2 {
        return Err(ProcTableError::ParseError {
            pid,
            message: "too few fields after comm".to_string(),
        });
    }

    let ppid = fields[1]
        .parse::<u32>()
        .map_err(|_| ProcTableError::ParseError {
            pid,
            message: format!("invalid ppid: {}", fields[1]),
        })?;

    Ok((ppid, comm))
}

/// Check whether a process exists by sending signal 0.
pub fn pid_exists(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs permission and existence checks only.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM to `pid`.
pub fn terminate_pid(pid: u32) -> std::io::Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: plain signal delivery; no memory is shared with the callee.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// A locally spawned process the search should keep an eye on.
pub trait MonitoredProcess: Send + fmt::Debug {
    fn pid(&self) -> u32;

    /// Exit code once the process has exited, `None` while it is running.
    ///
    /// Processes killed by a signal report the negated signal number.
    fn try_exit_code(&mut self) -> Option<i32>;

    /// Ask the process to terminate.
    fn kill(&mut self) -> std::io::Result<()>;
}

impl MonitoredProcess for std::process::Child {
    fn pid(&self) -> u32 {
        self.id()
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        match self.try_wait() {
            Ok(Some(status)) => Some(exit_code_of(status)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(pid = self.id(), error = %e, "could not poll child process");
                None
            }
        }
    }

    fn kill(&mut self) -> std::io::Result<()> {
        terminate_pid(self.id())
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Resolves connection owners and process descendants for one search pass.
///
/// Descendant lookups are cached per pid until [`PidResolver::invalidate`]
/// is called, which the search does at the start of every pass. A resolver
/// belongs to a single search; it is deliberately not `Sync`.
#[derive(Debug)]
pub struct PidResolver<'a> {
    table: &'a dyn ProcessTable,
    descendants: RefCell<HashMap<u32, Vec<u32>>>,
}

impl<'a> PidResolver<'a> {
    pub fn new(table: &'a dyn ProcessTable) -> Self {
        PidResolver {
            table,
            descendants: RefCell::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &'a dyn ProcessTable {
        self.table
    }

    /// Drop cached descendant lists.
    pub fn invalidate(&self) {
        self.descendants.borrow_mut().clear();
    }

    /// Pid owning `connection` on `bus`.
    pub fn connection_pid(&self, bus: &dyn Bus, connection: &str) -> Result<u32, BusError> {
        bus.connection_pid(connection)
    }

    /// All recursive children of `pid`, cached for the current pass.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        if let Some(cached) = self.descendants.borrow().get(&pid) {
            return cached.clone();
        }

        let mut found = Vec::new();
        let mut stack = vec![pid];
        while let Some(parent) = stack.pop() {
            for child in self.table.children_of(parent) {
                if child != pid && !found.contains(&child) {
                    found.push(child);
                    stack.push(child);
                }
            }
        }

        self.descendants.borrow_mut().insert(pid, found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_process::MockProcessTable;

    #[test]
    fn parse_stat_handles_spaces_and_parens() {
        let (ppid, comm) = parse_stat("4242 (my (weird) app) S 17 4242 4242 0", 4242).unwrap();
        assert_eq!(ppid, 17);
        assert_eq!(comm, "my (weird) app");
    }

    #[test]
    fn parse_stat_rejects_truncated_lines() {
        assert!(parse_stat("12 (bash) S", 12).is_err());
        assert!(parse_stat("12 bash S 1", 12).is_err());
        assert!(parse_stat(")12 (", 12).is_err());
    }

    #[test]
    fn parse_stat_rejects_bad_ppid() {
        let err = parse_stat("12 (bash) S abc", 12).unwrap_err();
        assert!(err.to_string().contains("invalid ppid"));
    }

    #[test]
    fn descendants_are_recursive() {
        let table = MockProcessTable::new()
            .with_process(100, 1, "launcher")
            .with_process(200, 100, "app")
            .with_process(300, 200, "helper")
            .with_process(400, 1, "other");
        let resolver = PidResolver::new(&table);

        let mut found = resolver.descendants(100);
        found.sort_unstable();
        assert_eq!(found, vec![200, 300]);
        assert!(resolver.descendants(400).is_empty());
    }

    #[test]
    fn descendants_are_cached_until_invalidated() {
        let table = MockProcessTable::new().with_process(200, 100, "app");
        let resolver = PidResolver::new(&table);

        assert_eq!(resolver.descendants(100), vec![200]);
        table.add_process(201, 100, "late");
        assert_eq!(resolver.descendants(100), vec![200]);

        resolver.invalidate();
        let mut found = resolver.descendants(100);
        found.sort_unstable();
        assert_eq!(found, vec![200, 201]);
    }

    #[test]
    fn descendants_survive_cycles() {
        let table = MockProcessTable::new()
            .with_process(10, 20, "a")
            .with_process(20, 10, "b");
        let resolver = PidResolver::new(&table);
        assert_eq!(resolver.descendants(10), vec![20]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_exists() {
        assert!(pid_exists(std::process::id()));
        assert!(ProcFsTable.exists(std::process::id()));
    }

    #[test]
    fn pid_zero_never_exists() {
        assert!(!pid_exists(0));
        assert!(!pid_exists(u32::MAX));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn spawned_child_is_a_descendant() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");
        let table = ProcFsTable;
        let resolver = PidResolver::new(&table);

        assert!(resolver.descendants(std::process::id()).contains(&child.id()));
        assert_eq!(child.try_exit_code(), None);

        MonitoredProcess::kill(&mut child).unwrap();
        let status = child.wait().unwrap();
        assert_eq!(exit_code_of(status), -libc::SIGTERM);
    }
}
