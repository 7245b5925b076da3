// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host process table: pids, process groups, sessions and exit statuses
//!
//! INVARIANTS:
//!   - pids are allocated from 1 upwards and never reused
//!   - an exited child stays in the table until its parent reaps it
//!   - an exiting process orphans its running children; orphans vanish when they exit

use std::collections::BTreeMap;

use parking_lot::{Condvar, Mutex};
use procbridge_abi::{Errno, Pid, WaitOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Running,
    Exited(i32),
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    ppid: Pid,
    pgid: Pid,
    sid: Pid,
    state: RunState,
}

struct TableState {
    next_pid: Pid,
    entries: BTreeMap<Pid, Entry>,
}

impl TableState {
    fn allocate(&mut self) -> Result<Pid, Errno> {
        let pid = self.next_pid;
        self.next_pid = pid.checked_add(1).ok_or(Errno::EAGAIN)?;
        Ok(pid)
    }

    fn entry(&self, pid: Pid) -> Result<&Entry, Errno> {
        self.entries.get(&pid).ok_or(Errno::ESRCH)
    }

    fn add_child(&mut self, parent: Pid, state: RunState) -> Result<Pid, Errno> {
        let Entry { pgid, sid, .. } = *self.entry(parent)?;
        let pid = self.allocate()?;
        self.entries.insert(pid, Entry { ppid: parent, pgid, sid, state });
        Ok(pid)
    }

    // Waitable children of `caller` selected by the POSIX `pid` argument.
    fn selected(&self, caller: Pid, pid: Pid) -> impl Iterator<Item = (Pid, RunState)> + '_ {
        let own_group = self.entries.get(&caller).map_or(caller, |entry| entry.pgid);
        self.entries
            .iter()
            .filter(move |&(&child, entry)| {
                entry.ppid == caller
                    && match pid {
                        -1 => true,
                        0 => entry.pgid == own_group,
                        group if group < -1 => entry.pgid == -group,
                        target => child == target,
                    }
            })
            .map(|(&child, entry)| (child, entry.state))
    }
}

/// Process table shared by every connection of one host.
pub struct ProcessTable {
    state: Mutex<TableState>,
    exited: Condvar,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState { next_pid: 1, entries: BTreeMap::new() }),
            exited: Condvar::new(),
        }
    }

    /// Number of known processes, reaped ones excluded.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` when no process is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a process without a parent. It leads its own group and session.
    pub fn add_root(&self) -> Result<Pid, Errno> {
        let mut state = self.state.lock();
        let pid = state.allocate()?;
        state.entries.insert(pid, Entry { ppid: 0, pgid: pid, sid: pid, state: RunState::Running });
        Ok(pid)
    }

    /// Registers a running child of `parent`, which inherits its group and session.
    pub fn add_child(&self, parent: Pid) -> Result<Pid, Errno> {
        self.state.lock().add_child(parent, RunState::Running)
    }

    /// Registers a child of `parent` that already exited with `status` (`deadpid`).
    pub fn add_exited_child(&self, parent: Pid, status: i32) -> Result<Pid, Errno> {
        let pid = self.state.lock().add_child(parent, RunState::Exited(status))?;
        self.exited.notify_all();
        Ok(pid)
    }

    /// Forgets `pid` without reporting an exit (the process never started).
    pub fn discard(&self, pid: Pid) {
        self.state.lock().entries.remove(&pid);
    }

    /// Records the exit of `pid` and wakes waiting parents.
    pub fn exit(&self, pid: Pid, status: i32) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&pid) else {
            return;
        };
        entry.state = RunState::Exited(status);
        let ppid = entry.ppid;
        if ppid == 0 || !state.entries.contains_key(&ppid) {
            state.entries.remove(&pid);
        }
        state.entries.retain(|_, entry| entry.ppid != pid || entry.state == RunState::Running);
        for entry in state.entries.values_mut().filter(|entry| entry.ppid == pid) {
            entry.ppid = 0;
        }
        drop(state);
        self.exited.notify_all();
    }

    /// Reaps a child of `caller`. Returns `(0, None)` under `NOHANG` when nothing exited yet.
    pub fn wait(&self, caller: Pid, pid: Pid, options: WaitOptions) -> Result<(Pid, Option<i32>), Errno> {
        let mut state = self.state.lock();
        loop {
            let mut any = false;
            let mut reaped = None;
            for (child, run) in state.selected(caller, pid) {
                any = true;
                if let RunState::Exited(status) = run {
                    reaped = Some((child, status));
                    break;
                }
            }
            if let Some((child, status)) = reaped {
                state.entries.remove(&child);
                return Ok((child, Some(status)));
            }
            if !any {
                return Err(Errno::ECHILD);
            }
            if options.contains(WaitOptions::NOHANG) {
                return Ok((0, None));
            }
            self.exited.wait(&mut state);
        }
    }

    /// `getpgid`; `pid == 0` names the caller.
    pub fn getpgid(&self, caller: Pid, pid: Pid) -> Result<Pid, Errno> {
        let target = if pid == 0 { caller } else { pid };
        Ok(self.state.lock().entry(target)?.pgid)
    }

    /// `getsid`; `pid == 0` names the caller.
    pub fn getsid(&self, caller: Pid, pid: Pid) -> Result<Pid, Errno> {
        let target = if pid == 0 { caller } else { pid };
        Ok(self.state.lock().entry(target)?.sid)
    }

    /// `setpgid`: moves the caller or one of its children into group `pgid`.
    pub fn setpgid(&self, caller: Pid, pid: Pid, pgid: Pid) -> Result<(), Errno> {
        if pgid < 0 {
            return Err(Errno::EINVAL);
        }
        let mut state = self.state.lock();
        let target = if pid == 0 { caller } else { pid };
        let entry = *state.entry(target)?;
        if target != caller && entry.ppid != caller {
            return Err(Errno::ESRCH);
        }
        if entry.sid == target {
            return Err(Errno::EPERM);
        }
        let pgid = if pgid == 0 { target } else { pgid };
        if pgid != target
            && !state.entries.values().any(|other| other.pgid == pgid && other.sid == entry.sid)
        {
            return Err(Errno::EPERM);
        }
        if let Some(entry) = state.entries.get_mut(&target) {
            entry.pgid = pgid;
        }
        Ok(())
    }

    /// `setsid`: the caller leads a new session and group unless it already leads a group.
    pub fn setsid(&self, caller: Pid) -> Result<Pid, Errno> {
        let mut state = self.state.lock();
        state.entry(caller)?;
        if state.entries.values().any(|entry| entry.pgid == caller) {
            return Err(Errno::EPERM);
        }
        if let Some(entry) = state.entries.get_mut(&caller) {
            entry.pgid = caller;
            entry.sid = caller;
        }
        Ok(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn children_inherit_group_and_session() {
        let table = ProcessTable::new();
        let root = table.add_root().unwrap();
        let child = table.add_child(root).unwrap();
        assert_eq!((root, child), (1, 2));
        assert_eq!(table.getpgid(child, 0).unwrap(), root);
        assert_eq!(table.getsid(root, child).unwrap(), root);
        assert_eq!(table.getpgid(root, 99).unwrap_err(), Errno::ESRCH);
        assert_eq!(table.add_child(99).unwrap_err(), Errno::ESRCH);
    }

    #[test]
    fn wait_selects_by_pid_and_group() {
        let table = ProcessTable::new();
        let root = table.add_root().unwrap();
        let a = table.add_child(root).unwrap();
        let b = table.add_child(root).unwrap();
        table.setpgid(root, b, 0).unwrap();

        assert_eq!(table.wait(root, -1, WaitOptions::NOHANG).unwrap(), (0, None));
        table.exit(b, 4);
        assert_eq!(table.wait(root, 0, WaitOptions::NOHANG).unwrap(), (0, None));
        assert_eq!(table.wait(root, -b, WaitOptions::empty()).unwrap(), (b, Some(4)));
        assert_eq!(table.wait(root, b, WaitOptions::empty()).unwrap_err(), Errno::ECHILD);

        table.exit(a, 0);
        assert_eq!(table.wait(root, a, WaitOptions::empty()).unwrap(), (a, Some(0)));
        assert_eq!(table.wait(root, -1, WaitOptions::empty()).unwrap_err(), Errno::ECHILD);
    }

    #[test]
    fn blocking_wait_wakes_on_exit() {
        let table = Arc::new(ProcessTable::new());
        let root = table.add_root().unwrap();
        let child = table.add_child(root).unwrap();
        let waiter = {
            let table = table.clone();
            thread::spawn(move || table.wait(root, -1, WaitOptions::empty()))
        };
        thread::sleep(Duration::from_millis(20));
        table.exit(child, 7);
        assert_eq!(waiter.join().unwrap().unwrap(), (child, Some(7)));
    }

    #[test]
    fn deadpid_child_is_reapable_at_once() {
        let table = ProcessTable::new();
        let root = table.add_root().unwrap();
        let dead = table.add_exited_child(root, 3).unwrap();
        assert_eq!(table.wait(root, dead, WaitOptions::NOHANG).unwrap(), (dead, Some(3)));
    }

    #[test]
    fn session_rules() {
        let table = ProcessTable::new();
        let root = table.add_root().unwrap();
        let child = table.add_child(root).unwrap();
        let other = table.add_child(root).unwrap();
        let grandchild = table.add_child(child).unwrap();

        assert_eq!(table.setsid(root).unwrap_err(), Errno::EPERM);
        assert_eq!(table.setpgid(root, grandchild, 0).unwrap_err(), Errno::ESRCH);
        assert_eq!(table.setpgid(root, root, 0).unwrap_err(), Errno::EPERM);
        assert_eq!(table.setpgid(root, child, -1).unwrap_err(), Errno::EINVAL);

        assert_eq!(table.setsid(child).unwrap(), child);
        assert_eq!(table.getsid(0, child).unwrap(), child);
        assert_eq!(table.setpgid(other, 0, child).unwrap_err(), Errno::EPERM);
        assert_eq!(table.setpgid(child, grandchild, child).unwrap_err(), Errno::EPERM);
        table.setpgid(grandchild, 0, 0).unwrap();
        assert_eq!(table.getpgid(0, grandchild).unwrap(), grandchild);
    }

    #[test]
    fn exiting_parent_orphans_children() {
        let table = ProcessTable::new();
        let root = table.add_root().unwrap();
        let child = table.add_child(root).unwrap();
        let grandchild = table.add_child(child).unwrap();
        let reaped = table.add_exited_child(child, 0).unwrap();
        table.exit(child, 0);
        assert_eq!(table.getpgid(root, reaped).unwrap_err(), Errno::ESRCH);
        table.exit(grandchild, 0);
        assert_eq!(table.getpgid(root, grandchild).unwrap_err(), Errno::ESRCH);
        assert_eq!(table.wait(root, child, WaitOptions::empty()).unwrap(), (child, Some(0)));
        table.exit(root, 0);
        assert!(table.is_empty());
    }
}
