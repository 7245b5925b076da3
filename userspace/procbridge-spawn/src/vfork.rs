// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: vfork emulation as an explicit session
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 5 unit tests
//!
//! There is no second address space to run a vfork child in. A [`VforkSession`] stands for the
//! logical child between `vfork` and its `exec`/`_exit`:
//!
//! ```text
//!   vfork_before ──► Child ──exec*/exit──► Transitioned ──after──► Completed (returns pid)
//!                      │
//!                      └──after──► Child (returns 0, the caller runs the child path)
//! ```
//!
//! INVARIANTS:
//!   - one session per thread at a time; nesting is a programming error and panics
//!   - descriptor changes made by the logical child are undone when the session completes
//!   - the session never leaves its thread
//!
//! ADR: docs/adr/0002-spawn-and-vfork.md

use std::cell::Cell;
use std::marker::PhantomData;

use log::{debug, warn};
use procbridge_abi::{Errno, Pid};
use procbridge_vfs::FdTable;

use crate::spawn::check_target;
use crate::{Process, Result};

thread_local! {
    static VFORKING: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` while the calling thread holds an open vfork session.
pub fn vforking() -> bool {
    VFORKING.with(Cell::get)
}

enum State {
    Child,
    Transitioned(Result<Pid>),
    Completed,
}

/// The logical child of one `vfork`.
pub struct VforkSession {
    process: Process,
    saved: Option<FdTable>,
    state: State,
    _thread_bound: PhantomData<*const ()>,
}

impl Process {
    /// Opens a vfork session on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread already holds an open session.
    pub fn vfork_before(&self) -> VforkSession {
        VFORKING.with(|flag| {
            assert!(!flag.get(), "vfork_before called while already vforking");
            flag.set(true);
        });
        debug!("spawn: vfork session opened");
        VforkSession {
            process: self.clone(),
            saved: Some(self.snapshot_fds()),
            state: State::Child,
            _thread_bound: PhantomData,
        }
    }

    /// `vfork` immediately followed by `execve` in the child: returns the new child's pid.
    pub fn vfork_exec(&self, path: &str, argv: &[String], envp: Option<&[String]>) -> Result<Pid> {
        let mut session = self.vfork_before();
        session.exec(path, argv, envp)?;
        session.after()
    }
}

impl VforkSession {
    /// Process the session belongs to. Descriptor calls made through it act as the child.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Returns `true` once the child has exec'd or exited.
    pub fn transitioned(&self) -> bool {
        matches!(self.state, State::Transitioned(_))
    }

    fn transition(&mut self, outcome: impl FnOnce(&Process) -> Result<Pid>) -> Result<()> {
        if !matches!(self.state, State::Child) {
            return Err(Errno::EINVAL.into());
        }
        let outcome = outcome(&self.process);
        self.state = State::Transitioned(outcome);
        Ok(())
    }

    fn exec(&mut self, path: &str, argv: &[String], envp: Option<&[String]>) -> Result<()> {
        check_target(path, argv)?;
        self.transition(|process| process.spawn_child(path, argv, envp))
    }

    /// `execve` in the logical child: spawns the program and records the outcome.
    ///
    /// A failed spawn is recorded too and reported by [`VforkSession::after`]. Calling this
    /// after the child already transitioned is `EINVAL`.
    pub fn execve(&mut self, path: &str, argv: &[String], envp: &[String]) -> Result<()> {
        self.exec(path, argv, Some(envp))
    }

    /// `execv` in the logical child.
    pub fn execv(&mut self, path: &str, argv: &[String]) -> Result<()> {
        self.exec(path, argv, None)
    }

    /// `execvp` in the logical child.
    pub fn execvp(&mut self, file: &str, argv: &[String]) -> Result<()> {
        self.exec(file, argv, None)
    }

    /// `execvpe` in the logical child.
    pub fn execvpe(&mut self, file: &str, argv: &[String], envp: &[String]) -> Result<()> {
        self.exec(file, argv, Some(envp))
    }

    /// `_exit` in the logical child: the host allocates a pid for a child that already exited.
    pub fn exit(&mut self, status: i32) -> Result<()> {
        self.transition(|process| process.deadpid(status))
    }

    /// `vfork_after`.
    ///
    /// Before a transition this returns `0` and the session stays open. After one it restores
    /// the parent's descriptors, closes the session and returns the child's pid (or the failure
    /// recorded by `exec*`/`exit`).
    pub fn after(&mut self) -> Result<Pid> {
        match std::mem::replace(&mut self.state, State::Completed) {
            State::Child => {
                self.state = State::Child;
                Ok(0)
            }
            State::Transitioned(outcome) => {
                self.close();
                if let Ok(pid) = &outcome {
                    debug!("spawn: vfork child became pid {pid}");
                }
                outcome
            }
            State::Completed => Err(Errno::EINVAL.into()),
        }
    }

    fn close(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = self.process.restore_fds(saved) {
                warn!("spawn: closing descriptors of vfork child failed: {err}");
            }
        }
        VFORKING.with(|flag| flag.set(false));
    }
}

impl Drop for VforkSession {
    fn drop(&mut self) {
        if !matches!(self.state, State::Completed) {
            warn!("spawn: vfork session dropped before completion");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procbridge_abi::AccessMode;
    use procbridge_ipc::{loopback_channel, Dictionary, HostEndpoint, Value, Wait};
    use procbridge_loader::MemoryFileSystem;
    use procbridge_vfs::{OpaqueFile, OpenFile};
    use std::sync::Arc;
    use std::thread;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn process() -> (Process, HostEndpoint) {
        let (channel, host) = loopback_channel();
        let process = Process::builder(Arc::new(channel))
            .filesystem(Arc::new(MemoryFileSystem::new()))
            .build();
        (process, host)
    }

    fn answer_with_pid(host: HostEndpoint, pids: Vec<i32>) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut commands = Vec::new();
            for pid in pids {
                let request = host.recv(Wait::Blocking).unwrap();
                commands.push(request.command_name().unwrap().to_string());
                host.reply(request.id().unwrap(), Value::Dict(Dictionary::new().with("pid", pid)));
            }
            commands
        })
    }

    #[test]
    fn fall_through_returns_zero_then_exit_returns_pid() {
        let (process, host) = process();
        let server = answer_with_pid(host, vec![31]);
        let mut session = process.vfork_before();
        assert!(vforking());
        assert_eq!(session.after().unwrap(), 0);
        assert!(vforking());
        session.exit(3).unwrap();
        assert_eq!(session.after().unwrap(), 31);
        assert!(!vforking());
        assert_eq!(session.after().unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(server.join().unwrap(), vec!["deadpid"]);
    }

    #[test]
    fn exec_spawns_and_restores_parent_descriptors() {
        let (process, host) = process();
        let server = answer_with_pid(host, vec![44]);
        process.install_at(0, OpenFile::new(OpaqueFile::console(AccessMode::ReadOnly))).unwrap();
        let mut session = process.vfork_before();
        session.process().dup2(0, 5).unwrap();
        session.process().close(0).unwrap();
        session.execv("tool", &argv(&["tool"])).unwrap();
        assert_eq!(session.execv("tool", &argv(&["tool"])).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(session.after().unwrap(), 44);
        assert!(process.fstat(0).is_ok());
        assert_eq!(process.fstat(5).unwrap_err().errno(), Errno::EBADF);
        assert_eq!(server.join().unwrap(), vec!["spawn"]);
    }

    #[test]
    fn failed_exec_is_reported_by_after() {
        let (process, host) = process();
        let server = answer_with_pid(host, vec![-Errno::ENOENT.raw()]);
        let mut session = process.vfork_before();
        session.execv("missing", &argv(&["missing"])).unwrap();
        assert_eq!(session.after().unwrap_err().errno(), Errno::ENOENT);
        assert!(!vforking());
        server.join().unwrap();
    }

    #[test]
    fn dropped_session_clears_flag() {
        let (process, _host) = process();
        drop(process.vfork_before());
        assert!(!vforking());
        drop(process.vfork_before());
    }

    #[test]
    #[should_panic(expected = "already vforking")]
    fn nested_vfork_panics() {
        let (process, _host) = process();
        let _outer = process.vfork_before();
        let _inner = process.vfork_before();
    }
}
