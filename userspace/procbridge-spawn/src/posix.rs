// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: C-shaped process-control calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests
//!
//! Thin layer over [`Process`] with libc conventions: failures return `-1` and set the calling
//! thread's [`errno`]. The vfork triple keeps its three-call shape by parking the open
//! [`VforkSession`] in thread-local storage between `vfork_before` and `vfork_after`.
//!
//! Where libc would `longjmp` back to `vfork_after` (exec or `_exit` inside a vfork), these calls
//! return `0`; the caller continues with `vfork_after(true)`.

use std::cell::{Cell, RefCell};

use procbridge_abi::{Errno, Pid, SpawnMode, WaitOptions};

use crate::{Process, ResourceUsage, Result, VforkSession};

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
    static SESSION: RefCell<Option<VforkSession>> = const { RefCell::new(None) };
}

/// `errno` of the calling thread.
pub fn errno() -> i32 {
    ERRNO.with(Cell::get)
}

/// Overwrites `errno` of the calling thread.
pub fn set_errno(value: i32) {
    ERRNO.with(|errno| errno.set(value));
}

fn ret<T>(result: Result<T>, ok: impl FnOnce(T) -> i32) -> i32 {
    match result {
        Ok(value) => ok(value),
        Err(err) => {
            set_errno(err.errno().raw());
            -1
        }
    }
}

fn with_session<R>(f: impl FnOnce(&mut VforkSession) -> R) -> Option<R> {
    SESSION.with(|slot| slot.borrow_mut().as_mut().map(f))
}

/// `spawnve`; `envp = None` passes the process environment.
///
/// `P_OVERLAY` inside a vfork turns the logical child into the spawned program.
pub fn spawnve(
    process: &Process,
    mode: i32,
    path: &str,
    argv: &[String],
    envp: Option<&[String]>,
) -> i32 {
    let mode = match SpawnMode::from_raw(mode) {
        Ok(mode) => mode,
        Err(errno) => {
            set_errno(errno.raw());
            return -1;
        }
    };
    if mode == SpawnMode::Overlay {
        return exec(process, path, argv, envp);
    }
    ret(process.spawnve(mode, path, argv, envp), |value| value)
}

/// `spawnv`.
pub fn spawnv(process: &Process, mode: i32, path: &str, argv: &[String]) -> i32 {
    spawnve(process, mode, path, argv, None)
}

/// `posix_spawn`: stores the pid and returns `0`, or returns the error number.
pub fn posix_spawn(
    process: &Process,
    pid: &mut Pid,
    path: &str,
    argv: &[String],
    envp: Option<&[String]>,
) -> i32 {
    match process.posix_spawn(path, argv, envp) {
        Ok(child) => {
            *pid = child;
            0
        }
        Err(err) => err.errno().raw(),
    }
}

/// `posix_spawnp`.
pub fn posix_spawnp(
    process: &Process,
    pid: &mut Pid,
    file: &str,
    argv: &[String],
    envp: Option<&[String]>,
) -> i32 {
    posix_spawn(process, pid, file, argv, envp)
}

/// `waitpid`; `status` is written only when the host reported one.
pub fn waitpid(process: &Process, pid: Pid, status: Option<&mut i32>, options: i32) -> Pid {
    let options = WaitOptions::from_bits_retain(options);
    ret(process.waitpid(pid, options), |result| {
        if let (Some(out), Some(word)) = (status, result.status) {
            *out = word.raw();
        }
        result.pid
    })
}

/// `wait`.
pub fn wait(process: &Process, status: Option<&mut i32>) -> Pid {
    waitpid(process, -1, status, 0)
}

/// `wait3`; the resource usage is zeroed.
pub fn wait3(
    process: &Process,
    status: Option<&mut i32>,
    options: i32,
    usage: Option<&mut ResourceUsage>,
) -> Pid {
    wait4(process, -1, status, options, usage)
}

/// `wait4`; the resource usage is zeroed.
pub fn wait4(
    process: &Process,
    pid: Pid,
    status: Option<&mut i32>,
    options: i32,
    usage: Option<&mut ResourceUsage>,
) -> Pid {
    if let Some(usage) = usage {
        *usage = ResourceUsage::default();
    }
    waitpid(process, pid, status, options)
}

fn exec(process: &Process, path: &str, argv: &[String], envp: Option<&[String]>) -> i32 {
    let routed = with_session(|session| match envp {
        Some(envp) => session.execve(path, argv, envp),
        None => session.execv(path, argv),
    });
    match routed {
        Some(result) => ret(result, |()| 0),
        None => ret(process.spawnve(SpawnMode::Overlay, path, argv, envp), |_| 0),
    }
}

/// `execve`.
pub fn execve(process: &Process, path: &str, argv: &[String], envp: &[String]) -> i32 {
    exec(process, path, argv, Some(envp))
}

/// `execv`.
pub fn execv(process: &Process, path: &str, argv: &[String]) -> i32 {
    exec(process, path, argv, None)
}

/// `execvp`.
pub fn execvp(process: &Process, file: &str, argv: &[String]) -> i32 {
    exec(process, file, argv, None)
}

/// `execvpe`.
pub fn execvpe(process: &Process, file: &str, argv: &[String], envp: &[String]) -> i32 {
    exec(process, file, argv, Some(envp))
}

/// `vfork_before`.
///
/// # Panics
///
/// Panics when the calling thread is already vforking.
pub fn vfork_before(process: &Process) {
    let session = process.vfork_before();
    SESSION.with(|slot| *slot.borrow_mut() = Some(session));
}

/// `vfork_after`: `0` on the fall-through path, the child's pid after exec or exit.
pub fn vfork_after(jumped: bool) -> Pid {
    if !jumped {
        return 0;
    }
    let Some(mut session) = SESSION.with(|slot| slot.borrow_mut().take()) else {
        set_errno(Errno::EINVAL.raw());
        return -1;
    };
    let result = session.after();
    if result.as_ref().is_ok_and(|pid| *pid == 0) {
        // Jumped without exec or exit: the child is still running, keep the session open.
        SESSION.with(|slot| *slot.borrow_mut() = Some(session));
    }
    ret(result, |pid| pid)
}

/// `vfork_exit`: ends the logical child inside a vfork, otherwise [`Process::exit`].
pub fn vfork_exit(process: &Process, status: i32) -> i32 {
    match with_session(|session| session.exit(status)) {
        Some(result) => ret(result, |()| 0),
        None => process.exit(status),
    }
}

/// `pipe`.
pub fn pipe(process: &Process, fds: &mut [i32; 2]) -> i32 {
    ret(process.pipe(), |pair| {
        *fds = pair;
        0
    })
}

/// `getpid`.
pub fn getpid(process: &Process) -> Pid {
    process.getpid()
}

/// `getppid`.
pub fn getppid(process: &Process) -> Pid {
    ret(process.getppid(), |pid| pid)
}

/// `getpgid`.
pub fn getpgid(process: &Process, pid: Pid) -> Pid {
    ret(process.getpgid(pid), |pgid| pgid)
}

/// `setpgid`.
pub fn setpgid(process: &Process, pid: Pid, pgid: Pid) -> i32 {
    ret(process.setpgid(pid, pgid), |()| 0)
}

/// `getpgrp`.
pub fn getpgrp(process: &Process) -> Pid {
    ret(process.getpgrp(), |pgid| pgid)
}

/// `setpgrp`.
pub fn setpgrp(process: &Process) -> i32 {
    ret(process.setpgrp(), |()| 0)
}

/// `getsid`.
pub fn getsid(process: &Process, pid: Pid) -> Pid {
    ret(process.getsid(pid), |sid| sid)
}

/// `setsid`.
pub fn setsid(process: &Process) -> Pid {
    ret(process.setsid(), |sid| sid)
}

/// `close`.
pub fn close(process: &Process, fd: i32) -> i32 {
    ret(process.close(fd), |()| 0)
}

/// `dup`.
pub fn dup(process: &Process, fd: i32) -> i32 {
    ret(process.dup(fd), |fd| fd)
}

/// `dup2`.
pub fn dup2(process: &Process, old: i32, new: i32) -> i32 {
    ret(process.dup2(old, new), |fd| fd)
}

/// `read`.
pub fn read(process: &Process, fd: i32, buf: &mut [u8]) -> isize {
    match process.read(fd, buf) {
        Ok(count) => isize::try_from(count).unwrap_or(isize::MAX),
        Err(err) => {
            set_errno(err.errno().raw());
            -1
        }
    }
}

/// `write`.
pub fn write(process: &Process, fd: i32, data: &[u8]) -> isize {
    match process.write(fd, data) {
        Ok(count) => isize::try_from(count).unwrap_or(isize::MAX),
        Err(err) => {
            set_errno(err.errno().raw());
            -1
        }
    }
}
