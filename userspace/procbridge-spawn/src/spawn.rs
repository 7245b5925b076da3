// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: spawn/wait/exec emulation on top of the request correlator
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - Process::spawnve / spawnv: launch in wait, no-wait or overlay mode
//!   - Process::posix_spawn / posix_spawnp: no-wait launch without file actions
//!   - Process::waitpid / wait / wait3 / wait4: child state changes
//!   - Process::execve / execv / execvp / execvpe: overlay outside a vfork session (ENOSYS)
//!
//! Request: `{command: "spawn", args, envs, cwd, nmf?}` -> reply `{pid}`.
//! Request: `{command: "wait", pid, options}` -> reply `{pid, status?}`.
//!
//! ADR: docs/adr/0002-spawn-and-vfork.md

use log::{debug, info};
use procbridge_abi::{Errno, Pid, SpawnMode, WaitOptions, WaitStatus};
use procbridge_ipc::{Dictionary, Value};

use crate::{Process, Result};

/// Launches a new process.
pub const CMD_SPAWN: &str = "spawn";
/// Waits for a child state change.
pub const CMD_WAIT: &str = "wait";

/// Outcome of a `wait*` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitResult {
    /// Pid of the reaped child; `0` when `WNOHANG` found nothing.
    pub pid: Pid,
    /// Status word, when the host reported one.
    pub status: Option<WaitStatus>,
}

/// Resource usage reported by `wait3`/`wait4`; never populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// User CPU time in microseconds.
    pub user_time_us: u64,
    /// System CPU time in microseconds.
    pub system_time_us: u64,
}

impl Process {
    /// `spawnve`.
    ///
    /// `NoWait`/`NoWaitO` return the child pid. `Wait` returns the child's status word, or `0`
    /// when the host reported none. `Overlay` needs a vfork session and is `ENOSYS` here.
    /// `envp = None` passes this process's environment.
    pub fn spawnve(
        &self,
        mode: SpawnMode,
        path: &str,
        argv: &[String],
        envp: Option<&[String]>,
    ) -> Result<i32> {
        check_target(path, argv)?;
        match mode {
            SpawnMode::NoWait | SpawnMode::NoWaitO => self.spawn_child(path, argv, envp),
            SpawnMode::Wait => {
                let pid = self.spawn_child(path, argv, envp)?;
                let result = self.waitpid(pid, WaitOptions::empty())?;
                Ok(result.status.map_or(0, WaitStatus::raw))
            }
            SpawnMode::Overlay => Err(Errno::ENOSYS.into()),
        }
    }

    /// `spawnv`: [`Process::spawnve`] with this process's environment.
    pub fn spawnv(&self, mode: SpawnMode, path: &str, argv: &[String]) -> Result<i32> {
        self.spawnve(mode, path, argv, None)
    }

    /// `posix_spawn` without file actions or attributes.
    pub fn posix_spawn(&self, path: &str, argv: &[String], envp: Option<&[String]>) -> Result<Pid> {
        self.spawnve(SpawnMode::NoWait, path, argv, envp)
    }

    /// `posix_spawnp`; bare names are searched along `PATH` during resolution anyway.
    pub fn posix_spawnp(&self, file: &str, argv: &[String], envp: Option<&[String]>) -> Result<Pid> {
        self.posix_spawn(file, argv, envp)
    }

    pub(crate) fn spawn_child(
        &self,
        path: &str,
        argv: &[String],
        envp: Option<&[String]>,
    ) -> Result<Pid> {
        check_target(path, argv)?;
        let mut envs = match envp {
            Some(envp) => envp.to_vec(),
            None => self.environ(),
        };
        envs.extend(self.inherited_fd_entries());

        let mut args = argv.to_vec();
        let search_path = self.getenv("PATH").unwrap_or_else(|| self.config().default_path.clone());
        let cwd = self.getcwd();
        let manifest = self.resolver().resolve(path, &mut args, &search_path, &cwd)?;

        let mut request = Dictionary::command(CMD_SPAWN)
            .with("args", Value::str_array(args))
            .with("envs", Value::str_array(envs))
            .with("cwd", cwd);
        if let Some(manifest) = &manifest {
            request.set("nmf", manifest.to_dictionary());
        }
        let pid = self.call(request)?.int("pid")?;
        info!("spawn: {path} started as pid {pid}");
        Ok(pid)
    }

    /// `waitpid`. `pid` follows POSIX: `-1` any child, `0` own group, `< -1` group `-pid`.
    pub fn waitpid(&self, pid: Pid, options: WaitOptions) -> Result<WaitResult> {
        let request = Dictionary::command(CMD_WAIT).with("pid", pid).with("options", options.bits());
        let reply = self.call(request)?;
        let reaped = reply.int("pid")?;
        let status = reply.opt_raw_int("status")?.map(WaitStatus::from_host);
        debug!("spawn: wait({pid}) -> {reaped} {status:?}");
        Ok(WaitResult { pid: reaped, status })
    }

    /// `wait`.
    pub fn wait(&self) -> Result<WaitResult> {
        self.waitpid(-1, WaitOptions::empty())
    }

    /// `wait3`.
    pub fn wait3(&self, options: WaitOptions) -> Result<(WaitResult, ResourceUsage)> {
        self.wait4(-1, options)
    }

    /// `wait4`.
    pub fn wait4(&self, pid: Pid, options: WaitOptions) -> Result<(WaitResult, ResourceUsage)> {
        Ok((self.waitpid(pid, options)?, ResourceUsage::default()))
    }

    /// `execve`; replacing the running image is unsupported outside a vfork session.
    pub fn execve(&self, path: &str, argv: &[String], envp: &[String]) -> Result<()> {
        self.spawnve(SpawnMode::Overlay, path, argv, Some(envp)).map(drop)
    }

    /// `execv`.
    pub fn execv(&self, path: &str, argv: &[String]) -> Result<()> {
        self.spawnve(SpawnMode::Overlay, path, argv, None).map(drop)
    }

    /// `execvp`.
    pub fn execvp(&self, file: &str, argv: &[String]) -> Result<()> {
        self.execv(file, argv)
    }

    /// `execvpe`.
    pub fn execvpe(&self, file: &str, argv: &[String], envp: &[String]) -> Result<()> {
        self.execve(file, argv, envp)
    }
}

pub(crate) fn check_target(path: &str, argv: &[String]) -> Result<()> {
    if path.is_empty() || argv.is_empty() {
        return Err(Errno::EINVAL.into());
    }
    Ok(())
}
