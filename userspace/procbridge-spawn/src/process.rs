// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Emulated process handle
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! A [`Process`] owns the state a kernel would keep for a POSIX process: environment, working
//! directory, descriptor table, identity. Every host interaction goes through its correlator.
//! Handles are cheap to clone and may be used from any thread.
//!
//! INVARIANTS:
//!   - the descriptor table lock is never held across a pipe read or write
//!   - `close` and `pipe` release descriptions after dropping the table lock
//!   - `bootstrap` restores inherited pipes before returning; a failed restore fails start-up

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use procbridge_abi::{AccessMode, Errno, Pid};
use procbridge_ipc::{Channel, Correlator, Dictionary};
use procbridge_loader::{
    absolute_path, DependencyResolver, ElfDependencyResolver, FileSystem, HostFileSystem, Resolver,
};
use procbridge_vfs::{AnonymousPipeFs, FdTable, OpenFile, Stat, DEFAULT_FD_LIMIT};

use crate::identity::{IdentityCache, IdentitySource};
use crate::{inherit, BridgeConfig, Environment, Result};

/// Reads the process group of a pid.
pub const CMD_GETPGID: &str = "getpgid";
/// Moves a pid into a process group.
pub const CMD_SETPGID: &str = "setpgid";
/// Reads the session of a pid.
pub const CMD_GETSID: &str = "getsid";
/// Starts a new session.
pub const CMD_SETSID: &str = "setsid";
/// Allocates a pid for a logical child that exited without running.
pub const CMD_DEADPID: &str = "deadpid";

/// Terminates the calling process with a status; see [`ProcessBuilder::exit_handler`].
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// Assembles a [`Process`].
pub struct ProcessBuilder {
    channel: Arc<dyn Channel>,
    config: BridgeConfig,
    env: Environment,
    cwd: String,
    fds: FdTable,
    filesystem: Option<Arc<dyn FileSystem>>,
    dependencies: Option<Arc<dyn DependencyResolver>>,
    identity: Option<Arc<dyn IdentitySource>>,
    exit: Option<ExitHandler>,
}

impl ProcessBuilder {
    /// Starts a builder talking to the host over `channel`.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            config: BridgeConfig::default(),
            env: Environment::new(),
            cwd: "/".to_string(),
            fds: FdTable::new(DEFAULT_FD_LIMIT),
            filesystem: None,
            dependencies: None,
            identity: None,
            exit: None,
        }
    }

    /// Replaces the default configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial environment.
    pub fn env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Initial working directory; `PWD` overrides it during [`ProcessBuilder::bootstrap`].
    pub fn cwd(mut self, cwd: &str) -> Self {
        self.cwd = cwd.to_string();
        self
    }

    /// Initial descriptor table (stdio and the like).
    pub fn fds(mut self, fds: FdTable) -> Self {
        self.fds = fds;
        self
    }

    /// Filesystem view used to resolve spawn targets; defaults to the host filesystem.
    pub fn filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Dependency resolver; defaults to ELF inspection along `library_path`.
    pub fn dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.dependencies = Some(resolver);
        self
    }

    /// Runtime identity query consulted when no pid was inherited.
    pub fn identity_source(mut self, source: Arc<dyn IdentitySource>) -> Self {
        self.identity = Some(source);
        self
    }

    /// Runs on [`Process::exit`] after descriptors are closed. A handler that returns falls
    /// through to `std::process::exit`; hosts running several processes in one OS process
    /// unwind the calling thread instead.
    pub fn exit_handler(mut self, handler: ExitHandler) -> Self {
        self.exit = Some(handler);
        self
    }

    /// Builds the process as configured, without looking at inherited state.
    pub fn build(self) -> Process {
        let correlator =
            Arc::new(Correlator::new(self.channel).with_timeout(self.config.reply_timeout()));
        let filesystem = self.filesystem.unwrap_or_else(|| Arc::new(HostFileSystem));
        let dependencies = self.dependencies.unwrap_or_else(|| {
            Arc::new(ElfDependencyResolver::new(filesystem.clone(), &self.config.library_path))
        });
        let resolver = Resolver::new(filesystem, dependencies, self.config.resolve_options());
        let pipes = AnonymousPipeFs::new(correlator.clone(), &self.config.pipe_mount);
        let identity = IdentityCache::from_env(&self.env, &self.config, self.identity);
        Process {
            inner: Arc::new(Inner {
                correlator,
                pipes,
                resolver,
                identity,
                fds: Mutex::new(self.fds),
                env: Mutex::new(self.env),
                cwd: Mutex::new(self.cwd),
                exit: self.exit,
                config: self.config,
            }),
        }
    }

    /// Builds the process and runs start-up: adopts `PWD`, restores inherited pipes.
    pub fn bootstrap(self) -> Result<Process> {
        let process = self.build();
        let inner = &process.inner;
        let (pwd, records) = {
            let mut env = inner.env.lock();
            let pwd = env.get("PWD").filter(|pwd| pwd.starts_with('/')).map(str::to_string);
            (pwd, inherit::decode(&mut env, &inner.config.fd_env_marker))
        };
        if let Some(pwd) = pwd {
            *inner.cwd.lock() = pwd;
        }
        inherit::restore(&mut inner.fds.lock(), &inner.pipes, &records)?;
        if !records.is_empty() {
            info!("spawn: restored {} inherited pipe descriptors", records.len());
        }
        Ok(process)
    }
}

struct Inner {
    correlator: Arc<Correlator>,
    config: BridgeConfig,
    pipes: AnonymousPipeFs,
    resolver: Resolver,
    identity: IdentityCache,
    fds: Mutex<FdTable>,
    env: Mutex<Environment>,
    cwd: Mutex<String>,
    exit: Option<ExitHandler>,
}

/// Handle to one emulated process.
#[derive(Clone)]
pub struct Process {
    inner: Arc<Inner>,
}

impl Process {
    /// Starts a [`ProcessBuilder`].
    pub fn builder(channel: Arc<dyn Channel>) -> ProcessBuilder {
        ProcessBuilder::new(channel)
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Request correlator shared by every operation of this process.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    /// Anonymous pipe filesystem.
    pub fn pipe_fs(&self) -> &AnonymousPipeFs {
        &self.inner.pipes
    }

    pub(crate) fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub(crate) fn call(&self, request: Dictionary) -> Result<Dictionary> {
        Ok(self.inner.correlator.send_and_wait(request)?)
    }

    /// `getenv`.
    pub fn getenv(&self, name: &str) -> Option<String> {
        self.inner.env.lock().get(name).map(str::to_string)
    }

    /// `setenv`; names containing `=` or empty names are `EINVAL`.
    pub fn setenv(&self, name: &str, value: &str, overwrite: bool) -> Result<()> {
        if name.is_empty() || name.contains('=') {
            return Err(Errno::EINVAL.into());
        }
        self.inner.env.lock().set(name, value, overwrite);
        Ok(())
    }

    /// `unsetenv`.
    pub fn unsetenv(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('=') {
            return Err(Errno::EINVAL.into());
        }
        self.inner.env.lock().remove(name);
        Ok(())
    }

    /// Copy of `environ`.
    pub fn environ(&self) -> Vec<String> {
        self.inner.env.lock().to_envp()
    }

    /// `getcwd`.
    pub fn getcwd(&self) -> String {
        self.inner.cwd.lock().clone()
    }

    /// `chdir`; relative paths are taken against the current directory. `PWD` follows.
    pub fn chdir(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Errno::ENOENT.into());
        }
        let mut cwd = self.inner.cwd.lock();
        let next = absolute_path(&cwd, path);
        self.inner.env.lock().set("PWD", &next, true);
        *cwd = next;
        Ok(())
    }

    /// `open`; only paths below the pipe mount exist.
    pub fn open(&self, path: &str, flags: i32) -> Result<i32> {
        let access = AccessMode::from_flags(flags)?;
        if !self.inner.pipes.contains(path) {
            return Err(Errno::ENOENT.into());
        }
        let file = self.inner.pipes.open(path, access)?;
        self.install(OpenFile::new(file))
    }

    /// Installs `file` on the lowest free descriptor.
    pub fn install(&self, file: Arc<OpenFile>) -> Result<i32> {
        Ok(self.inner.fds.lock().install(file)?)
    }

    /// Installs `file` on `fd`, closing what was open there.
    pub fn install_at(&self, fd: i32, file: Arc<OpenFile>) -> Result<i32> {
        Ok(self.inner.fds.lock().install_at(fd, file)?)
    }

    /// `close`.
    pub fn close(&self, fd: i32) -> Result<()> {
        let closing = self.inner.fds.lock().split_off(fd)?;
        Ok(closing.close_all()?)
    }

    /// `dup`.
    pub fn dup(&self, fd: i32) -> Result<i32> {
        Ok(self.inner.fds.lock().dup(fd)?)
    }

    /// `dup2`.
    pub fn dup2(&self, old: i32, new: i32) -> Result<i32> {
        Ok(self.inner.fds.lock().dup2(old, new)?)
    }

    /// Sets or clears `FD_CLOEXEC`.
    pub fn set_cloexec(&self, fd: i32, cloexec: bool) -> Result<()> {
        Ok(self.inner.fds.lock().set_cloexec(fd, cloexec)?)
    }

    /// Reads `FD_CLOEXEC`.
    pub fn cloexec(&self, fd: i32) -> Result<bool> {
        Ok(self.inner.fds.lock().entry(fd)?.cloexec())
    }

    fn file(&self, fd: i32) -> Result<Arc<OpenFile>> {
        Ok(self.inner.fds.lock().get(fd)?)
    }

    /// `read`; may block until the host has data.
    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize> {
        let file = self.file(fd)?;
        Ok(file.file().read(buf)?)
    }

    /// `write`.
    pub fn write(&self, fd: i32, data: &[u8]) -> Result<usize> {
        let file = self.file(fd)?;
        Ok(file.file().write(data)?)
    }

    /// `fstat`.
    pub fn fstat(&self, fd: i32) -> Result<Stat> {
        let file = self.file(fd)?;
        Ok(file.file().stat()?)
    }

    /// Copy of the descriptor table sharing every open description.
    pub fn snapshot_fds(&self) -> FdTable {
        self.inner.fds.lock().snapshot()
    }

    /// Replaces the descriptor table by `saved`, closing descriptors opened since.
    pub fn restore_fds(&self, saved: FdTable) -> Result<()> {
        Ok(self.inner.fds.lock().restore(saved)?)
    }

    pub(crate) fn inherited_fd_entries(&self) -> Vec<String> {
        let fds = self.inner.fds.lock();
        inherit::encode(&fds, self.inner.config.fd_ceiling, &self.inner.config.fd_env_marker)
    }

    /// Closes every descriptor, as process exit does.
    pub fn close_all(&self) -> Result<()> {
        let table = std::mem::take(&mut *self.inner.fds.lock());
        Ok(table.close_all()?)
    }

    /// `_exit` outside a vfork: closes every descriptor, then runs the exit handler.
    pub fn exit(&self, status: i32) -> ! {
        info!("spawn: pid {} exiting with status {status}", self.getpid());
        if let Err(err) = self.close_all() {
            warn!("spawn: closing descriptors at exit failed: {err}");
        }
        if let Some(handler) = &self.inner.exit {
            handler(status);
        }
        std::process::exit(status)
    }

    /// `pipe`: returns `[read_fd, write_fd]`.
    pub fn pipe(&self) -> Result<[i32; 2]> {
        let pipe_id = self.inner.pipes.create()?;
        let reader = OpenFile::new(self.inner.pipes.open_id(pipe_id, AccessMode::ReadOnly));
        let writer = OpenFile::new(self.inner.pipes.open_id(pipe_id, AccessMode::WriteOnly));
        let mut fds = self.inner.fds.lock();
        let read_fd = fds.install(reader)?;
        let write_fd = match fds.install(writer) {
            Ok(fd) => fd,
            Err(err) => {
                let unwound = fds.split_off(read_fd)?;
                drop(fds);
                unwound.close_all()?;
                return Err(err.into());
            }
        };
        drop(fds);
        debug!("spawn: pipe {pipe_id} on fds {read_fd}/{write_fd}");
        Ok([read_fd, write_fd])
    }

    /// `getpid`.
    pub fn getpid(&self) -> Pid {
        self.inner.identity.pid()
    }

    /// `getppid`; `ENOSYS` when the parent identity is unknown.
    pub fn getppid(&self) -> Result<Pid> {
        self.inner.identity.ppid()
    }

    /// `getpgid`; `0` names the calling process.
    pub fn getpgid(&self, pid: Pid) -> Result<Pid> {
        let reply = self.call(Dictionary::command(CMD_GETPGID).with("pid", pid))?;
        Ok(reply.int("pgid")?)
    }

    /// `setpgid`; `0` for either argument names the calling process.
    pub fn setpgid(&self, pid: Pid, pgid: Pid) -> Result<()> {
        let request = Dictionary::command(CMD_SETPGID).with("pid", pid).with("pgid", pgid);
        self.call(request)?.int("result")?;
        Ok(())
    }

    /// `getpgrp`.
    pub fn getpgrp(&self) -> Result<Pid> {
        self.getpgid(0)
    }

    /// `setpgrp`.
    pub fn setpgrp(&self) -> Result<()> {
        self.setpgid(0, 0)
    }

    /// `getsid`.
    pub fn getsid(&self, pid: Pid) -> Result<Pid> {
        let reply = self.call(Dictionary::command(CMD_GETSID).with("pid", pid))?;
        Ok(reply.int("sid")?)
    }

    /// `setsid`; returns the new session id.
    pub fn setsid(&self) -> Result<Pid> {
        let reply = self.call(Dictionary::command(CMD_SETSID))?;
        Ok(reply.int("sid")?)
    }

    /// Reports a logical child that exited without running and returns its allocated pid.
    pub fn deadpid(&self, status: i32) -> Result<Pid> {
        let reply = self.call(Dictionary::command(CMD_DEADPID).with("status", status))?;
        Ok(reply.int("pid")?)
    }
}
