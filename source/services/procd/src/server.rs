// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Request dispatch of the reference host
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 5 unit tests, end-to-end coverage in tests/spawn_e2e
//!
//! Every emulated process talks to the host over its own loopback connection. A connection
//! thread receives requests and hands each one to a worker thread, so blocking commands
//! (`wait`, `apipe_read`) answer out of order. Failures are answered with `-errno` in the
//! command's result field; unknown commands get `result = -ENOSYS`.
//!
//! ADR: docs/adr/0001-process-bridge.md

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use procbridge_abi::{Errno, Pid, SpawnMode, WaitOptions, WaitStatus};
use procbridge_ipc::{
    loopback_channel, Channel, Dictionary, HostEndpoint, IpcError, ReplyError, Value, Wait,
};
use procbridge_loader::{DependencyResolver, FileSystem, MemoryFileSystem};
use procbridge_spawn::commands::{
    CMD_APIPE, CMD_APIPE_CLOSE, CMD_APIPE_READ, CMD_APIPE_WRITE, CMD_DEADPID, CMD_GETPGID,
    CMD_GETSID, CMD_SETPGID, CMD_SETSID, CMD_SPAWN, CMD_WAIT,
};
use procbridge_spawn::{inherit, BridgeConfig, Environment, ExitHandler, Process};
use thiserror::Error;

use crate::pipes::PipeTable;
use crate::programs::{builtins, Program, ProgramTable};
use crate::stdio::{stdio_table, StdioMode};
use crate::table::ProcessTable;

// Unwinds a program thread that called `_exit`; `run_program` turns it into the exit status.
struct ProgramExit(i32);

fn unwind_program() -> ExitHandler {
    Arc::new(|status: i32| panic::resume_unwind(Box::new(ProgramExit(status))))
}

/// Result alias used by the host.
pub type Result<T> = core::result::Result<T, ServerError>;

/// Errors surfaced while running the host itself.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The process table refused an operation.
    #[error("process table: {0}")]
    Table(Errno),
    /// A process could not be brought up or failed a call.
    #[error("process error: {0}")]
    Process(#[from] procbridge_spawn::Error),
    /// A host thread could not be started.
    #[error("failed to start thread: {0}")]
    Thread(#[from] std::io::Error),
    /// The command line names no program.
    #[error("no program given")]
    NoProgram,
}

impl From<Errno> for ServerError {
    fn from(value: Errno) -> Self {
        Self::Table(value)
    }
}

type Outcome = core::result::Result<Dictionary, Errno>;

fn field<T>(value: core::result::Result<T, ReplyError>) -> core::result::Result<T, Errno> {
    value.map_err(|err| {
        error!("procd: malformed request: {err}");
        Errno::EINVAL
    })
}

/// Assembles a [`Procd`].
pub struct ProcdBuilder {
    config: BridgeConfig,
    stdio: StdioMode,
    filesystem: Arc<dyn FileSystem>,
    dependencies: Option<Arc<dyn DependencyResolver>>,
    builtins: bool,
}

impl ProcdBuilder {
    /// Which stdio host-started processes get; defaults to the host's own.
    pub fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    /// Filesystem view children resolve spawn targets against; defaults to an empty one, so
    /// every program name is left to the program table.
    pub fn filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Dependency resolver handed to children.
    pub fn dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.dependencies = Some(resolver);
        self
    }

    /// Leaves the builtin programs out of the program table.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Creates the host.
    pub fn build(self) -> Procd {
        let programs = ProgramTable::new();
        if self.builtins {
            for (name, program) in builtins() {
                programs.register(name, program);
            }
        }
        Procd {
            shared: Arc::new(Shared {
                config: self.config,
                stdio: self.stdio,
                filesystem: self.filesystem,
                dependencies: self.dependencies,
                programs,
                processes: ProcessTable::new(),
                pipes: PipeTable::new(),
            }),
        }
    }
}

struct Shared {
    config: BridgeConfig,
    stdio: StdioMode,
    filesystem: Arc<dyn FileSystem>,
    dependencies: Option<Arc<dyn DependencyResolver>>,
    programs: ProgramTable,
    processes: ProcessTable,
    pipes: PipeTable,
}

/// Reference host: process table, pipe objects and program dispatch.
#[derive(Clone)]
pub struct Procd {
    shared: Arc<Shared>,
}

impl Procd {
    /// Starts a [`ProcdBuilder`].
    pub fn builder(config: BridgeConfig) -> ProcdBuilder {
        ProcdBuilder {
            config,
            stdio: StdioMode::default(),
            filesystem: Arc::new(MemoryFileSystem::new()),
            dependencies: None,
            builtins: true,
        }
    }

    /// Makes `program` startable under `name`.
    pub fn register<F>(&self, name: &str, program: F)
    where
        F: Fn(&Process, &[String]) -> i32 + Send + Sync + 'static,
    {
        self.shared.programs.register(name, Arc::new(program));
    }

    /// Program registry.
    pub fn programs(&self) -> &ProgramTable {
        &self.shared.programs
    }

    /// Process table.
    pub fn processes(&self) -> &ProcessTable {
        &self.shared.processes
    }

    /// Pipe objects.
    pub fn pipes(&self) -> &PipeTable {
        &self.shared.pipes
    }

    /// Registers a parentless process and returns its bootstrapped handle.
    pub fn start_root(&self, env: Environment, cwd: &str) -> Result<Process> {
        let shared = &self.shared;
        let pid = shared.processes.add_root()?;
        let mut env = env;
        env.set(&shared.config.pid_env, &pid.to_string(), true);
        env.remove(&shared.config.ppid_env);
        let process = match shared.start_process(pid, env, cwd, None) {
            Ok(process) => process,
            Err(err) => {
                shared.processes.discard(pid);
                return Err(err);
            }
        };
        info!("procd: root process {pid} started");
        Ok(process)
    }

    /// Closes every descriptor of `process` and records its exit.
    pub fn finish(&self, process: &Process, status: i32) {
        if let Err(err) = process.close_all() {
            warn!("procd: closing descriptors of pid {} failed: {err}", process.getpid());
        }
        self.shared.processes.exit(process.getpid(), status);
    }

    /// Runs `args` under a fresh root process and returns its exit status.
    pub fn run(&self, args: &[String], env: Environment, cwd: &str) -> Result<i32> {
        let program = args.first().ok_or(ServerError::NoProgram)?;
        let root = self.start_root(env, cwd)?;
        let outcome = root.spawnve(SpawnMode::Wait, program, args, None);
        self.finish(&root, 0);
        let word = outcome?;
        Ok(WaitStatus::from_raw(word).exit_status())
    }
}

impl Shared {
    fn connect(self: &Arc<Self>, pid: Pid) -> Result<Arc<dyn Channel>> {
        let (channel, host) = loopback_channel();
        let shared = self.clone();
        thread::Builder::new()
            .name(format!("procd-conn-{pid}"))
            .spawn(move || shared.serve_connection(pid, host))?;
        Ok(Arc::new(channel))
    }

    fn start_process(
        self: &Arc<Self>,
        pid: Pid,
        env: Environment,
        cwd: &str,
        exit: Option<ExitHandler>,
    ) -> Result<Process> {
        let channel = self.connect(pid)?;
        let mut builder = Process::builder(channel)
            .config(self.config.clone())
            .env(env)
            .cwd(cwd)
            .fds(stdio_table(self.stdio))
            .filesystem(self.filesystem.clone());
        if let Some(resolver) = &self.dependencies {
            builder = builder.dependency_resolver(resolver.clone());
        }
        if let Some(exit) = exit {
            builder = builder.exit_handler(exit);
        }
        Ok(builder.bootstrap()?)
    }

    fn serve_connection(self: Arc<Self>, pid: Pid, host: HostEndpoint) {
        let replier = host.replier();
        loop {
            let request = match host.recv(Wait::Blocking) {
                Ok(request) => request,
                Err(IpcError::Disconnected) => break,
                Err(err) => {
                    error!("procd: connection of pid {pid} failed: {err}");
                    break;
                }
            };
            let Some(id) = request.id().map(str::to_string) else {
                error!("procd: request without id from pid {pid}");
                continue;
            };
            let shared = self.clone();
            let replier = replier.clone();
            let spawned = thread::Builder::new().name(format!("procd-req-{pid}")).spawn(move || {
                let reply = shared.handle(pid, &request);
                if !replier.reply(&id, Value::Dict(reply)) {
                    warn!("procd: pid {pid} no longer waits for request {id}");
                }
            });
            if let Err(err) = spawned {
                error!("procd: cannot start worker for pid {pid}: {err}");
            }
        }
        debug!("procd: connection of pid {pid} closed");
    }

    fn handle(self: &Arc<Self>, caller: Pid, request: &Dictionary) -> Dictionary {
        let command = request.command_name().unwrap_or_default();
        debug!("procd: pid {caller} -> {command}");
        let (key, outcome) = match command {
            CMD_SPAWN => ("pid", self.spawn(caller, request)),
            CMD_WAIT => ("pid", self.wait(caller, request)),
            CMD_DEADPID => ("pid", self.deadpid(caller, request)),
            CMD_APIPE => ("pipe_id", self.pipes.create().map(|id| Dictionary::new().with("pipe_id", id))),
            CMD_APIPE_READ => return self.read_pipe(request),
            CMD_APIPE_WRITE => ("count", self.write_pipe(request)),
            CMD_APIPE_CLOSE => ("result", self.close_pipe(request)),
            CMD_GETPGID => ("pgid", self.getpgid(caller, request)),
            CMD_SETPGID => ("result", self.setpgid(caller, request)),
            CMD_GETSID => ("sid", self.getsid(caller, request)),
            CMD_SETSID => {
                ("sid", self.processes.setsid(caller).map(|sid| Dictionary::new().with("sid", sid)))
            }
            other => {
                error!("procd: unknown command {other:?} from pid {caller}");
                ("result", Err(Errno::ENOSYS))
            }
        };
        outcome.unwrap_or_else(|errno| {
            debug!("procd: {command} from pid {caller} failed: {errno}");
            Dictionary::new().with(key, -errno.raw())
        })
    }

    fn spawn(self: &Arc<Self>, caller: Pid, request: &Dictionary) -> Outcome {
        let args = field(request.str_array("args"))?;
        let envs = field(request.str_array("envs"))?;
        let cwd = field(request.str("cwd"))?.to_string();
        let name = args.first().ok_or(Errno::EINVAL)?.clone();
        let program = self.programs.lookup(&name).ok_or(Errno::ENOENT)?;
        if request.contains("nmf") {
            debug!("procd: {name} comes with a loading descriptor");
        }

        let pid = self.processes.add_child(caller)?;
        self.retain_inherited(&envs);
        let mut env = Environment::from_envp(&envs);
        env.set(&self.config.pid_env, &pid.to_string(), true);
        env.set(&self.config.ppid_env, &caller.to_string(), true);
        env.set("PWD", &cwd, true);

        let process = match self.start_process(pid, env, &cwd, Some(unwind_program())) {
            Ok(process) => process,
            Err(err) => {
                error!("procd: pid {pid} failed to start: {err}");
                self.processes.discard(pid);
                return Err(Errno::EAGAIN);
            }
        };
        if let Err(err) = self.run_program(pid, process, program, args) {
            error!("procd: pid {pid} failed to start: {err}");
            self.processes.discard(pid);
            return Err(Errno::EAGAIN);
        }
        info!("procd: pid {caller} spawned {name} as pid {pid}");
        Ok(Dictionary::new().with("pid", pid))
    }

    // One more description per distinct inherited (pipe, role); the child opens exactly those.
    fn retain_inherited(&self, envs: &[String]) {
        let mut scan = Environment::from_envp(envs);
        let mut seen = Vec::new();
        for pipe in inherit::decode(&mut scan, &self.config.fd_env_marker) {
            let key = (pipe.pipe_id, pipe.writer);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if let Err(errno) = self.pipes.retain(pipe.pipe_id, pipe.writer) {
                warn!("procd: inherited {pipe} names no live pipe ({errno})");
            }
        }
    }

    fn run_program(
        self: &Arc<Self>,
        pid: Pid,
        process: Process,
        program: Program,
        args: Vec<String>,
    ) -> Result<()> {
        let shared = self.clone();
        let spawned = thread::Builder::new().name(format!("procd-pid-{pid}")).spawn(move || {
            let status = match panic::catch_unwind(AssertUnwindSafe(|| program(&process, &args))) {
                Ok(status) => status,
                Err(payload) => match payload.downcast::<ProgramExit>() {
                    Ok(exit) => exit.0,
                    Err(_) => {
                        error!("procd: pid {pid} panicked");
                        101
                    }
                },
            };
            if let Err(err) = process.close_all() {
                warn!("procd: closing descriptors of pid {pid} failed: {err}");
            }
            drop(process);
            shared.processes.exit(pid, status);
            info!("procd: pid {pid} exited with status {status}");
        });
        spawned.map(drop).map_err(ServerError::from)
    }

    fn wait(&self, caller: Pid, request: &Dictionary) -> Outcome {
        let pid = field(request.raw_int("pid"))?;
        let options = WaitOptions::from_bits_retain(field(request.opt_raw_int("options"))?.unwrap_or(0));
        let (reaped, status) = self.processes.wait(caller, pid, options)?;
        let mut reply = Dictionary::new().with("pid", reaped);
        if let Some(status) = status {
            reply.set("status", status);
        }
        Ok(reply)
    }

    fn deadpid(&self, caller: Pid, request: &Dictionary) -> Outcome {
        let status = field(request.raw_int("status"))?;
        let pid = self.processes.add_exited_child(caller, status)?;
        Ok(Dictionary::new().with("pid", pid))
    }

    fn read_pipe(&self, request: &Dictionary) -> Dictionary {
        let data = match (field(request.raw_int("pipe_id")), field(request.raw_int("count"))) {
            (Ok(id), Ok(count)) => self.pipes.read(id, usize::try_from(count).unwrap_or(0)),
            _ => Vec::new(),
        };
        Dictionary::new().with("data", data)
    }

    fn write_pipe(&self, request: &Dictionary) -> Outcome {
        let id = field(request.raw_int("pipe_id"))?;
        let data = field(request.bytes("data"))?;
        let count = self.pipes.write(id, data)?;
        Ok(Dictionary::new().with("count", i32::try_from(count).unwrap_or(i32::MAX)))
    }

    fn close_pipe(&self, request: &Dictionary) -> Outcome {
        let id = field(request.raw_int("pipe_id"))?;
        let writer = field(request.raw_int("writer"))? != 0;
        self.pipes.close(id, writer)?;
        Ok(Dictionary::new().with("result", 0))
    }

    fn getpgid(&self, caller: Pid, request: &Dictionary) -> Outcome {
        let pid = field(request.raw_int("pid"))?;
        Ok(Dictionary::new().with("pgid", self.processes.getpgid(caller, pid)?))
    }

    fn setpgid(&self, caller: Pid, request: &Dictionary) -> Outcome {
        let pid = field(request.raw_int("pid"))?;
        let pgid = field(request.raw_int("pgid"))?;
        self.processes.setpgid(caller, pid, pgid)?;
        Ok(Dictionary::new().with("result", 0))
    }

    fn getsid(&self, caller: Pid, request: &Dictionary) -> Outcome {
        let pid = field(request.raw_int("pid"))?;
        Ok(Dictionary::new().with("sid", self.processes.getsid(caller, pid)?))
    }
}
