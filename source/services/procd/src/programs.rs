// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Programs the host can start, looked up by the base name of `args[0]`
//!
//! PUBLIC API:
//!   - Program: entry point run on its own thread with the child's process handle
//!   - ProgramTable: name to program registry
//!   - builtins(): echo, cat, true, false and a two-stage pipeline

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use procbridge_abi::{Errno, Pid, WaitOptions};
use procbridge_spawn::{Process, Result};

/// Entry point of a program: receives the child process and its argument vector, returns the
/// exit status.
pub type Program = Arc<dyn Fn(&Process, &[String]) -> i32 + Send + Sync>;

/// Base name used to look a program up.
pub fn program_name(arg0: &str) -> &str {
    arg0.rsplit('/').next().unwrap_or(arg0)
}

/// Registry of startable programs.
#[derive(Default)]
pub struct ProgramTable {
    programs: RwLock<HashMap<String, Program>>,
}

impl ProgramTable {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `program` under `name`, replacing any previous entry.
    pub fn register(&self, name: &str, program: Program) {
        self.programs.write().insert(name.to_string(), program);
    }

    /// Looks up the program started by `arg0`.
    pub fn lookup(&self, arg0: &str) -> Option<Program> {
        self.programs.read().get(program_name(arg0)).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.programs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn write_all(process: &Process, fd: i32, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let written = process.write(fd, data)?;
        if written == 0 {
            return Err(Errno::EPIPE.into());
        }
        data = &data[written..];
    }
    Ok(())
}

fn echo(process: &Process, args: &[String]) -> i32 {
    let mut line = args.get(1..).unwrap_or_default().join(" ");
    line.push('\n');
    match write_all(process, 1, line.as_bytes()) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn copy(process: &Process, from: i32, to: i32) -> Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let count = process.read(from, &mut buf)?;
        if count == 0 {
            return Ok(());
        }
        write_all(process, to, &buf[..count])?;
    }
}

fn cat(process: &Process, _args: &[String]) -> i32 {
    match copy(process, 0, 1) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

// Starts `argv` with descriptor `target` replaced by `fd` and both pipe ends closed.
fn start_stage(process: &Process, argv: &[String], fd: i32, target: i32, ends: [i32; 2]) -> Result<Pid> {
    let mut session = process.vfork_before();
    let child = session.process();
    child.dup2(fd, target)?;
    for end in ends {
        child.close(end)?;
    }
    let program = argv.first().map(String::as_str).unwrap_or_default();
    session.execvp(program, argv)?;
    session.after()
}

fn run_pipeline(process: &Process, args: &[String]) -> Result<i32> {
    let stages = args.get(1..).unwrap_or_default();
    let Some(split) = stages.iter().position(|arg| arg == "|") else {
        return Err(Errno::EINVAL.into());
    };
    let (left, right) = (&stages[..split], &stages[split + 1..]);
    let ends = process.pipe()?;
    let [read_end, write_end] = ends;
    let writer = start_stage(process, left, write_end, 1, ends);
    let reader = start_stage(process, right, read_end, 0, ends);
    process.close(read_end)?;
    process.close(write_end)?;
    let (writer, reader) = (writer?, reader?);
    process.waitpid(writer, WaitOptions::empty())?;
    let status = process.waitpid(reader, WaitOptions::empty())?.status;
    Ok(status.map_or(0, |status| status.exit_status()))
}

fn pipeline(process: &Process, args: &[String]) -> i32 {
    match run_pipeline(process, args) {
        Ok(status) => status,
        Err(err) => {
            warn!("pipeline: {err}");
            1
        }
    }
}

/// Programs every host starts with.
pub fn builtins() -> Vec<(&'static str, Program)> {
    vec![
        ("echo", Arc::new(echo) as Program),
        ("cat", Arc::new(cat) as Program),
        ("true", Arc::new(|_: &Process, _: &[String]| 0) as Program),
        ("false", Arc::new(|_: &Process, _: &[String]| 1) as Program),
        ("pipeline", Arc::new(pipeline) as Program),
    ]
}
