// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Descriptor inheritance across the spawn boundary
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (environment token format is wire-visible)
//! TEST_COVERAGE: 5 unit tests + proptest
//!
//! Open pipe ends travel to a child as `<MARKER>_<n>=pipe:<fd>:<pipe_id>:<0|1>` environment
//! entries. The child decodes and strips them before any program code runs.
//!
//! INVARIANTS:
//!   - close-on-exec descriptors and non-FIFO descriptors are never encoded
//!   - entries are numbered from 0 without gaps; decoding stops at the first missing index
//!   - ends sharing `(pipe_id, role)` are restored onto one open file description

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use procbridge_abi::{AccessMode, FileKind};
use procbridge_vfs::{AnonymousPipeFs, FdTable, OpenFile};

use crate::{Environment, Result};

/// One inherited pipe end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InheritedPipe {
    /// Descriptor number in the child.
    pub fd: i32,
    /// Host pipe object id.
    pub pipe_id: i32,
    /// `true` for the write end.
    pub writer: bool,
}

impl InheritedPipe {
    /// Token stored as the environment value.
    pub fn to_token(&self) -> String {
        format!("pipe:{}:{}:{}", self.fd, self.pipe_id, u8::from(self.writer))
    }

    /// Parses a `pipe:<fd>:<id>:<writer>` token; any nonzero writer field marks the write end.
    pub fn parse(token: &str) -> Option<Self> {
        let mut fields = token.strip_prefix("pipe:")?.split(':');
        let fd = fields.next()?.trim().parse::<i32>().ok()?;
        let pipe_id = fields.next()?.trim().parse::<i32>().ok()?;
        let writer = fields.next()?.trim().parse::<i32>().ok()? != 0;
        if fields.next().is_some() || fd < 0 {
            return None;
        }
        Some(Self { fd, pipe_id, writer })
    }

    fn access(&self) -> AccessMode {
        if self.writer {
            AccessMode::WriteOnly
        } else {
            AccessMode::ReadOnly
        }
    }
}

impl fmt::Display for InheritedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

fn entry_name(marker: &str, index: usize) -> String {
    format!("{marker}_{index}")
}

/// Lists the inheritable pipe ends of `table` below `ceiling`.
pub fn collect(table: &FdTable, ceiling: i32) -> Vec<InheritedPipe> {
    let mut pipes = Vec::new();
    for (fd, entry) in table.iter_below(ceiling) {
        if entry.cloexec() {
            continue;
        }
        let file = entry.open_file().file();
        let stat = match file.stat() {
            Ok(stat) => stat,
            Err(err) => {
                warn!("spawn: fstat of fd {fd} failed, not inherited: {err}");
                continue;
            }
        };
        // Other kinds have no host-side identity to re-attach to.
        if stat.kind != FileKind::Fifo {
            continue;
        }
        let Ok(pipe_id) = i32::try_from(stat.ino) else {
            warn!("spawn: fd {fd} pipe id {} out of range", stat.ino);
            continue;
        };
        pipes.push(InheritedPipe { fd, pipe_id, writer: file.access() == AccessMode::WriteOnly });
    }
    pipes
}

/// Encodes the inheritable descriptors of `table` as `NAME=value` environment entries.
pub fn encode(table: &FdTable, ceiling: i32, marker: &str) -> Vec<String> {
    collect(table, ceiling)
        .iter()
        .enumerate()
        .map(|(index, pipe)| format!("{}={}", entry_name(marker, index), pipe.to_token()))
        .collect()
}

/// Removes every inheritance entry from `env` and returns the well-formed ones in order.
pub fn decode(env: &mut Environment, marker: &str) -> Vec<InheritedPipe> {
    let mut pipes = Vec::new();
    for index in 0.. {
        let Some(token) = env.remove(&entry_name(marker, index)) else {
            break;
        };
        match InheritedPipe::parse(&token) {
            Some(pipe) => pipes.push(pipe),
            None => warn!("spawn: ignoring malformed inheritance entry {marker}_{index}={token}"),
        }
    }
    pipes
}

/// Re-attaches decoded pipe ends to `table`.
///
/// The first end of each `(pipe_id, role)` opens a fresh description; later ones duplicate it.
pub fn restore(table: &mut FdTable, pipes: &AnonymousPipeFs, records: &[InheritedPipe]) -> Result<()> {
    let mut attached: HashMap<(i32, bool), i32> = HashMap::new();
    for record in records {
        let key = (record.pipe_id, record.writer);
        if let Some(&existing) = attached.get(&key) {
            table.dup2(existing, record.fd)?;
            continue;
        }
        let file = OpenFile::new(pipes.open_id(record.pipe_id, record.access()));
        table.install_at(record.fd, file)?;
        attached.insert(key, record.fd);
        debug!("spawn: restored {record}");
    }
    Ok(())
}
