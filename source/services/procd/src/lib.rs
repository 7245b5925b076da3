// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Reference host for the process bridge
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, end-to-end tests in tests/spawn_e2e
//!
//! PUBLIC API:
//!   - Procd / ProcdBuilder: host state, root processes, program registration
//!   - ProcessTable: pids, groups, sessions, exit statuses
//!   - PipeTable: pipe objects with reader/writer counts
//!   - ProgramTable / Program: programs started by `spawn`
//!   - StdioMode / stdio_table(): descriptors 0..3 of host-started processes
//!
//! DEPENDENCIES:
//!   - procbridge-spawn: child processes are ordinary bridge processes
//!   - parking_lot: table locks and wakeups
//!   - thiserror: host errors
//!
//! ADR: docs/adr/0001-process-bridge.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod pipes;
mod programs;
mod server;
mod stdio;
mod table;

pub use pipes::PipeTable;
pub use programs::{builtins, program_name, Program, ProgramTable};
pub use server::{Procd, ProcdBuilder, Result, ServerError};
pub use stdio::{stdio_table, HostStdio, StdioMode};
pub use table::ProcessTable;
