// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: POSIX process control emulated over an asynchronous host channel
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, end-to-end tests in tests/spawn_e2e
//!
//! PUBLIC API:
//!   - Process / ProcessBuilder: per-process state (environment, cwd, descriptors, identity)
//!   - Process::{spawnve, waitpid, pipe, getpgid, ...}: blocking calls over the correlator
//!   - VforkSession: vfork/exec/_exit state machine
//!   - inherit: pipe descriptor inheritance tokens
//!   - posix: libc-shaped wrappers returning -1 plus errno
//!   - BridgeConfig: TOML configuration
//!
//! DEPENDENCIES:
//!   - procbridge-ipc: correlator and message values
//!   - procbridge-vfs: descriptor table and host pipes
//!   - procbridge-loader: executable resolution and manifests
//!   - once_cell: lazily resolved pid
//!   - serde/toml: configuration
//!
//! ADR: docs/adr/0002-spawn-and-vfork.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod config;
mod env;
mod error;
mod identity;
pub mod inherit;
pub mod posix;
mod process;
mod spawn;
mod vfork;

pub use config::{BridgeConfig, ConfigError};
pub use env::Environment;
pub use error::{Error, Result};
pub use identity::{parse_env_int, IdentityCache, IdentitySource};
pub use inherit::InheritedPipe;
pub use process::{ExitHandler, Process, ProcessBuilder};
pub use spawn::{ResourceUsage, WaitResult, CMD_SPAWN, CMD_WAIT};
pub use vfork::{vforking, VforkSession};

pub use procbridge_abi::{Errno, Pid, SpawnMode, WaitOptions, WaitStatus};

/// Commands of the group, session and exit-bookkeeping calls.
pub mod commands {
    pub use crate::process::{CMD_DEADPID, CMD_GETPGID, CMD_GETSID, CMD_SETPGID, CMD_SETSID};
    pub use crate::spawn::{CMD_SPAWN, CMD_WAIT};
    pub use procbridge_vfs::{CMD_APIPE, CMD_APIPE_CLOSE, CMD_APIPE_READ, CMD_APIPE_WRITE};
}
