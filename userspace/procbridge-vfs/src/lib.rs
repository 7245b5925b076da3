// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Virtual files and descriptor table for the emulated process
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (descriptor table), integration tests (pipe files against a mock host)
//!
//! PUBLIC API:
//!   - VirtualFile: read/write/stat/release operations of one open file
//!   - AnonymousPipeFs / PipeFile: host-backed anonymous pipes
//!   - FdTable: descriptor numbers mapped to shared open file descriptions
//!   - Error: failures carrying the errno reported to POSIX callers
//!
//! DEPENDENCIES:
//!   - procbridge-ipc: request correlation towards the host
//!   - log: protocol mismatch reports
//!
//! ADR: docs/adr/0001-process-bridge.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use log::error;
use procbridge_abi::Errno;
use procbridge_ipc::{IpcError, ReplyError};
use thiserror::Error;

mod fd_table;
mod file;
mod pipe;

pub use fd_table::{FdEntry, FdTable, OpenFile, DEFAULT_FD_LIMIT};
pub use file::{OpaqueFile, Stat, VirtualFile};
pub use pipe::{
    AnonymousPipeFs, PipeFile, CMD_APIPE, CMD_APIPE_CLOSE, CMD_APIPE_READ, CMD_APIPE_WRITE,
};

/// Result alias for virtual file operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by virtual file operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The host or the local table rejected the operation.
    #[error("{0}")]
    Os(Errno),
    /// The host answered with a reply that does not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(ReplyError),
    /// The transport failed.
    #[error("transport error: {0}")]
    Ipc(IpcError),
}

impl Error {
    /// Errno reported to POSIX-shaped callers.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Os(errno) => *errno,
            Self::Protocol(_) | Self::Ipc(_) => Errno::EIO,
        }
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        Self::Os(value)
    }
}

impl From<IpcError> for Error {
    fn from(value: IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl From<ReplyError> for Error {
    fn from(value: ReplyError) -> Self {
        match value {
            ReplyError::Failed(errno) => Self::Os(errno),
            other => {
                error!("vfs: host protocol mismatch: {other}");
                Self::Protocol(other)
            }
        }
    }
}
