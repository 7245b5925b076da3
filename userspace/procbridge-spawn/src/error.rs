// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Failures of process-control operations.

use log::error;
use procbridge_abi::Errno;
use procbridge_ipc::{IpcError, ReplyError};
use thiserror::Error;

/// Result alias for process-control operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by process-control operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The host or a local check reported a POSIX error.
    #[error("{0}")]
    Os(Errno),
    /// The host answered with a reply that does not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(ReplyError),
    /// The transport failed.
    #[error("transport error: {0}")]
    Ipc(IpcError),
    /// The spawn target could not be resolved locally.
    #[error("resolve error: {0}")]
    Resolve(#[from] procbridge_loader::Error),
}

impl Error {
    /// Errno reported to POSIX-shaped callers.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Os(errno) => *errno,
            Self::Resolve(err) => err.errno(),
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
                error!("spawn: host protocol mismatch: {other}");
                Self::Protocol(other)
            }
        }
    }
}

impl From<procbridge_vfs::Error> for Error {
    fn from(value: procbridge_vfs::Error) -> Self {
        match value {
            procbridge_vfs::Error::Os(errno) => Self::Os(errno),
            procbridge_vfs::Error::Protocol(err) => Self::Protocol(err),
            procbridge_vfs::Error::Ipc(err) => Self::Ipc(err),
        }
    }
}
