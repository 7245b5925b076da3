// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Executable resolution for emulated spawns
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, integration tests (tests/loader.rs)
//!
//! PUBLIC API:
//!   - FileSystem: readable/read seam with host and in-memory backends
//!   - find_in_path(): PATH search
//!   - Shebang: `#!` interpreter line parsing
//!   - Manifest: loading descriptor sent to the host with a spawn request
//!   - DependencyResolver / ElfDependencyResolver: architecture and shared-library discovery
//!   - Resolver: full resolution flow producing an optional manifest
//!
//! DEPENDENCIES:
//!   - goblin: ELF header, interpreter and DT_NEEDED parsing
//!   - procbridge-ipc: manifest encoding as message values
//!
//! ADR: docs/adr/0003-executable-resolution.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use procbridge_abi::Errno;
use thiserror::Error;

mod deps;
mod fs;
mod manifest;
mod resolve;
mod search;
mod shebang;

pub use deps::{arch_for_machine, Dependencies, DependencyResolver, ElfDependencyResolver};
pub use fs::{FileSystem, HostFileSystem, MemoryFileSystem};
pub use manifest::{absolute_path, Manifest, PORTABLE_MAGIC};
pub use resolve::{ResolveOptions, Resolver};
pub use search::{find_in_path, split_search_path};
pub use shebang::{Shebang, SCRIPT_PREFIX_LEN};

/// Result alias for resolution.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced while resolving an executable.
#[derive(Debug, Error)]
pub enum Error {
    /// The program (or a file it needs) is not readable.
    #[error("{0}: not found")]
    NotFound(String),
    /// The program could not be read.
    #[error("{path}: read failed: {source}")]
    Read {
        /// Program path.
        path: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is too short to be classified.
    #[error("{0}: exec format error")]
    NotExecutable(String),
    /// Interpreter lines nest deeper than allowed.
    #[error("{0}: too many levels of interpreters")]
    InterpreterLoop(String),
    /// The object could not be parsed.
    #[error("{path}: invalid object: {reason}")]
    InvalidObject {
        /// Object path.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// The object targets a machine the host cannot load.
    #[error("{path}: unsupported machine {machine}")]
    UnsupportedMachine {
        /// Object path.
        path: String,
        /// `e_machine` value.
        machine: u16,
    },
}

impl Error {
    /// Errno reported to POSIX-shaped callers.
    pub fn errno(&self) -> Errno {
        match self {
            Self::NotFound(_) | Self::Read { .. } => Errno::ENOENT,
            Self::NotExecutable(_) | Self::InvalidObject { .. } | Self::UnsupportedMachine { .. } => {
                Errno::ENOEXEC
            }
            Self::InterpreterLoop(_) => Errno::ELOOP,
        }
    }
}
