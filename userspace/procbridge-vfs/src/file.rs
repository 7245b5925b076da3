// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operations of one open file description.

use procbridge_abi::{AccessMode, Errno, FileKind};

use crate::Result;

/// Subset of `struct stat` the emulation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// File type.
    pub kind: FileKind,
    /// Full `st_mode` (type bits plus permissions).
    pub mode: u32,
    /// Inode number; pipe files report their pipe object id.
    pub ino: u64,
    /// Size in bytes, zero for streams.
    pub size: u64,
}

impl Stat {
    /// Builds a stat record for a stream of `kind` with owner read/write permissions.
    pub const fn stream(kind: FileKind, ino: u64) -> Self {
        Self { kind, mode: kind.mode_bits() | 0o600, ino, size: 0 }
    }
}

/// An open file description. Descriptors duplicated from one another share it.
pub trait VirtualFile: Send + Sync {
    /// Reads up to `buf.len()` bytes.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes `data`, returning the number of bytes accepted.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Describes the file.
    fn stat(&self) -> Result<Stat>;

    /// Access mode the file was opened with.
    fn access(&self) -> AccessMode;

    /// Called once, when the last descriptor referring to this description is closed.
    fn release(&self) -> Result<()> {
        Ok(())
    }

    /// Replaces [`VirtualFile::release`] when the description is dropped without a close.
    /// Must not block.
    fn release_nowait(&self) {}
}

/// Local stand-in for descriptors whose objects live outside the emulation (stdio devices).
///
/// Reads report end-of-file and writes are discarded. These are never passed to children.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueFile {
    kind: FileKind,
    access: AccessMode,
}

impl OpaqueFile {
    /// Creates an opaque file of `kind`.
    pub const fn new(kind: FileKind, access: AccessMode) -> Self {
        Self { kind, access }
    }

    /// Character device as installed on descriptors 0..3.
    pub const fn console(access: AccessMode) -> Self {
        Self::new(FileKind::CharDevice, access)
    }
}

impl VirtualFile for OpaqueFile {
    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        if !self.access.readable() {
            return Err(Errno::EBADF.into());
        }
        Ok(0)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.access.writable() {
            return Err(Errno::EBADF.into());
        }
        Ok(data.len())
    }

    fn stat(&self) -> Result<Stat> {
        Ok(Stat::stream(self.kind, 0))
    }

    fn access(&self) -> AccessMode {
        self.access
    }
}
