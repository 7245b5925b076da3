// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process descriptor table
//!
//! Descriptor numbers map to reference-counted open file descriptions. `dup`/`dup2` share a
//! description; its `release` runs exactly once, when the last reference goes away.

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use procbridge_abi::Errno;

use crate::{Result, VirtualFile};

/// Default number of descriptor slots per process.
pub const DEFAULT_FD_LIMIT: i32 = 1024;

/// An open file description shared by every descriptor duplicated from it.
pub struct OpenFile {
    file: Box<dyn VirtualFile>,
    released: AtomicBool,
}

impl OpenFile {
    /// Wraps `file` into a fresh description.
    pub fn new(file: impl VirtualFile + 'static) -> Arc<Self> {
        Arc::new(Self { file: Box::new(file), released: AtomicBool::new(false) })
    }

    /// The underlying file.
    pub fn file(&self) -> &dyn VirtualFile {
        self.file.as_ref()
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.file.release()
    }
}

impl Drop for OpenFile {
    // Reached when the last reference was a transient clone or a table dropped without
    // `close_all`. No reply can be awaited here.
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.file.release_nowait();
        }
    }
}

/// One descriptor slot.
#[derive(Clone)]
pub struct FdEntry {
    file: Arc<OpenFile>,
    cloexec: bool,
}

impl FdEntry {
    /// Shared description behind the descriptor.
    pub fn open_file(&self) -> &Arc<OpenFile> {
        &self.file
    }

    /// Close-on-exec flag.
    pub fn cloexec(&self) -> bool {
        self.cloexec
    }
}

/// Descriptor table of one emulated process.
#[derive(Clone)]
pub struct FdTable {
    entries: BTreeMap<i32, FdEntry>,
    limit: i32,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new(DEFAULT_FD_LIMIT)
    }
}

impl FdTable {
    /// Creates an empty table accepting descriptors `0..limit`.
    pub fn new(limit: i32) -> Self {
        Self { entries: BTreeMap::new(), limit }
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no descriptor is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_range(&self, fd: i32) -> Result<()> {
        if fd < 0 || fd >= self.limit {
            return Err(Errno::EBADF.into());
        }
        Ok(())
    }

    fn lowest_free(&self) -> Result<i32> {
        let mut candidate = 0;
        for &fd in self.entries.keys() {
            if fd != candidate {
                break;
            }
            candidate += 1;
        }
        if candidate >= self.limit {
            return Err(Errno::EMFILE.into());
        }
        Ok(candidate)
    }

    /// Installs `file` on the lowest free descriptor.
    pub fn install(&mut self, file: Arc<OpenFile>) -> Result<i32> {
        let fd = self.lowest_free()?;
        self.entries.insert(fd, FdEntry { file, cloexec: false });
        Ok(fd)
    }

    /// Installs `file` on `fd`, closing whatever was open there.
    pub fn install_at(&mut self, fd: i32, file: Arc<OpenFile>) -> Result<i32> {
        self.check_range(fd)?;
        let previous = self.entries.insert(fd, FdEntry { file, cloexec: false });
        if let Some(previous) = previous {
            Self::drop_entry(previous)?;
        }
        Ok(fd)
    }

    /// Looks up an open descriptor.
    pub fn get(&self, fd: i32) -> Result<Arc<OpenFile>> {
        self.entry(fd).map(|entry| entry.file.clone())
    }

    /// Looks up the slot of an open descriptor.
    pub fn entry(&self, fd: i32) -> Result<&FdEntry> {
        self.entries.get(&fd).ok_or_else(|| Errno::EBADF.into())
    }

    /// `dup`: shares `fd`'s description on the lowest free descriptor.
    pub fn dup(&mut self, fd: i32) -> Result<i32> {
        let file = self.get(fd)?;
        self.install(file)
    }

    /// `dup2`: shares `old`'s description on `new`, closing `new` first if needed.
    pub fn dup2(&mut self, old: i32, new: i32) -> Result<i32> {
        let file = self.get(old)?;
        self.check_range(new)?;
        if old == new {
            return Ok(new);
        }
        self.install_at(new, file)
    }

    /// Closes `fd`; releases its description if this was the last reference.
    pub fn close(&mut self, fd: i32) -> Result<()> {
        let entry = self.entries.remove(&fd).ok_or(Errno::EBADF)?;
        Self::drop_entry(entry)
    }

    /// Moves `fd` into a table of its own, so the caller can close it without holding this one.
    pub fn split_off(&mut self, fd: i32) -> Result<FdTable> {
        let entry = self.entries.remove(&fd).ok_or(Errno::EBADF)?;
        let mut moved = FdTable::new(self.limit);
        moved.entries.insert(fd, entry);
        Ok(moved)
    }

    fn drop_entry(entry: FdEntry) -> Result<()> {
        match Arc::try_unwrap(entry.file) {
            Ok(file) => file.release(),
            Err(_) => Ok(()),
        }
    }

    /// Sets or clears close-on-exec on `fd`.
    pub fn set_cloexec(&mut self, fd: i32, cloexec: bool) -> Result<()> {
        let entry = self.entries.get_mut(&fd).ok_or(Errno::EBADF)?;
        entry.cloexec = cloexec;
        Ok(())
    }

    /// Open descriptors below `ceiling`, in ascending order.
    pub fn iter_below(&self, ceiling: i32) -> impl Iterator<Item = (i32, &FdEntry)> + '_ {
        self.entries.range(..ceiling.max(0)).map(|(&fd, entry)| (fd, entry))
    }

    /// Copy of the table that keeps every description alive.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Replaces the table by `saved`, closing descriptors only the current table referenced.
    pub fn restore(&mut self, saved: FdTable) -> Result<()> {
        let current = mem::replace(self, saved);
        current.close_all()
    }

    /// Closes every descriptor; reports the first release failure.
    pub fn close_all(self) -> Result<()> {
        let mut outcome = Ok(());
        for (_, entry) in self.entries {
            let result = Self::drop_entry(entry);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }
}
