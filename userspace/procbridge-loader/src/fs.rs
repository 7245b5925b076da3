// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! File access used during resolution.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};

use parking_lot::RwLock;

/// Read-only view of the filesystem the emulated process sees.
pub trait FileSystem: Send + Sync {
    /// `access(path, R_OK) == 0`.
    fn readable(&self, path: &str) -> bool;

    /// Reads the whole file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Reads at most `len` leading bytes.
    fn read_prefix(&self, path: &str, len: usize) -> io::Result<Vec<u8>> {
        let mut bytes = self.read(path)?;
        bytes.truncate(len);
        Ok(bytes)
    }
}

/// Backend over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileSystem;

impl FileSystem for HostFileSystem {
    fn readable(&self, path: &str) -> bool {
        std::fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
            && File::open(path).is_ok()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_prefix(&self, path: &str, len: usize) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len);
        File::open(path)?.take(len as u64).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// In-memory backend keyed by absolute path.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `path`.
    pub fn insert(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(path.to_string(), contents.into());
    }

    /// Builder-style [`MemoryFileSystem::insert`].
    pub fn with(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Removes `path`.
    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }
}

impl FileSystem for MemoryFileSystem {
    fn readable(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_prefix_truncates() {
        let fs = MemoryFileSystem::new().with("/bin/tool", b"PEXE and more".to_vec());
        assert!(fs.readable("/bin/tool"));
        assert_eq!(fs.read_prefix("/bin/tool", 4).unwrap(), b"PEXE");
        assert!(fs.read("/bin/other").is_err());
    }

    #[test]
    fn host_prefix_reads_leading_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script");
        std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();
        let path = path.to_str().unwrap();
        assert!(HostFileSystem.readable(path));
        assert!(!HostFileSystem.readable(dir.path().to_str().unwrap()));
        assert_eq!(HostFileSystem.read_prefix(path, 2).unwrap(), b"#!");
    }
}
