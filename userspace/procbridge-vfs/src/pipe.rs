// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Anonymous pipes whose buffers live in the host
//!
//! A pipe object is identified by an integer id. Each end is a [`PipeFile`] opened at
//! `<mount>/<id>`; every operation except `stat` is one request/reply round trip.
//!
//! INVARIANTS:
//!   - zero-length writes never reach the host
//!   - the role sent with `apipe_close` is derived from the access mode at open time

use std::sync::Arc;

use log::{debug, warn};
use procbridge_abi::{AccessMode, Errno, FileKind};
use procbridge_ipc::{Correlator, Dictionary};

use crate::{Result, Stat, VirtualFile};

/// Allocates a new pipe object.
pub const CMD_APIPE: &str = "apipe";
/// Reads from a pipe object.
pub const CMD_APIPE_READ: &str = "apipe_read";
/// Writes to a pipe object.
pub const CMD_APIPE_WRITE: &str = "apipe_write";
/// Drops one reader or writer reference of a pipe object.
pub const CMD_APIPE_CLOSE: &str = "apipe_close";

/// Filesystem mounted at the pipe mount point.
#[derive(Clone)]
pub struct AnonymousPipeFs {
    correlator: Arc<Correlator>,
    mount: String,
}

impl AnonymousPipeFs {
    /// Creates the filesystem for `mount` (for example `/apipe`).
    pub fn new(correlator: Arc<Correlator>, mount: &str) -> Self {
        Self { correlator, mount: mount.trim_end_matches('/').to_string() }
    }

    /// Mount point without a trailing slash.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Path of pipe object `pipe_id` below the mount point.
    pub fn path_for(&self, pipe_id: i32) -> String {
        format!("{}/{pipe_id}", self.mount)
    }

    /// Returns `true` when `path` lies below the mount point.
    pub fn contains(&self, path: &str) -> bool {
        self.relative(path).is_some()
    }

    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.mount.as_str())?;
        rest.starts_with('/').then_some(rest)
    }

    /// Asks the host for a fresh pipe object and returns its id.
    pub fn create(&self) -> Result<i32> {
        let reply = self.correlator.send_and_wait(Dictionary::command(CMD_APIPE))?;
        let pipe_id = reply.int("pipe_id")?;
        debug!("apipe: created pipe {pipe_id}");
        Ok(pipe_id)
    }

    /// Opens the pipe end named by `path` (`<mount>/<id>`).
    ///
    /// No host round trip happens; an unparsable path is `ENOENT`.
    pub fn open(&self, path: &str, access: AccessMode) -> Result<PipeFile> {
        let pipe_id = self.relative(path).and_then(parse_pipe_id).ok_or(Errno::ENOENT)?;
        Ok(self.open_id(pipe_id, access))
    }

    /// Opens an end of pipe object `pipe_id`.
    pub fn open_id(&self, pipe_id: i32, access: AccessMode) -> PipeFile {
        PipeFile { correlator: self.correlator.clone(), pipe_id, access }
    }
}

fn parse_pipe_id(relative: &str) -> Option<i32> {
    let digits = relative.strip_prefix('/')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One end of a host pipe object.
pub struct PipeFile {
    correlator: Arc<Correlator>,
    pipe_id: i32,
    access: AccessMode,
}

impl PipeFile {
    /// Host pipe object id.
    pub fn pipe_id(&self) -> i32 {
        self.pipe_id
    }

    /// Returns `true` for the write end.
    pub fn is_writer(&self) -> bool {
        self.access == AccessMode::WriteOnly
    }

    fn role(&self) -> &'static str {
        if self.is_writer() {
            "write"
        } else {
            "read"
        }
    }

    fn close_request(&self) -> Dictionary {
        Dictionary::command(CMD_APIPE_CLOSE)
            .with("pipe_id", self.pipe_id)
            .with("writer", i32::from(self.is_writer()))
    }
}

impl VirtualFile for PipeFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.access.readable() {
            return Err(Errno::EBADF.into());
        }
        let count = i32::try_from(buf.len()).unwrap_or(i32::MAX);
        let request = Dictionary::command(CMD_APIPE_READ)
            .with("pipe_id", self.pipe_id)
            .with("count", count);
        let reply = self.correlator.send_and_wait(request)?;
        let data = reply.bytes("data")?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.access.writable() {
            return Err(Errno::EBADF.into());
        }
        if data.is_empty() {
            return Ok(0);
        }
        let request = Dictionary::command(CMD_APIPE_WRITE)
            .with("pipe_id", self.pipe_id)
            .with("data", data.to_vec());
        let reply = self.correlator.send_and_wait(request)?;
        let accepted = reply.int("count")?;
        Ok(usize::try_from(accepted).unwrap_or(0).min(data.len()))
    }

    fn stat(&self) -> Result<Stat> {
        let ino = u64::try_from(self.pipe_id).unwrap_or(0);
        Ok(Stat::stream(FileKind::Fifo, ino))
    }

    fn access(&self) -> AccessMode {
        self.access
    }

    fn release(&self) -> Result<()> {
        let reply = self.correlator.send_and_wait(self.close_request())?;
        reply.int("result")?;
        debug!("apipe: closed {} end of pipe {}", self.role(), self.pipe_id);
        Ok(())
    }

    fn release_nowait(&self) {
        match self.correlator.post(self.close_request()) {
            Ok(()) => debug!("apipe: dropped {} end of pipe {}", self.role(), self.pipe_id),
            Err(err) => warn!("apipe: {} end of pipe {} leaked: {err}", self.role(), self.pipe_id),
        }
    }
}
