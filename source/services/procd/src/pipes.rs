// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host pipe objects backing the anonymous pipe filesystem
//!
//! Each pipe counts open read and write descriptions across all processes. A description
//! handed to a child at spawn time is counted before the spawn is answered, so the parent may
//! close its own ends right away.
//!
//! INVARIANTS:
//!   - reads block until data arrives or the last writer closes (end-of-file)
//!   - writes never block; writing without readers is `EPIPE`
//!   - a pipe disappears once both counts reach zero

use std::collections::{HashMap, VecDeque};

use log::debug;
use parking_lot::{Condvar, Mutex};
use procbridge_abi::Errno;

#[derive(Default)]
struct Pipe {
    buffer: VecDeque<u8>,
    readers: usize,
    writers: usize,
}

impl Pipe {
    fn count_mut(&mut self, writer: bool) -> &mut usize {
        if writer {
            &mut self.writers
        } else {
            &mut self.readers
        }
    }
}

struct Pipes {
    next_id: i32,
    pipes: HashMap<i32, Pipe>,
}

/// Every pipe object of one host.
pub struct PipeTable {
    state: Mutex<Pipes>,
    changed: Condvar,
}

impl Default for PipeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { state: Mutex::new(Pipes { next_id: 1, pipes: HashMap::new() }), changed: Condvar::new() }
    }

    /// Number of live pipe objects.
    pub fn len(&self) -> usize {
        self.state.lock().pipes.len()
    }

    /// Returns `true` when no pipe is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(readers, writers)` descriptions of pipe `id`, if it is live.
    pub fn ends(&self, id: i32) -> Option<(usize, usize)> {
        self.state.lock().pipes.get(&id).map(|pipe| (pipe.readers, pipe.writers))
    }

    /// Creates a pipe with one read and one write description.
    pub fn create(&self) -> Result<i32, Errno> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id = id.checked_add(1).ok_or(Errno::EAGAIN)?;
        state.pipes.insert(id, Pipe { readers: 1, writers: 1, ..Pipe::default() });
        debug!("procd: created pipe {id}");
        Ok(id)
    }

    /// Counts one more description of pipe `id` for the given role.
    pub fn retain(&self, id: i32, writer: bool) -> Result<(), Errno> {
        let mut state = self.state.lock();
        let pipe = state.pipes.get_mut(&id).ok_or(Errno::EBADF)?;
        *pipe.count_mut(writer) += 1;
        Ok(())
    }

    /// Reads up to `max` bytes; an empty result means end-of-file.
    ///
    /// An unknown pipe reads as end-of-file.
    pub fn read(&self, id: i32, max: usize) -> Vec<u8> {
        if max == 0 {
            return Vec::new();
        }
        let mut state = self.state.lock();
        loop {
            let Some(pipe) = state.pipes.get_mut(&id) else {
                return Vec::new();
            };
            if !pipe.buffer.is_empty() {
                let take = max.min(pipe.buffer.len());
                return pipe.buffer.drain(..take).collect();
            }
            if pipe.writers == 0 {
                return Vec::new();
            }
            self.changed.wait(&mut state);
        }
    }

    /// Appends `data` to pipe `id`.
    pub fn write(&self, id: i32, data: &[u8]) -> Result<usize, Errno> {
        let mut state = self.state.lock();
        let pipe = state.pipes.get_mut(&id).ok_or(Errno::EPIPE)?;
        if pipe.readers == 0 {
            return Err(Errno::EPIPE);
        }
        pipe.buffer.extend(data);
        drop(state);
        self.changed.notify_all();
        Ok(data.len())
    }

    /// Drops one description of pipe `id` for the given role.
    pub fn close(&self, id: i32, writer: bool) -> Result<(), Errno> {
        let mut state = self.state.lock();
        let pipe = state.pipes.get_mut(&id).ok_or(Errno::EBADF)?;
        let count = pipe.count_mut(writer);
        *count = count.checked_sub(1).ok_or(Errno::EBADF)?;
        if pipe.readers == 0 && pipe.writers == 0 {
            state.pipes.remove(&id);
            debug!("procd: pipe {id} released");
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn data_flows_and_eof_follows_last_writer() {
        let pipes = PipeTable::new();
        let id = pipes.create().unwrap();
        assert_eq!(pipes.write(id, b"hello").unwrap(), 5);
        assert_eq!(pipes.read(id, 3), b"hel");
        pipes.close(id, true).unwrap();
        assert_eq!(pipes.read(id, 10), b"lo");
        assert!(pipes.read(id, 10).is_empty());
        pipes.close(id, false).unwrap();
        assert!(pipes.is_empty());
        assert_eq!(pipes.ends(id), None);
        assert_eq!(pipes.close(id, false).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn write_without_readers_is_epipe() {
        let pipes = PipeTable::new();
        let id = pipes.create().unwrap();
        pipes.close(id, false).unwrap();
        assert_eq!(pipes.write(id, b"x").unwrap_err(), Errno::EPIPE);
        assert_eq!(pipes.write(99, b"x").unwrap_err(), Errno::EPIPE);
    }

    #[test]
    fn retained_writer_keeps_pipe_open() {
        let pipes = Arc::new(PipeTable::new());
        let id = pipes.create().unwrap();
        pipes.retain(id, true).unwrap();
        assert_eq!(pipes.ends(id), Some((1, 2)));
        pipes.close(id, true).unwrap();

        let reader = {
            let pipes = pipes.clone();
            thread::spawn(move || pipes.read(id, 16))
        };
        thread::sleep(Duration::from_millis(20));
        pipes.write(id, b"late").unwrap();
        assert_eq!(reader.join().unwrap(), b"late");

        pipes.close(id, true).unwrap();
        assert!(pipes.read(id, 16).is_empty());
        assert_eq!(pipes.retain(42, false).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn unknown_pipe_reads_as_eof() {
        assert!(PipeTable::new().read(7, 16).is_empty());
    }
}
