// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Descriptors 0..3 of processes started by the host, wired to the host's own stdio.

use std::io::{self, Read, Write};
use std::sync::Arc;

use procbridge_abi::{AccessMode, Errno, FileKind};
use procbridge_vfs::{FdTable, OpaqueFile, OpenFile, Stat, VirtualFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

/// Character device forwarding to the host's stdin, stdout or stderr.
#[derive(Debug)]
pub struct HostStdio {
    stream: Stream,
}

fn host_errno(err: io::Error) -> procbridge_vfs::Error {
    err.raw_os_error().map_or(Errno::EIO, Errno::from_raw).into()
}

impl VirtualFile for HostStdio {
    fn read(&self, buf: &mut [u8]) -> procbridge_vfs::Result<usize> {
        if self.stream != Stream::Stdin {
            return Err(Errno::EBADF.into());
        }
        io::stdin().lock().read(buf).map_err(host_errno)
    }

    fn write(&self, data: &[u8]) -> procbridge_vfs::Result<usize> {
        let written = match self.stream {
            Stream::Stdin => return Err(Errno::EBADF.into()),
            Stream::Stdout => {
                let mut out = io::stdout().lock();
                out.write(data).and_then(|count| out.flush().map(|()| count))
            }
            Stream::Stderr => io::stderr().lock().write(data),
        };
        written.map_err(host_errno)
    }

    fn stat(&self) -> procbridge_vfs::Result<Stat> {
        Ok(Stat::stream(FileKind::CharDevice, 0))
    }

    fn access(&self) -> AccessMode {
        match self.stream {
            Stream::Stdin => AccessMode::ReadOnly,
            Stream::Stdout | Stream::Stderr => AccessMode::WriteOnly,
        }
    }
}

/// Which stdio a host-started process gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// The host's real stdin, stdout and stderr.
    #[default]
    Inherit,
    /// Opaque consoles: reads see end-of-file, writes are discarded.
    Null,
}

/// Descriptor table holding 0, 1 and 2 for a new process.
pub fn stdio_table(mode: StdioMode) -> FdTable {
    let files: [Arc<OpenFile>; 3] = match mode {
        StdioMode::Inherit => [Stream::Stdin, Stream::Stdout, Stream::Stderr]
            .map(|stream| OpenFile::new(HostStdio { stream })),
        StdioMode::Null => [AccessMode::ReadOnly, AccessMode::WriteOnly, AccessMode::WriteOnly]
            .map(|access| OpenFile::new(OpaqueFile::console(access))),
    };
    let mut table = FdTable::default();
    for (fd, file) in (0..).zip(files) {
        // A fresh table has room for descriptors 0..3.
        let _ = table.install_at(fd, file);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_holds_three_char_devices() {
        for mode in [StdioMode::Inherit, StdioMode::Null] {
            let table = stdio_table(mode);
            assert_eq!(table.len(), 3);
            for fd in 0..3 {
                let stat = table.get(fd).unwrap().file().stat().unwrap();
                assert_eq!(stat.kind, FileKind::CharDevice);
            }
            assert_eq!(table.get(0).unwrap().file().access(), AccessMode::ReadOnly);
            assert_eq!(table.get(2).unwrap().file().write(b"").unwrap(), 0);
        }
    }

    #[test]
    fn wrong_direction_is_ebadf() {
        let stdin = HostStdio { stream: Stream::Stdin };
        assert_eq!(stdin.write(b"x").unwrap_err().errno(), Errno::EBADF);
        let stdout = HostStdio { stream: Stream::Stdout };
        assert_eq!(stdout.read(&mut [0; 4]).unwrap_err().errno(), Errno::EBADF);
    }
}
