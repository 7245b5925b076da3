// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared POSIX-shaped ABI definitions for the process-control bridge
//! OWNERS: @runtime
//! PUBLIC API: Pid, Errno, SpawnMode, WaitOptions, WaitStatus, FileKind, AccessMode
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Errno values use Linux numbering; a host status byte lands in bits 8..16 of the
//!             emitted status word and nothing else is populated
//! ADR: docs/adr/0001-process-bridge.md

use core::fmt;

use bitflags::bitflags;

/// Emulated process identifier. Negative values never name a process.
pub type Pid = i32;

/// Numeric POSIX error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    /// Operation not permitted.
    pub const EPERM: Self = Self(1);
    /// No such file or directory.
    pub const ENOENT: Self = Self(2);
    /// No such process.
    pub const ESRCH: Self = Self(3);
    /// I/O error.
    pub const EIO: Self = Self(5);
    /// Exec format error.
    pub const ENOEXEC: Self = Self(8);
    /// Bad file descriptor.
    pub const EBADF: Self = Self(9);
    /// No child processes.
    pub const ECHILD: Self = Self(10);
    /// Resource temporarily unavailable.
    pub const EAGAIN: Self = Self(11);
    /// Permission denied.
    pub const EACCES: Self = Self(13);
    /// Bad address.
    pub const EFAULT: Self = Self(14);
    /// Invalid argument.
    pub const EINVAL: Self = Self(22);
    /// Too many open files.
    pub const EMFILE: Self = Self(24);
    /// Illegal seek.
    pub const ESPIPE: Self = Self(29);
    /// Broken pipe.
    pub const EPIPE: Self = Self(32);
    /// Function not implemented.
    pub const ENOSYS: Self = Self(38);
    /// Too many levels of symbolic links (or interpreters).
    pub const ELOOP: Self = Self(40);

    /// Wraps a raw errno value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Decodes the host's "negative value = -errno" sentinel.
    ///
    /// Returns `None` for non-negative values.
    pub const fn from_sentinel(value: i32) -> Option<Self> {
        if value < 0 {
            Some(Self(value.wrapping_neg()))
        } else {
            None
        }
    }

    /// Exposes the raw errno value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns the symbolic name for well-known values.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            1 => "EPERM",
            2 => "ENOENT",
            3 => "ESRCH",
            5 => "EIO",
            8 => "ENOEXEC",
            9 => "EBADF",
            10 => "ECHILD",
            11 => "EAGAIN",
            13 => "EACCES",
            14 => "EFAULT",
            22 => "EINVAL",
            24 => "EMFILE",
            29 => "ESPIPE",
            32 => "EPIPE",
            38 => "ENOSYS",
            40 => "ELOOP",
            _ => return None,
        })
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "errno {}", self.0),
        }
    }
}

/// Launch modes accepted by the `spawn*` family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnMode {
    /// Spawn, then block until the child exits and return its status word.
    Wait,
    /// Spawn and return the child pid.
    NoWait,
    /// Replace the current image (exec semantics).
    Overlay,
    /// Same as [`SpawnMode::NoWait`]; kept for source compatibility.
    NoWaitO,
}

impl SpawnMode {
    /// Raw value of `P_WAIT`.
    pub const P_WAIT: i32 = 0;
    /// Raw value of `P_NOWAIT`.
    pub const P_NOWAIT: i32 = 1;
    /// Raw value of `P_OVERLAY`.
    pub const P_OVERLAY: i32 = 2;
    /// Raw value of `P_NOWAITO`.
    pub const P_NOWAITO: i32 = 3;

    /// Decodes a raw mode; unknown modes are `EINVAL`.
    pub const fn from_raw(raw: i32) -> Result<Self, Errno> {
        match raw {
            Self::P_WAIT => Ok(Self::Wait),
            Self::P_NOWAIT => Ok(Self::NoWait),
            Self::P_OVERLAY => Ok(Self::Overlay),
            Self::P_NOWAITO => Ok(Self::NoWaitO),
            _ => Err(Errno::EINVAL),
        }
    }

    /// Encodes the mode as its raw value.
    pub const fn raw(self) -> i32 {
        match self {
            Self::Wait => Self::P_WAIT,
            Self::NoWait => Self::P_NOWAIT,
            Self::Overlay => Self::P_OVERLAY,
            Self::NoWaitO => Self::P_NOWAITO,
        }
    }
}

bitflags! {
    /// Option bits accepted by the `wait*` family; forwarded verbatim to the host.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct WaitOptions: i32 {
        /// Return immediately if no child has exited.
        const NOHANG = 1;
        /// Also report stopped children.
        const UNTRACED = 2;
    }
}

/// POSIX status word as produced by `wait*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaitStatus(i32);

impl WaitStatus {
    /// Packs the host's raw exit status into the status word.
    ///
    /// Only the low byte of the host value is kept and it lands in bits 8..16, which is where
    /// `WEXITSTATUS` reads it. Signal bits are never populated.
    pub const fn from_host(raw: i32) -> Self {
        Self((raw & 0xff) << 8)
    }

    /// Wraps an already packed status word.
    pub const fn from_raw(word: i32) -> Self {
        Self(word)
    }

    /// Returns the packed status word.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `WIFEXITED`.
    pub const fn exited(self) -> bool {
        self.0 & 0x7f == 0
    }

    /// `WEXITSTATUS`.
    pub const fn exit_status(self) -> i32 {
        (self.0 >> 8) & 0xff
    }
}

/// `st_mode` file-type mask.
pub const S_IFMT: u32 = 0o170_000;
/// FIFO file type bits.
pub const S_IFIFO: u32 = 0o010_000;
/// Character device file type bits.
pub const S_IFCHR: u32 = 0o020_000;
/// Directory file type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Block device file type bits.
pub const S_IFBLK: u32 = 0o060_000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100_000;
/// Symbolic link file type bits.
pub const S_IFLNK: u32 = 0o120_000;
/// Socket file type bits.
pub const S_IFSOCK: u32 = 0o140_000;

/// File type reported by `fstat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named or anonymous pipe.
    Fifo,
    /// Symbolic link.
    Symlink,
    /// Socket.
    Socket,
}

impl FileKind {
    /// Returns the `S_IF*` bits for this kind.
    pub const fn mode_bits(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Symlink => S_IFLNK,
            Self::Socket => S_IFSOCK,
        }
    }

    /// Classifies a full `st_mode` value.
    pub const fn from_mode(mode: u32) -> Option<Self> {
        Some(match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            _ => return None,
        })
    }
}

/// Read-only open flag.
pub const O_RDONLY: i32 = 0;
/// Write-only open flag.
pub const O_WRONLY: i32 = 1;
/// Read-write open flag.
pub const O_RDWR: i32 = 2;
/// Access-mode mask.
pub const O_ACCMODE: i32 = 3;

/// Access mode of an open file description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// `O_RDONLY`.
    ReadOnly,
    /// `O_WRONLY`.
    WriteOnly,
    /// `O_RDWR`.
    ReadWrite,
}

impl AccessMode {
    /// Decodes the access bits of open flags.
    pub const fn from_flags(flags: i32) -> Result<Self, Errno> {
        match flags & O_ACCMODE {
            O_RDONLY => Ok(Self::ReadOnly),
            O_WRONLY => Ok(Self::WriteOnly),
            O_RDWR => Ok(Self::ReadWrite),
            _ => Err(Errno::EINVAL),
        }
    }

    /// Encodes the access mode as open flags.
    pub const fn flags(self) -> i32 {
        match self {
            Self::ReadOnly => O_RDONLY,
            Self::WriteOnly => O_WRONLY,
            Self::ReadWrite => O_RDWR,
        }
    }

    /// Returns `true` when reads are permitted.
    pub const fn readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Returns `true` when writes are permitted.
    pub const fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_decodes_negative_only() {
        assert_eq!(Errno::from_sentinel(-13), Some(Errno::EACCES));
        assert_eq!(Errno::from_sentinel(0), None);
        assert_eq!(Errno::from_sentinel(7), None);
    }

    #[test]
    fn unknown_spawn_mode_is_einval() {
        assert_eq!(SpawnMode::from_raw(9), Err(Errno::EINVAL));
        assert_eq!(SpawnMode::from_raw(SpawnMode::P_OVERLAY), Ok(SpawnMode::Overlay));
    }

    #[test]
    fn file_kind_mode_bits_classify_back() {
        for kind in [FileKind::Fifo, FileKind::CharDevice, FileKind::Regular, FileKind::Socket] {
            assert_eq!(FileKind::from_mode(kind.mode_bits() | 0o600), Some(kind));
        }
    }
}
