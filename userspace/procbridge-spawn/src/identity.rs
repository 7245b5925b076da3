// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process identity cache
//!
//! Resolution order for the pid: inherited environment, identity source, configured fallback.
//! The parent pid only ever comes from the environment. Once resolved the values never change.

use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;
use procbridge_abi::{Errno, Pid};

use crate::{BridgeConfig, Environment, Result};

/// Runtime interface answering "what is my pid" when nothing was inherited.
pub trait IdentitySource: Send + Sync {
    /// Returns the pid, or `None` when the runtime cannot tell.
    fn query_pid(&self) -> Option<Pid>;
}

/// Parses an integer the way `strtol(s, NULL, 0)` does: optional sign, `0x` hex, `0` octal or
/// decimal, stopping at the first character that is not a digit of the base.
///
/// Negative values, out-of-range values and text without leading digits read as absent.
pub fn parse_env_int(raw: &str) -> Option<Pid> {
    let raw = raw.trim_start();
    let (negative, unsigned) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (digits, radix) = match unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X")) {
        Some(hex) if hex.starts_with(|c: char| c.is_ascii_hexdigit()) => (hex, 16),
        // No hex digit after the prefix: only the leading zero converts.
        Some(_) => ("0", 10),
        None if unsigned.starts_with('0') => (unsigned, 8),
        None => (unsigned, 10),
    };
    let end = digits.find(|c: char| !c.is_digit(radix)).unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value = i64::from_str_radix(&digits[..end], radix).ok()?;
    let value = if negative { -value } else { value };
    Pid::try_from(value).ok().filter(|pid| *pid >= 0)
}

/// Lazily resolved pid/ppid of one emulated process.
pub struct IdentityCache {
    inherited_pid: Option<Pid>,
    inherited_ppid: Option<Pid>,
    source: Option<Arc<dyn IdentitySource>>,
    fallback: Pid,
    pid: OnceCell<Pid>,
}

impl IdentityCache {
    /// Captures the inherited identity variables named by `config`.
    pub fn from_env(
        env: &Environment,
        config: &BridgeConfig,
        source: Option<Arc<dyn IdentitySource>>,
    ) -> Self {
        Self {
            inherited_pid: env.get(&config.pid_env).and_then(parse_env_int),
            inherited_ppid: env.get(&config.ppid_env).and_then(parse_env_int),
            source,
            fallback: config.fallback_pid,
            pid: OnceCell::new(),
        }
    }

    /// `getpid`: resolved on first use, cached afterwards.
    pub fn pid(&self) -> Pid {
        *self.pid.get_or_init(|| {
            let pid = self
                .inherited_pid
                .or_else(|| self.source.as_ref().and_then(|source| source.query_pid()))
                .unwrap_or(self.fallback);
            debug!("spawn: resolved pid {pid}");
            pid
        })
    }

    /// `getppid`: `ENOSYS` when no parent identity was inherited.
    pub fn ppid(&self) -> Result<Pid> {
        self.inherited_ppid.ok_or_else(|| Errno::ENOSYS.into())
    }
}
