// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared harness for the process bridge end-to-end tests
//!
//! Starts a reference host with silent stdio and a root process, and offers small helpers
//! for draining pipes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::sync::Arc;

use procbridge_loader::FileSystem;
use procbridge_spawn::{BridgeConfig, Environment, Process, Result};
use procd::{Procd, StdioMode};

/// Host plus its root process.
pub struct Harness {
    /// Reference host.
    pub procd: Procd,
    /// Root process every test acts as.
    pub root: Process,
}

impl Harness {
    /// Host with builtins and an empty filesystem view.
    pub fn new() -> Self {
        Self::with_procd(Procd::builder(BridgeConfig::default()).stdio(StdioMode::Null).build())
    }

    /// Host whose processes resolve spawn targets against `filesystem`.
    pub fn with_filesystem(filesystem: Arc<dyn FileSystem>) -> Self {
        Self::with_procd(
            Procd::builder(BridgeConfig::default())
                .stdio(StdioMode::Null)
                .filesystem(filesystem)
                .build(),
        )
    }

    fn with_procd(procd: Procd) -> Self {
        let root = match procd.start_root(Environment::from_envp(["PATH=/bin"]), "/") {
            Ok(root) => root,
            Err(err) => panic!("root process failed to start: {err}"),
        };
        Self { procd, root }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.procd.finish(&self.root, 0);
    }
}

/// Owned argument vector.
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Reads `fd` of `process` until end-of-file.
pub fn read_to_end(process: &Process, fd: i32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let count = process.read(fd, &mut buf)?;
        if count == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..count]);
    }
}
