// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bridge configuration loaded from TOML
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! fd_ceiling = 1000
//! fd_env_marker = "SPAWN_FD_SETUP"
//! pipe_mount = "/apipe"
//! pid_env = "SPAWN_PID"
//! ppid_env = "SPAWN_PPID"
//! fallback_pid = 1
//! default_path = "/bin"
//! library_path = "/lib:/usr/lib"
//! loader_name = "runnable-ld.so"
//! main_alias = "main.nexe"
//! max_interpreter_depth = 4
//! # reply_timeout_ms = 30000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use procbridge_abi::Pid;
use procbridge_loader::ResolveOptions;
use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser diagnostic.
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables of the process-control bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Descriptors `0..fd_ceiling` are scanned for inheritance at spawn.
    pub fd_ceiling: i32,
    /// Prefix of `<MARKER>_<n>` inheritance entries.
    pub fd_env_marker: String,
    /// Mount point of the anonymous pipe filesystem.
    pub pipe_mount: String,
    /// Variable carrying the inherited pid.
    pub pid_env: String,
    /// Variable carrying the inherited parent pid.
    pub ppid_env: String,
    /// Pid used when neither the environment nor an identity source answers.
    pub fallback_pid: Pid,
    /// Search path used when `PATH` is unset.
    pub default_path: String,
    /// Colon-separated directories searched for shared libraries.
    pub library_path: String,
    /// Dependency promoted to the manifest `program` entry.
    pub loader_name: String,
    /// Name given to the program's own dependency record.
    pub main_alias: String,
    /// Nested `#!` expansions allowed before `ELOOP`.
    pub max_interpreter_depth: usize,
    /// Optional bound on every host round trip; unset blocks forever.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let resolve = ResolveOptions::default();
        Self {
            fd_ceiling: 1000,
            fd_env_marker: "SPAWN_FD_SETUP".to_string(),
            pipe_mount: "/apipe".to_string(),
            pid_env: "SPAWN_PID".to_string(),
            ppid_env: "SPAWN_PPID".to_string(),
            fallback_pid: 1,
            default_path: "/bin".to_string(),
            library_path: "/lib:/usr/lib".to_string(),
            loader_name: resolve.loader_name,
            main_alias: resolve.main_alias,
            max_interpreter_depth: resolve.max_interpreter_depth,
            reply_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Loads the configuration stored at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Correlator timeout, if configured.
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    /// Options handed to the executable resolver.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            loader_name: self.loader_name.clone(),
            main_alias: self.main_alias.clone(),
            max_interpreter_depth: self.max_interpreter_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "fd_ceiling = 64\nreply_timeout_ms = 250\n").unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.fd_ceiling, 64);
        assert_eq!(config.reply_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pipe_mount, "/apipe");
        assert_eq!(config.resolve_options(), ResolveOptions::default());
    }

    #[test]
    fn unknown_keys_and_missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "fd_cieling = 64\n").unwrap();
        assert!(matches!(BridgeConfig::load(&path), Err(ConfigError::Parse { .. })));
        let missing = dir.path().join("absent.toml");
        assert!(matches!(BridgeConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}
