// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `PATH` lookup.

use crate::FileSystem;

/// Splits a colon-separated search path, dropping empty entries.
pub fn split_search_path(search_path: &str) -> Vec<&str> {
    search_path.split(':').filter(|dir| !dir.is_empty()).collect()
}

/// Returns the first readable `<dir>/<name>` along `search_path`.
pub fn find_in_path(fs: &dyn FileSystem, name: &str, search_path: &str) -> Option<String> {
    split_search_path(search_path)
        .into_iter()
        .map(|dir| format!("{}/{name}", dir.trim_end_matches('/')))
        .find(|candidate| fs.readable(candidate))
}
