// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered `NAME=value` environment of an emulated process.

/// Process environment, kept in insertion order like `environ`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(String, String)>,
}

impl Environment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `NAME=value` strings; entries without `=` are kept with an empty value.
    pub fn from_envp<I, S>(envp: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Self::new();
        for entry in envp {
            let entry = entry.as_ref();
            let (name, value) = entry.split_once('=').unwrap_or((entry, ""));
            env.set(name, value, true);
        }
        env
    }

    /// `getenv`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// `setenv`; an existing value is kept unless `overwrite` is set.
    pub fn set(&mut self, name: &str, value: &str, overwrite: bool) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => {
                if overwrite {
                    *existing = value.to_string();
                }
            }
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// `unsetenv`; returns the removed value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    /// `NAME=value` strings in order.
    pub fn to_envp(&self) -> Vec<String> {
        self.entries.iter().map(|(name, value)| format!("{name}={value}")).collect()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no variable is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
