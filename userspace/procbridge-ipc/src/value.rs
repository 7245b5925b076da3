// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tagged message values exchanged with the host.
//!
//! Integer reply fields follow the host convention: a negative value is `-errno`. Typed
//! accessors never coerce between variants; a mismatch is a protocol error.

use std::collections::btree_map;
use std::collections::BTreeMap;

use procbridge_abi::Errno;
use thiserror::Error;

/// Key every request carries to name its operation.
pub const KEY_COMMAND: &str = "command";
/// Key carrying the correlation id of a submitted request.
pub const KEY_ID: &str = "id";

/// A single tagged message value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Absent/undefined value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed map.
    Dict(Dictionary),
    /// Raw byte buffer.
    Bytes(Vec<u8>),
}

impl Value {
    /// Short name of the variant, used in protocol diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Dict(_) => "dictionary",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Builds an array of strings.
    pub fn str_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(items.into_iter().map(|item| Self::Str(item.into())).collect())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dict(value)
    }
}

/// Errors produced while decoding a reply field.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The reply does not carry the field.
    #[error("reply field `{0}` missing")]
    Missing(String),
    /// The field holds a different variant than expected.
    #[error("reply field `{key}` is {found}, expected {expected}")]
    Type {
        /// Field name.
        key: String,
        /// Expected variant name.
        expected: &'static str,
        /// Variant actually present.
        found: &'static str,
    },
    /// The host reported a failure through the negative-errno convention.
    #[error("host reported {0}")]
    Failed(Errno),
}

/// String-keyed message map; requests and replies are dictionaries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: BTreeMap<String, Value>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request for `command`.
    pub fn command(command: &str) -> Self {
        Self::new().with(KEY_COMMAND, command)
    }

    /// Builder-style [`Dictionary::set`].
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Inserts or replaces `key`.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Returns the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Returns `true` when `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Operation name of a request, if present and a string.
    pub fn command_name(&self) -> Option<&str> {
        match self.get(KEY_COMMAND) {
            Some(Value::Str(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Correlation id of a submitted request, if present and a string.
    pub fn id(&self) -> Option<&str> {
        match self.get(KEY_ID) {
            Some(Value::Str(id)) => Some(id.as_str()),
            _ => None,
        }
    }

    fn field(&self, key: &str) -> Result<&Value, ReplyError> {
        self.get(key).ok_or_else(|| ReplyError::Missing(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, found: &Value) -> ReplyError {
        ReplyError::Type { key: key.to_string(), expected, found: found.type_name() }
    }

    /// Reads an integer field without applying the errno convention.
    pub fn raw_int(&self, key: &str) -> Result<i32, ReplyError> {
        match self.field(key)? {
            Value::Int(value) => Ok(*value),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    /// Reads an optional integer field without applying the errno convention.
    pub fn opt_raw_int(&self, key: &str) -> Result<Option<i32>, ReplyError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::mismatch(key, "int", other)),
        }
    }

    /// Reads a result integer: negative values surface as [`ReplyError::Failed`].
    pub fn int(&self, key: &str) -> Result<i32, ReplyError> {
        let value = self.raw_int(key)?;
        match Errno::from_sentinel(value) {
            Some(errno) => Err(ReplyError::Failed(errno)),
            None => Ok(value),
        }
    }

    /// Reads a boolean field.
    pub fn bool(&self, key: &str) -> Result<bool, ReplyError> {
        match self.field(key)? {
            Value::Bool(value) => Ok(*value),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    /// Reads a string field.
    pub fn str(&self, key: &str) -> Result<&str, ReplyError> {
        match self.field(key)? {
            Value::Str(value) => Ok(value.as_str()),
            other => Err(Self::mismatch(key, "string", other)),
        }
    }

    /// Reads a byte-buffer field.
    pub fn bytes(&self, key: &str) -> Result<&[u8], ReplyError> {
        match self.field(key)? {
            Value::Bytes(value) => Ok(value.as_slice()),
            other => Err(Self::mismatch(key, "bytes", other)),
        }
    }

    /// Reads an array field.
    pub fn array(&self, key: &str) -> Result<&[Value], ReplyError> {
        match self.field(key)? {
            Value::Array(value) => Ok(value.as_slice()),
            other => Err(Self::mismatch(key, "array", other)),
        }
    }

    /// Reads an array of strings.
    pub fn str_array(&self, key: &str) -> Result<Vec<String>, ReplyError> {
        self.array(key)?
            .iter()
            .map(|item| match item {
                Value::Str(value) => Ok(value.clone()),
                other => Err(Self::mismatch(key, "string", other)),
            })
            .collect()
    }

    /// Reads a nested dictionary field.
    pub fn dict(&self, key: &str) -> Result<&Dictionary, ReplyError> {
        match self.field(key)? {
            Value::Dict(value) => Ok(value),
            other => Err(Self::mismatch(key, "dictionary", other)),
        }
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
