// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message channel seam towards the host
//!
//! The host exposes one fire-and-forget `post` primitive and delivers replies asynchronously,
//! keyed by a string. Handlers run on whichever thread delivers the reply.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::{Dictionary, Result, Value};

/// Callback receiving `(key, value)` for a delivered reply.
pub type ReplyHandler = Box<dyn Fn(&str, Value) + Send + Sync>;

/// Asynchronous, message-based transport to the host.
pub trait Channel: Send + Sync {
    /// Sends `message` to the host without waiting for anything.
    fn post(&self, message: Dictionary) -> Result<()>;

    /// Routes replies keyed by `key` to `handler`, replacing any previous handler.
    fn register_handler(&self, key: &str, handler: ReplyHandler);

    /// Stops routing replies keyed by `key`.
    fn unregister_handler(&self, key: &str);
}

type SharedHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Key-to-handler routing table shared by a channel and its delivery side.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, SharedHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` under `key`.
    pub fn register(&self, key: &str, handler: ReplyHandler) {
        self.handlers.lock().insert(key.to_string(), Arc::from(handler));
    }

    /// Removes the handler for `key`; returns `true` if one was installed.
    pub fn unregister(&self, key: &str) -> bool {
        self.handlers.lock().remove(key).is_some()
    }

    /// Number of installed handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Returns `true` when no handler is installed.
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Invokes the handler for `key`. Replies without a handler are dropped.
    ///
    /// The handler runs outside the table lock so it may (un)register handlers itself.
    pub fn dispatch(&self, key: &str, value: Value) -> bool {
        let handler = self.handlers.lock().get(key).cloned();
        match handler {
            Some(handler) => {
                handler(key, value);
                true
            }
            None => {
                warn!("ipc: dropping reply for unknown key {key}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_routes_by_key_and_drops_unknown() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry.register(
            "7",
            Box::new(move |key, _| {
                assert_eq!(key, "7");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(registry.dispatch("7", Value::Null));
        assert!(!registry.dispatch("8", Value::Null));
        assert!(registry.unregister("7"));
        assert!(!registry.dispatch("7", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
