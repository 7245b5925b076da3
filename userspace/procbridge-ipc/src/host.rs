// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process host transport for embedding and host-based testing
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - loopback_channel(): client channel plus host endpoint backed by in-memory queues
//!   - struct LoopbackChannel: Channel implementation used by the emulated process
//!   - struct HostEndpoint: receives posted requests on the host side
//!   - struct Replier: cloneable reply path, usable from host worker threads
//!
//! ERROR CONDITIONS:
//!   - IpcError::Disconnected: the opposite side was dropped
//!   - IpcError::WouldBlock: non-blocking receive found no request
//!   - IpcError::Timeout: timed receive expired
//!
//! DEPENDENCIES:
//!   - std::sync::mpsc: request queue
//!   - parking_lot::Mutex: sender/receiver sharing
//!
//! TEST SCENARIOS:
//!   - test_post_reaches_host(): requests arrive in post order
//!   - test_reply_routes_to_handler(): replies reach the handler keyed by id
//!   - test_non_blocking_and_timeout(): empty queue behaviour
//!   - test_disconnected_state(): dropping the channel ends the host loop
//!
//! ADR: docs/adr/0001-process-bridge.md

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::{Channel, Dictionary, HandlerRegistry, IpcError, ReplyHandler, Result, Value, Wait};

/// Creates a connected channel/host pair backed by in-memory queues.
pub fn loopback_channel() -> (LoopbackChannel, HostEndpoint) {
    let (request_tx, request_rx) = mpsc::channel::<Dictionary>();
    let registry = Arc::new(HandlerRegistry::new());
    (
        LoopbackChannel { request_tx: Mutex::new(request_tx), registry: registry.clone() },
        HostEndpoint { request_rx: Mutex::new(request_rx), registry },
    )
}

/// Client side of the loopback transport.
pub struct LoopbackChannel {
    request_tx: Mutex<Sender<Dictionary>>,
    registry: Arc<HandlerRegistry>,
}

impl LoopbackChannel {
    /// Number of reply handlers currently installed.
    pub fn pending_handlers(&self) -> usize {
        self.registry.len()
    }
}

impl Channel for LoopbackChannel {
    fn post(&self, message: Dictionary) -> Result<()> {
        self.request_tx.lock().send(message).map_err(|_| IpcError::Disconnected)
    }

    fn register_handler(&self, key: &str, handler: ReplyHandler) {
        self.registry.register(key, handler);
    }

    fn unregister_handler(&self, key: &str) {
        self.registry.unregister(key);
    }
}

/// Host side of the loopback transport.
pub struct HostEndpoint {
    request_rx: Mutex<Receiver<Dictionary>>,
    registry: Arc<HandlerRegistry>,
}

impl HostEndpoint {
    /// Receives the next posted request.
    pub fn recv(&self, wait: Wait) -> Result<Dictionary> {
        let receiver = self.request_rx.lock();
        match wait {
            Wait::Blocking => receiver.recv().map_err(|_| IpcError::Disconnected),
            Wait::NonBlocking => receiver.try_recv().map_err(map_try_recv),
            Wait::Timeout(timeout) => {
                if timeout.is_zero() {
                    return receiver.try_recv().map_err(map_try_recv);
                }
                receiver.recv_timeout(timeout).map_err(|err| match err {
                    RecvTimeoutError::Timeout => IpcError::Timeout,
                    RecvTimeoutError::Disconnected => IpcError::Disconnected,
                })
            }
        }
    }

    /// Returns a reply path that can be moved to worker threads.
    pub fn replier(&self) -> Replier {
        Replier { registry: self.registry.clone() }
    }

    /// Delivers `value` to the handler registered under `key`.
    pub fn reply(&self, key: &str, value: impl Into<Value>) -> bool {
        self.replier().reply(key, value)
    }
}

fn map_try_recv(err: TryRecvError) -> IpcError {
    match err {
        TryRecvError::Empty => IpcError::WouldBlock,
        TryRecvError::Disconnected => IpcError::Disconnected,
    }
}

/// Cloneable reply path of a [`HostEndpoint`].
#[derive(Clone)]
pub struct Replier {
    registry: Arc<HandlerRegistry>,
}

impl Replier {
    /// Delivers `value` under `key`; returns `false` when nobody waits for it.
    pub fn reply(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        debug!("ipc: reply {key} ({})", value.type_name());
        self.registry.dispatch(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_post_reaches_host() {
        let (channel, host) = loopback_channel();
        channel.post(Dictionary::command("apipe")).unwrap();
        channel.post(Dictionary::command("wait")).unwrap();
        assert_eq!(host.recv(Wait::Blocking).unwrap().command_name(), Some("apipe"));
        assert_eq!(host.recv(Wait::Blocking).unwrap().command_name(), Some("wait"));
    }

    #[test]
    fn test_reply_routes_to_handler() {
        let (channel, host) = loopback_channel();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        channel.register_handler("3", Box::new(move |_, value| *slot.lock() = Some(value)));
        assert_eq!(channel.pending_handlers(), 1);
        assert!(host.reply("3", Dictionary::new().with("pid", 9)));
        assert!(!host.reply("4", Value::Null));
        let value = seen.lock().take();
        assert_eq!(value, Some(Value::Dict(Dictionary::new().with("pid", 9))));
        channel.unregister_handler("3");
        assert_eq!(channel.pending_handlers(), 0);
    }

    #[test]
    fn test_non_blocking_and_timeout() {
        let (_channel, host) = loopback_channel();
        assert_eq!(host.recv(Wait::NonBlocking), Err(IpcError::WouldBlock));
        assert_eq!(host.recv(Wait::Timeout(Duration::ZERO)), Err(IpcError::WouldBlock));
        assert_eq!(host.recv(Wait::Timeout(Duration::from_millis(5))), Err(IpcError::Timeout));
    }

    #[test]
    fn test_disconnected_state() {
        let (channel, host) = loopback_channel();
        drop(channel);
        assert_eq!(host.recv(Wait::Blocking), Err(IpcError::Disconnected));
    }
}
