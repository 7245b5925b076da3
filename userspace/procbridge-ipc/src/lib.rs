// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message transport and request/reply correlation towards the process host
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (value accessors, loopback, correlator stress)
//!
//! PUBLIC API:
//!   - Value / Dictionary: tagged message values exchanged with the host
//!   - Channel trait: fire-and-forget post plus keyed reply handlers
//!   - loopback_channel(): in-process channel pair for hosts and tests
//!   - Correlator: blocking send_and_wait over an asynchronous channel
//!   - Wait / IpcError: transport wait behaviour and failures
//!
//! DEPENDENCIES:
//!   - std::sync::mpsc: loopback request queue
//!   - parking_lot: handler table, pending-reply slots
//!
//! ADR: docs/adr/0001-process-bridge.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::time::Duration;

use thiserror::Error;

mod channel;
mod host;
pub mod reqrep;
mod value;

pub use channel::{Channel, HandlerRegistry, ReplyHandler};
pub use host::{loopback_channel, HostEndpoint, LoopbackChannel, Replier};
pub use reqrep::{Correlator, RequestIdGen};
pub use value::{Dictionary, ReplyError, Value, KEY_COMMAND, KEY_ID};

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

/// Errors produced by the IPC runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IpcError {
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// The caller exceeded the requested timeout.
    #[error("operation timed out")]
    Timeout,
    /// The opposite endpoint disconnected.
    #[error("peer disconnected")]
    Disconnected,
    /// The host answered with a value that is not a reply dictionary.
    #[error("malformed reply: expected dictionary, found {0}")]
    MalformedReply(&'static str),
}
