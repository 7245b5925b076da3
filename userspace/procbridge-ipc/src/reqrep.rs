// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Blocking request/reply correlation over an asynchronous channel.
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit-tested (host), stress and property tests
//!
//! Every request gets a process-unique id. The reply handler for that id is installed before
//! the request is posted and removed as soon as the caller wakes, so each caller observes
//! exactly its own reply no matter how the host interleaves them.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use crate::{Channel, Dictionary, IpcError, Result, Value, KEY_ID};

/// Monotonic request id generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestIdGen {
    next: u64,
}

impl RequestIdGen {
    /// Create a generator starting at `start` (the first `next_id()` returns `start`).
    pub const fn new(start: u64) -> Self {
        Self { next: start }
    }

    /// Returns the next id and advances the generator.
    pub fn next_id(&mut self) -> u64 {
        let out = self.next;
        self.next = self.next.wrapping_add(1);
        out
    }
}

impl Default for RequestIdGen {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Iterator for RequestIdGen {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_id())
    }
}

/// Single-slot completion signal of one in-flight request.
#[derive(Default)]
struct Pending {
    slot: Mutex<Option<Value>>,
    ready: Condvar,
}

impl Pending {
    fn complete(&self, value: Value) {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(value);
        self.ready.notify_one();
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<Value> {
        let mut slot = self.slot.lock();
        match timeout {
            None => {
                while slot.is_none() {
                    self.ready.wait(&mut slot);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while slot.is_none() {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        slot.take()
    }
}

/// Turns the channel's fire-and-forget `post` into a blocking call.
pub struct Correlator {
    channel: Arc<dyn Channel>,
    ids: Mutex<RequestIdGen>,
    timeout: Option<Duration>,
}

impl Correlator {
    /// Creates a correlator that waits for replies indefinitely.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel, ids: Mutex::new(RequestIdGen::default()), timeout: None }
    }

    /// Bounds every wait by `timeout`; `None` restores the unbounded wait.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Sends `request` without waiting; the reply, whenever it arrives, is discarded.
    ///
    /// The handler for the request id removes itself on delivery.
    pub fn post(&self, mut request: Dictionary) -> Result<()> {
        let id = self.ids.lock().next_id().to_string();
        request.set(KEY_ID, id.as_str());
        let command = request.command_name().unwrap_or("?").to_string();

        let channel: Weak<dyn Channel> = Arc::downgrade(&self.channel);
        self.channel.register_handler(
            &id,
            Box::new(move |key, _| {
                if let Some(channel) = channel.upgrade() {
                    channel.unregister_handler(key);
                }
            }),
        );
        debug!("ipc: -> {command} #{id} (detached)");
        if let Err(err) = self.channel.post(request) {
            warn!("ipc: {command} #{id}: post failed: {err}");
            self.channel.unregister_handler(&id);
            return Err(err);
        }
        Ok(())
    }

    /// Sends `request` and blocks the calling thread until its reply arrives.
    pub fn send_and_wait(&self, mut request: Dictionary) -> Result<Dictionary> {
        let id = self.ids.lock().next_id().to_string();
        request.set(KEY_ID, id.as_str());
        let command = request.command_name().unwrap_or("?").to_string();

        let pending = Arc::new(Pending::default());
        let signal = pending.clone();
        self.channel.register_handler(&id, Box::new(move |_, value| signal.complete(value)));

        debug!("ipc: -> {command} #{id}");
        if let Err(err) = self.channel.post(request) {
            self.channel.unregister_handler(&id);
            return Err(err);
        }
        let reply = pending.wait(self.timeout);
        self.channel.unregister_handler(&id);

        match reply {
            Some(Value::Dict(reply)) => {
                debug!("ipc: <- {command} #{id}");
                Ok(reply)
            }
            Some(other) => {
                error!("ipc: {command} #{id}: reply is {}, expected dictionary", other.type_name());
                Err(IpcError::MalformedReply(other.type_name()))
            }
            None => {
                error!("ipc: {command} #{id}: no reply within {:?}", self.timeout);
                Err(IpcError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loopback_channel, HostEndpoint, LoopbackChannel, Wait};
    use proptest::prelude::*;
    use std::thread;

    fn pair() -> (Arc<LoopbackChannel>, Arc<Correlator>, HostEndpoint) {
        let (channel, host) = loopback_channel();
        let channel = Arc::new(channel);
        let correlator = Arc::new(Correlator::new(channel.clone()));
        (channel, correlator, host)
    }

    fn echo(request: &Dictionary) -> Dictionary {
        let tag = request.str("tag").unwrap_or_default().to_string();
        Dictionary::new().with("tag", tag)
    }

    #[test]
    fn detached_post_discards_reply_and_handler() {
        let (channel, correlator, host) = pair();
        correlator.post(Dictionary::command("note").with("tag", "x")).unwrap();
        let request = host.recv(Wait::NonBlocking).unwrap();
        assert_eq!(request.str("tag").unwrap(), "x");
        assert_eq!(channel.pending_handlers(), 1);
        assert!(host.reply(request.id().unwrap(), echo(&request)));
        assert_eq!(channel.pending_handlers(), 0);

        drop(host);
        let err = correlator.post(Dictionary::command("note")).unwrap_err();
        assert_eq!(err, IpcError::Disconnected);
        assert_eq!(channel.pending_handlers(), 0);
    }

    #[test]
    fn ids_are_monotonic() {
        let ids: Vec<u64> = RequestIdGen::new(5).take(3).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn concurrent_callers_get_their_own_reply() {
        const THREADS: usize = 8;
        const CALLS: usize = 25;
        let (channel, correlator, host) = pair();

        let server = thread::spawn(move || {
            let replier = host.replier();
            let mut batch = Vec::new();
            loop {
                let flush = match host.recv(Wait::Timeout(Duration::from_millis(20))) {
                    Ok(request) => {
                        batch.push(request);
                        batch.len() == THREADS
                    }
                    Err(IpcError::Timeout) => true,
                    Err(_) => break,
                };
                if flush {
                    // Reverse arrival order.
                    for request in batch.drain(..).rev() {
                        let id = request.id().unwrap_or_default().to_string();
                        assert!(replier.reply(&id, echo(&request)));
                    }
                }
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let correlator = correlator.clone();
                thread::spawn(move || {
                    for m in 0..CALLS {
                        let tag = format!("{t}:{m}");
                        let request = Dictionary::command("echo").with("tag", tag.as_str());
                        let reply = correlator.send_and_wait(request).unwrap();
                        assert_eq!(reply.str("tag").unwrap(), tag);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        drop(correlator);
        drop(channel);
        server.join().unwrap();
    }

    #[test]
    fn stale_reply_is_dropped() {
        let (channel, correlator, host) = pair();
        let caller = {
            let correlator = correlator.clone();
            thread::spawn(move || correlator.send_and_wait(Dictionary::command("getsid")))
        };
        let request = host.recv(Wait::Blocking).unwrap();
        let id = request.id().unwrap().to_string();
        assert!(host.reply(&id, Dictionary::new().with("sid", 4)));
        assert_eq!(caller.join().unwrap().unwrap().int("sid"), Ok(4));
        assert!(!host.reply(&id, Dictionary::new().with("sid", 5)));
        assert_eq!(channel.pending_handlers(), 0);
    }

    #[test]
    fn non_dictionary_reply_is_a_protocol_error() {
        let (_channel, correlator, host) = pair();
        let caller = {
            let correlator = correlator.clone();
            thread::spawn(move || correlator.send_and_wait(Dictionary::command("wait")))
        };
        let request = host.recv(Wait::Blocking).unwrap();
        host.reply(request.id().unwrap(), Value::Int(3));
        assert_eq!(caller.join().unwrap(), Err(IpcError::MalformedReply("int")));
    }

    #[test]
    fn timeout_removes_handler() {
        let (channel, host) = loopback_channel();
        let channel = Arc::new(channel);
        let correlator =
            Correlator::new(channel.clone()).with_timeout(Some(Duration::from_millis(10)));
        assert_eq!(correlator.send_and_wait(Dictionary::command("wait")), Err(IpcError::Timeout));
        assert_eq!(channel.pending_handlers(), 0);
        let request = host.recv(Wait::NonBlocking).unwrap();
        assert!(!host.reply(request.id().unwrap(), Dictionary::new()));
    }

    #[test]
    fn post_failure_unregisters() {
        let (channel, host) = loopback_channel();
        drop(host);
        let channel = Arc::new(channel);
        let correlator = Correlator::new(channel.clone());
        assert_eq!(
            correlator.send_and_wait(Dictionary::command("apipe")),
            Err(IpcError::Disconnected)
        );
        assert_eq!(channel.pending_handlers(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn any_reply_order_reaches_the_right_caller(
            order in (1usize..7).prop_flat_map(|k| Just((0..k).collect::<Vec<usize>>()).prop_shuffle())
        ) {
            let (_channel, correlator, host) = pair();
            let callers: Vec<_> = (0..order.len())
                .map(|i| {
                    let correlator = correlator.clone();
                    thread::spawn(move || {
                        let request = Dictionary::command("echo").with("tag", format!("c{i}"));
                        correlator.send_and_wait(request).map(|reply| (i, reply))
                    })
                })
                .collect();

            let mut requests: Vec<Dictionary> =
                (0..order.len()).map(|_| host.recv(Wait::Blocking).unwrap()).collect();
            requests.sort_by_key(|request| request.str("tag").unwrap().to_string());
            for &index in &order {
                let request = &requests[index];
                prop_assert!(host.reply(request.id().unwrap(), echo(request)));
            }
            for caller in callers {
                let (i, reply) = caller.join().unwrap().unwrap();
                prop_assert_eq!(reply.str("tag").unwrap(), format!("c{i}"));
            }
        }
    }
}
