// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event sum type multiplexed by the main loop.
//!
//! Every source that is not a signal stream — connection tasks, activation
//! watchers, the demand-port bridge — reports through one channel of these,
//! and the main loop dispatches each by a single match. Events are processed
//! strictly one at a time.

use tokio::sync::oneshot;
use warden_wire::Value;

/// Identity of a client connection in the supervisor's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An occurrence the main loop must serialize.
#[derive(Debug)]
pub enum Event {
    /// A decoded request from a client connection. The response is delivered
    /// back to the connection task through `reply`.
    Request { conn: ConnId, msg: Value, reply: oneshot::Sender<Value> },

    /// A connection ended (peer close, read error, or forced close).
    ConnClosed { conn: ConnId },

    /// An activation descriptor of an idle on-demand job became readable.
    Activation { label: String },

    /// The demand-port bridge observed a pending message on the port at
    /// `slot` and removed it from the watched set.
    PortActivation { slot: usize },
}
