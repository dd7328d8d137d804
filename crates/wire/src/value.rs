// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tagged-variant data tree carried on the control channel.
//!
//! Descriptor leaves hold raw descriptor *numbers*, not owned handles:
//! cloning a [`Value`] copies the number without duplicating the descriptor,
//! exactly one owner is responsible for calling [`Value::close_fds`], and a
//! revoked leaf holds the `-1` sentinel. Job snapshots handed to unprivileged
//! clients are revoked before encoding so no live descriptor leaves the
//! supervisor.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

/// Sentinel stored in a descriptor leaf whose descriptor has been revoked.
pub(crate) const REVOKED_FD: RawFd = -1;

/// A node in the tagged-variant tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    /// Key/value mapping; iteration order is insertion order.
    Dict(IndexMap<String, Value>),
    Array(Vec<Value>),
    String(String),
    Integer(i64),
    Bool(bool),
    /// Descriptor leaf. In memory: a raw descriptor or `-1` when revoked.
    /// On the wire: an ordinal into the frame's ancillary descriptor array.
    Fd(RawFd),
    Opaque(Vec<u8>),
}

impl Value {
    /// Empty dictionary.
    pub fn dict() -> Value {
        Value::Dict(IndexMap::new())
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Dict(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Dict(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_fd(&self) -> Option<RawFd> {
        match self {
            Value::Fd(fd) => Some(*fd),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&[u8]> {
        match self {
            Value::Opaque(b) => Some(b),
            _ => None,
        }
    }

    /// Dictionary lookup; `None` on non-dicts.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|m| m.get(key))
    }

    /// String value under `key`, if any.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Integer value under `key`, defaulting to 0 like the classic accessors.
    pub fn get_integer(&self, key: &str) -> i64 {
        self.get(key).and_then(Value::as_integer).unwrap_or(0)
    }

    /// Bool value under `key`, defaulting to false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Insert into a dictionary; no-op on other variants.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Dict(m) = self {
            m.insert(key.into(), value);
        }
    }

    /// Remove and return a dictionary entry, preserving the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.as_dict_mut().and_then(|m| m.shift_remove(key))
    }

    /// Visit every descriptor leaf in tree order.
    pub fn for_each_fd(&self, f: &mut impl FnMut(RawFd)) {
        match self {
            Value::Dict(m) => {
                for v in m.values() {
                    v.for_each_fd(f);
                }
            }
            Value::Array(a) => {
                for v in a {
                    v.for_each_fd(f);
                }
            }
            Value::Fd(fd) if *fd >= 0 => f(*fd),
            _ => {}
        }
    }

    /// Replace every live descriptor leaf with the revoked sentinel.
    ///
    /// The descriptors themselves are left open; use this on a copy whose
    /// descriptors are owned elsewhere.
    pub fn revoke_fds(&mut self) {
        self.rewrite_fds(&mut |_| REVOKED_FD);
    }

    /// Close every live descriptor leaf and revoke it.
    pub fn close_fds(&mut self) {
        self.rewrite_fds(&mut |fd| {
            let _ = nix::unistd::close(fd);
            REVOKED_FD
        });
    }

    /// Count of live descriptor leaves.
    pub fn fd_count(&self) -> usize {
        let mut n = 0;
        self.for_each_fd(&mut |_| n += 1);
        n
    }

    pub(crate) fn rewrite_fds(&mut self, f: &mut impl FnMut(RawFd) -> RawFd) {
        match self {
            Value::Dict(m) => {
                for v in m.values_mut() {
                    v.rewrite_fds(f);
                }
            }
            Value::Array(a) => {
                for v in a {
                    v.rewrite_fds(f);
                }
            }
            Value::Fd(fd) if *fd >= 0 => *fd = f(*fd),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
