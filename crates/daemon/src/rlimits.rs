// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide resource limits: the cached snapshot behind
//! GetResourceLimits/SetResourceLimits, and the per-job limit table applied
//! at spawn.
//!
//! The opaque wire form is the snapshot serialized as consecutive
//! little-endian `u64` (soft, hard) pairs in [`RESOURCES`] order.

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tracing::warn;
use warden_wire::keys;

/// Resources the supervisor manages, in wire order.
pub const RESOURCES: [(&str, Resource); 9] = [
    (keys::LIMIT_CORE, Resource::RLIMIT_CORE),
    (keys::LIMIT_CPU, Resource::RLIMIT_CPU),
    (keys::LIMIT_DATA, Resource::RLIMIT_DATA),
    (keys::LIMIT_FSIZE, Resource::RLIMIT_FSIZE),
    (keys::LIMIT_MEMLOCK, Resource::RLIMIT_MEMLOCK),
    (keys::LIMIT_NOFILE, Resource::RLIMIT_NOFILE),
    (keys::LIMIT_NPROC, Resource::RLIMIT_NPROC),
    (keys::LIMIT_RSS, Resource::RLIMIT_RSS),
    (keys::LIMIT_STACK, Resource::RLIMIT_STACK),
];

const PAIR_BYTES: usize = 16;

/// Snapshot of the supervisor's own limits, taken once and kept in sync with
/// every diff applied through the control channel.
pub struct CachedLimits {
    limits: Vec<(u64, u64)>,
}

impl CachedLimits {
    /// Read the current limits from the kernel.
    pub fn snapshot() -> Self {
        let limits = RESOURCES
            .iter()
            .map(|(name, resource)| match getrlimit(*resource) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("getrlimit({name}): {e}");
                    (u64::MAX, u64::MAX)
                }
            })
            .collect();
        Self { limits }
    }

    /// Serialize to the opaque wire form.
    pub fn to_opaque(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.limits.len() * PAIR_BYTES);
        for (soft, hard) in &self.limits {
            out.extend_from_slice(&soft.to_le_bytes());
            out.extend_from_slice(&hard.to_le_bytes());
        }
        out
    }

    /// Apply the entries of `raw` that differ from the cached values.
    ///
    /// Oversized payloads are truncated to the known resource set; short
    /// payloads adjust only the leading resources.
    pub fn adjust(&mut self, raw: &[u8]) {
        let pairs = raw.len() / PAIR_BYTES;
        if pairs > self.limits.len() {
            warn!("resource limit payload covers {pairs} resources; truncating");
        }

        for i in 0..pairs.min(self.limits.len()) {
            let at = i * PAIR_BYTES;
            let soft = read_u64(raw, at);
            let hard = read_u64(raw, at + 8);
            if (soft, hard) == self.limits[i] {
                continue;
            }
            let (name, resource) = RESOURCES[i];
            match setrlimit(resource, soft, hard) {
                Ok(()) => self.limits[i] = (soft, hard),
                Err(e) => warn!("setrlimit({name}): {e}"),
            }
        }
    }
}

fn read_u64(raw: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
#[path = "rlimits_tests.rs"]
mod tests;
