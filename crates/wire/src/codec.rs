// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload encoding: JSON body plus the descriptor array it references.
//!
//! Descriptor leaves cannot ride inside JSON, so `encode` rewrites each live
//! leaf to its ordinal in the returned descriptor array (tree order), and
//! `decode` rewrites ordinals back to the descriptors received alongside the
//! frame. Revoked leaves stay `-1` in both directions.

use std::os::unix::io::RawFd;

use crate::frame::{MAX_FDS_PER_MESSAGE, MAX_MESSAGE_SIZE};
use crate::{ProtocolError, Value};

/// Encode a value to JSON bytes and the descriptors it carries.
///
/// The input is not mutated; snapshot responses keep their live descriptors
/// in the supervisor's copy.
pub fn encode(value: &Value) -> Result<(Vec<u8>, Vec<RawFd>), ProtocolError> {
    let mut fds: Vec<RawFd> = Vec::new();
    let mut wired = value.clone();
    wired.rewrite_fds(&mut |fd| {
        fds.push(fd);
        (fds.len() - 1) as RawFd
    });

    if fds.len() > MAX_FDS_PER_MESSAGE {
        return Err(ProtocolError::TooManyDescriptors {
            count: fds.len(),
            max: MAX_FDS_PER_MESSAGE,
        });
    }

    let json = serde_json::to_vec(&wired)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: json.len(), max: MAX_MESSAGE_SIZE });
    }

    Ok((json, fds))
}

/// Decode a payload, resolving descriptor ordinals against `fds`.
///
/// Ownership of every descriptor in `fds` passes to the returned value.
pub fn decode(bytes: &[u8], fds: &[RawFd]) -> Result<Value, ProtocolError> {
    let mut value: Value = serde_json::from_slice(bytes)?;

    let mut bad = None;
    value.rewrite_fds(&mut |ordinal| match fds.get(ordinal as usize) {
        Some(fd) => *fd,
        None => {
            bad.get_or_insert(ordinal as usize);
            -1
        }
    });

    match bad {
        Some(index) => Err(ProtocolError::BadDescriptor { index, available: fds.len() }),
        None => Ok(value),
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
