// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for supervisor communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload carrying a
//! tagged-variant [`Value`] tree. Descriptor leaves travel out-of-band as
//! `SCM_RIGHTS` ancillary data; in the payload they are rewritten to ordinals
//! into the frame's descriptor array.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod codec;
mod frame;
pub mod keys;
mod request;
mod value;


pub use client::{checkin, socket_path, Client, SOCK_PREFIX};
pub use codec::{decode, encode};
pub use frame::{MsgStream, MAX_FDS_PER_MESSAGE, MAX_MESSAGE_SIZE};
pub use request::{Request, StdioTarget};
pub use value::Value;

use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Too many descriptors in one message: {count} (max {max})")]
    TooManyDescriptors { count: usize, max: usize },

    #[error("Descriptor ordinal {index} out of range ({available} received)")]
    BadDescriptor { index: usize, available: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("{0} is not set; not running under the supervisor")]
    MissingTrustedFd(&'static str),
}
