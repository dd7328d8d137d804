// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request shapes recognized by the supervisor.
//!
//! A request is either a bare string command or a dictionary keyed by the
//! command name. [`Request::parse`] consumes the message: payloads the
//! dispatcher takes ownership of (a submitted job descriptor, a replacement
//! stdio descriptor, an environment mapping) are moved out, and every
//! descriptor left behind in the message is closed before parse returns.

use std::os::unix::io::RawFd;

use crate::{keys, Value};

/// Target of a stdio replacement request.
#[derive(Debug, PartialEq)]
pub enum StdioTarget {
    /// Reopen this path on the next loop turn.
    Path(String),
    /// Duplicate this descriptor immediately. Owned by the dispatcher.
    Fd(RawFd),
}

/// A decoded control request.
#[derive(Debug, PartialEq)]
pub enum Request {
    StartJob(String),
    StopJob(String),
    RemoveJob(String),
    /// Single descriptor or array of descriptors to load.
    SubmitJob(Value),
    SetUserEnvironment(Value),
    UnsetUserEnvironment(String),
    GetUserEnvironment,
    CheckIn,
    ReloadTtys,
    Shutdown,
    GetJobs,
    GetJob(String),
    GetJobWithHandles(String),
    SetUmask(i64),
    GetUmask,
    SetStandardOut(StdioTarget),
    SetStandardError(StdioTarget),
    BatchControl(bool),
    BatchQuery,
    GetResourceLimits,
    SetResourceLimits(Vec<u8>),
    Unknown,
}

impl Request {
    /// Parse a message, adopting owned payloads and closing leftover
    /// descriptors.
    pub fn parse(mut msg: Value) -> Request {
        let req = Self::parse_inner(&mut msg);
        msg.close_fds();
        req
    }

    fn parse_inner(msg: &mut Value) -> Request {
        if let Some(cmd) = msg.as_str() {
            return match cmd {
                keys::GET_USER_ENVIRONMENT => Request::GetUserEnvironment,
                keys::CHECK_IN => Request::CheckIn,
                keys::RELOAD_TTYS => Request::ReloadTtys,
                keys::SHUTDOWN => Request::Shutdown,
                keys::GET_JOBS => Request::GetJobs,
                keys::GET_UMASK => Request::GetUmask,
                keys::BATCH_QUERY => Request::BatchQuery,
                keys::GET_RESOURCE_LIMITS => Request::GetResourceLimits,
                _ => Request::Unknown,
            };
        }

        if msg.as_dict().is_none() {
            return Request::Unknown;
        }

        if let Some(label) = take_string(msg, keys::START_JOB) {
            return Request::StartJob(label);
        }
        if let Some(label) = take_string(msg, keys::STOP_JOB) {
            return Request::StopJob(label);
        }
        if let Some(label) = take_string(msg, keys::REMOVE_JOB) {
            return Request::RemoveJob(label);
        }
        if let Some(payload) = msg.remove(keys::SUBMIT_JOB) {
            return Request::SubmitJob(payload);
        }
        if let Some(mapping) = msg.remove(keys::SET_USER_ENVIRONMENT) {
            return Request::SetUserEnvironment(mapping);
        }
        if let Some(name) = take_string(msg, keys::UNSET_USER_ENVIRONMENT) {
            return Request::UnsetUserEnvironment(name);
        }
        if let Some(label) = take_string(msg, keys::GET_JOB) {
            return Request::GetJob(label);
        }
        if let Some(label) = take_string(msg, keys::GET_JOB_WITH_HANDLES) {
            return Request::GetJobWithHandles(label);
        }
        if let Some(mask) = take_integer(msg, keys::SET_UMASK) {
            return Request::SetUmask(mask);
        }
        if let Some(target) = take_stdio(msg, keys::SET_STANDARD_OUT) {
            return Request::SetStandardOut(target);
        }
        if let Some(target) = take_stdio(msg, keys::SET_STANDARD_ERROR) {
            return Request::SetStandardError(target);
        }
        if let Some(enable) = take_bool(msg, keys::BATCH_CONTROL) {
            return Request::BatchControl(enable);
        }
        if let Some(raw) = take_opaque(msg, keys::SET_RESOURCE_LIMITS) {
            return Request::SetResourceLimits(raw);
        }

        Request::Unknown
    }
}

fn take_string(msg: &mut Value, key: &str) -> Option<String> {
    match msg.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            // Put a malformed payload back so its descriptors are closed.
            msg.insert(key, other);
            None
        }
        None => None,
    }
}

fn take_integer(msg: &mut Value, key: &str) -> Option<i64> {
    match msg.remove(key) {
        Some(Value::Integer(i)) => Some(i),
        Some(other) => {
            msg.insert(key, other);
            None
        }
        None => None,
    }
}

fn take_bool(msg: &mut Value, key: &str) -> Option<bool> {
    match msg.remove(key) {
        Some(Value::Bool(b)) => Some(b),
        Some(other) => {
            msg.insert(key, other);
            None
        }
        None => None,
    }
}

fn take_opaque(msg: &mut Value, key: &str) -> Option<Vec<u8>> {
    match msg.remove(key) {
        Some(Value::Opaque(raw)) => Some(raw),
        Some(other) => {
            msg.insert(key, other);
            None
        }
        None => None,
    }
}

fn take_stdio(msg: &mut Value, key: &str) -> Option<StdioTarget> {
    match msg.remove(key) {
        Some(Value::String(path)) => Some(StdioTarget::Path(path)),
        Some(Value::Fd(fd)) if fd >= 0 => Some(StdioTarget::Fd(fd)),
        Some(other) => {
            msg.insert(key, other);
            None
        }
        None => None,
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
