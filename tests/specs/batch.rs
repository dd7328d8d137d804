// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch latch specs: query/control round-trip and the disconnect fallback.

use super::prelude::*;
use warden_wire::{keys, Value};

fn batch_control(enable: bool) -> Value {
    let mut msg = Value::dict();
    msg.insert(keys::BATCH_CONTROL, Value::Bool(enable));
    msg
}

#[test]
fn batch_control_round_trip() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    assert_eq!(client.msg(&Value::string(keys::BATCH_QUERY)).unwrap(), Value::Bool(true));

    assert_eq!(client.msg(&batch_control(false)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));
    assert_eq!(client.msg(&Value::string(keys::BATCH_QUERY)).unwrap(), Value::Bool(false));

    assert_eq!(client.msg(&batch_control(true)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));
    assert_eq!(client.msg(&Value::string(keys::BATCH_QUERY)).unwrap(), Value::Bool(true));
}

#[test]
fn client_disconnect_forces_batch_back_on() {
    let daemon = Daemon::start();

    let mut setter = daemon.client();
    setter.msg(&batch_control(false)).unwrap();
    assert_eq!(setter.msg(&Value::string(keys::BATCH_QUERY)).unwrap(), Value::Bool(false));

    // The client that disabled batch crashes.
    drop(setter);

    let restored = wait_for(SPEC_WAIT_MAX_MS, || {
        let mut probe = daemon.client();
        probe
            .msg(&Value::string(keys::BATCH_QUERY))
            .map(|resp| resp == Value::Bool(true))
            .unwrap_or(false)
    });
    assert!(restored, "any connection close must re-enable batch");
}
