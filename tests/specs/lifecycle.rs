// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor lifecycle specs: idle exit, single instance, signal shutdown.

use super::prelude::*;
use nix::sys::signal::Signal;
use warden_wire::{keys, Value};

#[test]
fn idle_supervisor_exits_successfully_after_the_timeout() {
    let mut daemon = Daemon::start_with(&[("WARDEN_IDLE_TIMEOUT_MS", "400")]);

    let code = daemon.wait_exit(SPEC_WAIT_MAX_MS);
    assert_eq!(code, Some(0), "idle exit must report success");
}

#[test]
fn a_loaded_job_prevents_idle_exit() {
    let mut daemon = Daemon::start_with(&[("WARDEN_IDLE_TIMEOUT_MS", "800")]);

    let mut job = shell_job("hold", "sleep 60");
    job.insert(keys::SERVICE_IPC, Value::Bool(false));
    let resp = daemon.client().msg(&submit(job)).unwrap();
    assert_eq!(resp.as_str(), Some(keys::RESPONSE_SUCCESS));

    assert_eq!(daemon.wait_exit(2_000), None, "a populated table must not idle-exit");
}

#[test]
fn second_instance_yields_and_exits_zero() {
    let daemon = Daemon::start();

    let mut second = std::process::Command::new(assert_cmd::cargo::cargo_bin("wardend"));
    second
        .env("WARDEN_SOCK_PREFIX", daemon.scratch().join("prefix"))
        .env("WARDEN_CONF", daemon.scratch().join("absent.conf"));
    let output = second.output().expect("run second instance");

    assert!(output.status.success(), "a contested lock is a successful no-op");

    // The first instance still answers.
    let resp = daemon.client().msg(&Value::string(keys::BATCH_QUERY)).unwrap();
    assert_eq!(resp, Value::Bool(true));
}

#[test]
fn sigterm_shuts_down_and_removes_the_socket() {
    let mut daemon = Daemon::start();

    let mut job = shell_job("svc", "sleep 60");
    job.insert(keys::SERVICE_IPC, Value::Bool(false));
    daemon.client().msg(&submit(job)).unwrap();

    daemon.signal(Signal::SIGTERM);
    let code = daemon.wait_exit(SPEC_WAIT_MAX_MS);
    assert_eq!(code, Some(0));
}

#[test]
fn shutdown_command_stops_the_supervisor() {
    let mut daemon = Daemon::start();

    // The response may be lost in the shutdown race; the exit is the contract.
    let _ = daemon.client().msg(&Value::string(keys::SHUTDOWN));

    let code = daemon.wait_exit(SPEC_WAIT_MAX_MS);
    assert_eq!(code, Some(0));
}
