// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle specs: load validation, keep-alive restart, on-demand
//! activation, check-in contract breach.

use super::prelude::*;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use warden_wire::{keys, Value};

#[test]
fn submit_validation_errors() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    let mut unlabeled = Value::dict();
    unlabeled
        .insert(keys::PROGRAM_ARGUMENTS, Value::Array(vec![Value::string("/bin/true")]));
    let resp = client.msg(&submit(unlabeled)).unwrap();
    assert_eq!(resp.as_str(), Some(keys::RESPONSE_LABEL_MISSING));

    let mut no_argv = Value::dict();
    no_argv.insert(keys::LABEL, Value::string("x"));
    let resp = client.msg(&submit(no_argv)).unwrap();
    assert_eq!(resp.as_str(), Some(keys::RESPONSE_PROGRAM_ARGUMENTS_MISSING));

    let mut job = shell_job("x", "sleep 60");
    job.insert(keys::SERVICE_IPC, Value::Bool(false));
    assert_eq!(client.msg(&submit(job.clone())).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_JOB_EXISTS));
}

#[test]
fn snapshot_fills_defaults_and_strips_descriptors() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    let (held, passed) = UnixStream::pair().unwrap();
    let mut job = shell_job("svc", "exit 0");
    job.insert(keys::SOCKETS, Value::Array(vec![Value::Fd(passed.as_raw_fd())]));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    let snapshot = client.msg(&get_job("svc")).unwrap();
    assert!(snapshot.get_bool(keys::ON_DEMAND), "on-demand defaults true");
    assert!(snapshot.get_bool(keys::SERVICE_IPC), "service IPC defaults true");
    let sockets = snapshot.get(keys::SOCKETS).unwrap().as_array().unwrap();
    assert_eq!(sockets[0].as_fd(), Some(-1), "snapshot descriptors are revoked");

    drop(held);
}

#[test]
fn unknown_labels_and_commands() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    let resp = client.msg(&get_job("ghost")).unwrap();
    assert_eq!(resp.as_str(), Some(keys::RESPONSE_JOB_NOT_FOUND));

    let resp = client.msg(&Value::string("MakeCoffee")).unwrap();
    assert_eq!(resp.as_str(), Some(keys::RESPONSE_UNKNOWN_COMMAND));
}

#[test]
fn keep_alive_job_restarts_after_clean_exit() {
    let daemon = Daemon::start();
    let mut client = daemon.client();
    let log = daemon.scratch().join("runs.log");

    let mut job = shell_job("ticker", &format!("echo run >> {}; sleep 0.2", log.display()));
    job.insert(keys::ON_DEMAND, Value::Bool(false));
    job.insert(keys::SERVICE_IPC, Value::Bool(false));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    let restarted = wait_for(SPEC_WAIT_MAX_MS, || {
        std::fs::read_to_string(&log).map(|s| s.lines().count() >= 2).unwrap_or(false)
    });
    assert!(restarted, "clean-exit keep-alive job must restart");

    let mut remove = Value::dict();
    remove.insert(keys::REMOVE_JOB, Value::string("ticker"));
    assert_eq!(client.msg(&remove).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));
}

#[test]
fn on_demand_job_spawns_on_descriptor_readability() {
    let daemon = Daemon::start();
    let mut client = daemon.client();
    let log = daemon.scratch().join("activations.log");

    let (trigger, watched) = UnixStream::pair().unwrap();
    let mut job = shell_job("listener", &format!("echo activated >> {}", log.display()));
    job.insert(keys::SERVICE_IPC, Value::Bool(false));
    job.insert(keys::SOCKETS, Value::Array(vec![Value::Fd(watched.as_raw_fd())]));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    // Idle until the descriptor shows activity.
    std::thread::sleep(std::time::Duration::from_millis(400));
    assert!(!log.exists(), "on-demand job must stay idle without activity");

    use std::io::Write;
    (&trigger).write_all(b"wake").unwrap();

    let spawned = wait_for(SPEC_WAIT_MAX_MS, || log.exists());
    assert!(spawned, "readability must activate the job");

    let mut remove = Value::dict();
    remove.insert(keys::REMOVE_JOB, Value::string("listener"));
    client.msg(&remove).unwrap();
}

#[test]
fn on_demand_child_checks_in_and_receives_its_descriptor() {
    let daemon = Daemon::start();
    let mut client = daemon.client();
    let out = daemon.scratch().join("checkin.out");

    // On-demand and service IPC both stay at their defaults: true.
    let (trigger, watched) = UnixStream::pair().unwrap();
    let mut job = Value::dict();
    job.insert(keys::LABEL, Value::string("y"));
    job.insert(
        keys::PROGRAM_ARGUMENTS,
        Value::Array(vec![
            Value::string(env!("CARGO_BIN_EXE_checkin-probe")),
            Value::string(out.display().to_string()),
        ]),
    );
    job.insert(keys::SOCKETS, Value::Array(vec![Value::Fd(watched.as_raw_fd())]));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    use std::io::Write;
    (&trigger).write_all(b"ping").unwrap();

    let checked_in = wait_for(SPEC_WAIT_MAX_MS, || out.exists());
    assert!(checked_in, "activation must spawn the probe and its check-in must answer");

    // The check-in response carried the job descriptor, activation socket
    // included: the probe echoes the label and the bytes it drained.
    let record = std::fs::read_to_string(&out).unwrap();
    assert_eq!(record, "y:ping");

    // An honored contract leaves the job loaded after its child exits.
    std::thread::sleep(std::time::Duration::from_millis(500));
    let snapshot = client.msg(&get_job("y")).unwrap();
    assert_eq!(snapshot.get_str(keys::LABEL), Some("y"), "checked-in job must not be retired");
}

#[test]
fn service_ipc_job_that_never_checks_in_is_removed() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    // Service IPC defaults true; the child exits without checking in.
    let mut job = shell_job("breach", "exit 0");
    job.insert(keys::ON_DEMAND, Value::Bool(false));
    assert_eq!(client.msg(&submit(job)).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    let removed = wait_for(SPEC_WAIT_MAX_MS, || {
        let mut probe = daemon.client();
        probe.msg(&get_job("breach")).map(|r| r.as_str() == Some(keys::RESPONSE_JOB_NOT_FOUND))
            .unwrap_or(false)
    });
    assert!(removed, "a broken check-in contract retires the job without restart");
}

#[test]
fn user_environment_roundtrip() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    let mut mapping = Value::dict();
    mapping.insert("WARDEN_SPEC_ENV", Value::string("live"));
    let mut set = Value::dict();
    set.insert(keys::SET_USER_ENVIRONMENT, mapping);
    assert_eq!(client.msg(&set).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    let env = client.msg(&Value::string(keys::GET_USER_ENVIRONMENT)).unwrap();
    assert_eq!(env.get_str("WARDEN_SPEC_ENV"), Some("live"));

    let mut unset = Value::dict();
    unset.insert(keys::UNSET_USER_ENVIRONMENT, Value::string("WARDEN_SPEC_ENV"));
    assert_eq!(client.msg(&unset).unwrap().as_str(), Some(keys::RESPONSE_SUCCESS));

    let env = client.msg(&Value::string(keys::GET_USER_ENVIRONMENT)).unwrap();
    assert_eq!(env.get_str("WARDEN_SPEC_ENV"), None);
}
