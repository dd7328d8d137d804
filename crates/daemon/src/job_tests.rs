// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job policy tests: defaults, exit classification, transition decisions,
//! throttle bookkeeping.

use super::*;
use std::time::Duration;
use warden_wire::{keys, Value};

fn descriptor(label: &str) -> Value {
    let mut d = Value::dict();
    d.insert(keys::LABEL, Value::string(label));
    d.insert(keys::PROGRAM_ARGUMENTS, Value::Array(vec![Value::string("/bin/true")]));
    d
}

fn keep_alive(label: &str) -> Value {
    let mut d = descriptor(label);
    d.insert(keys::ON_DEMAND, Value::Bool(false));
    d
}

#[test]
fn new_fills_policy_defaults() {
    let job = Job::new(descriptor("x"));
    assert!(job.on_demand());
    assert!(job.service_ipc());
    assert_eq!(job.label(), "x");
}

#[test]
fn explicit_flags_survive_defaulting() {
    let mut d = descriptor("x");
    d.insert(keys::ON_DEMAND, Value::Bool(false));
    d.insert(keys::SERVICE_IPC, Value::Bool(false));
    let job = Job::new(d);
    assert!(!job.on_demand());
    assert!(!job.service_ipc());
}

#[test]
fn argv0_prefers_program_override() {
    let mut d = descriptor("x");
    assert_eq!(Job::new(d.clone()).argv0(), "/bin/true");
    d.insert(keys::PROGRAM, Value::string("/sbin/actual"));
    assert_eq!(Job::new(d).argv0(), "/sbin/actual");
}

#[test]
fn exit_classification() {
    let pid = Pid::from_raw(100);
    assert!(!bad_exit(&WaitStatus::Exited(pid, 0)));
    assert!(bad_exit(&WaitStatus::Exited(pid, 3)));
    assert!(!bad_exit(&WaitStatus::Signaled(pid, Signal::SIGTERM, false)));
    assert!(!bad_exit(&WaitStatus::Signaled(pid, Signal::SIGKILL, false)));
    assert!(bad_exit(&WaitStatus::Signaled(pid, Signal::SIGSEGV, true)));
    assert!(!bad_exit(&WaitStatus::Stopped(pid, Signal::SIGSTOP)));
}

#[test]
fn reap_tracks_the_failure_streak() {
    let mut job = Job::new(descriptor("x"));
    let pid = Pid::from_raw(100);
    job.pid = Some(pid);
    job.checked_in = true;

    job.reap(&WaitStatus::Exited(pid, 1));
    assert_eq!(job.failed_exits, 1);
    assert_eq!(job.pid, None);
    assert!(!job.checked_in);

    job.reap(&WaitStatus::Exited(pid, 1));
    assert_eq!(job.failed_exits, 2);

    // A clean exit wipes the streak.
    job.reap(&WaitStatus::Exited(pid, 0));
    assert_eq!(job.failed_exits, 0);
}

#[test]
fn contract_breach_requires_service_ipc() {
    let mut job = Job::new(descriptor("x"));
    assert!(job.contract_breached());
    job.checked_in = true;
    assert!(!job.contract_breached());

    let mut d = descriptor("y");
    d.insert(keys::SERVICE_IPC, Value::Bool(false));
    assert!(!Job::new(d).contract_breached());
}

#[test]
fn post_exit_action_policy() {
    let mut job = Job::new(keep_alive("x"));
    assert_eq!(post_exit_action(&job, true), ExitAction::Respawn);

    job.failed_exits = FAILED_EXITS_THRESHOLD + 1;
    assert_eq!(post_exit_action(&job, true), ExitAction::Remove);

    let job = Job::new(descriptor("y"));
    assert_eq!(post_exit_action(&job, true), ExitAction::Rewatch);

    let helper = Job::new(keep_alive(keys::HELPER_LABEL));
    assert_eq!(post_exit_action(&helper, false), ExitAction::StayIdle);
    assert_eq!(post_exit_action(&helper, true), ExitAction::Respawn);
}

#[test]
fn first_start_is_never_throttled() {
    let mut job = Job::new(keep_alive("x"));
    job.failed_exits = 5;
    assert_eq!(job.begin_start(Duration::from_secs(10)), None);
    assert_eq!(job.failed_exits, 5, "first start must not clear the streak");
}

#[test]
fn long_run_clears_the_streak() {
    let mut job = Job::new(keep_alive("x"));
    job.failed_exits = 5;
    let _ = job.begin_start(Duration::from_secs(10));

    // With a zero minimum the previous run always counts as long enough.
    assert_eq!(job.begin_start(Duration::ZERO), None);
    assert_eq!(job.failed_exits, 0);
}

#[test]
fn fast_failing_respawn_is_throttled_in_the_child() {
    let mut job = Job::new(keep_alive("x"));
    let min = Duration::from_secs(60);

    let _ = job.begin_start(min);
    job.failed_exits = 1;
    let throttle = job.begin_start(min);

    let remainder = throttle.expect("second start within the window must throttle");
    assert!(remainder <= min);
    assert!(remainder > min - Duration::from_secs(5));
}

#[test]
fn on_demand_jobs_are_not_throttled() {
    let mut job = Job::new(descriptor("x"));
    let min = Duration::from_secs(60);

    let _ = job.begin_start(min);
    job.failed_exits = 1;
    assert_eq!(job.begin_start(min), None);
}

#[test]
fn demand_ports_are_separate_from_activation_descriptors() {
    let mut d = descriptor("x");
    d.insert(keys::SOCKETS, Value::Array(vec![Value::Fd(30)]));
    d.insert(keys::DEMAND_PORTS, Value::Array(vec![Value::Fd(31), Value::Fd(32)]));
    let job = Job::new(d);

    assert_eq!(job.demand_port_fds(), vec![31, 32]);

    let mut watchable = Vec::new();
    collect_watchable(job.descriptor(), &mut watchable);
    assert_eq!(watchable, vec![30]);
}
