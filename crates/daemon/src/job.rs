// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records and lifecycle policy.
//!
//! A job is Loaded-Idle (on demand, activation descriptors watched), Running
//! (one live child), or retired by removal. Policy constants: a child that
//! ran at least the minimum run time clears the failure streak; a streak
//! above the threshold retires the job.

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use tokio::io::{unix::AsyncFd, Interest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use warden_wire::{keys, Value};

use crate::event::{ConnId, Event};

/// Consecutive bad exits after which a job is retired.
pub const FAILED_EXITS_THRESHOLD: u32 = 10;

/// A demand port registered with the bridge on the job's behalf.
pub struct DemandPort {
    pub slot: usize,
    pub fd: RawFd,
    pub armed: bool,
}

/// One declared job.
pub struct Job {
    descriptor: Value,
    label: String,
    pub pid: Option<Pid>,
    started_at: Option<Instant>,
    pub failed_exits: u32,
    pub conn: Option<ConnId>,
    pub checked_in: bool,
    watch: Option<CancellationToken>,
    pub ports: Vec<DemandPort>,
}

/// What to do with a job after its child has been reaped.
#[derive(Debug, PartialEq, Eq)]
pub enum ExitAction {
    /// Failure streak crossed the threshold; retire.
    Remove,
    /// On-demand: go back to watching activation descriptors.
    Rewatch,
    /// Helper with batch disabled stays idle until batch returns.
    StayIdle,
    /// Keep-alive job: start again.
    Respawn,
}

impl Job {
    /// Wrap a validated descriptor, filling in the defaulted policy flags.
    pub fn new(mut descriptor: Value) -> Self {
        if descriptor.get(keys::ON_DEMAND).is_none() {
            descriptor.insert(keys::ON_DEMAND, Value::Bool(true));
        }
        if descriptor.get(keys::SERVICE_IPC).is_none() {
            descriptor.insert(keys::SERVICE_IPC, Value::Bool(true));
        }
        let label = descriptor.get_str(keys::LABEL).unwrap_or_default().to_string();

        Self {
            descriptor,
            label,
            pid: None,
            started_at: None,
            failed_exits: 0,
            conn: None,
            checked_in: false,
            watch: None,
            ports: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    /// Program name used in log lines: the override, else argv[0].
    pub fn argv0(&self) -> &str {
        self.descriptor
            .get_str(keys::PROGRAM)
            .or_else(|| {
                self.descriptor
                    .get(keys::PROGRAM_ARGUMENTS)
                    .and_then(Value::as_array)
                    .and_then(|args| args.first())
                    .and_then(Value::as_str)
            })
            .unwrap_or("?")
    }

    pub fn on_demand(&self) -> bool {
        self.descriptor.get_bool(keys::ON_DEMAND)
    }

    pub fn service_ipc(&self) -> bool {
        self.descriptor.get_bool(keys::SERVICE_IPC)
    }

    pub fn is_helper(&self) -> bool {
        self.label == keys::HELPER_LABEL
    }

    /// The check-in contract stands broken iff service IPC was demanded and
    /// the child exited without ever claiming its trusted channel.
    pub fn contract_breached(&self) -> bool {
        self.service_ipc() && !self.checked_in
    }

    /// Bookkeeping at the moment of a start attempt.
    ///
    /// A previous run that lasted at least `min_run` clears the failure
    /// streak. Returns the throttle remainder the child must sleep when the
    /// job is respawning too fast after bad exits.
    pub fn begin_start(&mut self, min_run: Duration) -> Option<Duration> {
        let gap = self.started_at.map(|at| at.elapsed());
        self.started_at = Some(Instant::now());

        match gap {
            Some(gap) if gap >= min_run => {
                // A long run earns forgiveness for infrequent bugs.
                self.failed_exits = 0;
                None
            }
            Some(gap) if !self.on_demand() && self.failed_exits > 0 => Some(min_run - gap),
            _ => None,
        }
    }

    /// Collect the child's status into the failure streak and clear the
    /// per-run state.
    pub fn reap(&mut self, status: &WaitStatus) {
        if bad_exit(status) {
            match status {
                WaitStatus::Exited(pid, code) => {
                    warn!("{}[{pid}] exited with exit code {code}", self.argv0());
                }
                WaitStatus::Signaled(pid, sig, _) => {
                    warn!("{}[{pid}] exited abnormally: {sig}", self.argv0());
                }
                _ => {}
            }
            self.failed_exits += 1;
        } else {
            self.failed_exits = 0;
        }

        self.pid = None;
        self.conn = None;
        self.checked_in = false;
    }

    /// Begin watching every activation descriptor outside the demand-port
    /// set. Each watcher fires at most once; starting or removing the job
    /// cancels the rest.
    pub fn watch_activation(&mut self, events: &mpsc::Sender<Event>) {
        self.unwatch();

        let mut fds = Vec::new();
        collect_watchable(&self.descriptor, &mut fds);
        if fds.is_empty() {
            return;
        }

        let token = CancellationToken::new();
        for fd in fds {
            watch_fd(self.label.clone(), fd, events.clone(), token.clone());
        }
        self.watch = Some(token);
    }

    /// Stop watching activation descriptors (child starting, or removal).
    pub fn unwatch(&mut self) {
        if let Some(token) = self.watch.take() {
            token.cancel();
        }
    }

    /// Descriptor leaves under the demand-port key, to register with the
    /// bridge.
    pub fn demand_port_fds(&self) -> Vec<RawFd> {
        let mut fds = Vec::new();
        if let Some(ports) = self.descriptor.get(keys::DEMAND_PORTS) {
            ports.for_each_fd(&mut |fd| fds.push(fd));
        }
        fds
    }

    /// Tear down the record: stop watching and close every owned descriptor.
    pub fn destroy(mut self) {
        self.unwatch();
        self.descriptor.close_fds();
    }
}

/// Decide the job's next transition after [`Job::reap`].
pub fn post_exit_action(job: &Job, batch_enabled: bool) -> ExitAction {
    if job.failed_exits > FAILED_EXITS_THRESHOLD {
        ExitAction::Remove
    } else if job.on_demand() {
        ExitAction::Rewatch
    } else if job.is_helper() && !batch_enabled {
        ExitAction::StayIdle
    } else {
        ExitAction::Respawn
    }
}

/// A non-zero exit, or death by any signal other than the ones the
/// supervisor itself sends, counts against the job.
pub fn bad_exit(status: &WaitStatus) -> bool {
    match status {
        WaitStatus::Exited(_, code) => *code != 0,
        WaitStatus::Signaled(_, sig, _) => *sig != Signal::SIGTERM && *sig != Signal::SIGKILL,
        _ => false,
    }
}

/// Activation descriptors are every descriptor leaf of the job descriptor
/// except the demand-port set, which belongs to the bridge.
fn collect_watchable(value: &Value, fds: &mut Vec<RawFd>) {
    match value {
        Value::Dict(map) => {
            for (key, child) in map {
                if key == keys::DEMAND_PORTS {
                    continue;
                }
                collect_watchable(child, fds);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_watchable(child, fds);
            }
        }
        Value::Fd(fd) if *fd >= 0 => fds.push(*fd),
        _ => {}
    }
}

struct Watched(RawFd);

impl AsRawFd for Watched {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

fn watch_fd(label: String, fd: RawFd, events: mpsc::Sender<Event>, token: CancellationToken) {
    tokio::spawn(async move {
        let watched = match AsyncFd::with_interest(Watched(fd), Interest::READABLE) {
            Ok(watched) => watched,
            Err(e) => {
                debug!("cannot watch descriptor {fd} for {label}: {e}");
                return;
            }
        };

        tokio::select! {
            _ = token.cancelled() => {}
            ready = watched.readable() => {
                if ready.is_ok() {
                    let _ = events.send(Event::Activation { label }).await;
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
