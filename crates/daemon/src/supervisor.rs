// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: job table, connection registry, and command dispatch.
//!
//! All of this state is owned by the main task and mutated only between
//! multiplexer wake-ups, so none of it is locked. Connection tasks, watchers,
//! and the demand-port bridge reach it exclusively through the event channel.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::io::AsRawFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_wire::{keys, Request, StdioTarget, Value};

use crate::bridge::DemandBridge;
use crate::event::{ConnId, Event};
use crate::job::{post_exit_action, DemandPort, ExitAction, Job};
use crate::rlimits::CachedLimits;
use crate::{env, init, listener, spawn};

struct ConnEntry {
    /// Set when this connection is a job's trusted channel.
    job: Option<String>,
    token: CancellationToken,
}

/// Process-wide supervisor state.
pub struct Supervisor {
    jobs: Vec<Job>,
    conns: HashMap<ConnId, ConnEntry>,
    next_conn: u64,
    batch_enabled: bool,
    pending_stdout: Option<PathBuf>,
    pending_stderr: Option<PathBuf>,
    cached_limits: Option<CachedLimits>,
    bridge: Option<DemandBridge>,
    events: mpsc::Sender<Event>,
    readcfg_pid: Option<Pid>,
    shutdown_requested: bool,
    /// Init that has finished shutting down keeps reaping but serves nothing.
    pub quiesced: bool,
    is_init: bool,
}

impl Supervisor {
    pub fn new(events: mpsc::Sender<Event>, is_init: bool) -> Self {
        Self {
            jobs: Vec::new(),
            conns: HashMap::new(),
            next_conn: 0,
            batch_enabled: true,
            pending_stdout: None,
            pending_stderr: None,
            cached_limits: None,
            bridge: None,
            events,
            readcfg_pid: None,
            shutdown_requested: false,
            quiesced: false,
            is_init,
        }
    }

    /// Empty job table: eligible for idle exit when not init.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn take_shutdown_request(&mut self) -> bool {
        std::mem::take(&mut self.shutdown_requested)
    }

    /// Process one multiplexed event.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Request { conn, msg, reply } => {
                let response = self.dispatch(conn, msg);
                let _ = reply.send(response);
            }
            Event::ConnClosed { conn } => self.conn_closed(conn),
            Event::Activation { label } => self.activated(&label),
            Event::PortActivation { slot } => self.port_activated(slot),
        }
    }

    /// Register a connection and start its task.
    pub fn register_conn(&mut self, stream: tokio::net::UnixStream, job: Option<String>) -> ConnId {
        let conn = ConnId(self.next_conn);
        self.next_conn += 1;

        let token = CancellationToken::new();
        listener::run_conn(stream, conn, self.events.clone(), token.clone());
        self.conns.insert(conn, ConnEntry { job, token });
        conn
    }

    // ---- command dispatch -------------------------------------------------

    fn dispatch(&mut self, conn: ConnId, msg: Value) -> Value {
        match Request::parse(msg) {
            Request::StartJob(label) => match self.find(&label) {
                Some(index) => {
                    self.start_job(index);
                    success()
                }
                None => Value::string(keys::RESPONSE_JOB_NOT_FOUND),
            },

            Request::StopJob(label) => match self.find(&label) {
                Some(index) => {
                    self.stop_job(index);
                    success()
                }
                None => Value::string(keys::RESPONSE_JOB_NOT_FOUND),
            },

            Request::RemoveJob(label) => {
                if self.remove_job(&label) {
                    self.notify_helper();
                    success()
                } else {
                    Value::string(keys::RESPONSE_JOB_NOT_FOUND)
                }
            }

            Request::SubmitJob(payload) => match payload {
                Value::Array(descriptors) => Value::Array(
                    descriptors.into_iter().map(|d| self.load_job(d)).collect(),
                ),
                single => self.load_job(single),
            },

            Request::SetUserEnvironment(mut mapping) => {
                if let Some(map) = mapping.as_dict() {
                    for (key, value) in map {
                        if let Some(v) = value.as_str() {
                            std::env::set_var(key, v);
                        }
                    }
                }
                mapping.close_fds();
                success()
            }

            Request::UnsetUserEnvironment(name) => {
                std::env::remove_var(name);
                success()
            }

            Request::GetUserEnvironment => {
                let mut snapshot = Value::dict();
                for (key, value) in std::env::vars() {
                    snapshot.insert(key, Value::String(value));
                }
                snapshot
            }

            Request::CheckIn => self.check_in(conn),

            Request::ReloadTtys => {
                init::reconcile_ttys();
                success()
            }

            Request::Shutdown => {
                self.shutdown_requested = true;
                success()
            }

            Request::GetJobs => {
                let mut all = Value::dict();
                for job in &self.jobs {
                    let mut snapshot = job.descriptor().clone();
                    snapshot.revoke_fds();
                    all.insert(job.label(), snapshot);
                }
                all
            }

            Request::GetJob(label) => match self.find(&label) {
                Some(index) => {
                    let mut snapshot = self.jobs[index].descriptor().clone();
                    snapshot.revoke_fds();
                    snapshot
                }
                None => Value::string(keys::RESPONSE_JOB_NOT_FOUND),
            },

            Request::GetJobWithHandles(label) => match self.find(&label) {
                Some(index) => self.jobs[index].descriptor().clone(),
                None => Value::string(keys::RESPONSE_JOB_NOT_FOUND),
            },

            Request::SetUmask(mask) => {
                let previous = nix::sys::stat::umask(Mode::from_bits_truncate(
                    mask as nix::libc::mode_t,
                ));
                Value::Integer(previous.bits() as i64)
            }

            Request::GetUmask => {
                let current = nix::sys::stat::umask(Mode::empty());
                nix::sys::stat::umask(current);
                Value::Integer(current.bits() as i64)
            }

            Request::SetStandardOut(target) => self.set_stdio(target, libc::STDOUT_FILENO),
            Request::SetStandardError(target) => self.set_stdio(target, libc::STDERR_FILENO),

            Request::BatchControl(enable) => {
                self.batch_enable(enable);
                success()
            }

            Request::BatchQuery => Value::Bool(self.batch_enabled),

            Request::GetResourceLimits => Value::Opaque(self.limits().to_opaque()),

            Request::SetResourceLimits(raw) => {
                let limits = self.limits();
                limits.adjust(&raw);
                Value::Opaque(limits.to_opaque())
            }

            Request::Unknown => Value::string(keys::RESPONSE_UNKNOWN_COMMAND),
        }
    }

    /// Resource-limit snapshot, taken lazily on first use.
    fn limits(&mut self) -> &mut CachedLimits {
        self.cached_limits.get_or_insert_with(CachedLimits::snapshot)
    }

    fn check_in(&mut self, conn: ConnId) -> Value {
        let label = self.conns.get(&conn).and_then(|entry| entry.job.clone());
        let Some(index) = label.and_then(|label| self.find(&label)) else {
            return Value::string(keys::RESPONSE_NOT_RUNNING_FROM_WARDEN);
        };

        self.jobs[index].checked_in = true;
        self.jobs[index].descriptor().clone()
    }

    fn set_stdio(&mut self, target: StdioTarget, dest: i32) -> Value {
        match target {
            StdioTarget::Path(path) => {
                let slot = if dest == libc::STDOUT_FILENO {
                    &mut self.pending_stdout
                } else {
                    &mut self.pending_stderr
                };
                *slot = Some(PathBuf::from(path));
            }
            StdioTarget::Fd(fd) => {
                if let Err(e) = nix::unistd::dup2(fd, dest) {
                    warn!("dup2 onto descriptor {dest}: {e}");
                }
                let _ = nix::unistd::close(fd);
            }
        }
        success()
    }

    /// Deferred stdio redirections are applied at the top of the next loop
    /// turn; a path that cannot be opened stays pending.
    pub fn apply_pending_stdio(&mut self) {
        for (pending, dest) in [
            (&mut self.pending_stdout, libc::STDOUT_FILENO),
            (&mut self.pending_stderr, libc::STDERR_FILENO),
        ] {
            let Some(path) = pending.as_ref() else { continue };
            let opened = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path);
            if let Ok(file) = opened {
                let _ = nix::unistd::dup2(file.as_raw_fd(), dest);
                *pending = None;
            }
        }
    }

    // ---- job table --------------------------------------------------------

    fn find(&self, label: &str) -> Option<usize> {
        self.jobs.iter().position(|job| job.label() == label)
    }

    /// Validate and install a submitted descriptor.
    fn load_job(&mut self, mut payload: Value) -> Value {
        let Some(label) = payload.get_str(keys::LABEL).map(str::to_string) else {
            payload.close_fds();
            return Value::string(keys::RESPONSE_LABEL_MISSING);
        };
        if self.find(&label).is_some() {
            payload.close_fds();
            return Value::string(keys::RESPONSE_JOB_EXISTS);
        }
        if payload.get(keys::PROGRAM_ARGUMENTS).is_none() {
            payload.close_fds();
            return Value::string(keys::RESPONSE_PROGRAM_ARGUMENTS_MISSING);
        }

        let mut job = Job::new(payload);

        let port_fds = job.demand_port_fds();
        if !port_fds.is_empty() {
            if let Some(bridge) = self.bridge() {
                for fd in port_fds {
                    let slot = bridge.register(&label, fd);
                    job.ports.push(DemandPort { slot, fd, armed: true });
                }
            }
        }

        let on_demand = job.on_demand();
        self.jobs.push(job);
        let index = self.jobs.len() - 1;

        info!(label = %label, on_demand, "job loaded");
        if on_demand {
            self.watch_job(index);
        } else {
            self.start_job(index);
        }
        self.notify_helper();

        success()
    }

    /// Loaded-Idle: watch sockets on the main loop and arm demand ports.
    fn watch_job(&mut self, index: usize) {
        let events = self.events.clone();
        let job = &mut self.jobs[index];
        job.watch_activation(&events);

        let rearm: Vec<(usize, i32)> = job
            .ports
            .iter_mut()
            .filter(|port| !port.armed)
            .map(|port| {
                port.armed = true;
                (port.slot, port.fd)
            })
            .collect();
        if let Some(bridge) = self.bridge.as_mut() {
            for (slot, fd) in rearm {
                bridge.arm(slot, fd);
            }
        }
    }

    /// Spawn the job's child. Starting an already-running job is a no-op.
    fn start_job(&mut self, index: usize) {
        if self.jobs[index].pid.is_some() {
            return;
        }

        let throttle = self.jobs[index].begin_start(env::min_run_time());
        let outcome = spawn::spawn_job(self.jobs[index].descriptor(), throttle);
        let label = self.jobs[index].label().to_string();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("failed to start {label}: {e}");
                return;
            }
        };

        debug!(label = %label, pid = %outcome.pid, "job started");
        self.jobs[index].pid = Some(outcome.pid);

        if let Some(trusted) = outcome.trusted {
            match listener::adopt_stream(trusted) {
                Ok(stream) => {
                    let conn = self.register_conn(stream, Some(label.clone()));
                    self.jobs[index].conn = Some(conn);
                }
                Err(e) => warn!("failed to open trusted channel for {label}: {e}"),
            }
        }

        // While the child runs, activation interest is withdrawn.
        if self.jobs[index].on_demand() {
            self.jobs[index].unwatch();
            let disarm: Vec<i32> = self.jobs[index]
                .ports
                .iter_mut()
                .filter(|port| port.armed)
                .map(|port| {
                    port.armed = false;
                    port.fd
                })
                .collect();
            if let Some(bridge) = self.bridge.as_mut() {
                for fd in disarm {
                    bridge.disarm(fd);
                }
            }
        }
    }

    fn stop_job(&mut self, index: usize) {
        if let Some(pid) = self.jobs[index].pid {
            if let Err(e) = kill(pid, Signal::SIGTERM) {
                debug!("stop {}: {e}", self.jobs[index].label());
            }
        }
    }

    /// Retire a job: signal its child, free its descriptors and bridge slots.
    /// The exit sweep reaps whatever the signal kills.
    fn remove_job(&mut self, label: &str) -> bool {
        let Some(index) = self.find(label) else {
            return false;
        };
        let job = self.jobs.remove(index);

        if let Some(pid) = job.pid {
            let _ = kill(pid, Signal::SIGTERM);
        }
        if let Some(conn) = job.conn {
            if let Some(entry) = self.conns.get_mut(&conn) {
                entry.job = None;
            }
        }
        if let Some(bridge) = self.bridge.as_mut() {
            for port in &job.ports {
                bridge.release(port.slot, port.fd);
            }
        }

        info!(label = %label, "job removed");
        job.destroy();
        true
    }

    fn remove_all_jobs(&mut self) {
        while let Some(label) = self.jobs.first().map(|job| job.label().to_string()) {
            self.remove_job(&label);
        }
    }

    // ---- activation -------------------------------------------------------

    fn activated(&mut self, label: &str) {
        if let Some(index) = self.find(label) {
            if self.jobs[index].pid.is_none() {
                debug!(label, "activation descriptor readable");
                self.start_job(index);
            }
        }
    }

    fn port_activated(&mut self, slot: usize) {
        let Some(label) =
            self.bridge.as_ref().and_then(|b| b.label_for(slot)).map(str::to_string)
        else {
            debug!(slot, "activation for unassigned port slot");
            return;
        };
        let Some(index) = self.find(&label) else {
            return;
        };

        // The bridge already dropped the port from its watched set.
        for port in &mut self.jobs[index].ports {
            if port.slot == slot {
                port.armed = false;
            }
        }
        if self.jobs[index].pid.is_none() {
            self.start_job(index);
        }
    }

    fn bridge(&mut self) -> Option<&mut DemandBridge> {
        if self.bridge.is_none() {
            match DemandBridge::start(self.events.clone()) {
                Ok(bridge) => self.bridge = Some(bridge),
                Err(e) => {
                    warn!("failed to start demand-port bridge: {e}");
                    return None;
                }
            }
        }
        self.bridge.as_mut()
    }

    // ---- reaping ----------------------------------------------------------

    /// Collect every exited child and route each status to its owner.
    ///
    /// One WNOHANG sweep serves both modes: as init it also reaps adopted
    /// children nothing here spawned.
    pub fn reap_children(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => match status.pid() {
                    Some(pid) => self.child_exited(pid, status),
                    None => break,
                },
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    debug!("waitpid: {e}");
                    break;
                }
            }
        }
    }

    fn child_exited(&mut self, pid: Pid, status: WaitStatus) {
        if self.readcfg_pid == Some(pid) {
            self.readcfg_pid = None;
            match status {
                WaitStatus::Exited(_, 0) => {}
                WaitStatus::Exited(_, code) => {
                    warn!("configuration reader exited with status: {code}");
                }
                other => warn!("configuration reader exited abnormally: {other:?}"),
            }
            return;
        }

        let Some(index) = self.jobs.iter().position(|job| job.pid == Some(pid)) else {
            debug!(%pid, "reaped adopted child");
            return;
        };

        if self.jobs[index].contract_breached() {
            let label = self.jobs[index].label().to_string();
            warn!("{} failed to check in, removing job", self.jobs[index].argv0());
            self.remove_job(&label);
            return;
        }

        self.jobs[index].reap(&status);

        match post_exit_action(&self.jobs[index], self.batch_enabled) {
            ExitAction::Remove => {
                let label = self.jobs[index].label().to_string();
                warn!("too many failures in a row with {}, removing job", self.jobs[index].argv0());
                self.remove_job(&label);
            }
            ExitAction::Rewatch => self.watch_job(index),
            ExitAction::StayIdle => {}
            ExitAction::Respawn => self.start_job(index),
        }
    }

    // ---- batch / helper ---------------------------------------------------

    /// Batch latch: disabling pauses the helper daemon, enabling resumes it.
    fn batch_enable(&mut self, enable: bool) {
        self.batch_enabled = enable;
        let signal = if enable { Signal::SIGCONT } else { Signal::SIGSTOP };
        if let Some(pid) = self.helper_pid() {
            if let Err(e) = kill(pid, signal) {
                debug!("batch signal to helper: {e}");
            }
        }
    }

    fn helper_pid(&self) -> Option<Pid> {
        self.jobs.iter().find(|job| job.is_helper()).and_then(|job| job.pid)
    }

    /// The helper hears about every load and remove.
    fn notify_helper(&self) {
        if let Some(pid) = self.helper_pid() {
            let _ = kill(pid, Signal::SIGHUP);
        }
    }

    fn conn_closed(&mut self, conn: ConnId) {
        // A crashed client must not leave batch disabled.
        self.batch_enable(true);

        let Some(entry) = self.conns.remove(&conn) else {
            return;
        };
        if let Some(label) = entry.job {
            if let Some(index) = self.find(&label) {
                if self.jobs[index].conn == Some(conn) {
                    self.jobs[index].conn = None;
                }
            }
        }
    }

    // ---- configuration / shutdown ----------------------------------------

    /// Spawn the companion control binary with its stdin on the
    /// configuration file and its trusted descriptor on a fresh connection.
    pub fn reload_config(&mut self) {
        let Some(conf) = env::conf_path(self.is_init) else {
            return;
        };
        if !conf.exists() {
            return;
        }

        let pair = match socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!("socketpair for configuration reader: {e}");
                return;
            }
        };
        let (ours, theirs) = pair;
        if let Err(e) = fcntl(ours.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            warn!("failed to set close-on-exec on configuration channel: {e}");
        }

        let file = match File::open(&conf) {
            Ok(file) => file,
            Err(e) => {
                warn!("open {}: {e}", conf.display());
                return;
            }
        };

        let spawned = Command::new(env::ctl_path())
            .stdin(Stdio::from(file))
            .env(keys::TRUSTED_FD_ENV, theirs.as_raw_fd().to_string())
            .spawn();
        drop(theirs);

        match spawned {
            Ok(child) => {
                info!("reading configuration from {}", conf.display());
                self.readcfg_pid = Some(Pid::from_raw(child.id() as i32));
                match listener::adopt_stream(ours) {
                    Ok(stream) => {
                        self.register_conn(stream, None);
                    }
                    Err(e) => warn!("failed to open configuration channel: {e}"),
                }
            }
            Err(e) => {
                warn!("failed to spawn {}: {e}", env::ctl_path().display());
            }
        }
    }

    /// Orderly shutdown. Returns true when the process should exit; init
    /// instead goes quiescent and keeps reaping.
    pub fn shutdown(&mut self) -> bool {
        info!("shutting down");
        self.remove_all_jobs();
        for (_, entry) in self.conns.drain() {
            entry.token.cancel();
        }

        if self.is_init {
            self.quiesced = true;
            init::broadcast(Signal::SIGTERM);
            false
        } else {
            true
        }
    }
}

fn success() -> Value {
    Value::string(keys::RESPONSE_SUCCESS)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
