// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spec harness: start a supervisor under a scratch prefix and talk to it.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;
use warden_wire::{keys, Client, Value};

/// Generous ceiling for anything the supervisor does asynchronously.
pub const SPEC_WAIT_MAX_MS: u64 = 10_000;

/// Poll `check` until it holds or the window elapses.
pub fn wait_for(max_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_ms);
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// A running supervisor instance rooted in a scratch directory.
pub struct Daemon {
    child: Child,
    temp: TempDir,
    socket: PathBuf,
}

impl Daemon {
    pub fn start() -> Self {
        Self::start_with(&[])
    }

    /// Start `wardend` with extra environment overrides.
    pub fn start_with(extra_env: &[(&str, &str)]) -> Self {
        let temp = tempfile::tempdir().expect("scratch dir");
        let prefix = temp.path().join("prefix");
        let socket = prefix.join(nix::unistd::getuid().to_string()).join("sock");

        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("wardend"));
        cmd.env("WARDEN_SOCK_PREFIX", &prefix)
            // No configuration reader in specs.
            .env("WARDEN_CONF", temp.path().join("absent.conf"))
            // Keep idle instances alive for the duration of a spec.
            .env("WARDEN_IDLE_TIMEOUT_MS", "60000");
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().expect("spawn wardend");
        let daemon = Self { child, temp, socket };

        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || daemon.socket.exists()),
            "supervisor never bound its control socket"
        );
        daemon
    }

    pub fn scratch(&self) -> &Path {
        self.temp.path()
    }

    pub fn client(&self) -> Client {
        Client::connect_path(&self.socket).expect("connect to supervisor")
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    pub fn signal(&self, signal: Signal) {
        let _ = kill(self.pid(), signal);
    }

    /// Block until the process exits, returning its exit code.
    pub fn wait_exit(&mut self, max_ms: u64) -> Option<i32> {
        let deadline = Instant::now() + Duration::from_millis(max_ms);
        loop {
            if let Ok(Some(status)) = self.child.try_wait() {
                return status.code();
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        let _ = kill(self.pid(), Signal::SIGTERM);
        if self.wait_exit(2_000).is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Job descriptor builder for shell one-liners.
pub fn shell_job(label: &str, script: &str) -> Value {
    let mut job = Value::dict();
    job.insert(keys::LABEL, Value::string(label));
    job.insert(
        keys::PROGRAM_ARGUMENTS,
        Value::Array(vec![Value::string("/bin/sh"), Value::string("-c"), Value::string(script)]),
    );
    job
}

/// Wrap a descriptor in a SubmitJob request.
pub fn submit(job: Value) -> Value {
    let mut msg = Value::dict();
    msg.insert(keys::SUBMIT_JOB, job);
    msg
}

/// Build a GetJob request.
pub fn get_job(label: &str) -> Value {
    let mut msg = Value::dict();
    msg.insert(keys::GET_JOB, Value::string(label));
    msg
}
