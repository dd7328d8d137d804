// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process creation.
//!
//! Everything that must happen between fork and exec — limits, credentials,
//! chroot, stdio, session, throttle — runs in a `pre_exec` closure in the
//! child, in the order the lifecycle contract fixes. The supervisor itself
//! never sleeps: the respawn throttle is the child's sleep, not ours.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Pid, Uid};
use thiserror::Error;
use tracing::warn;

use warden_wire::{keys, Value};

use crate::rlimits::RESOURCES;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("job has no program arguments")]
    NoProgramArguments,

    #[error("socketpair: {0}")]
    SocketPair(nix::errno::Errno),

    #[error("spawn failed: {0}")]
    Io(#[from] io::Error),
}

/// A live child and, for service-IPC jobs, the supervisor side of its
/// trusted channel.
pub struct SpawnOutcome {
    pub pid: Pid,
    pub trusted: Option<OwnedFd>,
}

struct LimitSpec {
    resource: Resource,
    soft: Option<u64>,
    hard: Option<u64>,
}

/// Start the job's child process.
///
/// `throttle` is the remainder of the minimum-run-time window the child must
/// sit out before exec'ing (respawn-too-fast punishment).
pub fn spawn_job(descriptor: &Value, throttle: Option<Duration>) -> Result<SpawnOutcome, SpawnError> {
    let argv: Vec<String> = descriptor
        .get(keys::PROGRAM_ARGUMENTS)
        .and_then(Value::as_array)
        .map(|args| args.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if argv.is_empty() {
        return Err(SpawnError::NoProgramArguments);
    }

    let program = if descriptor.get(keys::INETD_COMPATIBILITY).is_some() {
        crate::env::INETD_PROXY_PATH.to_string()
    } else {
        descriptor.get_str(keys::PROGRAM).unwrap_or(&argv[0]).to_string()
    };

    // The child keeps its side across exec; ours is close-on-exec so other
    // children never inherit it.
    let pair = if descriptor.get_bool(keys::SERVICE_IPC) {
        let (ours, theirs) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())
                .map_err(SpawnError::SocketPair)?;
        if let Err(e) = fcntl(ours.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            warn!("failed to set close-on-exec on trusted channel: {e}");
        }
        Some((ours, theirs))
    } else {
        None
    };

    let mut cmd = Command::new(&program);
    cmd.args(&argv[1..]);
    cmd.arg0(&argv[0]);

    if let Some(env) = descriptor.get(keys::ENVIRONMENT_VARIABLES).and_then(Value::as_dict) {
        for (key, value) in env {
            if let Some(v) = value.as_str() {
                cmd.env(key, v);
            }
        }
    }
    if let Some((_, theirs)) = &pair {
        cmd.env(keys::TRUSTED_FD_ENV, theirs.as_raw_fd().to_string());
    }

    let setup = ChildSetup::from_descriptor(descriptor, throttle);
    let ours_raw = pair.as_ref().map(|(ours, _)| ours.as_raw_fd());

    // SAFETY: the closure only touches syscall wrappers, pre-resolved plain
    // data, and the supervisor-side descriptor number captured above.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(fd) = ours_raw {
                let _ = nix::unistd::close(fd);
            }
            setup.apply();
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    // The child carried its side across exec; ours is all that remains here.
    let trusted = pair.map(|(ours, theirs)| {
        drop(theirs);
        ours
    });

    Ok(SpawnOutcome { pid, trusted })
}

/// Pre-resolved child-side setup. Everything is plain data by the time the
/// fork happens; no lookups run between fork and exec.
struct ChildSetup {
    nice: i64,
    limits: Vec<LimitSpec>,
    initgroups: Option<(CString, Gid)>,
    low_priority_io: bool,
    chroot: Option<PathBuf>,
    gid: Option<Gid>,
    uid: Option<Uid>,
    workdir: Option<PathBuf>,
    umask: Option<u32>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
    throttle: Option<Duration>,
}

impl ChildSetup {
    fn from_descriptor(descriptor: &Value, throttle: Option<Duration>) -> Self {
        Self {
            nice: descriptor.get_integer(keys::NICE),
            limits: limit_specs(descriptor),
            initgroups: resolve_initgroups(descriptor),
            low_priority_io: descriptor.get_bool(keys::LOW_PRIORITY_IO),
            chroot: descriptor.get_str(keys::ROOT_DIRECTORY).map(PathBuf::from),
            gid: descriptor
                .get(keys::GID)
                .and_then(Value::as_integer)
                .map(|g| Gid::from_raw(g as libc::gid_t)),
            uid: descriptor
                .get(keys::UID)
                .and_then(Value::as_integer)
                .map(|u| Uid::from_raw(u as libc::uid_t)),
            workdir: descriptor.get_str(keys::WORKING_DIRECTORY).map(PathBuf::from),
            umask: descriptor.get(keys::UMASK).and_then(Value::as_integer).map(|m| m as u32),
            stdout_path: descriptor.get_str(keys::STANDARD_OUT_PATH).map(PathBuf::from),
            stderr_path: descriptor.get_str(keys::STANDARD_ERROR_PATH).map(PathBuf::from),
            throttle,
        }
    }

    /// Runs in the child, after fork, before exec. Each step is best-effort;
    /// the exec proceeds regardless, as the classic contract demands.
    fn apply(&self) {
        // SAFETY: direct syscall with constant arguments.
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, self.nice as libc::c_int);
        }

        for spec in &self.limits {
            if let Ok((mut soft, mut hard)) = getrlimit(spec.resource) {
                if let Some(h) = spec.hard {
                    hard = h;
                }
                if let Some(s) = spec.soft {
                    soft = s;
                }
                let _ = setrlimit(spec.resource, soft, hard);
            }
        }

        if let Some((user, gid)) = &self.initgroups {
            let _ = nix::unistd::initgroups(user, *gid);
        }

        if self.low_priority_io {
            idle_io_priority();
        }

        if let Some(root) = &self.chroot {
            let _ = nix::unistd::chroot(root);
        }
        if let Some(gid) = self.gid {
            let _ = nix::unistd::setgid(gid);
        }
        if let Some(uid) = self.uid {
            let _ = nix::unistd::setuid(uid);
        }
        if let Some(dir) = &self.workdir {
            let _ = nix::unistd::chdir(dir);
        }
        if let Some(mask) = self.umask {
            nix::sys::stat::umask(Mode::from_bits_truncate(mask as nix::libc::mode_t));
        }

        if let Some(path) = &self.stdout_path {
            redirect(path, libc::STDOUT_FILENO);
        }
        if let Some(path) = &self.stderr_path {
            redirect(path, libc::STDERR_FILENO);
        }

        let _ = nix::unistd::setsid();

        if let Some(remainder) = self.throttle {
            std::thread::sleep(remainder);
        }
    }
}

fn redirect(path: &PathBuf, target: RawFd) {
    let opened = OpenOptions::new().append(true).create(true).mode(0o666).open(path);
    if let Ok(file) = opened {
        let fd = file.into_raw_fd();
        let _ = nix::unistd::dup2(fd, target);
        let _ = nix::unistd::close(fd);
    }
}

#[cfg(target_os = "linux")]
fn idle_io_priority() {
    const IOPRIO_WHO_PROCESS: libc::c_int = 1;
    const IOPRIO_CLASS_IDLE: libc::c_int = 3;
    const IOPRIO_CLASS_SHIFT: libc::c_int = 13;
    // SAFETY: raw syscall on our own process with constant arguments.
    unsafe {
        libc::syscall(
            libc::SYS_ioprio_set,
            IOPRIO_WHO_PROCESS,
            0,
            IOPRIO_CLASS_IDLE << IOPRIO_CLASS_SHIFT,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn idle_io_priority() {}

fn limit_specs(descriptor: &Value) -> Vec<LimitSpec> {
    let soft = descriptor.get(keys::SOFT_RESOURCE_LIMITS);
    let hard = descriptor.get(keys::HARD_RESOURCE_LIMITS);
    if soft.is_none() && hard.is_none() {
        return Vec::new();
    }

    RESOURCES
        .iter()
        .filter_map(|(key, resource)| {
            let soft = soft.and_then(|d| d.get(key)).and_then(Value::as_integer).map(|v| v as u64);
            let hard = hard.and_then(|d| d.get(key)).and_then(Value::as_integer).map(|v| v as u64);
            if soft.is_none() && hard.is_none() {
                None
            } else {
                Some(LimitSpec { resource: *resource, soft, hard })
            }
        })
        .collect()
}

fn resolve_initgroups(descriptor: &Value) -> Option<(CString, Gid)> {
    if !descriptor.get_bool(keys::INIT_GROUPS) {
        return None;
    }
    let Some(user) = descriptor.get_str(keys::USER_NAME) else {
        warn!("{} requires {}", keys::INIT_GROUPS, keys::USER_NAME);
        return None;
    };

    let gid = match descriptor.get(keys::GID).and_then(Value::as_integer) {
        Some(gid) => Gid::from_raw(gid as libc::gid_t),
        None => match nix::unistd::User::from_name(user) {
            Ok(Some(pw)) => pw.gid,
            _ => {
                warn!("could not find base group for {user}");
                return None;
            }
        },
    };

    CString::new(user).ok().map(|user| (user, gid))
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
