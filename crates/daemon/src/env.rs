// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Companion control binary spawned to stream the configuration file into the
/// control socket.
pub const CTL_PATH: &str = "/usr/bin/wardenctl";

/// Proxy binary exec'd for inetd-compatible jobs.
pub const INETD_PROXY_PATH: &str = "/usr/libexec/warden-inetd-proxy";

/// Configuration file consumed at startup and on SIGHUP when running as init.
pub const INIT_CONF: &str = "/etc/warden.conf";

/// Per-user configuration file name, resolved under `$HOME`.
pub const USER_CONF: &str = ".warden.conf";

/// Socket prefix: `WARDEN_SOCK_PREFIX` > built-in default.
pub fn sock_prefix() -> PathBuf {
    std::env::var("WARDEN_SOCK_PREFIX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(warden_wire::SOCK_PREFIX))
}

/// Path of the companion control binary (`WARDEN_CTL_PATH` override).
pub fn ctl_path() -> PathBuf {
    std::env::var("WARDEN_CTL_PATH").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(CTL_PATH))
}

/// Configuration file path (`WARDEN_CONF` override).
pub fn conf_path(is_init: bool) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("WARDEN_CONF") {
        return Some(PathBuf::from(path));
    }
    if is_init {
        return Some(PathBuf::from(INIT_CONF));
    }
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(USER_CONF))
}

/// Idle exit timeout for non-init instances (`WARDEN_IDLE_TIMEOUT_MS` override).
pub fn idle_timeout() -> Duration {
    std::env::var("WARDEN_IDLE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Minimum run time under which failing jobs are throttled
/// (`WARDEN_MIN_RUN_SECS` override).
pub fn min_run_time() -> Duration {
    std::env::var("WARDEN_MIN_RUN_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(10))
}
