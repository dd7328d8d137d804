// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden Daemon (wardend)
//!
//! Per-user (or process-1) service supervisor that owns the event loop and
//! dispatches work.
//!
//! Architecture:
//! - Connection tasks: read framed requests, emit events, write responses
//! - Main loop: multiplexes events, signals, accepts, and the idle timeout,
//!   processing exactly one occurrence at a time

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod bridge;
mod env;
mod event;
mod init;
mod job;
mod lifecycle;
mod listener;
mod logging;
mod rlimits;
mod spawn;
mod supervisor;

use std::io::Write;
use std::process::ExitCode;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::lifecycle::{Config, LifecycleError, ServerHandle};
use crate::supervisor::Supervisor;

#[derive(Default)]
struct Flags {
    debug: bool,
    verbose: bool,
    single_user: bool,
    safe_boot: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let flags = parse_flags(std::env::args().skip(1));
    let mut log = logging::init(flags.debug, flags.verbose);

    let is_init = init::is_init();
    if flags.single_user && is_init {
        info!("single-user boot requested");
    }
    if flags.safe_boot && is_init {
        info!("safe boot requested");
    }

    // Detach from whatever started us.
    let _ = nix::unistd::setsid();
    let _ = nix::unistd::chdir("/");

    let config = Config::load();
    let mut server = match lifecycle::server_init(&config) {
        Ok(server) => server,
        Err(LifecycleError::AlreadyRunning(dir)) => {
            info!("another supervisor holds {}; exiting", dir.display());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("failed to start supervisor: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut supervisor = Supervisor::new(event_tx, is_init);

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };
    let Ok(mut sighup) = signal(SignalKind::hangup()) else { return ExitCode::FAILURE };
    let Ok(mut sigusr1) = signal(SignalKind::user_defined1()) else { return ExitCode::FAILURE };
    let Ok(mut sigusr2) = signal(SignalKind::user_defined2()) else { return ExitCode::FAILURE };
    let Ok(mut sigchld) = signal(SignalKind::child()) else { return ExitCode::FAILURE };
    observe_and_ignore();

    supervisor.reload_config();

    info!("supervisor ready on {}", config.socket_path.display());

    loop {
        supervisor.apply_pending_stdio();
        if server.is_none() && !supervisor.quiesced {
            // The socket prefix may have been read-only at startup.
            if let Ok(bound) = lifecycle::server_init(&config) {
                server = bound;
            }
        }

        let mut begin_shutdown = false;

        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => supervisor.handle_event(event),
                None => break,
            },

            accepted = accept_next(&server), if server.is_some() && !supervisor.quiesced => {
                match accepted {
                    Ok(stream) => {
                        supervisor.register_conn(stream, None);
                    }
                    Err(e) => error!("accept error: {e}"),
                }
            }

            _ = sigterm.recv() => {
                info!("received SIGTERM");
                begin_shutdown = true;
            }

            _ = sighup.recv() => {
                init::reconcile_ttys();
                supervisor.reload_config();
            }

            _ = sigusr1.recv() => log.toggle_debug(),

            _ = sigusr2.recv() => log.toggle_verbose(),

            _ = sigchld.recv() => supervisor.reap_children(),

            // Re-armed on every event: an empty non-init instance that stays
            // empty for the whole window exits successfully.
            _ = tokio::time::sleep(env::idle_timeout()), if supervisor.is_idle() && !is_init => {
                info!("no jobs and nothing to wait for; exiting");
                break;
            }
        }

        if begin_shutdown || supervisor.take_shutdown_request() {
            if supervisor.shutdown() {
                break;
            }
            // Init goes quiescent: stop serving, keep reaping.
            server = None;
        }
    }

    lifecycle::cleanup(&config);
    info!("supervisor stopped");
    ExitCode::SUCCESS
}

async fn accept_next(server: &Option<ServerHandle>) -> std::io::Result<tokio::net::UnixStream> {
    match server {
        Some(handle) => handle.listener.accept().await.map(|(stream, _)| stream),
        None => std::future::pending().await,
    }
}

/// Signals that are observed (so they cannot kill the supervisor) but carry
/// no action.
fn observe_and_ignore() {
    let kinds = [
        SignalKind::interrupt(),
        SignalKind::pipe(),
        SignalKind::alarm(),
        SignalKind::io(),
        SignalKind::window_change(),
        SignalKind::from_raw(libc::SIGTSTP),
        SignalKind::from_raw(libc::SIGTTIN),
        SignalKind::from_raw(libc::SIGTTOU),
        SignalKind::from_raw(libc::SIGURG),
        SignalKind::from_raw(libc::SIGCONT),
        SignalKind::from_raw(libc::SIGXCPU),
        SignalKind::from_raw(libc::SIGXFSZ),
        SignalKind::from_raw(libc::SIGVTALRM),
        SignalKind::from_raw(libc::SIGPROF),
    ];

    for kind in kinds {
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        trace!("ignored signal {:?}", kind);
                    }
                });
            }
            Err(e) => debug!("cannot observe signal {kind:?}: {e}"),
        }
    }
}

fn parse_flags(args: impl Iterator<Item = String>) -> Flags {
    let mut flags = Flags::default();

    for arg in args {
        let Some(opts) = arg.strip_prefix('-') else {
            eprintln!("ignoring unknown argument '{arg}'");
            usage(&mut std::io::stderr());
            continue;
        };
        for opt in opts.chars() {
            match opt {
                'd' => flags.debug = true,
                's' => flags.single_user = true,
                'v' => flags.verbose = true,
                'x' => flags.safe_boot = true,
                'h' => {
                    usage(&mut std::io::stdout());
                    std::process::exit(0);
                }
                other => {
                    eprintln!("ignoring unknown option '-{other}'");
                    usage(&mut std::io::stderr());
                }
            }
        }
    }

    flags
}

fn usage(out: &mut dyn Write) {
    let _ = writeln!(out, "wardend {}:", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "\t-d\tdebug logging");
    let _ = writeln!(out, "\t-s\tsingle-user mode hint (init only)");
    let _ = writeln!(out, "\t-v\tverbose logging");
    let _ = writeln!(out, "\t-x\tsafe-boot hint (init only)");
    let _ = writeln!(out, "\t-h\tthis usage statement");
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
