// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup with runtime-togglable verbosity.
//!
//! SIGUSR1 flips debug logging, SIGUSR2 flips verbose logging; both rebuild
//! the active filter through a reload handle. `RUST_LOG` wins at startup.

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for the runtime log-level toggles.
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    debug: bool,
    verbose: bool,
}

impl LogHandle {
    pub fn toggle_debug(&mut self) {
        self.debug = !self.debug;
        let state = if self.debug { "enabled" } else { "disabled" };
        self.apply();
        info!("debug logging {state}");
    }

    pub fn toggle_verbose(&mut self) {
        self.verbose = !self.verbose;
        let state = if self.verbose { "enabled" } else { "disabled" };
        self.apply();
        info!("verbose logging {state}");
    }

    fn apply(&self) {
        let filter = EnvFilter::new(level_for(self.debug, self.verbose));
        if let Err(e) = self.reload.reload(filter) {
            tracing::warn!("failed to update log filter: {e}");
        }
    }
}

fn level_for(debug: bool, verbose: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

/// Install the stderr subscriber and return the toggle handle.
pub fn init(debug: bool, verbose: bool) -> LogHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(debug, verbose)));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    LogHandle { reload: handle, debug, verbose }
}
