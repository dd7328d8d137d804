// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check-in probe for the end-to-end specs.
//!
//! Run as a supervised child: claims the trusted channel from the well-known
//! environment variable, drains the activation sockets delivered with the
//! job descriptor, and records the label plus the drained bytes in the file
//! named by its first argument.

use std::io::Read;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::time::Duration;

use warden_wire::keys;

fn main() -> ExitCode {
    let Some(out_path) = std::env::args().nth(1) else {
        eprintln!("usage: checkin-probe <output-file>");
        return ExitCode::FAILURE;
    };

    let (_session, descriptor) = match warden_wire::checkin() {
        Ok(claimed) => claimed,
        Err(e) => {
            eprintln!("check-in failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let label = descriptor.get_str(keys::LABEL).unwrap_or("?").to_string();

    // Service the activation sockets that came back with the descriptor:
    // consuming the pending input lets the supervisor watch them again once
    // this child exits.
    let mut drained = Vec::new();
    if let Some(sockets) = descriptor.get(keys::SOCKETS) {
        sockets.for_each_fd(&mut |fd| {
            // SAFETY: the check-in response delivered this descriptor and
            // nothing else in this process has claimed it.
            let mut stream = unsafe { UnixStream::from_raw_fd(fd) };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            let mut buf = [0u8; 256];
            if let Ok(n) = stream.read(&mut buf) {
                drained.extend_from_slice(&buf[..n]);
            }
        });
    }

    let record = format!("{label}:{}", String::from_utf8_lossy(&drained));
    if let Err(e) = std::fs::write(&out_path, record) {
        eprintln!("write {out_path}: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
