// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Demand-port bridge.
//!
//! A dedicated thread watches registered demand ports for pending input
//! without consuming it: `poll(2)` reports level-triggered readiness, which
//! is the activation notification. The thread then drops the port from its
//! watched set (so the same pending message cannot re-trigger) and reports
//! the port's slot to the main loop over the event channel. Starting the job
//! is responsible for re-arming the port when the job next goes idle.
//!
//! The slot table mapping ports to job labels lives on the handle and is
//! touched only by the main thread; the thread side holds nothing but
//! (slot, descriptor) pairs. Membership changes reach the thread through a
//! control queue plus a self-pipe wake-up.

use std::io;
use std::os::fd::AsFd;
use std::os::unix::io::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::mpsc as std_mpsc;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::pipe;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::Event;

enum PortCtl {
    Add { slot: usize, fd: RawFd },
    Remove { fd: RawFd },
}

/// Main-thread handle to the bridge.
pub struct DemandBridge {
    ctl_tx: std_mpsc::Sender<PortCtl>,
    wake: OwnedFd,
    slots: Vec<Option<String>>,
}

impl DemandBridge {
    /// Spawn the bridge thread.
    pub fn start(events: mpsc::Sender<Event>) -> io::Result<Self> {
        let (wake_r, wake_w) = pipe()?;
        let (ctl_tx, ctl_rx) = std_mpsc::channel();

        std::thread::Builder::new()
            .name("demand-bridge".into())
            .spawn(move || bridge_loop(wake_r, ctl_rx, events))?;

        Ok(Self { ctl_tx, wake: wake_w, slots: Vec::new() })
    }

    /// Allot a slot for a new port and arm it.
    pub fn register(&mut self, label: &str, fd: RawFd) -> usize {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(label.to_string());
                free
            }
            None => {
                self.slots.push(Some(label.to_string()));
                self.slots.len() - 1
            }
        };
        self.send(PortCtl::Add { slot, fd });
        slot
    }

    /// Re-add a previously registered port to the watched set.
    pub fn arm(&mut self, slot: usize, fd: RawFd) {
        self.send(PortCtl::Add { slot, fd });
    }

    /// Take a port out of the watched set while its job runs.
    pub fn disarm(&mut self, fd: RawFd) {
        self.send(PortCtl::Remove { fd });
    }

    /// Disarm and free the slot when the owning job is removed.
    pub fn release(&mut self, slot: usize, fd: RawFd) {
        self.send(PortCtl::Remove { fd });
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
    }

    /// Owning job label for a fired slot.
    pub fn label_for(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).and_then(Option::as_deref)
    }

    fn send(&self, ctl: PortCtl) {
        if self.ctl_tx.send(ctl).is_err() {
            warn!("demand bridge thread is gone");
            return;
        }
        if let Err(e) = nix::unistd::write(self.wake.as_fd(), &[1]) {
            warn!("demand bridge wake failed: {e}");
        }
    }
}

fn bridge_loop(
    wake_r: OwnedFd,
    ctl_rx: std_mpsc::Receiver<PortCtl>,
    events: mpsc::Sender<Event>,
) {
    let mut members: Vec<(usize, RawFd)> = Vec::new();

    loop {
        let (wake_ready, fired) = {
            let mut pfds = Vec::with_capacity(members.len() + 1);
            pfds.push(PollFd::new(wake_r.as_fd(), PollFlags::POLLIN));
            for (_, fd) in &members {
                // SAFETY: the main thread keeps member descriptors open until
                // a Remove control message has reached this thread.
                let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                pfds.push(PollFd::new(fd, PollFlags::POLLIN));
            }

            match poll(&mut pfds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("demand bridge poll: {e}");
                    continue;
                }
            }

            let ready = |flags: Option<PollFlags>| {
                flags
                    .map(|r| {
                        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    })
                    .unwrap_or(false)
            };

            let wake_ready = ready(pfds[0].revents());
            let fired: Vec<usize> = (1..pfds.len())
                .filter(|i| ready(pfds[*i].revents()))
                .map(|i| i - 1)
                .collect();
            (wake_ready, fired)
        };

        // Drop fired members before notifying so a port can never re-trigger
        // while its activation is in flight.
        for index in fired.iter().rev() {
            let (slot, _) = members.remove(*index);
            debug!(slot, "demand port has pending input");
            if events.blocking_send(Event::PortActivation { slot }).is_err() {
                return;
            }
        }

        if wake_ready {
            let mut sink = [0u8; 64];
            let _ = nix::unistd::read(wake_r.as_raw_fd(), &mut sink);
            loop {
                match ctl_rx.try_recv() {
                    Ok(PortCtl::Add { slot, fd }) => {
                        if !members.iter().any(|(_, m)| *m == fd) {
                            members.push((slot, fd));
                        }
                    }
                    Ok(PortCtl::Remove { fd }) => members.retain(|(_, m)| *m != fd),
                    Err(std_mpsc::TryRecvError::Empty) => break,
                    Err(std_mpsc::TryRecvError::Disconnected) => return,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
