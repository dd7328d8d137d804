// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection tasks for the control socket.
//!
//! Each connection gets one task that reads framed requests, hands them to
//! the main loop as events, and writes back the response the dispatcher
//! returns. The task never touches supervisor state; a blocked write only
//! stalls its own connection.

use std::io;
use std::os::unix::io::OwnedFd;

use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warden_wire::{MsgStream, ProtocolError};

use crate::event::{ConnId, Event};

/// Run a connection until the peer closes, a read fails, or the supervisor
/// cancels it. Always reports the close back to the main loop.
pub fn run_conn(
    stream: UnixStream,
    conn: ConnId,
    events: mpsc::Sender<Event>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut stream = MsgStream::new(stream);

        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                received = stream.recv() => match received {
                    Ok(msg) => msg,
                    Err(ProtocolError::ConnectionClosed) => {
                        debug!("{conn}: peer closed");
                        break;
                    }
                    Err(e) => {
                        debug!("{conn}: read failed: {e}");
                        break;
                    }
                },
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            if events.send(Event::Request { conn, msg, reply: reply_tx }).await.is_err() {
                break;
            }
            let Ok(response) = reply_rx.await else {
                break;
            };

            if let Err(e) = stream.send(&response).await {
                debug!("{conn}: write failed: {e}");
                break;
            }
        }

        let _ = events.send(Event::ConnClosed { conn }).await;
    });
}

/// Wrap a supervisor-held socket end as a tokio stream.
pub fn adopt_stream(fd: OwnedFd) -> io::Result<UnixStream> {
    let stream: std::os::unix::net::UnixStream = fd.into();
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}
