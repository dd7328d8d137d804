// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blocking client for the supervisor's control socket.
//!
//! Children spawned with service IPC use [`checkin`] to claim their trusted
//! channel; tooling and tests use [`Client`] directly.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use crate::frame::{frame_len, recv_chunk, send_chunk};
use crate::{codec, keys, ProtocolError, Value};

const HEADER: usize = 4;

/// Default socket prefix; overridable via `WARDEN_SOCK_PREFIX`.
pub const SOCK_PREFIX: &str = "/var/tmp/warden";

/// Control socket path for the invoking user: `<prefix>/<uid>/sock`.
pub fn socket_path() -> PathBuf {
    let prefix = std::env::var("WARDEN_SOCK_PREFIX").unwrap_or_else(|_| SOCK_PREFIX.to_string());
    PathBuf::from(prefix).join(nix::unistd::getuid().to_string()).join("sock")
}

/// A synchronous control-channel session.
#[derive(Debug)]
pub struct Client {
    stream: UnixStream,
    buf: Vec<u8>,
    fds: Vec<RawFd>,
}

impl Client {
    /// Connect to the invoking user's supervisor.
    pub fn connect() -> Result<Self, ProtocolError> {
        Self::connect_path(&socket_path())
    }

    pub fn connect_path(path: &std::path::Path) -> Result<Self, ProtocolError> {
        Ok(Self::from_stream(UnixStream::connect(path)?))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream, buf: Vec::new(), fds: Vec::new() }
    }

    /// Send one request and block for its response.
    ///
    /// Ownership of descriptors in the response passes to the caller.
    pub fn msg(&mut self, request: &Value) -> Result<Value, ProtocolError> {
        self.send(request)?;
        self.recv()
    }

    fn send(&mut self, value: &Value) -> Result<(), ProtocolError> {
        let (payload, fds) = codec::encode(value)?;
        let mut frame = Vec::with_capacity(HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut sent = 0;
        let mut fds_pending = !fds.is_empty();
        while sent < frame.len() {
            let attach: &[RawFd] = if fds_pending { &fds } else { &[] };
            match send_chunk(self.stream.as_raw_fd(), &frame[sent..], attach) {
                Ok(n) => {
                    sent += n;
                    if n > 0 {
                        fds_pending = false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Value, ProtocolError> {
        loop {
            if let Some(len) = frame_len(&self.buf)? {
                if self.buf.len() >= HEADER + len {
                    let payload: Vec<u8> = self.buf[HEADER..HEADER + len].to_vec();
                    self.buf.drain(..HEADER + len);
                    let value = codec::decode(&payload, &self.fds)?;
                    self.fds.drain(..value.fd_count().min(self.fds.len()));
                    return Ok(value);
                }
            }
            match recv_chunk(self.stream.as_raw_fd(), &mut self.buf, &mut self.fds) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}

/// Claim the trusted channel handed down by the supervisor.
///
/// Reads the descriptor number from the well-known environment variable and
/// issues a check-in. Returns the session (kept open for the job's lifetime)
/// and the job descriptor the supervisor holds for this child.
pub fn checkin() -> Result<(Client, Value), ProtocolError> {
    let raw = std::env::var(keys::TRUSTED_FD_ENV)
        .map_err(|_| ProtocolError::MissingTrustedFd(keys::TRUSTED_FD_ENV))?;
    let fd: RawFd =
        raw.parse().map_err(|_| ProtocolError::MissingTrustedFd(keys::TRUSTED_FD_ENV))?;
    // SAFETY: the supervisor exported this descriptor for us and nothing else
    // in this process has claimed it.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };
    let mut client = Client::from_stream(stream);
    let descriptor = client.msg(&Value::string(keys::CHECK_IN))?;
    Ok((client, descriptor))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
