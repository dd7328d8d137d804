// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed framing over a local stream socket.
//!
//! Each frame is a 4-byte big-endian length followed by the JSON payload.
//! Descriptors for the frame ride as `SCM_RIGHTS` ancillary data on the first
//! `sendmsg` of the frame; the receiver collects them in arrival order and
//! resolves payload ordinals against them.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::cmsg_space;
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr,
};
use tokio::io::Interest;
use tokio::net::UnixStream;

use crate::{codec, ProtocolError, Value};

/// Maximum payload size (8 MB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum descriptors carried by a single frame
pub const MAX_FDS_PER_MESSAGE: usize = 32;

const HEADER: usize = 4;
const CHUNK: usize = 64 * 1024;

/// A framed message stream over a connected Unix socket.
///
/// Buffers partial frames between calls, so pipelined frames are preserved.
/// Descriptors received but not yet consumed by a decoded frame are closed on
/// drop.
pub struct MsgStream {
    stream: UnixStream,
    buf: Vec<u8>,
    fds: Vec<RawFd>,
}

impl MsgStream {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream, buf: Vec::new(), fds: Vec::new() }
    }

    pub fn get_ref(&self) -> &UnixStream {
        &self.stream
    }

    /// Read one message, blocking (asynchronously) until a full frame arrives.
    ///
    /// Ownership of the frame's descriptors passes to the returned value.
    pub async fn recv(&mut self) -> Result<Value, ProtocolError> {
        loop {
            if let Some(len) = frame_len(&self.buf)? {
                if self.buf.len() >= HEADER + len {
                    let payload: Vec<u8> = self.buf[HEADER..HEADER + len].to_vec();
                    self.buf.drain(..HEADER + len);
                    let value = codec::decode(&payload, &self.fds)?;
                    // Descriptors are assigned contiguous ordinals per frame,
                    // so the decoded leaf count is how many this frame used.
                    self.fds.drain(..value.fd_count().min(self.fds.len()));
                    return Ok(value);
                }
            }

            self.stream.readable().await?;
            let fd = self.stream.as_raw_fd();
            match self.stream.try_io(Interest::READABLE, || {
                recv_chunk(fd, &mut self.buf, &mut self.fds)
            }) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write one message as a single frame.
    pub async fn send(&mut self, value: &Value) -> Result<(), ProtocolError> {
        let (payload, fds) = codec::encode(value)?;
        let mut frame = Vec::with_capacity(HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut sent = 0;
        let mut fds_pending = !fds.is_empty();
        while sent < frame.len() {
            self.stream.writable().await?;
            let fd = self.stream.as_raw_fd();
            let attach: &[RawFd] = if fds_pending { &fds } else { &[] };
            match self.stream.try_io(Interest::WRITABLE, || {
                send_chunk(fd, &frame[sent..], attach)
            }) {
                Ok(n) => {
                    sent += n;
                    if n > 0 {
                        fds_pending = false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for MsgStream {
    fn drop(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}

/// Parse the length prefix once enough bytes are buffered.
pub(crate) fn frame_len(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < HEADER {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    Ok(Some(len))
}

/// Receive one chunk, appending bytes to `buf` and descriptors to `fds`.
///
/// Returns the byte count; 0 means the peer closed the stream.
pub(crate) fn recv_chunk(
    fd: RawFd,
    buf: &mut Vec<u8>,
    fds: &mut Vec<RawFd>,
) -> io::Result<usize> {
    let mut chunk = [0u8; CHUNK];
    let (n, received) = {
        let mut iov = [IoSliceMut::new(&mut chunk)];
        let mut cmsg_buf = cmsg_space!([RawFd; MAX_FDS_PER_MESSAGE]);
        let msg = recvmsg::<UnixAddr>(
            fd,
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .map_err(io::Error::from)?;

        let mut received = Vec::new();
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            if let ControlMessageOwned::ScmRights(batch) = cmsg {
                received.extend(batch);
            }
        }
        (msg.bytes, received)
    };
    buf.extend_from_slice(&chunk[..n]);
    fds.extend(received);
    Ok(n)
}

/// Send one chunk, attaching `fds` as ancillary rights when non-empty.
pub(crate) fn send_chunk(fd: RawFd, data: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let iov = [IoSlice::new(data)];
    let cmsgs = [ControlMessage::ScmRights(fds)];
    let attach: &[ControlMessage] = if fds.is_empty() { &[] } else { &cmsgs };
    sendmsg::<UnixAddr>(fd, &iov, attach, MsgFlags::empty(), None).map_err(io::Error::from)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
