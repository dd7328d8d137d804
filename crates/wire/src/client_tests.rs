// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blocking client tests over anonymous socket pairs.

use super::*;
use serial_test::serial;
use std::os::unix::io::IntoRawFd;
use std::os::unix::net::UnixStream;

#[test]
fn socket_path_is_per_uid_under_prefix() {
    std::env::set_var("WARDEN_SOCK_PREFIX", "/tmp/warden-test-prefix");
    let path = socket_path();
    std::env::remove_var("WARDEN_SOCK_PREFIX");

    let uid = nix::unistd::getuid().to_string();
    assert_eq!(path, std::path::PathBuf::from("/tmp/warden-test-prefix").join(uid).join("sock"));
}

#[test]
fn msg_round_trips_against_a_peer() {
    let (ours, theirs) = UnixStream::pair().unwrap();

    let server = std::thread::spawn(move || {
        let mut peer = Client::from_stream(theirs);
        let request = peer.recv().unwrap();
        assert_eq!(request.get_str(keys::GET_JOB), Some("web"));
        peer.send(&Value::string(keys::RESPONSE_JOB_NOT_FOUND)).unwrap();
    });

    let mut client = Client::from_stream(ours);
    let mut request = Value::dict();
    request.insert(keys::GET_JOB, Value::string("web"));
    let response = client.msg(&request).unwrap();
    assert_eq!(response.as_str(), Some(keys::RESPONSE_JOB_NOT_FOUND));

    server.join().unwrap();
}

#[test]
#[serial(trusted_fd)]
fn checkin_claims_the_trusted_descriptor() {
    let (ours, theirs) = UnixStream::pair().unwrap();

    let server = std::thread::spawn(move || {
        let mut peer = Client::from_stream(theirs);
        let request = peer.recv().unwrap();
        assert_eq!(request.as_str(), Some(keys::CHECK_IN));

        let mut descriptor = Value::dict();
        descriptor.insert(keys::LABEL, Value::string("y"));
        peer.send(&descriptor).unwrap();
    });

    std::env::set_var(keys::TRUSTED_FD_ENV, ours.into_raw_fd().to_string());
    let (client, descriptor) = checkin().unwrap();
    std::env::remove_var(keys::TRUSTED_FD_ENV);

    assert_eq!(descriptor.get_str(keys::LABEL), Some("y"));
    drop(client);
    server.join().unwrap();
}

#[test]
#[serial(trusted_fd)]
fn checkin_without_environment_fails() {
    std::env::remove_var(keys::TRUSTED_FD_ENV);
    match checkin() {
        Err(ProtocolError::MissingTrustedFd(_)) => {}
        other => panic!("expected MissingTrustedFd, got {other:?}"),
    }
}
