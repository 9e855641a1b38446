// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::cell::Cell;
use std::rc::Rc;

use nix::unistd;

use crate::{Channel, Tag, HEADER_SIZE};

#[test]
fn round_trip() {
    let (mut a, mut b) = Channel::pair().unwrap();
    a.send(Tag::Release, b"").unwrap();
    assert_eq!(b.recv(Tag::Release).unwrap(), b"");

    b.send(Tag::Error, b"boom").unwrap();
    assert_eq!(a.recv(Tag::Error).unwrap(), b"boom");
}

#[test]
fn queues_without_handler() {
    let (mut a, mut b) = Channel::pair().unwrap();
    a.send(Tag::Release, b"").unwrap();
    a.send(Tag::Error, b"later").unwrap();

    b.drain().unwrap();
    let first = b.pop().unwrap();
    assert_eq!(first.tag, Tag::Release);
    let second = b.pop().unwrap();
    assert_eq!(second.tag, Tag::Error);
    assert_eq!(second.payload, b"later");
    assert!(b.pop().is_none());
}

#[test]
fn handler_dispatch() {
    let (mut a, mut b) = Channel::pair().unwrap();
    let seen = Rc::new(Cell::new(false));
    let seen2 = seen.clone();
    b.set_handler(
        Tag::Error,
        Box::new(move |_chan, payload| {
            assert_eq!(payload, b"oops");
            seen2.set(true);
            Ok(())
        }),
    );

    a.send(Tag::Error, b"oops").unwrap();
    b.drain().unwrap();
    assert!(seen.get());
    // Handled messages do not queue.
    assert!(b.pop().is_none());
}

#[test]
fn handler_may_reply() {
    let (mut a, mut b) = Channel::pair().unwrap();
    b.set_handler(
        Tag::TermiosInquiry,
        Box::new(|chan, _payload| chan.send(Tag::TermiosSet, b"attrs")),
    );

    a.send(Tag::TermiosInquiry, b"").unwrap();
    b.drain().unwrap();
    assert_eq!(a.recv(Tag::TermiosSet).unwrap(), b"attrs");
}

#[test]
fn recv_unexpected_tag() {
    let (mut a, mut b) = Channel::pair().unwrap();
    a.send(Tag::Error, b"x").unwrap();
    let err = b.recv(Tag::Release).unwrap_err();
    assert!(err.contains("received Error while waiting for Release"), "{err}");
}

#[test]
fn queued_messages_survive_peer_close() {
    let (mut a, mut b) = Channel::pair().unwrap();
    a.send(Tag::Release, b"").unwrap();
    drop(a);

    b.drain().unwrap();
    assert!(b.is_closed());
    assert!(b.send(Tag::Release, b"").is_err());
    assert_eq!(b.pop().unwrap().tag, Tag::Release);
}

#[test]
fn invalid_tag_is_fatal() {
    let (a, mut b) = Channel::pair().unwrap();
    let mut frame = Vec::new();
    frame.extend_from_slice(&(HEADER_SIZE as u32).to_ne_bytes());
    frame.extend_from_slice(&0_u32.to_ne_bytes());
    unistd::write(a.fd(), &frame).unwrap();

    let err = b.drain().unwrap_err();
    assert!(err.contains("invalid message tag 0"), "{err}");
}

#[test]
fn short_size_is_fatal() {
    let (a, mut b) = Channel::pair().unwrap();
    let mut frame = Vec::new();
    frame.extend_from_slice(&4_u32.to_ne_bytes());
    frame.extend_from_slice(&1_u32.to_ne_bytes());
    unistd::write(a.fd(), &frame).unwrap();

    let err = b.drain().unwrap_err();
    assert!(err.contains("smaller than its header"), "{err}");
}

#[test]
fn large_payload_round_trips() {
    let (mut a, b) = Channel::pair().unwrap();
    // Larger than the socket buffer, to exercise the partial write and read loops.
    let payload = vec![0xa5_u8; 1 << 20];

    // The sender would block forever on a full buffer with no reader, so hand the
    // receiving end to a thread. Channel is not Sync; move the fd instead.
    let peer_fd = b.fd();
    let reader = std::thread::spawn(move || {
        let mut got = Vec::new();
        let mut buf = [0_u8; 8192];
        while got.len() < HEADER_SIZE + (1 << 20) {
            match unistd::read(peer_fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(nix::errno::Errno::EAGAIN) => std::thread::yield_now(),
                Err(e) => panic!("read failed: {e}"),
            }
        }
        got
    });

    a.send(Tag::TermiosSet, &payload).unwrap();
    let got = reader.join().unwrap();
    assert_eq!(got.len(), HEADER_SIZE + payload.len());
    assert_eq!(&got[HEADER_SIZE..], &payload[..]);
    drop(b);
}
