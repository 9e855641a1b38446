// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::io::Write;

use crate::{Fingerprint, WriterHasher};

#[test]
fn hashes() {
    let mut src = "meep".as_bytes();

    let dst = Vec::with_capacity(10);
    let mut hasher = WriterHasher::new(dst);
    assert_eq!(std::io::copy(&mut src, &mut hasher).unwrap(), 4);
    let (fingerprint, dst) = hasher.finish();
    assert_eq!(
        fingerprint,
        Fingerprint::from_hex_string(
            "23e92dfba8fb0c93cfba31ad2962b4e35a47054296d1d375d7f7e13e0185de7a",
        )
        .unwrap(),
    );
    assert_eq!(dst, "meep".as_bytes().to_vec());
}

#[test]
fn sink_matches_of_bytes() {
    let mut hasher = WriterHasher::sink();
    hasher.write_all(b"splat").unwrap();
    let (fingerprint, _) = hasher.finish();
    assert_eq!(fingerprint, Fingerprint::of_bytes(b"splat"));
}

#[test]
fn incremental_writes_match_one_shot() {
    let mut hasher = WriterHasher::sink();
    hasher.write_all(b"first ").unwrap();
    hasher.write_all(b"second").unwrap();
    let (fingerprint, _) = hasher.finish();
    assert_eq!(fingerprint, Fingerprint::of_bytes(b"first second"));
}
