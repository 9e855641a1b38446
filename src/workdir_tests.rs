// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use hashing::Fingerprint;
use tempfile::TempDir;

use crate::testutil::task;
use crate::workdir::WorkRoot;

#[test]
fn create_initializes_scratch() {
    let dir = TempDir::new().unwrap();
    let workroot = WorkRoot::create(&dir.path().join("work")).unwrap();
    assert!(workroot.tmpdir().is_dir());
}

#[test]
fn materialize_creates_output_slots() {
    let dir = TempDir::new().unwrap();
    let workroot = WorkRoot::create(dir.path()).unwrap();
    let task = task("a/b").output("image").output("log").build();
    let fingerprint = Fingerprint::of_bytes(b"node");

    let outputs = workroot.materialize(&task, fingerprint).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs["image"].is_dir());
    assert!(outputs["log"].is_dir());
    assert!(workroot.intact("a/b", fingerprint));
    assert_eq!(
        outputs["image"],
        workroot.entry_dir("a/b", fingerprint).join("image")
    );
}

#[test]
fn clean_entry_removes_only_that_entry() {
    let dir = TempDir::new().unwrap();
    let workroot = WorkRoot::create(dir.path()).unwrap();
    let task_a = task("a").output("out").build();
    let task_b = task("b").output("out").build();
    let fp_a = Fingerprint::of_bytes(b"a");
    let fp_b = Fingerprint::of_bytes(b"b");
    workroot.materialize(&task_a, fp_a).unwrap();
    workroot.materialize(&task_b, fp_b).unwrap();

    workroot.clean_entry("a", fp_a).unwrap();
    assert!(!workroot.intact("a", fp_a));
    assert!(workroot.intact("b", fp_b));

    // Cleaning an absent entry is not an error.
    workroot.clean_entry("a", fp_a).unwrap();
}

#[test]
fn clean_all_resets_the_root() {
    let dir = TempDir::new().unwrap();
    let workroot = WorkRoot::create(dir.path()).unwrap();
    let task_a = task("a").output("out").build();
    let fp_a = Fingerprint::of_bytes(b"a");
    workroot.materialize(&task_a, fp_a).unwrap();

    workroot.clean_all().unwrap();
    assert!(!workroot.intact("a", fp_a));
    assert!(workroot.tmpdir().is_dir());
}

#[test]
fn entries_enumerate_materialized_nodes() {
    let dir = TempDir::new().unwrap();
    let workroot = WorkRoot::create(dir.path()).unwrap();
    let nested = task("x/y/z").build();
    let plain = task("solo").build();
    let fp_nested = Fingerprint::of_bytes(b"nested");
    let fp_plain = Fingerprint::of_bytes(b"plain");
    workroot.materialize(&nested, fp_nested).unwrap();
    workroot.materialize(&plain, fp_plain).unwrap();

    let mut entries = workroot.entries().unwrap();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("solo".to_owned(), fp_plain),
            ("x/y/z".to_owned(), fp_nested),
        ]
    );
}
