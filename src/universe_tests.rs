// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fs;

use tempfile::TempDir;

use crate::task::ActionRegistry;
use crate::testutil::task;
use crate::universe::TaskUniverse;

const MINIMAL: &str = "[run]\naction = \"exec\"\nargv = [\"true\"]\n";

#[test]
fn names_follow_relative_paths() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("example/nested")).unwrap();
    fs::write(dir.path().join("example/hello.task"), MINIMAL).unwrap();
    fs::write(dir.path().join("example/nested/deep.task"), MINIMAL).unwrap();
    fs::write(dir.path().join("top.task"), MINIMAL).unwrap();

    let universe = TaskUniverse::load(dir.path(), &ActionRegistry::with_builtins()).unwrap();
    let names: Vec<&str> = universe.names().collect();
    assert_eq!(names, vec!["example/hello", "example/nested/deep", "top"]);
    assert!(universe.get("example/hello").is_some());
}

#[test]
fn non_task_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("readme.md"), "not a task").unwrap();
    fs::write(dir.path().join("real.task"), MINIMAL).unwrap();

    let universe = TaskUniverse::load(dir.path(), &ActionRegistry::with_builtins()).unwrap();
    assert_eq!(universe.len(), 1);
}

#[test]
fn dangling_symlinks_are_ignored() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("real.task"), MINIMAL).unwrap();
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken.task")).unwrap();

    let universe = TaskUniverse::load(dir.path(), &ActionRegistry::with_builtins()).unwrap();
    assert_eq!(universe.len(), 1);
}

#[test]
fn duplicate_names_are_fatal() {
    let mut universe = TaskUniverse::new();
    universe.insert(task("same").build()).unwrap();
    let err = universe.insert(task("same").build()).unwrap_err();
    assert_eq!(err, "Duplicate task name 'same'");
}

#[test]
fn shipped_examples_load() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tasks");
    let universe = TaskUniverse::load(&root, &ActionRegistry::with_builtins()).unwrap();
    let names: Vec<&str> = universe.names().collect();
    assert!(names.contains(&"example/hello-world"), "{names:?}");
    assert!(names.contains(&"example/hello-input"), "{names:?}");
    assert!(names.contains(&"example/hello-valid"), "{names:?}");
    assert!(names.contains(&"example/pty-cat"), "{names:?}");
}

#[test]
fn broken_definitions_are_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.task"), "this is not toml [").unwrap();
    let err = TaskUniverse::load(dir.path(), &ActionRegistry::with_builtins()).unwrap_err();
    assert!(err.contains("Failed to parse task file"), "{err}");
}
