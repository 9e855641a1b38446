// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fs;

use maplit::btreemap;
use tempfile::TempDir;

use crate::params::{Check, Value};
use crate::task::{ActionRegistry, Task, ValueTemplate};

fn load(text: &str) -> Result<Task, String> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.task");
    fs::write(&path, text).unwrap();
    Task::load("t", &path, &ActionRegistry::with_builtins())
}

#[test]
fn full_definition() {
    let task = load(
        r#"
descr = "Print a greeting."

[params.addressee]
descr = "Who to greet"
default = "world"

[params.count]
default = 2
valid = [1, 2, 3]

[inputs.hello]
task = "example/hello-world"
[inputs.hello.params]
addressee = "jkram"
echo = "{addressee}"

[outputs.greeting]
descr = "The rendered greeting"

[run]
action = "exec"
argv = ["echo", "Hello, {addressee}!"]
"#,
    )
    .unwrap();

    assert_eq!(task.descr, "Print a greeting.");
    assert_eq!(
        task.params["addressee"].default,
        Some(Value::Str("world".to_owned()))
    );
    assert_eq!(task.params["count"].default, Some(Value::Int(2)));
    assert!(matches!(task.params["count"].valid, Check::OneOf(_)));
    assert_eq!(task.inputs["hello"].task, "example/hello-world");
    assert_eq!(
        task.inputs["hello"].params,
        btreemap! {
            "addressee".to_owned() => ValueTemplate::Literal(Value::Str("jkram".to_owned())),
            "echo".to_owned() => ValueTemplate::Template("{addressee}".to_owned()),
        }
    );
    assert_eq!(task.outputs["greeting"].descr, "The rendered greeting");
}

#[test]
fn minimal_definition() {
    let task = load("[run]\naction = \"exec\"\nargv = [\"true\"]\n").unwrap();
    assert!(task.params.is_empty());
    assert!(task.inputs.is_empty());
    assert!(task.outputs.is_empty());
}

#[test]
fn missing_run_action() {
    let err = load("descr = \"nothing\"\n").unwrap_err();
    assert!(err.contains("Task 't' has no run action"), "{err}");
}

#[test]
fn unknown_action_name() {
    let err = load("[run]\naction = \"teleport\"\n").unwrap_err();
    assert!(err.contains("Unknown action 'teleport'"), "{err}");
}

#[test]
fn required_and_default_conflict() {
    let err = load(
        "[params.p]\nrequired = true\ndefault = \"x\"\n\n[run]\naction = \"exec\"\nargv = [\"true\"]\n",
    )
    .unwrap_err();
    assert!(
        err.contains("Parameter 'p' cannot be both required and defaulted"),
        "{err}"
    );
}

#[test]
fn default_must_satisfy_valid() {
    let err = load(
        "[params.p]\ndefault = \"z\"\nvalid = [\"a\", \"b\"]\n\n[run]\naction = \"exec\"\nargv = [\"true\"]\n",
    )
    .unwrap_err();
    assert!(
        err.contains("Validation of parameter 'p' value 'z' failed"),
        "{err}"
    );
}

#[test]
fn unsupported_value_type() {
    let err = load(
        "[params.p]\ndefault = 1.5\n\n[run]\naction = \"exec\"\nargv = [\"true\"]\n",
    )
    .unwrap_err();
    assert!(err.contains("Unsupported parameter value"), "{err}");
}

#[test]
fn exec_requires_argv() {
    let err = load("[run]\naction = \"exec\"\n").unwrap_err();
    assert!(err.contains("exec requires an argv"), "{err}");
}

#[test]
fn template_resolution() {
    let binding = btreemap! {
        "flavor".to_owned() => Value::Str("salty".to_owned()),
        "count".to_owned() => Value::Int(3),
    };

    // A bare placeholder preserves the referenced type.
    assert_eq!(
        ValueTemplate::Template("{count}".to_owned())
            .resolve(&binding)
            .unwrap(),
        Value::Int(3)
    );
    // Mixed text interpolates canonically.
    assert_eq!(
        ValueTemplate::Template("{count}-{flavor}".to_owned())
            .resolve(&binding)
            .unwrap(),
        Value::Str("3-salty".to_owned())
    );
    let err = ValueTemplate::Template("{missing}".to_owned())
        .resolve(&binding)
        .unwrap_err();
    assert!(
        err.contains("references unknown parameter 'missing'"),
        "{err}"
    );
}
