// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::params::{Check, Value};
use crate::sched::RunContext;
use crate::task::{Action, InputRef, OutputSchema, ParamSchema, Task, ValueTemplate};
use crate::universe::TaskUniverse;

pub fn schema(default: Option<&str>, required: bool, valid: Check) -> ParamSchema {
    ParamSchema {
        descr: String::new(),
        required,
        default: default.map(|v| Value::Str(v.to_owned())),
        valid,
    }
}

pub fn input(task: &str, overrides: &[(&str, &str)]) -> InputRef {
    InputRef {
        task: task.to_owned(),
        params: overrides
            .iter()
            .map(|(name, value)| {
                let template = if value.contains('{') {
                    ValueTemplate::Template((*value).to_owned())
                } else {
                    ValueTemplate::Literal(Value::Str((*value).to_owned()))
                };
                ((*name).to_owned(), template)
            })
            .collect(),
    }
}

pub fn noop() -> Arc<dyn Action> {
    Arc::new(|_ctx: &mut RunContext<'_>| -> Result<(), String> { Ok(()) })
}

///
/// An action that appends a formatted line to a shared transcript each time it runs.
///
pub fn recorder(
    transcript: &Arc<Mutex<Vec<String>>>,
    line: impl Fn(&RunContext<'_>) -> String + 'static,
) -> Arc<dyn Action> {
    let transcript = transcript.clone();
    Arc::new(move |ctx: &mut RunContext<'_>| -> Result<(), String> {
        transcript.lock().unwrap().push(line(ctx));
        Ok(())
    })
}

pub struct TaskBuilder {
    name: String,
    params: BTreeMap<String, ParamSchema>,
    inputs: BTreeMap<String, InputRef>,
    outputs: BTreeMap<String, OutputSchema>,
    action: Arc<dyn Action>,
}

pub fn task(name: &str) -> TaskBuilder {
    TaskBuilder {
        name: name.to_owned(),
        params: BTreeMap::new(),
        inputs: BTreeMap::new(),
        outputs: BTreeMap::new(),
        action: noop(),
    }
}

impl TaskBuilder {
    pub fn param(mut self, name: &str, schema_: ParamSchema) -> TaskBuilder {
        self.params.insert(name.to_owned(), schema_);
        self
    }

    pub fn input(mut self, alias: &str, input_: InputRef) -> TaskBuilder {
        self.inputs.insert(alias.to_owned(), input_);
        self
    }

    pub fn output(mut self, name: &str) -> TaskBuilder {
        self.outputs
            .insert(name.to_owned(), OutputSchema::default());
        self
    }

    pub fn action(mut self, action: Arc<dyn Action>) -> TaskBuilder {
        self.action = action;
        self
    }

    pub fn build(self) -> Task {
        Task::new(
            &self.name,
            "",
            self.params,
            self.inputs,
            self.outputs,
            self.action,
        )
    }
}

pub fn universe(tasks: Vec<Task>) -> TaskUniverse {
    let mut universe = TaskUniverse::new();
    for task in tasks {
        universe.insert(task).unwrap();
    }
    universe
}
