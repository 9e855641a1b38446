// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_derive::Deserialize;

use crate::params::{Check, Value};
use crate::sched::RunContext;

///
/// A declarative workflow unit, immutable after load: a parameter schema, references to the
/// tasks it consumes, the artifacts it produces, and the action that produces them.
///
pub struct Task {
    /// Slash-separated relative identifier, e.g. `example/hello-world`.
    pub name: String,
    pub descr: String,
    pub params: BTreeMap<String, ParamSchema>,
    pub inputs: BTreeMap<String, InputRef>,
    pub outputs: BTreeMap<String, OutputSchema>,
    pub action: Arc<dyn Action>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("descr", &self.descr)
            .field("params", &self.params)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct ParamSchema {
    pub descr: String,
    pub required: bool,
    pub default: Option<Value>,
    pub valid: Check,
}

///
/// A reference to another task under a local alias, with parameter overrides to merge into
/// that task's binding.
///
#[derive(Clone, Debug)]
pub struct InputRef {
    pub task: String,
    pub params: BTreeMap<String, ValueTemplate>,
}

///
/// An input override: either a literal, or a `{param}` template resolved lazily against the
/// consuming task's own binding.
///
#[derive(Clone, Debug, PartialEq)]
pub enum ValueTemplate {
    Literal(Value),
    Template(String),
}

impl ValueTemplate {
    fn from_toml(value: &toml::Value) -> Result<ValueTemplate, String> {
        match value {
            toml::Value::String(s) if s.contains('{') => Ok(ValueTemplate::Template(s.clone())),
            other => Value::from_toml(other).map(ValueTemplate::Literal),
        }
    }

    ///
    /// Resolves against the consumer's binding. A template that is exactly one placeholder
    /// preserves the referenced value's type; anything else interpolates into a string.
    ///
    pub fn resolve(&self, binding: &crate::params::Binding) -> Result<Value, String> {
        match self {
            ValueTemplate::Literal(value) => Ok(value.clone()),
            ValueTemplate::Template(template) => {
                let lookup = |name: &str| {
                    binding.get(name).cloned().ok_or_else(|| {
                        format!("Input override references unknown parameter '{name}'")
                    })
                };
                if let Some(name) = template
                    .strip_prefix('{')
                    .and_then(|t| t.strip_suffix('}'))
                {
                    if !name.contains(['{', '}']) {
                        return lookup(name);
                    }
                }
                let mut out = String::new();
                let mut rest = template.as_str();
                while let Some(open) = rest.find('{') {
                    out.push_str(&rest[..open]);
                    rest = &rest[open + 1..];
                    let close = rest
                        .find('}')
                        .ok_or_else(|| format!("Unbalanced braces in template '{template}'"))?;
                    out.push_str(&lookup(&rest[..close])?.canonical());
                    rest = &rest[close + 1..];
                }
                out.push_str(rest);
                Ok(Value::Str(out))
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OutputSchema {
    pub descr: String,
}

///
/// The callable side of a task. Actions receive the bound parameters, the resolved outputs of
/// their inputs, and a mutable output map which they may fill in, replace with non-path
/// values, or clear.
///
pub trait Action {
    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), String>;
}

impl<F> Action for F
where
    F: Fn(&mut RunContext<'_>) -> Result<(), String>,
{
    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), String> {
        self(ctx)
    }
}

///
/// Context handed to an action factory: the remainder of the task file's `[run]` table, and
/// the directory containing the task file for resolving relative paths.
///
pub struct ActionConfig<'a> {
    pub table: &'a toml::value::Table,
    pub task_dir: &'a Path,
}

pub type ActionFactory = Box<dyn Fn(&ActionConfig<'_>) -> Result<Arc<dyn Action>, String>>;

///
/// Named constructors for task actions. Task files select an action by name in their `[run]`
/// table; embedders may register additional ones.
///
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl ActionRegistry {
    pub fn new() -> ActionRegistry {
        ActionRegistry {
            factories: BTreeMap::new(),
        }
    }

    ///
    /// A registry holding the built-in actions.
    ///
    pub fn with_builtins() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        crate::actions::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, factory: ActionFactory) {
        self.factories.insert(name.to_owned(), factory);
    }

    fn build(&self, name: &str, config: &ActionConfig<'_>) -> Result<Arc<dyn Action>, String> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| format!("Unknown action '{name}'"))?;
        factory(config)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    descr: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, RawParam>,
    #[serde(default)]
    inputs: BTreeMap<String, RawInput>,
    #[serde(default)]
    outputs: BTreeMap<String, RawOutput>,
    run: Option<RawRun>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParam {
    descr: Option<String>,
    #[serde(default)]
    required: bool,
    default: Option<toml::Value>,
    valid: Option<Vec<toml::Value>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInput {
    task: String,
    #[serde(default)]
    params: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    descr: Option<String>,
}

#[derive(Deserialize)]
struct RawRun {
    action: String,
    #[serde(flatten)]
    config: toml::value::Table,
}

impl Task {
    pub fn new(
        name: &str,
        descr: &str,
        params: BTreeMap<String, ParamSchema>,
        inputs: BTreeMap<String, InputRef>,
        outputs: BTreeMap<String, OutputSchema>,
        action: Arc<dyn Action>,
    ) -> Task {
        Task {
            name: name.to_owned(),
            descr: descr.to_owned(),
            params,
            inputs,
            outputs,
            action,
        }
    }

    ///
    /// Loads one task definition file. Schema violations are fatal with a diagnostic naming
    /// the file and the offending element.
    ///
    pub fn load(name: &str, path: &Path, registry: &ActionRegistry) -> Result<Task, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read task file {}: {e}", path.display()))?;
        let raw: RawTask = toml::from_str(&text)
            .map_err(|e| format!("Failed to parse task file {}: {e}", path.display()))?;
        let context = |e: String| format!("In task file {}: {e}", path.display());

        let mut params = BTreeMap::new();
        for (pname, raw_param) in raw.params {
            params.insert(
                pname.clone(),
                param_schema(&pname, raw_param).map_err(context)?,
            );
        }

        let mut inputs = BTreeMap::new();
        for (alias, raw_input) in raw.inputs {
            let mut overrides = BTreeMap::new();
            for (pname, value) in &raw_input.params {
                overrides.insert(
                    pname.clone(),
                    ValueTemplate::from_toml(value).map_err(context)?,
                );
            }
            inputs.insert(
                alias,
                InputRef {
                    task: raw_input.task,
                    params: overrides,
                },
            );
        }

        let outputs = raw
            .outputs
            .into_iter()
            .map(|(oname, raw_output)| {
                (
                    oname,
                    OutputSchema {
                        descr: raw_output.descr.unwrap_or_default(),
                    },
                )
            })
            .collect();

        let run = raw
            .run
            .ok_or_else(|| context(format!("Task '{name}' has no run action")))?;
        let task_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let action = registry
            .build(
                &run.action,
                &ActionConfig {
                    table: &run.config,
                    task_dir,
                },
            )
            .map_err(context)?;

        Ok(Task {
            name: name.to_owned(),
            descr: raw.descr.unwrap_or_default(),
            params,
            inputs,
            outputs,
            action,
        })
    }
}

fn param_schema(name: &str, raw: RawParam) -> Result<ParamSchema, String> {
    let default = raw.default.as_ref().map(Value::from_toml).transpose()?;
    if raw.required && default.is_some() {
        return Err(format!(
            "Parameter '{name}' cannot be both required and defaulted"
        ));
    }
    let valid = match raw.valid {
        None => Check::Any,
        Some(values) => Check::OneOf(
            values
                .iter()
                .map(Value::from_toml)
                .collect::<Result<_, _>>()?,
        ),
    };
    if let Some(default) = &default {
        valid.validate(name, default)?;
    }
    Ok(ParamSchema {
        descr: raw.descr.unwrap_or_default(),
        required: raw.required,
        default,
        valid,
    })
}

