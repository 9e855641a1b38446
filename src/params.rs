// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fmt;

///
/// A parameter value. Values have a canonical string form used for display, for comparison
/// against validation lists, and for fingerprinting; command-line overrides arrive as strings
/// and compare canonically against typed defaults.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn canonical(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }

    ///
    /// Equality in canonical form, so that `-p jobs=4` satisfies an integer default or
    /// validation list.
    ///
    pub fn matches(&self, other: &Value) -> bool {
        self.canonical() == other.canonical()
    }

    pub fn from_toml(value: &toml::Value) -> Result<Value, String> {
        match value {
            toml::Value::String(s) => Ok(Value::Str(s.clone())),
            toml::Value::Integer(i) => Ok(Value::Int(*i)),
            toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
            other => Err(format!("Unsupported parameter value: {other}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

///
/// The fully-resolved parameter map for one schedulable node.
///
pub type Binding = BTreeMap<String, Value>;

///
/// The accepted values of a parameter: anything, membership in a list, or an arbitrary
/// predicate. Lists are declarable in task files; predicates are available to tasks
/// registered from code.
///
#[derive(Clone)]
pub enum Check {
    Any,
    OneOf(Vec<Value>),
    Predicate(fn(&Value) -> bool),
}

impl Check {
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), String> {
        let ok = match self {
            Check::Any => true,
            Check::OneOf(allowed) => allowed.iter().any(|v| v.matches(value)),
            Check::Predicate(f) => f(value),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "Validation of parameter '{name}' value '{value}' failed"
            ))
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Any => write!(f, "Any"),
            Check::OneOf(values) => f.debug_tuple("OneOf").field(values).finish(),
            Check::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

///
/// One `-p [alias-path:]param=value` override from the command line. An empty alias path
/// targets the schedule's root task; a non-empty path follows declared input aliases from the
/// root to a descendant node.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CliOverride {
    pub alias_path: Vec<String>,
    pub param: String,
    pub value: Value,
}

impl CliOverride {
    pub fn parse(spec: &str) -> Result<CliOverride, String> {
        let (key, value) = spec.split_once('=').ok_or_else(|| {
            format!("Malformed parameter override '{spec}' (expected [alias:]param=value)")
        })?;
        let mut segments: Vec<String> = key.split(':').map(str::to_owned).collect();
        let param = segments.pop().expect("split yields at least one segment");
        if param.is_empty() || segments.iter().any(String::is_empty) {
            return Err(format!(
                "Malformed parameter override '{spec}' (expected [alias:]param=value)"
            ));
        }
        Ok(CliOverride {
            alias_path: segments,
            param,
            value: Value::Str(value.to_owned()),
        })
    }
}

///
/// Merges and validates the parameters of one node. Precedence, highest first: command-line
/// overrides scoped to the node, overrides declared by the consuming task, the parameter's
/// own default.
///
pub fn bind(
    task: &crate::task::Task,
    cli: &BTreeMap<String, Value>,
    consumer: &BTreeMap<String, Value>,
) -> Result<Binding, String> {
    for name in cli.keys() {
        if !task.params.contains_key(name) {
            return Err(format!("Binding non-existent parameter '{name}'"));
        }
    }
    for name in consumer.keys() {
        if !task.params.contains_key(name) {
            return Err(format!(
                "Input override for task '{}' binds non-existent parameter '{name}'",
                task.name
            ));
        }
    }

    let mut binding = Binding::new();
    for (name, schema) in &task.params {
        let value = cli
            .get(name)
            .or_else(|| consumer.get(name))
            .cloned()
            .or_else(|| schema.default.clone());
        match value {
            Some(value) => {
                schema.valid.validate(name, &value)?;
                binding.insert(name.clone(), value);
            }
            None if schema.required => {
                return Err(format!(
                    "Parameter '{name}' of task '{}' is required but not set",
                    task.name
                ));
            }
            None => (),
        }
    }
    Ok(binding)
}

