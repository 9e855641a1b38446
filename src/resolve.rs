// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use hashing::{Fingerprint, WriterHasher};

use crate::params::{bind, Binding, CliOverride, Value};
use crate::task::Task;
use crate::universe::TaskUniverse;

///
/// One node of the schedule: a task, its fully-resolved binding, and the identity derived from
/// both. Nodes that share `(task name, fingerprint)` are deduplicated, so an entry may be
/// consumed under several alias paths.
///
#[derive(Debug)]
pub struct ScheduleEntry {
    pub task: Arc<Task>,
    pub binding: Binding,
    pub fingerprint: Fingerprint,
    /// Every alias path that reaches this node, in traversal order; the root entry's only
    /// path is empty. A deduplicated node accumulates one path per consumer edge.
    pub alias_paths: Vec<String>,
    /// Input alias to the index of the producing entry, always earlier in the schedule.
    pub inputs: BTreeMap<String, usize>,
}

///
/// A topologically ordered schedule: every entry appears after all of its inputs, and the
/// target task is the final entry.
///
#[derive(Debug)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn target(&self) -> &ScheduleEntry {
        self.entries.last().expect("a schedule is never empty")
    }

    ///
    /// The indices of the entries reached by the given alias paths, plus all of their
    /// transitive consumers.
    ///
    pub fn with_consumers(&self, aliases: &[String]) -> Result<HashSet<usize>, String> {
        let mut selected = HashSet::new();
        for alias in aliases {
            let found = self
                .entries
                .iter()
                .position(|e| e.alias_paths.iter().any(|path| path == alias))
                .ok_or_else(|| format!("Clean target '{alias}' is not in the schedule"))?;
            selected.insert(found);
        }
        // Entries are topologically ordered, so one forward pass closes over consumers.
        for index in 0..self.entries.len() {
            if self.entries[index]
                .inputs
                .values()
                .any(|input| selected.contains(input))
            {
                selected.insert(index);
            }
        }
        Ok(selected)
    }
}

///
/// Resolves the transitive dependency graph of the target task into a schedule: a depth-first
/// traversal that binds parameters on the way down (consumer overrides projected into each
/// input) and fingerprints on the way up.
///
pub fn resolve(
    universe: &TaskUniverse,
    target: &str,
    overrides: &[CliOverride],
) -> Result<Schedule, String> {
    let task = universe
        .get(target)
        .ok_or_else(|| format!("Unknown task '{target}'"))?;

    let mut resolver = Resolver {
        universe,
        overrides,
        consumed: vec![false; overrides.len()],
        entries: Vec::new(),
        by_identity: HashMap::new(),
        visiting: Vec::new(),
    };
    resolver.node(task.clone(), &[], BTreeMap::new())?;

    if let Some(unconsumed) = resolver.consumed.iter().position(|used| !used) {
        let spec = &overrides[unconsumed];
        return Err(format!(
            "Binding parameter to non-existent input alias '{}'",
            spec.alias_path.join(":")
        ));
    }
    Ok(Schedule {
        entries: resolver.entries,
    })
}

struct Resolver<'a> {
    universe: &'a TaskUniverse,
    overrides: &'a [CliOverride],
    consumed: Vec<bool>,
    entries: Vec<ScheduleEntry>,
    by_identity: HashMap<(String, Fingerprint), usize>,
    visiting: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn node(
        &mut self,
        task: Arc<Task>,
        alias_path: &[String],
        consumer_overrides: BTreeMap<String, Value>,
    ) -> Result<usize, String> {
        if self.visiting.iter().any(|name| *name == task.name) {
            return Err(format!(
                "Dependency cycle detected: {} -> {}",
                self.visiting.join(" -> "),
                task.name
            ));
        }
        self.visiting.push(task.name.clone());

        // Parameters bind before inputs resolve: overrides flow downward only.
        let cli = self.scoped_overrides(alias_path);
        let binding = bind(&task, &cli, &consumer_overrides)?;

        let mut inputs = BTreeMap::new();
        for (alias, input_ref) in &task.inputs {
            let input_task = self.universe.get(&input_ref.task).ok_or_else(|| {
                format!(
                    "Task '{}' declares input '{alias}' referencing unknown task '{}'",
                    task.name, input_ref.task
                )
            })?;
            let mut projected = BTreeMap::new();
            for (name, template) in &input_ref.params {
                projected.insert(name.clone(), template.resolve(&binding)?);
            }
            let mut child_path = alias_path.to_vec();
            child_path.push(alias.clone());
            let index = self.node(input_task.clone(), &child_path, projected)?;
            inputs.insert(alias.clone(), index);
        }

        self.visiting.pop();

        let fingerprint = node_fingerprint(
            &task.name,
            &binding,
            inputs
                .iter()
                .map(|(alias, &index)| (alias.as_str(), self.entries[index].fingerprint)),
        );

        let identity = (task.name.clone(), fingerprint);
        if let Some(&existing) = self.by_identity.get(&identity) {
            // The node is shared: remember this path too, so that clean targets and the
            // schedule listing can address it from any of its consumers.
            self.entries[existing].alias_paths.push(alias_path.join(":"));
            return Ok(existing);
        }
        self.entries.push(ScheduleEntry {
            task,
            binding,
            fingerprint,
            alias_paths: vec![alias_path.join(":")],
            inputs,
        });
        let index = self.entries.len() - 1;
        self.by_identity.insert(identity, index);
        Ok(index)
    }

    ///
    /// The command-line overrides addressed to the node at the given alias path, marking them
    /// consumed so that unmatched paths are reported afterwards.
    ///
    fn scoped_overrides(&mut self, alias_path: &[String]) -> BTreeMap<String, Value> {
        let mut scoped = BTreeMap::new();
        for (index, spec) in self.overrides.iter().enumerate() {
            if spec.alias_path == alias_path {
                self.consumed[index] = true;
                scoped.insert(spec.param.clone(), spec.value.clone());
            }
        }
        scoped
    }
}

///
/// A stable identity for a node: the task name, the canonical form of the binding, and the
/// fingerprints of all resolved inputs.
///
pub fn node_fingerprint<'a>(
    task_name: &str,
    binding: &Binding,
    inputs: impl Iterator<Item = (&'a str, Fingerprint)>,
) -> Fingerprint {
    let mut hasher = WriterHasher::sink();
    // Infallible writes: the sink cannot error.
    let _ = writeln!(hasher, "task {task_name}");
    for (name, value) in binding {
        let _ = writeln!(hasher, "param {name}={}", value.canonical());
    }
    for (alias, fingerprint) in inputs {
        let _ = writeln!(hasher, "input {alias}={}", fingerprint.to_hex());
    }
    hasher.finish().0
}

