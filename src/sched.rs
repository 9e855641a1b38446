// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;

use hashing::Fingerprint;
use jobdb::{JobDb, JobRecord, JobStatus};
use log::{debug, info};

use crate::params::{Binding, Value};
use crate::resolve::Schedule;
use crate::workdir::WorkRoot;

///
/// An artifact produced by a completed entry: the declared filesystem slot, or a plain value
/// the action substituted for it.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    Path(PathBuf),
    Data(Value),
}

///
/// The outputs of one resolved input, exposed to a consuming action under its alias.
///
#[derive(Clone, Debug)]
pub struct ResolvedInput {
    pub task: String,
    pub outputs: BTreeMap<String, Output>,
}

///
/// What an action sees while it runs. Outputs start as the materialized paths; the action may
/// replace entries with data values or clear them, and surviving entries are recorded when it
/// returns.
///
pub struct RunContext<'a> {
    /// A hint for parallelism internal to the action; tasks themselves never run in parallel.
    pub maxjobs: usize,
    pub tmpdir: PathBuf,
    /// Set when stdout is not a terminal.
    pub quiet: bool,
    pub workdir: PathBuf,
    pub params: &'a Binding,
    pub inputs: &'a BTreeMap<String, ResolvedInput>,
    pub outputs: &'a mut BTreeMap<String, Option<Output>>,
}

///
/// Options for one scheduler run.
///
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub maxjobs: usize,
    /// Alias paths whose entries (and transitive consumers) are cleaned before running.
    pub clean: Vec<String>,
    pub clean_all: bool,
}

///
/// The sequential executor: walks a schedule in order, reusing completed jobs recorded in the
/// job database and invoking actions for the rest.
///
pub struct TaskSched {
    workroot: WorkRoot,
    jobdb: JobDb,
    quiet: bool,
}

impl TaskSched {
    pub fn new(workroot: WorkRoot, jobdb: JobDb) -> TaskSched {
        let quiet = !nix::unistd::isatty(1).unwrap_or(false);
        TaskSched {
            workroot,
            jobdb,
            quiet,
        }
    }

    ///
    /// Runs every entry of the schedule in order. An entry is skipped when the job database
    /// has a successful record under its fingerprint and its workdir is intact; its recorded
    /// outputs still flow to consumers. The first action failure abandons the remainder.
    ///
    pub fn execute(&mut self, schedule: &Schedule, options: &RunOptions) -> Result<(), String> {
        let cleaned = self.clean(schedule, options)?;

        let mut results: Vec<BTreeMap<String, Output>> = Vec::with_capacity(schedule.entries.len());
        for (index, entry) in schedule.entries.iter().enumerate() {
            let fingerprint = entry.fingerprint;
            let cached = !cleaned.contains(&index)
                && self.lookup_success(fingerprint)?
                && self.workroot.intact(&entry.task.name, fingerprint);
            if cached {
                debug!("reusing job {} for task {}", fingerprint, entry.task.name);
                results.push(self.cached_outputs(entry, fingerprint));
                continue;
            }

            info!("running task {}", entry.task.name);
            let output_paths = self.workroot.materialize(&entry.task, fingerprint)?;
            let mut outputs: BTreeMap<String, Option<Output>> = output_paths
                .into_iter()
                .map(|(name, path)| (name, Some(Output::Path(path))))
                .collect();
            let inputs: BTreeMap<String, ResolvedInput> = entry
                .inputs
                .iter()
                .map(|(alias, &input_index)| {
                    (
                        alias.clone(),
                        ResolvedInput {
                            task: schedule.entries[input_index].task.name.clone(),
                            outputs: results[input_index].clone(),
                        },
                    )
                })
                .collect();

            let mut ctx = RunContext {
                maxjobs: options.maxjobs.max(1),
                tmpdir: self.workroot.tmpdir(),
                quiet: self.quiet,
                workdir: self.workroot.entry_dir(&entry.task.name, fingerprint),
                params: &entry.binding,
                inputs: &inputs,
                outputs: &mut outputs,
            };
            entry
                .task
                .action
                .run(&mut ctx)
                .map_err(|e| format!("Task '{}' failed: {e}", entry.task.name))?;

            self.jobdb.insert(&JobRecord::new(
                fingerprint,
                entry.task.name.clone(),
                self.workroot.entry_dir(&entry.task.name, fingerprint),
                JobStatus::Succeeded,
            ))?;
            results.push(
                outputs
                    .into_iter()
                    .filter_map(|(name, output)| output.map(|o| (name, o)))
                    .collect(),
            );
        }
        Ok(())
    }

    fn clean(&mut self, schedule: &Schedule, options: &RunOptions) -> Result<HashSet<usize>, String> {
        if options.clean_all {
            self.workroot.clean_all()?;
            for entry in &schedule.entries {
                self.jobdb.invalidate(entry.fingerprint)?;
            }
            return Ok((0..schedule.entries.len()).collect());
        }
        let selected = schedule.with_consumers(&options.clean)?;
        for &index in &selected {
            let entry = &schedule.entries[index];
            self.workroot.clean_entry(&entry.task.name, entry.fingerprint)?;
            self.jobdb.invalidate(entry.fingerprint)?;
        }
        Ok(selected)
    }

    fn lookup_success(&self, fingerprint: Fingerprint) -> Result<bool, String> {
        Ok(self
            .jobdb
            .lookup(fingerprint)?
            .is_some_and(|record| record.status == JobStatus::Succeeded))
    }

    ///
    /// The outputs of a reused entry: the declared paths, as materialized by the earlier run.
    ///
    fn cached_outputs(
        &self,
        entry: &crate::resolve::ScheduleEntry,
        fingerprint: Fingerprint,
    ) -> BTreeMap<String, Output> {
        let dir = self.workroot.entry_dir(&entry.task.name, fingerprint);
        entry
            .task
            .outputs
            .keys()
            .map(|name| (name.clone(), Output::Path(dir.join(name))))
            .collect()
    }

    pub fn into_jobdb(self) -> JobDb {
        self.jobdb
    }
}

///
/// Prints the ordered schedule without invoking any action: each node's position, name, alias
/// path, binding, and inputs.
///
pub fn print_schedule(schedule: &Schedule, mut out: impl Write) -> std::io::Result<()> {
    for (index, entry) in schedule.entries.iter().enumerate() {
        let aliases: Vec<&str> = entry
            .alias_paths
            .iter()
            .map(|path| if path.is_empty() { "<target>" } else { path })
            .collect();
        writeln!(out, "{index}: {} ({})", entry.task.name, aliases.join(", "))?;
        writeln!(out, "    fingerprint: {}", entry.fingerprint)?;
        for (name, value) in &entry.binding {
            writeln!(out, "    param {name} = {value}")?;
        }
        for (input_alias, input_index) in &entry.inputs {
            writeln!(
                out,
                "    input {input_alias} <- {} ({input_index})",
                schedule.entries[*input_index].task.name
            )?;
        }
    }
    Ok(())
}

