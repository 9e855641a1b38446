// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A dependency-driven workflow runner. Tasks are declarative units with parameters, inputs,
//! outputs and an action; a run resolves the target's transitive dependency graph into a
//! topologically ordered schedule, binds and validates parameters, and executes each node in
//! order, reusing results recorded in a persistent job database.

pub mod actions;
pub mod params;
pub mod resolve;
pub mod sched;
pub mod task;
#[cfg(test)]
mod testutil;
pub mod universe;
pub mod workdir;

#[cfg(test)]
mod task_tests;
#[cfg(test)]
mod universe_tests;
#[cfg(test)]
mod workdir_tests;

pub use params::{Binding, Check, CliOverride, Value};
pub use resolve::{resolve, Schedule, ScheduleEntry};
pub use sched::{print_schedule, Output, ResolvedInput, RunContext, RunOptions, TaskSched};
pub use task::{Action, ActionRegistry, InputRef, OutputSchema, ParamSchema, Task};
pub use universe::TaskUniverse;
pub use workdir::WorkRoot;
