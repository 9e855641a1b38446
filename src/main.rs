// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{Parser, Subcommand};

use taskmill::{
    print_schedule, resolve, ActionRegistry, CliOverride, RunOptions, TaskSched, TaskUniverse,
    WorkRoot,
};

#[derive(Parser)]
#[command(name = "taskmill", about = "A dependency-driven workflow runner.")]
struct Opts {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print every discovered task name.
    List {
        /// Task discovery root.
        #[arg(long)]
        taskdir: Option<PathBuf>,
    },
    /// Build and run (or show) the schedule for a task.
    Runtask {
        /// Parameter override, as [alias-path:]param=value.
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Parallelism hint passed to task actions.
        #[arg(short = 'j', long)]
        maxjobs: Option<usize>,

        /// Clean the workdir of the node at this alias path (and its consumers) first.
        #[arg(short = 'c', long = "clean")]
        clean: Vec<String>,

        /// Clean the entire work root first.
        #[arg(short = 'C', long = "clean-all")]
        clean_all: bool,

        /// Print the schedule instead of running it.
        #[arg(short = 's', long)]
        show: bool,

        /// Work root directory.
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Task discovery root.
        #[arg(long)]
        taskdir: Option<PathBuf>,

        /// The target task.
        task: Option<String>,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Opts::parse()) {
        eprintln!("{e}");
        exit(1);
    }
}

fn run(opts: Opts) -> Result<(), String> {
    let registry = ActionRegistry::with_builtins();
    match opts.command {
        Cmd::List { taskdir } => list(&taskdir_or_default(taskdir)?, &registry),
        Cmd::Runtask { task: None, taskdir, .. } => list(&taskdir_or_default(taskdir)?, &registry),
        Cmd::Runtask {
            params,
            maxjobs,
            clean,
            clean_all,
            show,
            workdir,
            taskdir,
            task: Some(task),
        } => {
            let universe = TaskUniverse::load(&taskdir_or_default(taskdir)?, &registry)?;
            let overrides = params
                .iter()
                .map(|spec| CliOverride::parse(spec))
                .collect::<Result<Vec<_>, _>>()?;
            let schedule = resolve(&universe, &task, &overrides)?;
            if show {
                return print_schedule(&schedule, io::stdout().lock())
                    .map_err(|e| format!("Failed to print schedule: {e}"));
            }

            let workroot = WorkRoot::create(&workdir_or_default(workdir)?)?;
            let jobdb = jobdb::JobDb::open(Path::new("jobs.db"))?;
            let mut sched = TaskSched::new(workroot, jobdb);
            let options = RunOptions {
                maxjobs: maxjobs.unwrap_or_else(num_cpus::get),
                clean,
                clean_all,
            };
            sched.execute(&schedule, &options)?;
            sched.into_jobdb().close()
        }
    }
}

fn list(taskdir: &Path, registry: &ActionRegistry) -> Result<(), String> {
    let universe = TaskUniverse::load(taskdir, registry)?;
    for name in universe.names() {
        println!("{name}");
    }
    Ok(())
}

fn taskdir_or_default(flag: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os("TASKMILL_TASKDIR") {
        return Ok(PathBuf::from(dir));
    }
    let exe = std::env::current_exe()
        .map_err(|e| format!("Failed to locate this executable: {e}"))?;
    Ok(exe
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("tasks"))
}

fn workdir_or_default(flag: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os("TASKMILL_WORKDIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs_next::home_dir()
        .map(|home| home.join("taskmill"))
        .ok_or_else(|| "Cannot determine a home directory for the default workdir".to_owned())
}
