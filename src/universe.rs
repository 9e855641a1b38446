// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::task::{ActionRegistry, Task};

pub const TASK_EXTENSION: &str = "task";

///
/// All tasks discovered under a root directory, keyed by name: the file's path relative to the
/// root, minus its extension. `<root>/a/b/c.task` loads as task `a/b/c`.
///
#[derive(Debug)]
pub struct TaskUniverse {
    tasks: BTreeMap<String, Arc<Task>>,
}

impl TaskUniverse {
    pub fn new() -> TaskUniverse {
        TaskUniverse {
            tasks: BTreeMap::new(),
        }
    }

    ///
    /// Walks the root recursively and loads every `.task` file. Other files are skipped, as
    /// are dangling symlinks.
    ///
    pub fn load(root: &Path, registry: &ActionRegistry) -> Result<TaskUniverse, String> {
        let mut universe = TaskUniverse::new();
        for entry in walkdir::WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                // A dangling symlink stats to nothing; skip it silently.
                Err(e)
                    if e.io_error().map(|io| io.kind())
                        == Some(std::io::ErrorKind::NotFound) =>
                {
                    debug!("ignoring dangling symlink under {}", root.display());
                    continue;
                }
                Err(e) => return Err(format!("Failed to walk task directory: {e}")),
            };
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(TASK_EXTENSION) {
                continue;
            }
            let name = path
                .strip_prefix(root)
                .map_err(|e| format!("Task path escapes the root: {e}"))?
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let task = Task::load(&name, path, registry)?;
            universe.insert(task)?;
        }
        debug!("loaded {} tasks from {}", universe.tasks.len(), root.display());
        Ok(universe)
    }

    pub fn insert(&mut self, task: Task) -> Result<(), String> {
        let name = task.name.clone();
        if self.tasks.insert(name.clone(), Arc::new(task)).is_some() {
            return Err(format!("Duplicate task name '{name}'"));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    ///
    /// Task names in sorted order.
    ///
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

