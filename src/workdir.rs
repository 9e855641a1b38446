// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use hashing::Fingerprint;
use log::debug;

use crate::task::Task;

///
/// The on-disk layout of a work root: `tmp/` for scratch space, and one directory per
/// schedule entry at `<task-name>/<fingerprint>/`, holding a subdirectory per declared
/// output. Identical nodes reuse the same directory across runs.
///
pub struct WorkRoot {
    root: PathBuf,
}

impl WorkRoot {
    pub fn create(root: &Path) -> Result<WorkRoot, String> {
        let workroot = WorkRoot {
            root: root.to_owned(),
        };
        fs::create_dir_all(workroot.tmpdir())
            .map_err(|e| format!("Failed to create work root {}: {e}", root.display()))?;
        Ok(workroot)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn tmpdir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn entry_dir(&self, task_name: &str, fingerprint: Fingerprint) -> PathBuf {
        self.root.join(task_name).join(fingerprint.to_hex())
    }

    ///
    /// Whether the entry's directory survives from an earlier run.
    ///
    pub fn intact(&self, task_name: &str, fingerprint: Fingerprint) -> bool {
        self.entry_dir(task_name, fingerprint).is_dir()
    }

    ///
    /// Creates the entry's directory with an empty subdirectory per declared output, and
    /// returns the output paths.
    ///
    pub fn materialize(
        &self,
        task: &Task,
        fingerprint: Fingerprint,
    ) -> Result<BTreeMap<String, PathBuf>, String> {
        let dir = self.entry_dir(&task.name, fingerprint);
        let mut outputs = BTreeMap::new();
        for name in task.outputs.keys() {
            let path = dir.join(name);
            fs::create_dir_all(&path)
                .map_err(|e| format!("Failed to create output dir {}: {e}", path.display()))?;
            outputs.insert(name.clone(), path);
        }
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create workdir {}: {e}", dir.display()))?;
        Ok(outputs)
    }

    pub fn clean_entry(&self, task_name: &str, fingerprint: Fingerprint) -> Result<(), String> {
        let dir = self.entry_dir(task_name, fingerprint);
        if dir.exists() {
            debug!("cleaning {}", dir.display());
            fs::remove_dir_all(&dir)
                .map_err(|e| format!("Failed to clean {}: {e}", dir.display()))?;
        }
        Ok(())
    }

    ///
    /// Removes everything under the root, then re-initializes the scratch area.
    ///
    pub fn clean_all(&self) -> Result<(), String> {
        if self.root.exists() {
            debug!("cleaning work root {}", self.root.display());
            fs::remove_dir_all(&self.root)
                .map_err(|e| format!("Failed to clean {}: {e}", self.root.display()))?;
        }
        fs::create_dir_all(self.tmpdir())
            .map_err(|e| format!("Failed to recreate work root: {e}"))?;
        Ok(())
    }

    ///
    /// All `(task name, fingerprint)` entries present under the root.
    ///
    pub fn entries(&self) -> Result<Vec<(String, Fingerprint)>, String> {
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(2) {
            let entry = entry.map_err(|e| format!("Failed to walk work root: {e}"))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(leaf) = entry.file_name().to_str() else {
                continue;
            };
            let Ok(fingerprint) = Fingerprint::from_hex_string(leaf) else {
                continue;
            };
            let task_name = entry
                .path()
                .parent()
                .and_then(|p| p.strip_prefix(&self.root).ok())
                .map(|p| {
                    p.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            found.push((task_name, fingerprint));
        }
        Ok(found)
    }
}

