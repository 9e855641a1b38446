// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use hashing::Fingerprint;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

///
/// A persistent record of completed jobs, keyed by node fingerprint.
///
/// The store holds one row per fingerprint: the task that produced it, the workdir holding its
/// outputs, a creation timestamp, and a completion status. The scheduler consults it before
/// running a node, inserts after a successful run, and invalidates when a workdir is cleaned.
///
/// The database is opened at schedule start and closed at schedule end. Concurrent writers are
/// not supported.
///
pub struct JobDb {
    conn: Connection,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRecord {
    pub fingerprint: Fingerprint,
    pub task_name: String,
    pub workdir: PathBuf,
    pub created_at: u64,
    pub status: JobStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<JobStatus, String> {
        match s {
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unrecognized job status: {other}")),
        }
    }
}

impl JobRecord {
    ///
    /// A record stamped with the current time.
    ///
    pub fn new(
        fingerprint: Fingerprint,
        task_name: String,
        workdir: PathBuf,
        status: JobStatus,
    ) -> JobRecord {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        JobRecord {
            fingerprint,
            task_name,
            workdir,
            created_at,
            status,
        }
    }
}

impl JobDb {
    ///
    /// Opens the database at the given path, creating it and its schema on first use.
    ///
    pub fn open(path: &Path) -> Result<JobDb, String> {
        let conn = Connection::open(path)
            .map_err(|e| format!("Failed to open job database at {}: {e}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
               fingerprint TEXT PRIMARY KEY,
               task_name   TEXT NOT NULL,
               workdir     TEXT NOT NULL,
               created_at  INTEGER NOT NULL,
               status      TEXT NOT NULL
             )",
        )
        .map_err(|e| format!("Failed to initialize job database: {e}"))?;
        Ok(JobDb { conn })
    }

    pub fn lookup(&self, fingerprint: Fingerprint) -> Result<Option<JobRecord>, String> {
        self.conn
            .query_row(
                "SELECT task_name, workdir, created_at, status FROM jobs WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u64,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| format!("Job database lookup failed: {e}"))?
            .map(|(task_name, workdir, created_at, status)| {
                Ok(JobRecord {
                    fingerprint,
                    task_name,
                    workdir: PathBuf::from(workdir),
                    created_at,
                    status: JobStatus::parse(&status)?,
                })
            })
            .transpose()
    }

    ///
    /// Records a completed job, replacing any previous record for the same fingerprint.
    ///
    pub fn insert(&self, record: &JobRecord) -> Result<(), String> {
        debug!(
            "recording job {} for task {}",
            record.fingerprint, record.task_name
        );
        self.conn
            .execute(
                "INSERT OR REPLACE INTO jobs (fingerprint, task_name, workdir, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.fingerprint.to_hex(),
                    record.task_name,
                    record.workdir.to_string_lossy(),
                    record.created_at as i64,
                    record.status.as_str(),
                ],
            )
            .map_err(|e| format!("Job database insert failed: {e}"))?;
        Ok(())
    }

    ///
    /// Drops the record for a fingerprint, if any. Invoked when the corresponding workdir is
    /// cleaned, so that the next schedule re-runs the node.
    ///
    pub fn invalidate(&self, fingerprint: Fingerprint) -> Result<(), String> {
        debug!("invalidating job {fingerprint}");
        self.conn
            .execute(
                "DELETE FROM jobs WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
            )
            .map_err(|e| format!("Job database invalidation failed: {e}"))?;
        Ok(())
    }

    pub fn close(self) -> Result<(), String> {
        self.conn
            .close()
            .map_err(|(_conn, e)| format!("Failed to close job database: {e}"))
    }
}
