//! Persistent record of runs and finished jobs, used to resume experiments.
//!
//! The ledger is an SQLite database. Every invocation that records results
//! owns one row in `run`; every finished job adds one row to `job` (and its
//! printable command line to `command`). Which jobs are "already done" is
//! always answered from these tables, never from process state, so an
//! interrupted experiment can be resumed by a completely new process.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::{Connection, ErrorCode, OptionalExtension, ffi, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::errors::PerfnpError;
use crate::shell::escape_for_native_shell;
use crate::types::{ExecResult, Job};

const STARTED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS run (
    run_id INTEGER PRIMARY KEY,
    started DATETIME
);
CREATE TABLE IF NOT EXISTS job (
    job_id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL,
    job_index INTEGER NOT NULL,
    timeout INTEGER NOT NULL,
    exit_code INTEGER NOT NULL,
    runtime INTEGER NOT NULL,
    FOREIGN KEY (run_id) REFERENCES run(run_id)
);
CREATE UNIQUE INDEX IF NOT EXISTS job_run_index ON job (run_id, job_index);
CREATE TABLE IF NOT EXISTS command (
    job_id INTEGER NOT NULL UNIQUE,
    commands TEXT NOT NULL,
    FOREIGN KEY (job_id) REFERENCES job(job_id)
);
CREATE TABLE IF NOT EXISTS image (
    run_id INTEGER NOT NULL UNIQUE,
    config_file TEXT NOT NULL,
    command_file BLOB NOT NULL,
    FOREIGN KEY (run_id) REFERENCES run(run_id)
);
";

/// One row of `run` with a digest of its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: NaiveDateTime,
    pub jobs: usize,
    /// Largest timeout any of the run's jobs was recorded with.
    pub timeout: Option<u32>,
}

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Opens (creating if needed) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, PerfnpError> {
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened ledger");
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, PerfnpError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, PerfnpError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Creates a new run and returns its id.
    pub fn start_run(&self) -> Result<i64, PerfnpError> {
        self.conn.execute(
            "INSERT INTO run (run_id, started) VALUES (NULL, datetime('now', 'localtime'))",
            [],
        )?;
        let run_id = self.conn.last_insert_rowid();
        info!(run_id, "started run");
        Ok(run_id)
    }

    /// Local time at which the run was started.
    pub fn run_started_at(&self, run_id: i64) -> Result<NaiveDateTime, PerfnpError> {
        let started: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT started FROM run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match started {
            None => Err(PerfnpError::RunNotFound { run_id }),
            Some(value) => parse_started(run_id, value),
        }
    }

    /// Stores the experiment description and the benchmarked binary for a run.
    ///
    /// A run keeps the first image saved for it; resuming into the same run
    /// does not overwrite it.
    pub fn save_image(
        &self,
        run_id: i64,
        config_text: &str,
        command_content: &[u8],
    ) -> Result<(), PerfnpError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO image (run_id, config_file, command_file) VALUES (?1, ?2, ?3)",
                params![run_id, config_text, command_content],
            )
            .map_err(|e| map_constraint(e, run_id, None))?;
        Ok(())
    }

    /// Stores the result of a finished job and returns the new job id.
    pub fn record_job(
        &mut self,
        run_id: i64,
        job: &Job,
        timeout: u32,
        result: &ExecResult,
    ) -> Result<i64, PerfnpError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO job (job_id, run_id, job_index, timeout, exit_code, runtime)
             VALUES (NULL, ?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                job.index,
                timeout,
                result.exit_code(),
                result.runtime()
            ],
        )
        .map_err(|e| map_constraint(e, run_id, Some(job.index)))?;
        let job_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO command (job_id, commands) VALUES (?1, ?2)",
            params![job_id, escape_for_native_shell(job)],
        )?;

        tx.commit()?;
        debug!(run_id, job_index = job.index, job_id, "recorded job");
        Ok(job_id)
    }

    /// The most recently started run that has at least one recorded job.
    pub fn latest_run_with_jobs(&self) -> Result<Option<i64>, PerfnpError> {
        let run_id: Option<i64> = self.conn.query_row(
            "SELECT MAX(run.run_id) FROM run JOIN job ON job.run_id = run.run_id",
            [],
            |row| row.get(0),
        )?;
        Ok(run_id)
    }

    /// Indices of the jobs recorded for `run_id`.
    pub fn finished_job_indices(&self, run_id: i64) -> Result<HashSet<u32>, PerfnpError> {
        let mut stmt = self
            .conn
            .prepare("SELECT job_index FROM job WHERE run_id = ?1")?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, i64>(0))?;

        let mut indices = HashSet::new();
        for index in rows {
            indices.insert(to_u32("job_index", index?)?);
        }
        Ok(indices)
    }

    /// Drops every job already recorded in the most recent run with any
    /// recorded job. Jobs are matched by index only.
    pub fn filter_pending(&self, mut jobs: Vec<Job>) -> Result<Vec<Job>, PerfnpError> {
        let Some(run_id) = self.latest_run_with_jobs()? else {
            return Ok(jobs);
        };

        let finished = self.finished_job_indices(run_id)?;
        let before = jobs.len();
        jobs.retain(|job| !finished.contains(&job.index));
        info!(
            run_id,
            skipped = before - jobs.len(),
            pending = jobs.len(),
            "filtered jobs finished in previous run"
        );
        Ok(jobs)
    }

    /// Results recorded for `run_id`, ordered by job index.
    pub fn dataset_for_run(&self, run_id: i64, timeout: u32) -> Result<Dataset, PerfnpError> {
        let mut stmt = self.conn.prepare(
            "SELECT exit_code, runtime FROM job WHERE run_id = ?1 ORDER BY job_index",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (exit_code, runtime) = row?;
            let exit_code = i32::try_from(exit_code).map_err(|_| PerfnpError::CorruptRecord {
                column: "exit_code",
                value: exit_code,
            })?;
            results.push(ExecResult::new(exit_code, to_u32("runtime", runtime)?)?);
        }
        Ok(Dataset::new(timeout, results))
    }

    /// All runs, oldest first.
    pub fn runs(&self) -> Result<Vec<RunRecord>, PerfnpError> {
        let mut stmt = self.conn.prepare(
            "SELECT run.run_id, run.started, COUNT(job.job_id), MAX(job.timeout)
             FROM run LEFT JOIN job ON job.run_id = run.run_id
             GROUP BY run.run_id
             ORDER BY run.run_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, started, jobs, timeout) = row?;
            runs.push(RunRecord {
                run_id,
                started_at: parse_started(run_id, started)?,
                jobs: usize::try_from(jobs).map_err(|_| PerfnpError::CorruptRecord {
                    column: "job_id",
                    value: jobs,
                })?,
                timeout: timeout.map(|t| to_u32("timeout", t)).transpose()?,
            });
        }
        Ok(runs)
    }
}

fn parse_started(run_id: i64, value: Option<String>) -> Result<NaiveDateTime, PerfnpError> {
    let value = value.unwrap_or_default();
    NaiveDateTime::parse_from_str(&value, STARTED_FORMAT)
        .map_err(|_| PerfnpError::MalformedTimestamp { run_id, value })
}

fn to_u32(column: &'static str, value: i64) -> Result<u32, PerfnpError> {
    u32::try_from(value).map_err(|_| PerfnpError::CorruptRecord { column, value })
}

fn map_constraint(err: rusqlite::Error, run_id: i64, job_index: Option<u32>) -> PerfnpError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err
        && failure.code == ErrorCode::ConstraintViolation
    {
        match (failure.extended_code, job_index) {
            (ffi::SQLITE_CONSTRAINT_FOREIGNKEY, _) => {
                return PerfnpError::RunNotFound { run_id };
            }
            (ffi::SQLITE_CONSTRAINT_UNIQUE, Some(job_index)) => {
                return PerfnpError::DuplicateJobRecord { run_id, job_index };
            }
            _ => {}
        }
    }
    PerfnpError::Ledger(err)
}
