use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PerfnpError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {detail}")]
    ConfigParseError { path: PathBuf, detail: String },

    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error("Name of the executable must not be empty")]
    EmptyBinary,

    #[error("Runtime of a finished job must be at least 1 second")]
    ZeroRuntime,

    #[error("Failed to start '{binary}': {source}")]
    SpawnError {
        binary: String,
        source: std::io::Error,
    },

    #[error("Failed to wait for '{binary}': {source}")]
    WaitError {
        binary: String,
        source: std::io::Error,
    },

    #[error("Failed to terminate the process tree of '{binary}': {source}")]
    KillError {
        binary: String,
        source: std::io::Error,
    },

    #[error("Failed to write the job log: {source}")]
    JobLogError { source: std::io::Error },

    #[error("Ledger database error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("Run {run_id} is not present in the ledger")]
    RunNotFound { run_id: i64 },

    #[error("Run {run_id} has a malformed start time '{value}'")]
    MalformedTimestamp { run_id: i64, value: String },

    #[error("Job {job_index} was already recorded for run {run_id}")]
    DuplicateJobRecord { run_id: i64, job_index: u32 },

    #[error("Ledger column '{column}' holds {value}, which is out of range")]
    CorruptRecord { column: &'static str, value: i64 },
}
