use std::time::Duration;

use serde::Serialize;

use crate::errors::PerfnpError;

/// A variable with the values it can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One concrete command line produced from the experiment template.
///
/// `index` is the job's identity across restarts; the ledger stores nothing
/// else about which job a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub index: u32,
    pub command: String,
    pub arguments: Vec<String>,
}

impl Job {
    pub fn new(index: u32, command: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            index,
            command: command.into(),
            arguments,
        }
    }
}

/// Outcome of one job: exit code and runtime in whole seconds (never zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    exit_code: i32,
    runtime: u32,
}

impl ExecResult {
    pub fn new(exit_code: i32, runtime: u32) -> Result<Self, PerfnpError> {
        if runtime == 0 {
            return Err(PerfnpError::ZeroRuntime);
        }
        Ok(Self { exit_code, runtime })
    }

    /// Builds a result from a measured duration, rounding up to whole seconds.
    pub fn from_elapsed(exit_code: i32, elapsed: Duration) -> Self {
        Self {
            exit_code,
            runtime: ceil_seconds(elapsed),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn runtime(&self) -> u32 {
        self.runtime
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Ceiling of `elapsed` in seconds, at least 1, saturating at `u32::MAX`.
pub fn ceil_seconds(elapsed: Duration) -> u32 {
    let mut secs = elapsed.as_secs();
    if elapsed.subsec_nanos() > 0 {
        secs = secs.saturating_add(1);
    }
    u32::try_from(secs.max(1)).unwrap_or(u32::MAX)
}
