//! Timeout-bounded execution of a single job.
//!
//! [`run`] behaves the same on every platform: the runtime is the elapsed
//! wall-clock time rounded up to whole seconds, and a job that hits its
//! timeout is killed together with every process it started and reports
//! [`TIMEOUT_EXIT_CODE`]. Processes a job leaves behind after exiting on
//! its own are killed as well, so nothing overlaps the next job.
//!
//! | platform | subtree mechanism            | `TIMEOUT_EXIT_CODE`  |
//! |----------|------------------------------|----------------------|
//! | POSIX    | process group + `SIGKILL`    | `-1`                 |
//! | Windows  | job object + `TerminateJobObject` | `258` (`WAIT_TIMEOUT`) |

use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::PerfnpError;
use crate::types::{ExecResult, Job};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as platform;

pub use platform::TIMEOUT_EXIT_CODE;

pub(crate) enum Completion {
    Exited(i32),
    TimedOut,
}

pub(crate) struct Outcome {
    completion: Completion,
    elapsed: Duration,
}

/// Runs `binary` with `args` and waits at most `timeout` seconds (`0` waits forever).
///
/// The binary is started directly, without a shell, and with its standard
/// streams connected to the null device. Failing to start it is an error;
/// a nonzero exit or a timeout is a regular result.
pub fn run(binary: &str, args: &[String], timeout: u32) -> Result<ExecResult, PerfnpError> {
    if binary.is_empty() {
        return Err(PerfnpError::EmptyBinary);
    }

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let limit = (timeout > 0).then(|| Duration::from_secs(u64::from(timeout)));

    debug!(binary, ?args, timeout, "spawning job");
    let outcome = platform::spawn_and_wait(binary, cmd, limit)?;

    let exit_code = match outcome.completion {
        Completion::Exited(code) => code,
        Completion::TimedOut => {
            warn!(binary, timeout, "job timed out and was killed");
            TIMEOUT_EXIT_CODE
        }
    };

    Ok(ExecResult::from_elapsed(exit_code, outcome.elapsed))
}

/// Runs one job of an experiment.
pub fn run_job(job: &Job, timeout: u32) -> Result<ExecResult, PerfnpError> {
    run(&job.command, &job.arguments, timeout)
}
