use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::warn;

use super::{Completion, Outcome};
use crate::errors::PerfnpError;

/// Exit code reported for a job killed on timeout. Real exit codes are
/// `0..=255` and signal deaths `129..=192`, so this never collides.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

pub(super) fn spawn_and_wait(
    binary: &str,
    mut cmd: Command,
    limit: Option<Duration>,
) -> Result<Outcome, PerfnpError> {
    // The child leads a fresh process group so a timeout can take down
    // everything it spawned.
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| PerfnpError::SpawnError {
        binary: binary.to_string(),
        source,
    })?;
    let pgid = Pid::from_raw(child.id() as i32);

    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    let mut timed_out = false;
    let received = match limit {
        None => rx.recv().ok(),
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(status) => Some(status),
            Err(RecvTimeoutError::Timeout) => {
                timed_out = kill_process_group(binary, pgid)?;
                rx.recv().ok()
            }
            Err(RecvTimeoutError::Disconnected) => None,
        },
    };
    let elapsed = start.elapsed();
    let _ = waiter.join();

    // Background children of a job that exited on its own must not keep
    // running into the next job's measurement.
    if !timed_out
        && let Err(err) = kill_process_group(binary, pgid)
    {
        warn!(%err, "could not clean up processes left behind by the job");
    }

    let status = received
        .ok_or_else(|| io::Error::other("child waiter exited without a status"))
        .and_then(|status| status)
        .map_err(|source| PerfnpError::WaitError {
            binary: binary.to_string(),
            source,
        })?;

    let completion = if timed_out {
        Completion::TimedOut
    } else {
        Completion::Exited(exit_code_of(status))
    };

    Ok(Outcome {
        completion,
        elapsed,
    })
}

/// Returns `false` when the group was already gone: nothing outlived the
/// job, or it finished on its own right at the deadline.
fn kill_process_group(binary: &str, pgid: Pid) -> Result<bool, PerfnpError> {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(PerfnpError::KillError {
            binary: binary.to_string(),
            source: io::Error::from(errno),
        }),
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 128,
    }
}
