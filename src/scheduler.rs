use tracing::info;

use crate::dataset::Dataset;
use crate::errors::PerfnpError;
use crate::exec;
use crate::types::{ExecResult, Job};

/// Runs every job in order, one at a time, and collects the results.
///
/// `observer` sees each `(job, timeout, result)` as soon as the job finishes,
/// before the next one starts. An error from the runner or the observer stops
/// the loop and is returned; jobs already observed stay observed.
pub fn execute_all_runs<F>(jobs: &[Job], timeout: u32, observer: F) -> Result<Dataset, PerfnpError>
where
    F: FnMut(&Job, u32, &ExecResult) -> Result<(), PerfnpError>,
{
    execute_with(jobs, timeout, exec::run_job, observer)
}

/// [`execute_all_runs`] with the job runner supplied by the caller.
pub fn execute_with<R, F>(
    jobs: &[Job],
    timeout: u32,
    mut runner: R,
    mut observer: F,
) -> Result<Dataset, PerfnpError>
where
    R: FnMut(&Job, u32) -> Result<ExecResult, PerfnpError>,
    F: FnMut(&Job, u32, &ExecResult) -> Result<(), PerfnpError>,
{
    let mut results = Vec::with_capacity(jobs.len());

    for job in jobs {
        let result = runner(job, timeout)?;
        info!(
            job_index = job.index,
            exit_code = result.exit_code(),
            runtime = result.runtime(),
            "job finished"
        );
        observer(job, timeout, &result)?;
        results.push(result);
    }

    Ok(Dataset::new(timeout, results))
}
