use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;
use std::os::windows::process::CommandExt;
use std::process::{Child, Command};
use std::ptr;
use std::time::{Duration, Instant};

use windows_sys::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{
    CREATE_SUSPENDED, INFINITE, OpenThread, ResumeThread, THREAD_SUSPEND_RESUME,
    WaitForSingleObject,
};

use super::{Completion, Outcome};
use crate::errors::PerfnpError;

/// Exit code reported for a job killed on timeout (`WAIT_TIMEOUT`). It is
/// also the code every process in the terminated job object exits with.
pub const TIMEOUT_EXIT_CODE: i32 = 258;

/// Longest single wait; `INFINITE` itself means no limit.
const MAX_WAIT_MS: u32 = INFINITE - 1;

/// Owned handle, closed on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Job object that kills every process still in it when it is closed.
struct JobObject(OwnedHandle);

impl JobObject {
    fn new() -> io::Result<Self> {
        let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let job = Self(OwnedHandle(handle));

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let ok = unsafe {
            SetInformationJobObject(
                job.handle(),
                JobObjectExtendedLimitInformation,
                &info as *const JOBOBJECT_EXTENDED_LIMIT_INFORMATION as *const c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(job)
    }

    fn handle(&self) -> HANDLE {
        self.0.0
    }

    fn assign(&self, child: &Child) -> io::Result<()> {
        let ok = unsafe { AssignProcessToJobObject(self.handle(), child.as_raw_handle() as HANDLE) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn terminate(&self, exit_code: u32) -> io::Result<()> {
        let ok = unsafe { TerminateJobObject(self.handle(), exit_code) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Resumes every thread of a process started with `CREATE_SUSPENDED`.
fn resume_process(pid: u32) -> io::Result<()> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let snapshot = OwnedHandle(snapshot);

    let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;

    let mut resumed = 0;
    let mut more = unsafe { Thread32First(snapshot.0, &mut entry) } != 0;
    while more {
        if entry.th32OwnerProcessID == pid {
            let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID) };
            if thread.is_null() {
                return Err(io::Error::last_os_error());
            }
            let thread = OwnedHandle(thread);
            if unsafe { ResumeThread(thread.0) } == u32::MAX {
                return Err(io::Error::last_os_error());
            }
            resumed += 1;
        }
        more = unsafe { Thread32Next(snapshot.0, &mut entry) } != 0;
    }

    if resumed == 0 {
        return Err(io::Error::other("no thread of the new process found"));
    }
    Ok(())
}

pub(super) fn spawn_and_wait(
    binary: &str,
    mut cmd: Command,
    limit: Option<Duration>,
) -> Result<Outcome, PerfnpError> {
    let spawn_error = |source: io::Error| PerfnpError::SpawnError {
        binary: binary.to_string(),
        source,
    };
    let wait_error = |source: io::Error| PerfnpError::WaitError {
        binary: binary.to_string(),
        source,
    };

    let job = JobObject::new().map_err(spawn_error)?;

    // The child starts suspended so it cannot create processes before it
    // is inside the job object.
    cmd.creation_flags(CREATE_SUSPENDED);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(spawn_error)?;
    if let Err(source) = job.assign(&child).and_then(|_| resume_process(child.id())) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_error(source));
    }

    // A limit beyond what `Instant` can represent is no limit at all.
    let deadline = limit.and_then(|limit| start.checked_add(limit));
    let handle = child.as_raw_handle() as HANDLE;

    // Waits are capped at MAX_WAIT_MS, so long limits take several rounds.
    let timed_out = loop {
        let wait_ms = match deadline {
            None => INFINITE,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                u32::try_from(remaining.as_millis())
                    .unwrap_or(MAX_WAIT_MS)
                    .min(MAX_WAIT_MS)
            }
        };

        match unsafe { WaitForSingleObject(handle, wait_ms) } {
            WAIT_OBJECT_0 => break false,
            WAIT_TIMEOUT if deadline.is_some_and(|d| Instant::now() < d) => continue,
            WAIT_TIMEOUT => {
                job.terminate(TIMEOUT_EXIT_CODE as u32)
                    .map_err(|source| PerfnpError::KillError {
                        binary: binary.to_string(),
                        source,
                    })?;
                break true;
            }
            _ => {
                let source = io::Error::last_os_error();
                let _ = job.terminate(TIMEOUT_EXIT_CODE as u32);
                let _ = child.wait();
                return Err(wait_error(source));
            }
        }
    };

    let status = child.wait().map_err(wait_error)?;
    let elapsed = start.elapsed();

    // Kill whatever the job left running before the next job starts.
    if !timed_out {
        let _ = job.terminate(TIMEOUT_EXIT_CODE as u32);
    }

    let completion = if timed_out {
        Completion::TimedOut
    } else {
        // Windows always reports an exit code; it is a u32 reinterpreted as i32.
        Completion::Exited(status.code().unwrap_or(TIMEOUT_EXIT_CODE))
    };

    Ok(Outcome {
        completion,
        elapsed,
    })
}
