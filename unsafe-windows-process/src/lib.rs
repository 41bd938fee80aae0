//! Windows primitives for supervising one child process
//!
//! Windows has neither process groups in the POSIX sense nor a parent death
//! signal. The supervisor instead starts Envoy as the root of a new console
//! group (so Ctrl-Break can be aimed at it alone) and puts it in a job object
//! that kills its members when the supervisor's handle is closed.
//!
//! Every `unsafe` block in the supervisor's Windows path lives here.

#![cfg(windows)]

use std::io;
use std::mem;
use std::os::windows::process::CommandExt;
use std::process::Command;
use std::ptr;
use thiserror::Error;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, WAIT_TIMEOUT};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::jobapi2::{AssignProcessToJobObject, CreateJobObjectW, SetInformationJobObject};
use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{CREATE_NEW_PROCESS_GROUP, WAIT_FAILED, WAIT_OBJECT_0};
use winapi::um::wincon::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use winapi::um::winnt::{
    JobObjectExtendedLimitInformation, HANDLE, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, PROCESS_QUERY_INFORMATION, PROCESS_SET_QUOTA,
    PROCESS_TERMINATE, SYNCHRONIZE,
};

/// Grace a force kill gives the process to finish exiting by itself
const EXIT_GRACE_MS: DWORD = 100;

#[derive(Error, Debug)]
pub enum UnsafeWindowsError {
    #[error("{function} failed with Windows error {code}")]
    CallFailed { function: &'static str, code: i32 },

    #[error("process {pid} no longer exists")]
    ProcessGone { pid: u32 },
}

impl UnsafeWindowsError {
    fn last(function: &'static str) -> Self {
        Self::CallFailed {
            function,
            code: last_error_code(),
        }
    }
}

fn last_error_code() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(-1)
}

/// A kernel handle closed exactly once, on drop
struct OwnedHandle(HANDLE);

// SAFETY: a kernel handle is a process-wide token, usable from any thread
unsafe impl Send for OwnedHandle {}
// SAFETY: only the kernel mutates the object behind the handle
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Take ownership of `raw`, or `None` when the call that produced it failed
    fn from_raw(raw: HANDLE) -> Option<Self> {
        if raw.is_null() || raw == INVALID_HANDLE_VALUE {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: from_raw only accepts valid handles and nothing else closes them
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Job object whose members die when the last handle to it is closed
pub struct WindowsJobObject {
    job: OwnedHandle,
}

impl WindowsJobObject {
    pub fn new() -> Result<Self, UnsafeWindowsError> {
        // SAFETY: null attributes and name create an anonymous job with default security
        let raw = unsafe { CreateJobObjectW(ptr::null_mut(), ptr::null()) };
        let job = OwnedHandle::from_raw(raw)
            .ok_or_else(|| UnsafeWindowsError::last("CreateJobObjectW"))?;

        // SAFETY: the structure is plain data for which all zeroes is valid
        let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

        // SAFETY: `limits` lives across the call and the size matches its type
        let ok = unsafe {
            SetInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                &mut limits as *mut _ as *mut _,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as DWORD,
            )
        };
        if ok == 0 {
            return Err(UnsafeWindowsError::last("SetInformationJobObject"));
        }
        Ok(Self { job })
    }

    /// Put the running process `pid` into the job
    pub fn assign_pid(&self, pid: u32) -> Result<(), UnsafeWindowsError> {
        let process = ProcessHandle::open(pid, PROCESS_SET_QUOTA | PROCESS_TERMINATE)?;
        // SAFETY: both handles are owned and open for the duration of the call
        let ok = unsafe { AssignProcessToJobObject(self.job.0, process.0 .0) };
        if ok == 0 {
            return Err(UnsafeWindowsError::last("AssignProcessToJobObject"));
        }
        Ok(())
    }
}

/// Start the command's child as the root of a new console process group.
///
/// Console Ctrl-C aimed at the supervisor then leaves the child alone; the
/// supervisor decides when to stop it with [`generate_ctrl_break`].
pub fn configure_process_group(command: &mut Command) {
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Deliver Ctrl-Break to the console group rooted at `pid`.
///
/// Windows reports a group whose root already exited as
/// `ERROR_INVALID_PARAMETER`; that counts as delivered.
pub fn generate_ctrl_break(pid: u32) -> Result<(), UnsafeWindowsError> {
    // SAFETY: the call only takes integers
    if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } != 0 {
        return Ok(());
    }
    match last_error_code() {
        code if code == ERROR_INVALID_PARAMETER as i32 => Ok(()),
        code => Err(UnsafeWindowsError::CallFailed {
            function: "GenerateConsoleCtrlEvent",
            code,
        }),
    }
}

/// Terminate `pid` unless it exits within a short grace. Safe to repeat.
pub fn force_kill_process(pid: u32) -> Result<(), UnsafeWindowsError> {
    let process = match ProcessHandle::open(
        pid,
        PROCESS_TERMINATE | PROCESS_QUERY_INFORMATION | SYNCHRONIZE,
    ) {
        Ok(process) => process,
        Err(UnsafeWindowsError::ProcessGone { .. }) => return Ok(()),
        Err(e) => return Err(e),
    };
    if process.wait(EXIT_GRACE_MS)? {
        return Ok(());
    }
    process.terminate()
}

struct ProcessHandle(OwnedHandle);

impl ProcessHandle {
    fn open(pid: u32, access: DWORD) -> Result<Self, UnsafeWindowsError> {
        // SAFETY: OpenProcess has no preconditions; failure is a null handle
        let raw = unsafe { OpenProcess(access, FALSE, pid) };
        match OwnedHandle::from_raw(raw) {
            Some(handle) => Ok(Self(handle)),
            None => match last_error_code() {
                code if code == ERROR_INVALID_PARAMETER as i32 => {
                    Err(UnsafeWindowsError::ProcessGone { pid })
                }
                code => Err(UnsafeWindowsError::CallFailed {
                    function: "OpenProcess",
                    code,
                }),
            },
        }
    }

    /// Whether the process exited within `timeout_ms`
    fn wait(&self, timeout_ms: DWORD) -> Result<bool, UnsafeWindowsError> {
        // SAFETY: the handle was opened with SYNCHRONIZE and is still owned
        match unsafe { WaitForSingleObject(self.0 .0, timeout_ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            WAIT_FAILED => Err(UnsafeWindowsError::last("WaitForSingleObject")),
            other => Err(UnsafeWindowsError::CallFailed {
                function: "WaitForSingleObject",
                code: other as i32,
            }),
        }
    }

    fn terminate(&self) -> Result<(), UnsafeWindowsError> {
        // SAFETY: the handle was opened with PROCESS_TERMINATE and is still owned
        if unsafe { TerminateProcess(self.0 .0, 1) } != 0 {
            return Ok(());
        }
        // A process already on its way out denies further termination
        match last_error_code() {
            code if code == ERROR_ACCESS_DENIED as i32 => Ok(()),
            code => Err(UnsafeWindowsError::CallFailed {
                function: "TerminateProcess",
                code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_object_creation() {
        WindowsJobObject::new().expect("job object");
    }

    #[test]
    fn test_null_handle_is_not_owned() {
        assert!(OwnedHandle::from_raw(ptr::null_mut()).is_none());
        assert!(OwnedHandle::from_raw(INVALID_HANDLE_VALUE).is_none());
    }

    #[test]
    fn test_force_kill_is_idempotent() {
        let mut command = Command::new("ping");
        command.args(["127.0.0.1", "-n", "30"]);
        configure_process_group(&mut command);
        let mut child = command.spawn().expect("Failed to spawn ping");

        force_kill_process(child.id()).expect("first force kill");
        child.wait().expect("Failed to reap child");
        force_kill_process(child.id()).expect("second force kill");
    }

    #[test]
    fn test_ctrl_break_to_exited_group_is_ok() {
        let mut command = Command::new("cmd");
        command.args(["/C", "exit 0"]);
        configure_process_group(&mut command);
        let mut child = command.spawn().expect("Failed to spawn cmd");
        let pid = child.id();
        child.wait().expect("Failed to reap child");

        generate_ctrl_break(pid).expect("ctrl-break after exit");
    }
}
