use crate::{platform::ProcessGroupControl, PlatformError};
use std::process::Command;
use std::sync::Mutex;
use unsafe_windows_process::{
    configure_process_group, force_kill_process, generate_ctrl_break, UnsafeWindowsError,
    WindowsJobObject,
};

/// Windows process group control.
///
/// The child leads a new console process group so it can receive Ctrl-Break,
/// and is adopted into a kill-on-close Job Object held for the supervisor's
/// lifetime.
pub struct WindowsProcessGroup {
    job: Mutex<Option<WindowsJobObject>>,
}

impl WindowsProcessGroup {
    pub fn new() -> Self {
        tracing::debug!("Windows process group control initialized (job object)");
        Self {
            job: Mutex::new(None),
        }
    }
}

impl ProcessGroupControl for WindowsProcessGroup {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn apply_group_attributes(&self, command: &mut Command) {
        configure_process_group(command);
    }

    fn adopt(&self, pid: u32) -> Result<(), PlatformError> {
        let mut job = self.job.lock().map_err(|_| PlatformError::ResourceUnavailable {
            resource: "job object lock".to_string(),
        })?;
        if job.is_none() {
            *job = Some(WindowsJobObject::new().map_err(convert_error)?);
        }
        if let Some(job) = job.as_ref() {
            job.assign_pid(pid).map_err(convert_error)?;
        }
        tracing::debug!("Assigned {} to job object", pid);
        Ok(())
    }

    fn interrupt(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Sending CTRL_BREAK_EVENT to {}", pid);
        generate_ctrl_break(pid).map_err(convert_error)
    }

    fn force_kill(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Terminating {}", pid);
        force_kill_process(pid).map_err(convert_error)
    }
}

fn convert_error(error: UnsafeWindowsError) -> PlatformError {
    match error {
        UnsafeWindowsError::CallFailed { function, code } => PlatformError::SystemCallFailed {
            syscall: function.to_string(),
            errno: code,
        },
        UnsafeWindowsError::ProcessGone { pid } => PlatformError::ResourceUnavailable {
            resource: format!("process {}", pid),
        },
    }
}
