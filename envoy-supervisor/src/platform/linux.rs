use crate::{platform::ProcessGroupControl, PlatformError};
use std::process::Command;
use unsafe_linux_process::{
    configure_process_group, safe_force_kill_process, safe_interrupt_process, UnsafeLinuxError,
};

/// Linux process group control: own process group plus a parent death signal
#[derive(Debug, Default)]
pub struct LinuxProcessGroup;

impl LinuxProcessGroup {
    pub fn new() -> Self {
        tracing::debug!("Linux process group control initialized (pdeathsig: SIGKILL)");
        Self
    }
}

impl ProcessGroupControl for LinuxProcessGroup {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn apply_group_attributes(&self, command: &mut Command) {
        configure_process_group(command);
    }

    fn interrupt(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Sending SIGINT to {}", pid);
        safe_interrupt_process(pid).map_err(convert_error)
    }

    fn force_kill(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Sending SIGKILL to {}", pid);
        safe_force_kill_process(pid).map_err(convert_error)
    }
}

fn convert_error(error: UnsafeLinuxError) -> PlatformError {
    match error {
        UnsafeLinuxError::SystemCallFailed { syscall, errno } => {
            PlatformError::SystemCallFailed { syscall, errno }
        }
        UnsafeLinuxError::InvalidParameter { details } => {
            PlatformError::InvalidParameter { details }
        }
        UnsafeLinuxError::PermissionDenied { operation } => {
            PlatformError::PermissionDenied { operation }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_after_exit_is_ok() {
        let control = LinuxProcessGroup::new();
        let mut command = Command::new("/bin/true");
        control.apply_group_attributes(&mut command);
        let mut child = command.spawn().expect("Failed to spawn true");
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert!(control.interrupt(child.id()).is_ok());
        assert!(control.force_kill(child.id()).is_ok());
        child.wait().expect("Failed to reap child");
    }

    #[test]
    fn test_pid_zero_is_rejected() {
        let control = LinuxProcessGroup::new();
        assert!(matches!(
            control.force_kill(0),
            Err(PlatformError::InvalidParameter { .. })
        ));
    }
}
