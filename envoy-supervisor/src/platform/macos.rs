use crate::{platform::ProcessGroupControl, PlatformError};
use std::process::Command;
use unsafe_macos_process::{
    configure_process_group, safe_force_kill_process_tree, safe_interrupt_process,
    UnsafeMacOSError,
};

/// macOS process group control.
///
/// There is no parent death signal, so a forced kill walks the child's own
/// children first.
#[derive(Debug, Default)]
pub struct MacOSProcessGroup;

impl MacOSProcessGroup {
    pub fn new() -> Self {
        tracing::debug!("macOS process group control initialized (tree kill)");
        Self
    }
}

impl ProcessGroupControl for MacOSProcessGroup {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn apply_group_attributes(&self, command: &mut Command) {
        configure_process_group(command);
    }

    fn interrupt(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Sending SIGINT to {}", pid);
        safe_interrupt_process(pid).map_err(convert_error)
    }

    fn force_kill(&self, pid: u32) -> Result<(), PlatformError> {
        tracing::debug!("Killing process tree rooted at {}", pid);
        safe_force_kill_process_tree(pid).map_err(convert_error)
    }
}

fn convert_error(error: UnsafeMacOSError) -> PlatformError {
    match error {
        UnsafeMacOSError::SystemCallFailed { syscall, errno } => {
            PlatformError::SystemCallFailed { syscall, errno }
        }
        UnsafeMacOSError::InvalidParameter { details } => {
            PlatformError::InvalidParameter { details }
        }
        UnsafeMacOSError::PermissionDenied { operation } => {
            PlatformError::PermissionDenied { operation }
        }
    }
}
