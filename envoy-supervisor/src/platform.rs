//! Platform abstraction layer for controlling the supervised process group

use crate::PlatformError;
use std::process::Command;
use std::sync::Arc;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

/// One interrupt/kill contract regardless of the primitives the OS offers.
///
/// Every implementation treats a process that has already exited as success,
/// so `interrupt` and `force_kill` may be called any number of times.
pub trait ProcessGroupControl: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    /// Apply process attributes before spawn: own process group where supported
    /// and death of the child if the supervisor dies unexpectedly
    fn apply_group_attributes(&self, command: &mut Command);

    /// Take ownership of a freshly spawned child, for platforms that need a
    /// handle on it beyond spawn attributes
    fn adopt(&self, _pid: u32) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Ask the process to exit gracefully
    fn interrupt(&self, pid: u32) -> Result<(), PlatformError>;

    /// Terminate the process unconditionally
    fn force_kill(&self, pid: u32) -> Result<(), PlatformError>;
}

/// Create the process group control for the current system
pub fn create_process_group_control() -> Result<Arc<dyn ProcessGroupControl>, PlatformError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(linux::LinuxProcessGroup::new()))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::MacOSProcessGroup::new()))
    }

    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsProcessGroup::new()))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(PlatformError::ResourceUnavailable {
            resource: "Unsupported platform".to_string(),
        })
    }
}
