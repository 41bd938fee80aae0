//! Unsafe macOS process group operations with safe wrappers
//!
//! This crate provides safe wrappers around the macOS system calls the supervisor
//! needs to control its child. macOS has process groups but no parent death
//! signal, so force termination also has to find and kill the child's own
//! children. All unsafe operations are contained within this crate and exposed
//! through safe APIs.

#![cfg(target_os = "macos")]

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Upper bound on the number of direct children we look at
const MAX_CHILD_PIDS: usize = 1024;

/// Errors that can occur during unsafe macOS operations
#[derive(Debug, thiserror::Error)]
pub enum UnsafeMacOSError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },
}

/// Place the command's child in its own process group.
///
/// This keeps a terminal Ctrl-C from reaching the child before the supervisor's
/// shutdown hooks have run.
pub fn configure_process_group(command: &mut Command) {
    command.process_group(0);
}

/// Safely send SIGINT to a process. A process that no longer exists is not an error.
pub fn safe_interrupt_process(pid: u32) -> Result<(), UnsafeMacOSError> {
    send_signal(pid, libc::SIGINT, "kill(SIGINT)")
}

/// Safely send SIGKILL to a process. A process that no longer exists is not an error.
pub fn safe_force_kill_process(pid: u32) -> Result<(), UnsafeMacOSError> {
    send_signal(pid, libc::SIGKILL, "kill(SIGKILL)")
}

/// Find the direct children of a process
pub fn safe_find_child_processes(parent_pid: u32) -> Result<Vec<u32>, UnsafeMacOSError> {
    if parent_pid == 0 || parent_pid > i32::MAX as u32 {
        return Err(UnsafeMacOSError::InvalidParameter {
            details: format!("invalid parent pid {}", parent_pid),
        });
    }

    let mut buffer: Vec<libc::pid_t> = vec![0; MAX_CHILD_PIDS];
    let buffer_size = (buffer.len() * std::mem::size_of::<libc::pid_t>()) as libc::c_int;

    // SAFETY: the buffer is valid for buffer_size bytes for the duration of the call
    let count = unsafe {
        libc::proc_listchildpids(
            parent_pid as libc::pid_t,
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer_size,
        )
    };

    if count < 0 {
        let errno = last_errno();
        if errno == libc::ESRCH {
            return Ok(Vec::new());
        }
        return Err(UnsafeMacOSError::SystemCallFailed {
            syscall: "proc_listchildpids".to_string(),
            errno,
        });
    }

    let count = (count as usize).min(buffer.len());
    Ok(buffer[..count]
        .iter()
        .filter(|pid| **pid > 0)
        .map(|pid| *pid as u32)
        .collect())
}

/// Kill the children of a process, then the process itself.
///
/// Without a parent death signal the children would otherwise be orphaned.
pub fn safe_force_kill_process_tree(pid: u32) -> Result<(), UnsafeMacOSError> {
    // Best effort: a process that has just exited has no children to list.
    let children = safe_find_child_processes(pid).unwrap_or_default();
    for child in children {
        safe_force_kill_process(child)?;
    }
    safe_force_kill_process(pid)
}

fn send_signal(pid: u32, signal: libc::c_int, syscall: &str) -> Result<(), UnsafeMacOSError> {
    // pid 0 and negative pids address whole groups
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(UnsafeMacOSError::InvalidParameter {
            details: format!("refusing to signal pid {}", pid),
        });
    }

    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };

    if result == -1 {
        let errno = last_errno();
        return match errno {
            // Process doesn't exist, which is fine
            libc::ESRCH => Ok(()),
            libc::EPERM => Err(UnsafeMacOSError::PermissionDenied {
                operation: syscall.to_string(),
            }),
            _ => Err(UnsafeMacOSError::SystemCallFailed {
                syscall: syscall.to_string(),
                errno,
            }),
        };
    }

    Ok(())
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn process_group_of(pid: u32) -> i32 {
        let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
        assert_ne!(pgid, -1, "getpgid failed: {}", io::Error::last_os_error());
        pgid
    }

    /// Signal 0 checks existence; EPERM still means the process exists
    fn is_process_running(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 } || last_errno() == libc::EPERM
    }

    #[test]
    fn test_child_gets_its_own_process_group() {
        let mut command = Command::new("/bin/sleep");
        command.arg("30");
        configure_process_group(&mut command);

        let mut child = command.spawn().expect("Failed to spawn sleep");
        let pid = child.id();

        let pgid = process_group_of(pid);
        assert_eq!(pgid, pid as i32, "child should lead its own process group");

        safe_force_kill_process(pid).expect("Failed to kill child");
        child.wait().expect("Failed to reap child");
    }

    #[test]
    fn test_force_kill_tree_kills_grandchildren() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "sleep 30 & wait"]);
        configure_process_group(&mut command);

        let mut child = command.spawn().expect("Failed to spawn sh");
        let pid = child.id();

        let mut grandchildren = Vec::new();
        for _ in 0..50 {
            grandchildren = safe_find_child_processes(pid).expect("Failed to list children");
            if !grandchildren.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(grandchildren.len(), 1, "sh should have one sleep child");

        safe_force_kill_process_tree(pid).expect("Failed to kill tree");
        child.wait().expect("Failed to reap child");

        thread::sleep(Duration::from_millis(200));
        assert!(!is_process_running(grandchildren[0]));
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999999));
    }
}
