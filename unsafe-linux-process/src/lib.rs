//! Unsafe Linux process group operations with safe wrappers
//!
//! This crate provides safe wrappers around the Linux system calls the supervisor
//! needs to control its child: process group placement, the parent death signal,
//! and signal delivery. All unsafe operations are contained within this crate and
//! exposed through safe APIs.

#![cfg(target_os = "linux")]

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Errors that can occur during unsafe Linux operations
#[derive(Debug, thiserror::Error)]
pub enum UnsafeLinuxError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },
}

/// Place the command's child in its own process group and make the kernel
/// SIGKILL it when the spawning thread of this process dies.
///
/// The child is in a separate group so that a terminal Ctrl-C reaches only the
/// supervisor, which can then run its shutdown hooks before forwarding the
/// interrupt. If the supervisor already died between fork and exec, the child
/// kills itself instead of running unsupervised.
pub fn configure_process_group(command: &mut Command) {
    command.process_group(0);

    let supervisor_pid = unsafe { libc::getpid() };

    // SAFETY: the closure runs between fork and exec and only calls
    // async-signal-safe functions (prctl, getppid, raise).
    unsafe {
        command.pre_exec(move || {
            if libc::prctl(
                libc::PR_SET_PDEATHSIG,
                libc::SIGKILL as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            ) == -1
            {
                return Err(io::Error::last_os_error());
            }
            if libc::getppid() != supervisor_pid {
                libc::raise(libc::SIGKILL);
            }
            Ok(())
        });
    }
}

/// Safely send SIGINT to a process. A process that no longer exists is not an error.
pub fn safe_interrupt_process(pid: u32) -> Result<(), UnsafeLinuxError> {
    send_signal(pid, libc::SIGINT, "kill(SIGINT)")
}

/// Safely send SIGKILL to a process. A process that no longer exists is not an error.
pub fn safe_force_kill_process(pid: u32) -> Result<(), UnsafeLinuxError> {
    send_signal(pid, libc::SIGKILL, "kill(SIGKILL)")
}

fn send_signal(pid: u32, signal: libc::c_int, syscall: &str) -> Result<(), UnsafeLinuxError> {
    // pid 0 and negative pids address whole groups
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(UnsafeLinuxError::InvalidParameter {
            details: format!("refusing to signal pid {}", pid),
        });
    }

    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };

    if result == -1 {
        let errno = last_errno();
        return match errno {
            // Process doesn't exist, which is fine
            libc::ESRCH => Ok(()),
            libc::EPERM => Err(UnsafeLinuxError::PermissionDenied {
                operation: syscall.to_string(),
            }),
            _ => Err(UnsafeLinuxError::SystemCallFailed {
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

    #[test]
    fn test_child_gets_its_own_process_group() {
        let mut command = Command::new("/bin/sleep");
        command.arg("30");
        configure_process_group(&mut command);

        let mut child = command.spawn().expect("Failed to spawn sleep");
        let pid = child.id();

        let pgid = process_group_of(pid);
        assert_eq!(pgid, pid as i32, "child should lead its own process group");
        assert_ne!(pgid, unsafe { libc::getpgrp() });

        safe_force_kill_process(pid).expect("Failed to kill child");
        child.wait().expect("Failed to reap child");
    }

    #[test]
    fn test_interrupt_terminates_sleep() {
        let mut command = Command::new("/bin/sleep");
        command.arg("30");
        configure_process_group(&mut command);

        let mut child = command.spawn().expect("Failed to spawn sleep");
        safe_interrupt_process(child.id()).expect("Failed to interrupt child");

        let status = child.wait().expect("Failed to reap child");
        assert!(!status.success());
    }

    #[test]
    fn test_signals_are_idempotent_after_exit() {
        let mut child = Command::new("/bin/true").spawn().expect("Failed to spawn true");
        let pid = child.id();
        // Exited but not yet reaped, so the pid cannot be recycled under us
        thread::sleep(Duration::from_millis(200));

        assert!(safe_interrupt_process(pid).is_ok());
        assert!(safe_interrupt_process(pid).is_ok());
        assert!(safe_force_kill_process(pid).is_ok());
        assert!(safe_force_kill_process(pid).is_ok());

        let status = child.wait().expect("Failed to reap child");
        assert!(status.success());
    }

    #[test]
    fn test_refuses_group_addressing_pids() {
        match safe_force_kill_process(0) {
            Err(UnsafeLinuxError::InvalidParameter { .. }) => {}
            other => panic!("Expected InvalidParameter, got {:?}", other),
        }
    }
}
