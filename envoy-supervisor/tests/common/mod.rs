//! Common test utilities and helpers for cross-platform testing

#![allow(dead_code)]

use envoy_supervisor::{RunOptions, SupervisorConfig};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Initialize tracing for tests (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Path of the fake Envoy binary built alongside the tests
pub fn fake_envoy() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake_envoy"))
}

/// Minimal configuration with no admin block
pub const STATIC_CONFIG_YAML: &str = "static_resources: {}";

/// Run options for the fake Envoy with short, test-friendly timings
pub fn fake_envoy_options(run_dir: &Path) -> RunOptions {
    RunOptions::new(fake_envoy(), run_dir)
        .handle_signals(false)
        .config(
            SupervisorConfig::default()
                .shutdown_timeout(Duration::from_secs(2))
                .startup_hook_timeout(Duration::from_secs(1))
                .interrupt_grace(Duration::from_secs(2))
                .abandon_grace(Duration::from_millis(500)),
        )
}

pub fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Writer capturing everything written to it, cloneable so the test keeps a view
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Poll `condition` every 50ms until it holds or `timeout` elapses
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Whether a process with this pid is still running (zombies count as gone)
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => !matches!(process.status(), sysinfo::ProcessStatus::Zombie),
        None => false,
    }
}
