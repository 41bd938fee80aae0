//! Envoy Supervisor - runs one Envoy process with guaranteed cleanup
//!
//! This library launches Envoy with an admin endpoint it can discover, notices
//! when Envoy is ready, runs startup and shutdown hooks in isolation, makes
//! sure Envoy is dead before returning, and archives the run directory.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

// Core modules
pub mod admin;
pub mod admin_address;
pub mod archive;
pub mod config;
pub mod connections;
pub mod error;
pub mod hooks;
pub mod output;
pub mod platform;
pub mod presets;
pub mod readiness;
pub mod runtime;
pub mod shutdown;
pub mod signals;

// Re-export core types
pub use admin::{AdminClient, DiscoveredChild};
pub use admin_address::{ensure_admin_address, ConfigInspector, YamlConfigInspector};
pub use config::SupervisorConfig;
pub use error::{AdminError, HookError, InspectError, PlatformError, SupervisorError};
pub use hooks::{SafeStartupHook, ShutdownHook, StartupHook};
pub use platform::ProcessGroupControl;
pub use presets::{enable_admin_data_collection, enable_node_collection};
pub use runtime::{Runtime, RuntimeHandle};
pub use tokio_util::sync::CancellationToken;

/// Everything needed to supervise one Envoy run
pub struct RunOptions {
    /// Envoy binary to execute
    pub envoy_path: PathBuf,
    /// Directory for logs and diagnostics, archived after the run
    pub run_dir: PathBuf,
    /// Replaces the default config dump startup hook
    pub startup_hook: Option<StartupHook>,
    /// Keep the run directory instead of archiving it
    pub dont_archive: bool,
    /// Extra destination for Envoy's stdout besides `stdout.log`
    pub stdout: Option<Box<dyn Write + Send>>,
    /// Extra destination for Envoy's stderr besides `stderr.log`
    pub stderr: Option<Box<dyn Write + Send>>,
    /// Decides whether the configuration already declares an admin endpoint
    pub inspector: Option<Arc<dyn ConfigInspector>>,
    /// Listen for SIGINT/SIGTERM (Ctrl-C/Ctrl-Break on Windows)
    pub handle_signals: bool,
    pub config: SupervisorConfig,
}

impl RunOptions {
    /// Create run options for the specified binary and run directory
    pub fn new<P: Into<PathBuf>, D: Into<PathBuf>>(envoy_path: P, run_dir: D) -> Self {
        Self {
            envoy_path: envoy_path.into(),
            run_dir: run_dir.into(),
            startup_hook: None,
            dont_archive: false,
            stdout: None,
            stderr: None,
            inspector: None,
            handle_signals: true,
            config: SupervisorConfig::default(),
        }
    }

    /// Set a custom startup hook
    pub fn startup_hook(mut self, hook: StartupHook) -> Self {
        self.startup_hook = Some(hook);
        self
    }

    /// Disable run directory archival
    pub fn dont_archive(mut self, dont_archive: bool) -> Self {
        self.dont_archive = dont_archive;
        self
    }

    /// Copy Envoy's stdout to `writer` as well
    pub fn stdout<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Copy Envoy's stderr to `writer` as well
    pub fn stderr<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// Set the configuration inspector
    pub fn inspector(mut self, inspector: Arc<dyn ConfigInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Enable or disable OS signal handling
    pub fn handle_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    /// Set timeouts and intervals
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("envoy_path", &self.envoy_path)
            .field("run_dir", &self.run_dir)
            .field("startup_hook", &self.startup_hook)
            .field("dont_archive", &self.dont_archive)
            .field("handle_signals", &self.handle_signals)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
