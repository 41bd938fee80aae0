//! Error types for the supervisor

use std::path::PathBuf;

/// Main error type for a supervised run
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unable to start Envoy process {binary:?}: {source}")]
    StartFailed {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing value to argument \"{flag}\"")]
    MissingArgumentValue { flag: String },

    #[error("envoy exited with status: {status} (binary {binary:?}, run directory {run_dir:?})")]
    WorkerExited {
        status: i32,
        binary: PathBuf,
        run_dir: PathBuf,
    },

    #[error("unable to archive run directory {run_dir:?}: {source}")]
    ArchiveFailed {
        run_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("envoy process not yet started")]
    NotStarted,

    #[error("Platform operation failed: {error}")]
    Platform { error: PlatformError },
}

impl SupervisorError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SupervisorError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<PlatformError> for SupervisorError {
    fn from(error: PlatformError) -> Self {
        SupervisorError::Platform { error }
    }
}

/// Platform-specific error types
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable { resource: String },
}

/// Outcome of a startup or shutdown hook that did not complete normally
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{hook} failed: {reason}")]
    Failed { hook: String, reason: String },

    #[error("{hook} panicked: {message}")]
    Panicked { hook: String, message: String },

    #[error("{hook} timed out after {timeout:?}")]
    TimedOut {
        hook: String,
        timeout: std::time::Duration,
    },

    #[error("{hook} cancelled")]
    Cancelled { hook: String },
}

impl HookError {
    /// Convenience constructor for hook implementations
    pub fn failed(hook: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HookError::Failed {
            hook: hook.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors discovering or talking to the Envoy admin endpoint
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("timeout waiting for {what}{}", last_error_suffix(.last_error))]
    Timeout {
        what: String,
        last_error: Option<String>,
    },

    #[error("unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid admin address {value:?}: {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("no children found for pid {pid}")]
    NoChildren { pid: u32 },

    #[error("expected one child of pid {pid}, found {count}")]
    TooManyChildren { pid: u32, count: usize },

    #[error("{flag} not found in command line of pid {pid}")]
    FlagNotFound { flag: String, pid: u32 },

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("{url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("admin endpoint not ready: {body:?}")]
    NotReady { body: String },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

/// Errors inspecting Envoy configuration for an admin address
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("unable to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {source}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
    },
}
