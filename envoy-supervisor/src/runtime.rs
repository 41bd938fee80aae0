//! The supervised run: launch, readiness, shutdown, archival

use crate::admin::{parse_admin_port, PID_FILE};
use crate::admin_address::{append_run_dir_flag, ensure_admin_address, YamlConfigInspector};
use crate::archive::archive_run_dir;
use crate::config::SupervisorConfig;
use crate::error::{AdminError, SupervisorError};
use crate::hooks::{SafeStartupHook, ShutdownHook, StartupHook};
use crate::output::{pump, write_line, OutputSink, SharedSink};
use crate::platform::{create_process_group_control, ProcessGroupControl};
use crate::readiness::{ReadinessCell, ReadinessScanner};
use crate::shutdown::{run_shutdown_hooks, terminate};
use crate::signals::shutdown_signal_or_pending;
use crate::RunOptions;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long output pumps get to drain after Envoy exits
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-only view of a run, handed to hook implementations
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    inner: Arc<RunState>,
}

#[derive(Debug)]
struct RunState {
    run_dir: PathBuf,
    readiness: Arc<ReadinessCell>,
    admin_address_path: OnceLock<PathBuf>,
    pid: OnceLock<u32>,
}

impl RuntimeHandle {
    fn new(run_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(RunState {
                run_dir,
                readiness: Arc::new(ReadinessCell::new()),
                admin_address_path: OnceLock::new(),
                pid: OnceLock::new(),
            }),
        }
    }

    /// Directory hooks may write files to
    pub fn run_dir(&self) -> &Path {
        &self.inner.run_dir
    }

    /// Whether Envoy has logged its readiness line
    pub fn is_ready(&self) -> bool {
        self.inner.readiness.is_ready()
    }

    /// Envoy's pid. Fails until Envoy has been started.
    pub fn envoy_pid(&self) -> Result<u32, SupervisorError> {
        self.inner.pid.get().copied().ok_or(SupervisorError::NotStarted)
    }

    /// The admin address as `host:port`.
    ///
    /// Once readiness was observed this is the published address. Before that,
    /// the admin address file is read and validated directly.
    pub fn admin_address(&self) -> Result<String, AdminError> {
        if let Some(address) = self.inner.readiness.admin_address() {
            return Ok(address.to_string());
        }
        let path = self
            .inner
            .admin_address_path
            .get()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| AdminError::InvalidAddress {
                value: String::new(),
                reason: "admin address path not yet known".to_string(),
            })?;
        let data = std::fs::read_to_string(path).map_err(|source| AdminError::Read {
            path: path.clone(),
            source,
        })?;
        let address = data.trim();
        parse_admin_port(address)?;
        Ok(address.to_string())
    }

    /// Wait until the scanner publishes the admin address
    pub async fn wait_admin_address(&self) -> String {
        self.inner.readiness.wait_admin_address().await
    }
}

/// Manages one Envoy lifecycle
pub struct Runtime {
    options: RunOptions,
    shutdown_hooks: Vec<ShutdownHook>,
    control: Arc<dyn ProcessGroupControl>,
    handle: RuntimeHandle,
}

impl Runtime {
    /// Create a runtime for one run
    pub fn new(options: RunOptions) -> Result<Self, SupervisorError> {
        let control = create_process_group_control()?;
        tracing::debug!("Using {} process group control", control.name());
        let handle = RuntimeHandle::new(options.run_dir.clone());
        Ok(Self {
            options,
            shutdown_hooks: Vec::new(),
            control,
            handle,
        })
    }

    /// Add a hook run concurrently with the others on shutdown
    pub fn register_shutdown_hook(&mut self, hook: ShutdownHook) {
        tracing::debug!("Registered shutdown hook {}", hook.name());
        self.shutdown_hooks.push(hook);
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn run_dir(&self) -> &Path {
        self.handle.run_dir()
    }

    pub fn admin_address(&self) -> Result<String, AdminError> {
        self.handle.admin_address()
    }

    pub fn envoy_pid(&self) -> Result<u32, SupervisorError> {
        self.handle.envoy_pid()
    }

    /// Run Envoy with `args` until it exits, `cancel` is cancelled, or a
    /// termination signal arrives.
    ///
    /// On return Envoy is dead, shutdown hooks have run if Envoy was still
    /// running, and unless disabled the run directory has been archived.
    pub async fn run(
        self,
        cancel: CancellationToken,
        args: Vec<String>,
    ) -> Result<(), SupervisorError> {
        // Only owned locals live across the awaits below, keeping the future Send
        let Runtime {
            mut options,
            shutdown_hooks,
            control,
            handle,
        } = self;
        let config = options.config.clone();
        let envoy_path = options.envoy_path.clone();
        let run_dir = handle.run_dir().to_path_buf();

        tokio::fs::create_dir_all(&run_dir).await.map_err(|e| {
            SupervisorError::io(
                format!("unable to create run directory {}", run_dir.display()),
                e,
            )
        })?;

        let inspector = options
            .inspector
            .clone()
            .unwrap_or_else(|| Arc::new(YamlConfigInspector::new()));
        let (admin_address_path, mut envoy_args) =
            ensure_admin_address(&args, &run_dir, inspector.as_ref())?;
        append_run_dir_flag(&mut envoy_args, &run_dir);
        let _ = handle.inner.admin_address_path.set(admin_address_path.clone());

        let stdout_sink = open_sink(&run_dir, "stdout.log", options.stdout.take())?;
        let stderr_sink = open_sink(&run_dir, "stderr.log", options.stderr.take())?;

        write_line(
            &stdout_sink,
            &format!("starting: {} {}", envoy_path.display(), envoy_args.join(" ")),
        );

        let mut command = std::process::Command::new(&envoy_path);
        command
            .args(&envoy_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        control.apply_group_attributes(&mut command);
        let mut command = tokio::process::Command::from(command);
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SupervisorError::StartFailed {
            binary: envoy_path.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        let _ = handle.inner.pid.set(pid);
        tracing::info!("Started Envoy ({}) in {}", pid, run_dir.display());

        if let Err(e) = tokio::fs::write(run_dir.join(PID_FILE), pid.to_string()).await {
            tracing::warn!("Unable to write {}: {}", PID_FILE, e);
        }
        if let Err(e) = control.adopt(pid) {
            tracing::warn!("Unable to adopt Envoy ({}): {}", pid, e);
        }

        let startup_token = CancellationToken::new();
        let startup_task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let on_ready = {
            let safe_hook = SafeStartupHook::new(
                options
                    .startup_hook
                    .clone()
                    .unwrap_or_else(StartupHook::config_dump),
                config.startup_hook_timeout_opt(),
            );
            let stdout_sink = stdout_sink.clone();
            let startup_token = startup_token.clone();
            let startup_task = Arc::clone(&startup_task);
            let run_dir = run_dir.clone();
            move |address: String| {
                write_line(&stdout_sink, &format!("discovered admin address: {}", address));
                let task = tokio::spawn(async move {
                    safe_hook.run(startup_token, run_dir, address).await;
                });
                if let Ok(mut slot) = startup_task.lock() {
                    *slot = Some(task);
                }
            }
        };

        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            pumps.push(tokio::spawn(pump("Envoy stdout", out, stdout_sink.clone())));
        }
        if let Some(err) = child.stderr.take() {
            let scanner = ReadinessScanner::new(
                stderr_sink.clone(),
                admin_address_path,
                Arc::clone(&handle.inner.readiness),
                Box::new(on_ready),
            );
            pumps.push(tokio::spawn(scanner.scan(err)));
        }

        let handle_signals = options.handle_signals;
        let signal = async move {
            if handle_signals {
                shutdown_signal_or_pending().await
            } else {
                std::future::pending::<()>().await
            }
        };
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
            _ = signal => None,
        };

        let status = match exited {
            Some(status) => {
                tracing::info!("Envoy ({}) exited on its own", pid);
                status
            }
            None => {
                let ready = handle.is_ready();
                shutdown(&shutdown_hooks, &config, &stdout_sink).await;
                write_line(
                    &stdout_sink,
                    &format!("sending interrupt to envoy (pid={})", pid),
                );
                let status = terminate(
                    &mut child,
                    control.as_ref(),
                    config.interrupt_grace,
                )
                .await;
                // A run stopped on purpose after Envoy was serving is a success
                match status {
                    Ok(_) if ready => Ok(ExitStatus::default()),
                    other => other,
                }
            }
        };

        for pump in pumps {
            let abort = pump.abort_handle();
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                tracing::warn!("Envoy output did not drain, abandoning it");
                abort.abort();
            }
        }
        startup_token.cancel();
        if let Ok(mut slot) = startup_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        close_sink(&stdout_sink);
        close_sink(&stderr_sink);

        let result = match status {
            Ok(status) => exit_result(status, &envoy_path, &run_dir),
            // Envoy may still be alive, so the run directory stays in place
            Err(e) => {
                return Err(SupervisorError::io(
                    format!("unable to wait for Envoy ({})", pid),
                    e,
                ));
            }
        };

        if options.dont_archive {
            return result;
        }
        let archive_dir = run_dir.clone();
        let archived = tokio::task::spawn_blocking(move || archive_run_dir(&archive_dir))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
        match archived {
            Ok(path) => {
                tracing::info!("Archived run directory to {}", path.display());
                result
            }
            Err(source) => {
                tracing::warn!("Unable to archive {}: {}", run_dir.display(), source);
                result.and(Err(SupervisorError::ArchiveFailed { run_dir, source }))
            }
        }
    }
}

async fn shutdown(
    hooks: &[ShutdownHook],
    config: &SupervisorConfig,
    stdout_sink: &SharedSink,
) {
    let timeout = config.shutdown_timeout;
    let deadline = tokio::time::Instant::now() + timeout;
    let wall_deadline = SystemTime::now() + timeout;
    write_line(
        stdout_sink,
        &format!(
            "invoking shutdown hooks with deadline {}",
            format_wall_clock(wall_deadline)
        ),
    );
    tracing::info!(
        "Running {} shutdown hooks with a {:?} deadline",
        hooks.len(),
        timeout
    );

    let report = run_shutdown_hooks(hooks, deadline, config.abandon_grace_opt()).await;
    for name in report.failed.iter().chain(report.abandoned.iter()) {
        write_line(stdout_sink, &format!("failed shutdown hook: {}", name));
    }
}

fn open_sink(
    run_dir: &Path,
    file_name: &str,
    extra: Option<Box<dyn Write + Send>>,
) -> Result<SharedSink, SupervisorError> {
    let path = run_dir.join(file_name);
    let file = File::create(&path)
        .map_err(|e| SupervisorError::io(format!("unable to create {}", path.display()), e))?;
    let mut sink = OutputSink::new();
    sink.add(file_name, Box::new(file));
    if let Some(extra) = extra {
        sink.add(format!("{} (extra)", file_name), extra);
    }
    Ok(sink.shared())
}

fn close_sink(sink: &SharedSink) {
    if let Ok(mut sink) = sink.lock() {
        sink.close();
    }
}

/// A killed-by-signal Envoy has no exit code and counts as stopped
fn exit_result(status: ExitStatus, binary: &Path, run_dir: &Path) -> Result<(), SupervisorError> {
    match status.code() {
        Some(code) if code != 0 => Err(SupervisorError::WorkerExited {
            status: code,
            binary: binary.to_path_buf(),
            run_dir: run_dir.to_path_buf(),
        }),
        _ => Ok(()),
    }
}

/// Seconds since the epoch with millisecond precision, as `[secs.millis]`
fn format_wall_clock(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!(
        "[{}.{:03}]",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}
