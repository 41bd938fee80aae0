//! Envoy admin endpoint discovery and a minimal admin API client
//!
//! Envoy writes its bound admin address to the `--admin-address-path` file some
//! time after it starts, so discovery polls. Tooling that only knows the
//! supervisor's pid can also find Envoy through the supervisor's children and
//! Envoy's live command line.

use crate::admin_address::{ADMIN_ADDRESS_PATH_FLAG, RUN_DIR_FLAG};
use crate::error::AdminError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio_util::sync::CancellationToken;

/// Default tick interval of the pollers
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Name of the file holding Envoy's pid inside the run directory
pub const PID_FILE: &str = "envoy.pid";

/// Envoy found as the only child of a supervisor process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChild {
    pub pid: u32,
    pub admin_address_path: PathBuf,
    pub run_dir: Option<PathBuf>,
}

/// GET `url`, returning the body. Anything but 200 is an error.
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<String, AdminError> {
    let http_err = |e: reqwest::Error| AdminError::Http {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let response = client.get(url).send().await.map_err(http_err)?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(AdminError::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response.text().await.map_err(http_err)
}

/// GET `url` and write the body to `path`
pub async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), AdminError> {
    let body = fetch(client, url).await?;
    tokio::fs::write(path, body)
        .await
        .map_err(|source| AdminError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Parse a `host:port` admin address, returning the port
pub fn parse_admin_port(value: &str) -> Result<u16, AdminError> {
    let invalid = |reason: &str| AdminError::InvalidAddress {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let (host, port) = value.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    port.parse::<u16>().map_err(|_| invalid("invalid port"))
}

/// Poll `path` until it holds a non-empty admin address and return its port.
///
/// A missing or empty file is retried. Content that isn't `host:port` is a
/// terminal error. Cancellation returns a timeout carrying the last error.
pub async fn poll_address_file(
    token: &CancellationToken,
    path: &Path,
    interval: Duration,
) -> Result<u16, AdminError> {
    let mut ticker = tokio::time::interval(interval);
    let mut last_error: Option<String> = None;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                return Err(AdminError::Timeout {
                    what: format!("Envoy admin address file {}", path.display()),
                    last_error,
                });
            }
            _ = ticker.tick() => {
                match tokio::fs::read_to_string(path).await {
                    Err(e) => last_error = Some(e.to_string()),
                    Ok(data) => {
                        let address = data.trim();
                        if address.is_empty() {
                            last_error = Some(format!(
                                "envoy admin address file {} was empty",
                                path.display()
                            ));
                            continue;
                        }
                        return parse_admin_port(address);
                    }
                }
            }
        }
    }
}

/// Poll the children of `parent_pid` until exactly one exists, then read
/// `--admin-address-path` (and the run directory, if present) from its live
/// command line.
pub async fn poll_child_and_address_path(
    token: &CancellationToken,
    parent_pid: u32,
    interval: Duration,
) -> Result<DiscoveredChild, AdminError> {
    let mut ticker = tokio::time::interval(interval);
    let mut last_error: Option<String> = None;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                return Err(AdminError::Timeout {
                    what: "Envoy process".to_string(),
                    last_error,
                });
            }
            _ = ticker.tick() => {
                let listed = tokio::task::spawn_blocking(move || list_children(parent_pid)).await;
                let children = match listed {
                    Ok(children) => children,
                    Err(e) => {
                        last_error = Some(e.to_string());
                        continue;
                    }
                };
                match children.as_slice() {
                    [] => last_error = Some(AdminError::NoChildren { pid: parent_pid }.to_string()),
                    [(pid, cmdline)] => {
                        let admin_address_path = extract_flag_value(ADMIN_ADDRESS_PATH_FLAG, cmdline)
                            .ok_or_else(|| AdminError::FlagNotFound {
                                flag: ADMIN_ADDRESS_PATH_FLAG.to_string(),
                                pid: *pid,
                            })?;
                        return Ok(DiscoveredChild {
                            pid: *pid,
                            admin_address_path: PathBuf::from(admin_address_path),
                            run_dir: extract_flag_value(RUN_DIR_FLAG, cmdline).map(PathBuf::from),
                        });
                    }
                    many => {
                        last_error = Some(
                            AdminError::TooManyChildren {
                                pid: parent_pid,
                                count: many.len(),
                            }
                            .to_string(),
                        );
                    }
                }
            }
        }
    }
}

/// Processes whose parent is `parent_pid`, with their command lines
fn list_children(parent_pid: u32) -> Vec<(u32, Vec<String>)> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );
    let parent = Pid::from_u32(parent_pid);
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.parent() == Some(parent) && process.thread_kind().is_none())
        .map(|(pid, process)| {
            let cmdline = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            (pid.as_u32(), cmdline)
        })
        .collect()
}

/// Value following `flag` in a command line.
///
/// The command line is re-split on whitespace so that `sh -c "..."` wrappers
/// still expose their inner flags.
pub fn extract_flag_value(flag: &str, cmdline: &[String]) -> Option<String> {
    let joined = cmdline.join(" ");
    let parts: Vec<&str> = joined.split_whitespace().collect();
    parts
        .windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| pair[1].to_string())
}

/// Client for Envoy's admin API on the loopback interface
#[derive(Debug, Clone)]
pub struct AdminClient {
    port: u16,
    pid: u32,
    run_dir: PathBuf,
    client: reqwest::Client,
}

impl AdminClient {
    /// Read Envoy's pid from the run directory, then wait for the admin address file.
    pub async fn connect(
        token: &CancellationToken,
        run_dir: &Path,
        admin_address_path: &Path,
    ) -> Result<Self, AdminError> {
        let pid_path = run_dir.join(PID_FILE);
        let data = tokio::fs::read_to_string(&pid_path)
            .await
            .map_err(|source| AdminError::Read {
                path: pid_path.clone(),
                source,
            })?;
        let pid = data.trim().parse::<u32>().map_err(|e| AdminError::InvalidAddress {
            value: data.trim().to_string(),
            reason: format!("invalid pid in {}: {}", pid_path.display(), e),
        })?;

        let port = poll_address_file(token, admin_address_path, POLL_INTERVAL).await?;
        Ok(Self::new(port, pid, run_dir))
    }

    pub fn new(port: u16, pid: u32, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            port,
            pid,
            run_dir: run_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// GET an admin path such as `/stats`
    pub async fn get(&self, path: &str) -> Result<String, AdminError> {
        let url = format!("http://127.0.0.1:{}{}", self.port, path);
        fetch(&self.client, &url).await
    }

    /// Succeeds when `/ready` reports `LIVE`
    pub async fn is_ready(&self) -> Result<(), AdminError> {
        let body = self.get("/ready").await?;
        let body = body.trim();
        if body.eq_ignore_ascii_case("live") {
            Ok(())
        } else {
            Err(AdminError::NotReady {
                body: body.to_string(),
            })
        }
    }

    /// Poll `/ready` every `tick` until it succeeds or `token` is cancelled.
    ///
    /// On cancellation the last readiness error is returned in preference to a
    /// bare timeout.
    pub async fn await_ready(
        &self,
        token: &CancellationToken,
        tick: Duration,
    ) -> Result<(), AdminError> {
        let mut ticker = tokio::time::interval(tick);
        let mut last_error: Option<AdminError> = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(last_error.unwrap_or_else(|| AdminError::Timeout {
                        what: "Envoy to become ready".to_string(),
                        last_error: None,
                    }));
                }
                _ = ticker.tick() => {
                    match self.is_ready().await {
                        Ok(()) => return Ok(()),
                        Err(e) => last_error = Some(e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmdline(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_flag_value() {
        let cmd = cmdline(&["envoy", "--admin-address-path", "/tmp/admin.txt"]);
        assert_eq!(
            extract_flag_value(ADMIN_ADDRESS_PATH_FLAG, &cmd).as_deref(),
            Some("/tmp/admin.txt")
        );
    }

    #[test]
    fn test_extract_flag_value_through_sh_wrapper() {
        let cmd = cmdline(&[
            "sh",
            "-c",
            "sleep 30 && echo --admin-address-path /tmp/a.txt -- --envoy-supervisor-run-dir /tmp/run",
        ]);
        assert_eq!(
            extract_flag_value(ADMIN_ADDRESS_PATH_FLAG, &cmd).as_deref(),
            Some("/tmp/a.txt")
        );
        assert_eq!(
            extract_flag_value(RUN_DIR_FLAG, &cmd).as_deref(),
            Some("/tmp/run")
        );
    }

    #[test]
    fn test_extract_flag_value_missing_or_trailing() {
        assert_eq!(extract_flag_value("--x", &cmdline(&["envoy"])), None);
        assert_eq!(extract_flag_value("--x", &cmdline(&["envoy", "--x"])), None);
    }

    #[test]
    fn test_parse_admin_port() {
        assert_eq!(parse_admin_port("127.0.0.1:9901").unwrap(), 9901);
        assert!(parse_admin_port("127.0.0.1").is_err());
        assert!(parse_admin_port(":9901").is_err());
        assert!(parse_admin_port("127.0.0.1:http").is_err());
    }

    #[tokio::test]
    async fn test_poll_address_file_waits_for_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin-address.txt");
        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tokio::fs::write(&writer_path, "").await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tokio::fs::write(&writer_path, "127.0.0.1:9901\n").await.unwrap();
        });

        let token = CancellationToken::new();
        let port = poll_address_file(&token, &path, POLL_INTERVAL).await.unwrap();
        assert_eq!(port, 9901);
    }

    #[tokio::test]
    async fn test_poll_address_file_timeout_carries_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin-address.txt");
        std::fs::write(&path, "").unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let err = poll_address_file(&token, &path, POLL_INTERVAL).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("timeout waiting for"), "{}", message);
        assert!(message.contains("was empty"), "{}", message);
    }

    #[tokio::test]
    async fn test_poll_address_file_malformed_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin-address.txt");
        std::fs::write(&path, "not-an-address").unwrap();

        let token = CancellationToken::new();
        let err = poll_address_file(&token, &path, POLL_INTERVAL).await.unwrap_err();
        assert!(matches!(err, AdminError::InvalidAddress { .. }));
    }
}
