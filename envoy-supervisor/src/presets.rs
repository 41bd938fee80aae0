//! Shutdown hooks that capture diagnostics into the run directory

use crate::admin::fetch_to_file;
use crate::connections::list_connections;
use crate::error::{HookError, SupervisorError};
use crate::hooks::ShutdownHook;
use crate::runtime::{Runtime, RuntimeHandle};
use std::fmt::Write as _;
use serde::Serialize;
use std::path::{Path, PathBuf};
use sysinfo::{Networks, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio_util::sync::CancellationToken;

const ADMIN_DATA_HOOK: &str = "admin_data_collection";
const NODE_PS_HOOK: &str = "node_ps";
const NODE_INTERFACES_HOOK: &str = "node_network_interfaces";
const NODE_CONNECTIONS_HOOK: &str = "node_connections";

/// Admin API paths and the file each is saved to
pub const ADMIN_ENDPOINTS: [(&str, &str); 9] = [
    ("certs", "certs.json"),
    ("clusters", "clusters.txt"),
    ("config_dump", "config_dump.json"),
    ("contention", "contention.txt"),
    ("listeners", "listeners.txt"),
    ("memory", "memory.json"),
    ("server_info", "server_info.json"),
    ("stats?format=json", "stats.json"),
    ("runtime", "runtime.json"),
];

/// Save the admin API's view of Envoy to the run directory on shutdown
pub fn enable_admin_data_collection(runtime: &mut Runtime) {
    let handle = runtime.handle();
    runtime.register_shutdown_hook(ShutdownHook::new(ADMIN_DATA_HOOK, move |token| {
        collect_admin_data(token, handle.clone())
    }));
}

async fn collect_admin_data(token: CancellationToken, handle: RuntimeHandle) -> Result<(), HookError> {
    let address = handle
        .admin_address()
        .map_err(|e| HookError::failed(ADMIN_DATA_HOOK, e))?;
    let client = reqwest::Client::new();
    let run_dir = handle.run_dir().to_path_buf();

    let fetches = ADMIN_ENDPOINTS.iter().map(|(path, file)| {
        let url = format!("http://{}/{}", address, path);
        let target = run_dir.join(file);
        let client = &client;
        async move {
            let result = fetch_to_file(client, &url, &target).await;
            if let Err(e) = &result {
                tracing::warn!("Unable to capture {}: {}", path, e);
            }
            result.is_ok()
        }
    });

    tokio::select! {
        results = futures::future::join_all(fetches) => {
            let failed = results.iter().filter(|ok| !**ok).count();
            if failed == 0 {
                Ok(())
            } else {
                Err(HookError::failed(
                    ADMIN_DATA_HOOK,
                    format!("{} of {} admin endpoints failed", failed, results.len()),
                ))
            }
        }
        _ = token.cancelled() => Err(HookError::Cancelled { hook: ADMIN_DATA_HOOK.to_string() }),
    }
}

/// Save the host's process table (`node/ps.txt`), network interfaces
/// (`node/network_interface.json`) and sockets (`node/connections.json`) on
/// shutdown
pub fn enable_node_collection(runtime: &mut Runtime) -> Result<(), SupervisorError> {
    let node_dir = runtime.run_dir().join("node");
    std::fs::create_dir_all(&node_dir).map_err(|e| {
        SupervisorError::io(
            format!(
                "unable to create directory {}, so node data will not be captured",
                node_dir.display()
            ),
            e,
        )
    })?;

    let dir = node_dir.clone();
    runtime.register_shutdown_hook(ShutdownHook::new(NODE_PS_HOOK, move |token| {
        write_process_table(token, dir.clone())
    }));
    let dir = node_dir.clone();
    runtime.register_shutdown_hook(ShutdownHook::new(NODE_INTERFACES_HOOK, move |token| {
        write_network_interfaces(token, dir.clone())
    }));
    runtime.register_shutdown_hook(ShutdownHook::new(NODE_CONNECTIONS_HOOK, move |token| {
        write_connections(token, node_dir.clone())
    }));
    Ok(())
}

async fn write_process_table(token: CancellationToken, node_dir: PathBuf) -> Result<(), HookError> {
    let table = blocking(NODE_PS_HOOK, &token, process_table).await?;
    write_file(NODE_PS_HOOK, &node_dir.join("ps.txt"), table.into_bytes()).await
}

async fn write_network_interfaces(
    token: CancellationToken,
    node_dir: PathBuf,
) -> Result<(), HookError> {
    let interfaces = blocking(NODE_INTERFACES_HOOK, &token, network_interfaces).await?;
    // Nothing to report on platforms without interface listing
    if interfaces.is_empty() {
        return Ok(());
    }
    let json = to_json(NODE_INTERFACES_HOOK, &interfaces)?;
    write_file(NODE_INTERFACES_HOOK, &node_dir.join("network_interface.json"), json).await
}

async fn write_connections(token: CancellationToken, node_dir: PathBuf) -> Result<(), HookError> {
    let connections = blocking(NODE_CONNECTIONS_HOOK, &token, list_connections).await?;
    if connections.is_empty() {
        return Ok(());
    }
    let json = to_json(NODE_CONNECTIONS_HOOK, &connections)?;
    write_file(NODE_CONNECTIONS_HOOK, &node_dir.join("connections.json"), json).await
}

/// Run a blocking collector, giving up when the shutdown deadline passes
async fn blocking<T, F>(hook: &str, token: &CancellationToken, collect: F) -> Result<T, HookError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::select! {
        result = tokio::task::spawn_blocking(collect) => result.map_err(|e| HookError::failed(hook, e)),
        _ = token.cancelled() => Err(HookError::Cancelled { hook: hook.to_string() }),
    }
}

fn to_json<T: Serialize>(hook: &str, value: &T) -> Result<Vec<u8>, HookError> {
    serde_json::to_vec_pretty(value).map_err(|e| HookError::failed(hook, e))
}

async fn write_file(hook: &str, path: &Path, contents: Vec<u8>) -> Result<(), HookError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| HookError::failed(hook, format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Serialize)]
struct NetworkInterface {
    name: String,
    #[serde(rename = "hardwareaddr")]
    mac_address: String,
    addrs: Vec<String>,
    received_bytes: u64,
    transmitted_bytes: u64,
}

fn network_interfaces() -> Vec<NetworkInterface> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<NetworkInterface> = networks
        .iter()
        .map(|(name, data)| NetworkInterface {
            name: name.clone(),
            mac_address: data.mac_address().to_string(),
            addrs: data
                .ip_networks()
                .iter()
                .map(|network| format!("{}/{}", network.addr, network.prefix))
                .collect(),
            received_bytes: data.total_received(),
            transmitted_bytes: data.total_transmitted(),
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}

fn process_table() -> String {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_memory()
            .with_cpu()
            .with_cmd(UpdateKind::Always),
    );

    let mut processes: Vec<_> = system
        .processes()
        .iter()
        .filter(|(_, p)| p.thread_kind().is_none())
        .collect();
    processes.sort_by_key(|(pid, _)| **pid);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<8} {:<10} {:>12} {:>14} {:>6}  ARGS",
        "PID", "PPID", "STATUS", "RSS", "VSZ", "PCPU"
    );
    for (pid, process) in processes {
        let args = process
            .cmd()
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        let args = if args.is_empty() {
            process.name().to_string_lossy().into_owned()
        } else {
            args
        };
        let _ = writeln!(
            out,
            "{:<8} {:<8} {:<10} {:>12} {:>14} {:>6.2}  {}",
            pid.as_u32(),
            process.parent().map(|p| p.as_u32().to_string()).unwrap_or_default(),
            process.status().to_string(),
            process.memory(),
            process.virtual_memory(),
            process.cpu_usage(),
            args
        );
    }
    out
}
