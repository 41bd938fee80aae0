//! Admin address negotiation
//!
//! Envoy only reports the admin address it actually bound when started with
//! `--admin-address-path`, and only binds one when its configuration declares an
//! admin endpoint. These functions rewrite the launch arguments so that both
//! hold, without overriding anything the user already specified.

use crate::error::{InspectError, SupervisorError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ADMIN_ADDRESS_PATH_FLAG: &str = "--admin-address-path";
pub const CONFIG_PATH_FLAGS: [&str; 2] = ["-c", "--config-path"];
pub const CONFIG_YAML_FLAG: &str = "--config-yaml";
pub const ADMIN_ADDRESS_FILE: &str = "admin-address.txt";

/// Bootstrap fragment that makes Envoy bind its admin endpoint on an ephemeral port
pub const EPHEMERAL_ADMIN_YAML: &str =
    "admin: {address: {socket_address: {address: '127.0.0.1', port_value: 0}}}";

/// Trailing flag carrying the run directory on the live command line
pub const RUN_DIR_FLAG: &str = "--envoy-supervisor-run-dir";

/// Answers whether Envoy configuration already declares an admin endpoint
pub trait ConfigInspector: Send + Sync {
    /// Returns the declared admin address as `host:port`, if any
    fn find_admin_address(&self, args: &[String]) -> Result<Option<String>, InspectError>;
}

/// Ensures the arguments both declare an admin endpoint and ask Envoy to write
/// the bound address to a file.
///
/// Returns the admin address file path and the final argument list. When no
/// configuration source is present the arguments are returned unmodified with
/// an empty path: Envoy will refuse to start on its own.
pub fn ensure_admin_address(
    args: &[String],
    run_dir: &Path,
    inspector: &dyn ConfigInspector,
) -> Result<(PathBuf, Vec<String>), SupervisorError> {
    let existing_path = find_admin_address_path(args)?;

    let has_config = args
        .iter()
        .any(|a| CONFIG_PATH_FLAGS.contains(&a.as_str()) || a == CONFIG_YAML_FLAG);
    if !has_config {
        tracing::debug!("No Envoy configuration in arguments, leaving them unmodified");
        return Ok((PathBuf::new(), args.to_vec()));
    }

    let mut out = args.to_vec();

    match inspector.find_admin_address(args) {
        Ok(Some(address)) => {
            tracing::debug!("Configuration declares admin address {}", address);
        }
        Ok(None) => {
            tracing::debug!("Configuration declares no admin address, using an ephemeral port");
            out.push(CONFIG_YAML_FLAG.to_string());
            out.push(EPHEMERAL_ADMIN_YAML.to_string());
        }
        Err(error) => {
            // Envoy reports a broken configuration better than we can
            tracing::warn!("Unable to inspect Envoy configuration: {}", error);
        }
    }

    let admin_address_path = match existing_path {
        Some(path) => path,
        None => {
            let path = run_dir.join(ADMIN_ADDRESS_FILE);
            out.push(ADMIN_ADDRESS_PATH_FLAG.to_string());
            out.push(path.to_string_lossy().into_owned());
            path
        }
    };

    Ok((admin_address_path, out))
}

/// Appends the supervisor's private trailing flags after `--`.
///
/// Envoy ignores everything after `--`, which leaves the run directory readable
/// from the process command line by tooling that only knows Envoy's pid.
pub fn append_run_dir_flag(args: &mut Vec<String>, run_dir: &Path) {
    if !args.iter().any(|a| a == "--") {
        args.push("--".to_string());
    }
    args.push(RUN_DIR_FLAG.to_string());
    args.push(run_dir.to_string_lossy().into_owned());
}

fn find_admin_address_path(args: &[String]) -> Result<Option<PathBuf>, SupervisorError> {
    let Some(i) = args.iter().position(|a| a == ADMIN_ADDRESS_PATH_FLAG) else {
        return Ok(None);
    };
    match args.get(i + 1) {
        Some(value) if !value.is_empty() => Ok(Some(PathBuf::from(value))),
        _ => Err(SupervisorError::MissingArgumentValue {
            flag: ADMIN_ADDRESS_PATH_FLAG.to_string(),
        }),
    }
}

/// Reads `-c`/`--config-path` files and `--config-yaml` strings in argument
/// order, later sources overriding earlier ones, the way Envoy merges them.
#[derive(Debug, Default, Clone)]
pub struct YamlConfigInspector;

#[derive(Debug, Default, Deserialize)]
struct Bootstrap {
    admin: Option<Admin>,
}

#[derive(Debug, Deserialize)]
struct Admin {
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    socket_address: Option<SocketAddress>,
}

#[derive(Debug, Deserialize)]
struct SocketAddress {
    #[serde(default)]
    address: String,
    #[serde(default)]
    port_value: i64,
}

impl YamlConfigInspector {
    pub fn new() -> Self {
        Self
    }

    fn admin_address_of(yaml: &str) -> Result<Option<String>, InspectError> {
        if yaml.trim().is_empty() {
            return Ok(None);
        }
        let bootstrap: Bootstrap =
            serde_yaml::from_str(yaml).map_err(|source| InspectError::Yaml { source })?;
        let socket = bootstrap
            .admin
            .and_then(|a| a.address)
            .and_then(|a| a.socket_address);
        Ok(socket
            .filter(|s| !s.address.is_empty() && s.port_value >= 0)
            .map(|s| format!("{}:{}", s.address, s.port_value)))
    }
}

impl ConfigInspector for YamlConfigInspector {
    fn find_admin_address(&self, args: &[String]) -> Result<Option<String>, InspectError> {
        let mut found = None;
        let mut iter = args.iter().take_while(|a| a.as_str() != "--");
        while let Some(arg) = iter.next() {
            let yaml = if CONFIG_PATH_FLAGS.contains(&arg.as_str()) {
                let Some(path) = iter.next() else { break };
                std::fs::read_to_string(path).map_err(|source| InspectError::Read {
                    path: PathBuf::from(path),
                    source,
                })?
            } else if arg == CONFIG_YAML_FLAG {
                let Some(yaml) = iter.next() else { break };
                yaml.clone()
            } else {
                continue;
            };
            if let Some(address) = Self::admin_address_of(&yaml)? {
                found = Some(address);
            }
        }
        Ok(found)
    }
}
