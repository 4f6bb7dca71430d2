//! Daemon endpoint discovery
//!
//! The daemon advertises its address in `<home>/daemon/ccccd.addr.json`.
//! Discovery never fails: anything wrong with the descriptor (missing file,
//! bad JSON, wrong version, invalid port) falls back to the conventional
//! Unix socket at `<home>/daemon/ccccd.sock`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{AddressDescriptor, Endpoint};

/// Environment variable overriding the cccc home directory
pub const CCCC_HOME_ENV: &str = "CCCC_HOME";

/// Home directory used when neither an argument nor `$CCCC_HOME` is given
pub const DEFAULT_HOME: &str = "~/.cccc";

/// Daemon name used for the descriptor and socket file names
pub const DAEMON_NAME: &str = "ccccd";

/// Address every wildcard, named or IPv6 loopback host is rewritten to
const LOOPBACK_V4: &str = "127.0.0.1";

/// Determine the cccc home directory
///
/// Reads `$CCCC_HOME` (trimmed, `~` expanded) and falls back to `~/.cccc`.
pub fn default_home() -> PathBuf {
    match std::env::var(CCCC_HOME_ENV) {
        Ok(raw) if !raw.trim().is_empty() => expand_home(raw.trim()),
        _ => expand_home(DEFAULT_HOME),
    }
}

fn expand_home(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Path of the address descriptor under `home`
pub fn descriptor_path(home: &Path) -> PathBuf {
    home.join("daemon").join(format!("{}.addr.json", DAEMON_NAME))
}

/// Path of the fallback Unix socket under `home`
pub fn fallback_socket_path(home: &Path) -> PathBuf {
    home.join("daemon").join(format!("{}.sock", DAEMON_NAME))
}

/// Resolve the daemon endpoint
///
/// `home` overrides the home directory; otherwise [`default_home`] applies.
/// Always returns an endpoint.
///
/// # Example
///
/// ```ignore
/// let endpoint = discover_endpoint(None);
/// println!("daemon at {}", endpoint);
/// ```
pub fn discover_endpoint(home: Option<&Path>) -> Endpoint {
    let home = match home {
        Some(home) => expand_home(&home.to_string_lossy()),
        None => default_home(),
    };
    let addr_path = descriptor_path(&home);

    match read_descriptor(&addr_path) {
        Some(descriptor) => match endpoint_from_descriptor(&descriptor) {
            Ok(endpoint) => {
                debug!(endpoint = %endpoint, "Resolved daemon endpoint from descriptor");
                return endpoint;
            }
            Err(reason) => {
                warn!(
                    path = %addr_path.display(),
                    reason = %reason,
                    "Ignoring daemon address descriptor"
                );
            }
        },
        None => {
            debug!(path = %addr_path.display(), "No usable daemon address descriptor");
        }
    }

    fallback_endpoint(&home)
}

#[cfg(unix)]
fn fallback_endpoint(home: &Path) -> Endpoint {
    Endpoint::unix(fallback_socket_path(home))
}

#[cfg(not(unix))]
fn fallback_endpoint(_home: &Path) -> Endpoint {
    Endpoint::Unset
}

fn read_descriptor(path: &Path) -> Option<AddressDescriptor> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Daemon address descriptor is not valid JSON");
            None
        }
    }
}

/// Validate a descriptor and turn it into an endpoint
///
/// Returns the reason for rejection so the resolver can log it.
pub fn endpoint_from_descriptor(descriptor: &AddressDescriptor) -> Result<Endpoint, String> {
    let version = descriptor.v.as_ref().and_then(Value::as_u64);
    if version != Some(1) {
        return Err(format!("unsupported descriptor version: {:?}", descriptor.v));
    }

    let transport = descriptor
        .transport
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match transport.as_str() {
        "tcp" => {
            let port = descriptor
                .port
                .as_ref()
                .and_then(parse_port)
                .ok_or_else(|| format!("invalid daemon tcp port: {:?}", descriptor.port))?;
            let host = normalize_tcp_host(descriptor.host.as_deref().unwrap_or(""));
            Ok(Endpoint::tcp(host, port))
        }
        "unix" => {
            let path = descriptor.path.as_deref().unwrap_or("").trim();
            if path.is_empty() {
                return Err("unix descriptor without a path".to_string());
            }
            Ok(Endpoint::unix(path))
        }
        other => Err(format!("unknown transport: {:?}", other)),
    }
}

/// Accept integral JSON numbers (or numeric strings) in 1..=65535
fn parse_port(value: &Value) -> Option<u16> {
    let port = match value {
        Value::Number(n) => match n.as_u64() {
            Some(port) => port,
            None => {
                let f = n.as_f64()?;
                if f.fract() != 0.0 || f < 0.0 {
                    return None;
                }
                f as u64
            }
        },
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };

    if port == 0 {
        return None;
    }
    u16::try_from(port).ok()
}

/// Rewrite hosts the client should never dial literally
///
/// The daemon binds IPv4 only, so wildcard, `localhost` and every IPv6 form
/// map to `127.0.0.1`; any other literal passes through.
pub fn normalize_tcp_host(raw: &str) -> String {
    let host = raw.trim();
    if host.is_empty() || host == "localhost" || host == "0.0.0.0" || host.contains(':') {
        return LOOPBACK_V4.to_string();
    }
    host.to_string()
}
