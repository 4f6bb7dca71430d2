//! KDL configuration parser
//!
//! ```kdl
//! client {
//!     home "~/.cccc"
//!     timeout-ms 30000
//!     by "user"
//! }
//! endpoint "tcp" host="127.0.0.1" port=9765
//! ```

use std::path::{Path, PathBuf};

use cccc_sdk::{normalize_tcp_host, Endpoint};
use kdl::{KdlEntry, KdlNode, KdlValue};

use crate::error::ConfigError;
use crate::model::ClientConfig;

/// Location of the config file when none is given explicitly
const DEFAULT_CONFIG_PATH: &str = "~/.config/cccc/client.kdl";

pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).into_owned())
}

/// Load the configuration
///
/// An explicit path must exist. Without one the default path is used when
/// present, and an empty configuration otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    match path {
        Some(path) => parse_config(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                parse_config(&path)
            } else {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Ok(ClientConfig::default())
            }
        }
    }
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl carries its own miette version; rebuild the span from offset/len
        let span = miette::SourceSpan::from((e.span.offset(), e.span.len()));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = ClientConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "client" => parse_client(node, content, &mut config)?,
            "endpoint" => {
                config.endpoint = Some(parse_endpoint(node, content)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_client(node: &KdlNode, source: &str, config: &mut ClientConfig) -> Result<(), ConfigError> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let key = child.name().value();
        let Some(entry) = first_argument(child) else {
            tracing::warn!("Config option `{}` has no value, ignoring", key);
            continue;
        };

        match key {
            "home" => {
                let home = expect_string(entry, key, source)?;
                config.home = Some(shellexpand::tilde(home).into_owned().into());
            }
            "timeout-ms" => {
                let timeout = entry
                    .value()
                    .as_i64()
                    .ok_or_else(|| invalid(entry, key, "expected an integer", source))?;
                if timeout <= 0 {
                    return Err(invalid(entry, key, "must be a positive number of milliseconds", source));
                }
                config.timeout_ms = Some(timeout as u64);
            }
            "by" => {
                let by = expect_string(entry, key, source)?.trim();
                if by.is_empty() {
                    return Err(invalid(entry, key, "must not be empty", source));
                }
                config.by = Some(by.to_string());
            }
            name => {
                tracing::warn!("Unknown client config option: {}", name);
            }
        }
    }

    Ok(())
}

fn parse_endpoint(node: &KdlNode, source: &str) -> Result<Endpoint, ConfigError> {
    let transport_entry = first_argument(node).ok_or_else(|| ConfigError::MissingField {
        field: "endpoint transport".to_string(),
    })?;
    let transport = expect_string(transport_entry, "endpoint", source)?;

    match transport.trim().to_ascii_lowercase().as_str() {
        "tcp" => {
            let port_entry = property(node, "port").ok_or_else(|| ConfigError::MissingField {
                field: "endpoint port".to_string(),
            })?;
            let port = port_entry
                .value()
                .as_i64()
                .and_then(|port| u16::try_from(port).ok())
                .filter(|port| *port != 0)
                .ok_or_else(|| invalid(port_entry, "port", "expected a port in 1..65535", source))?;

            let host = match property(node, "host") {
                Some(entry) => expect_string(entry, "host", source)?,
                None => "",
            };

            Ok(Endpoint::tcp(normalize_tcp_host(host), port))
        }
        "unix" => {
            let path_entry = property(node, "path").ok_or_else(|| ConfigError::MissingField {
                field: "endpoint path".to_string(),
            })?;
            let path = expect_string(path_entry, "path", source)?.trim();
            if path.is_empty() {
                return Err(invalid(path_entry, "path", "must not be empty", source));
            }
            Ok(Endpoint::unix(shellexpand::tilde(path).into_owned()))
        }
        _ => Err(invalid(
            transport_entry,
            "endpoint",
            "unknown transport (expected \"tcp\" or \"unix\")",
            source,
        )),
    }
}

/// First positional argument of a node
fn first_argument(node: &KdlNode) -> Option<&KdlEntry> {
    node.entries().iter().find(|entry| entry.name().is_none())
}

/// Named property `key=value` of a node
fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlEntry> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_some_and(|name| name.value() == key))
}

fn expect_string<'a>(entry: &'a KdlEntry, key: &str, source: &str) -> Result<&'a str, ConfigError> {
    match entry.value() {
        KdlValue::String(s) | KdlValue::RawString(s) => Ok(s.as_str()),
        _ => Err(invalid(entry, key, "expected a string", source)),
    }
}

fn invalid(entry: &KdlEntry, key: &str, message: &str, source: &str) -> ConfigError {
    let span = entry.span();
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
        src: source.to_string(),
        span: miette::SourceSpan::from((span.offset(), span.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let config = r#"
            client {
                home "/srv/cccc"
                timeout-ms 5000
                by "ops-bot"
            }
            endpoint "tcp" host="10.0.0.5" port=9765
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.home, Some(PathBuf::from("/srv/cccc")));
        assert_eq!(result.timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(result.by.as_deref(), Some("ops-bot"));
        assert_eq!(result.endpoint, Some(Endpoint::tcp("10.0.0.5", 9765)));
    }

    #[test]
    fn test_empty_config_is_default() {
        let result = parse_config_str("").unwrap();
        assert_eq!(result, ClientConfig::default());
    }

    #[test]
    fn test_home_tilde_expansion() {
        let result = parse_config_str(r#"client { home "~/.cccc"; }"#).unwrap();
        let home = result.home.unwrap();
        assert!(!home.to_string_lossy().starts_with('~'));
        assert!(home.ends_with(".cccc"));
    }

    #[test]
    fn test_unix_endpoint() {
        let result = parse_config_str(r#"endpoint "unix" path="/run/ccccd.sock""#).unwrap();
        assert_eq!(result.endpoint, Some(Endpoint::unix("/run/ccccd.sock")));
    }

    #[test]
    fn test_tcp_host_is_normalized() {
        let result = parse_config_str(r#"endpoint "tcp" host="localhost" port=9765"#).unwrap();
        assert_eq!(result.endpoint, Some(Endpoint::tcp("127.0.0.1", 9765)));

        let result = parse_config_str(r#"endpoint "TCP" port=9765"#).unwrap();
        assert_eq!(result.endpoint, Some(Endpoint::tcp("127.0.0.1", 9765)));
    }

    #[test]
    fn test_invalid_port() {
        for config in [
            r#"endpoint "tcp" port=70000"#,
            r#"endpoint "tcp" port=0"#,
            r#"endpoint "tcp" port="http""#,
        ] {
            let err = parse_config_str(config).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "port"),
                "unexpected error for {}: {:?}",
                config,
                err
            );
        }
    }

    #[test]
    fn test_missing_endpoint_fields() {
        let err = parse_config_str(r#"endpoint "tcp" host="127.0.0.1""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));

        let err = parse_config_str(r#"endpoint "unix""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_unknown_transport() {
        let err = parse_config_str(r#"endpoint "pigeon""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "endpoint"));
    }

    #[test]
    fn test_invalid_timeout() {
        let err = parse_config_str("client { timeout-ms -1; }").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "timeout-ms"));

        let err = parse_config_str(r#"client { timeout-ms "soon"; }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = r#"
            client {
                colour "blue"
                by "user"
            }
            daemon { autostart true; }
        "#;
        let result = parse_config_str(config).unwrap();
        assert_eq!(result.by.as_deref(), Some("user"));
    }

    #[test]
    fn test_parse_error_has_span() {
        let err = parse_config_str("client {").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_to_client_options() {
        let config = parse_config_str(
            r#"
            client { timeout-ms 1500; by "peer-1"; }
            endpoint "unix" path="/tmp/ccccd.sock"
            "#,
        )
        .unwrap();

        let options = config.to_client_options();
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.by.as_deref(), Some("peer-1"));
        assert_eq!(options.endpoint, Some(Endpoint::unix("/tmp/ccccd.sock")));
        assert_eq!(options.cccc_home, None);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.kdl");
        std::fs::write(&path, r#"client { by "file-user"; }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.by.as_deref(), Some("file-user"));

        let err = load_config(Some(&dir.path().join("missing.kdl"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
