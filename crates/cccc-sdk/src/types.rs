//! Wire types for the cccc daemon IPC protocol
//!
//! These types mirror the newline-delimited JSON envelopes exchanged with the
//! daemon. Argument and result bags stay schema-light (`serde_json::Map`)
//! because each operation defines its own payload.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// IPC protocol version spoken by this client
pub const IPC_VERSION: u8 = 1;

/// How the daemon is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Unix,
    Tcp,
    /// No usable transport (e.g. a platform without Unix sockets)
    Unset,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Tcp => "tcp",
            Self::Unset => "",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved daemon address
///
/// Exactly one addressing mode exists per transport, so the unused fields of
/// the flat `{transport, path, host, port}` shape are simply not representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at `path`
    Unix { path: PathBuf },
    /// TCP loopback connection
    Tcp { host: String, port: u16 },
    /// Nothing to connect to; every connect attempt fails as unavailable
    Unset,
}

impl Endpoint {
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::Unix { .. } => Transport::Unix,
            Self::Tcp { .. } => Transport::Tcp,
            Self::Unset => Transport::Unset,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
            Self::Unset => f.write_str("<unset>"),
        }
    }
}

/// On-disk address descriptor written by the daemon (`ccccd.addr.json`)
///
/// Fields are loosely typed on purpose: validation happens in the resolver so
/// a malformed descriptor degrades to the fallback socket instead of failing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressDescriptor {
    #[serde(default)]
    pub v: Option<Value>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub pid: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub ts: Option<Value>,
}

/// Request envelope: `{"v":1,"op":"...","args":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub v: u8,
    pub op: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Request {
    pub fn new(op: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            v: IPC_VERSION,
            op: op.into(),
            args,
        }
    }

    /// Serialize to exactly one JSON line including the trailing newline
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Response envelope: `{"v":1,"ok":true,"result":{...}}` or
/// `{"v":1,"ok":false,"error":{...}}`
///
/// Decoding only requires a JSON object. `v`, `ok` and `error` of an
/// unexpected type fall back to their defaults so a daemon that answered is
/// never mistaken for one that did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(
        default,
        deserialize_with = "lenient_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub v: Option<u8>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// The `result` object, or an empty map when absent, not an object, or
    /// when the response is a failure
    pub fn result_map(&self) -> Map<String, Value> {
        if !self.ok {
            return Map::new();
        }
        match &self.result {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Error payload carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ErrorPayload {
    /// Build from an arbitrary `error` value
    ///
    /// Only objects yield a payload. Scalar `code`/`message` values are
    /// rendered as text, anything else is left empty; non-object `details`
    /// are dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Object(fields) = value else {
            return None;
        };
        let details = match fields.get("details") {
            Some(Value::Object(details)) => Some(details.clone()),
            _ => None,
        };
        Some(Self {
            code: scalar_text(fields.get("code")),
            message: scalar_text(fields.get("message")),
            details,
        })
    }
}

fn scalar_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn lenient_version<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_u64().and_then(|v| u8::try_from(v).ok()))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

fn lenient_error<'de, D>(deserializer: D) -> Result<Option<ErrorPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(ErrorPayload::from_value(&value))
}
