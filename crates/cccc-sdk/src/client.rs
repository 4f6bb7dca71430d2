//! High-level client for the cccc daemon
//!
//! `CcccClient` resolves the daemon endpoint once and then opens one
//! connection per call. It is cheap to clone and safe to share between tasks;
//! concurrent calls never share a socket.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::endpoint::discover_endpoint;
use crate::error::{ClientError, DaemonApiError};
use crate::events::EventStream;
use crate::transport::{call_daemon, open_events_stream, StreamConnection, DEFAULT_TIMEOUT};
use crate::types::{Endpoint, Request, Response};

/// Default actor recorded as `by` for mutating operations
pub const DEFAULT_BY: &str = "user";

/// Operations `assert_compatible` never probes (side effects or streaming)
const RESERVED_OPS: [&str; 4] = ["ping", "shutdown", "events_stream", "term_attach"];

/// Construction options for [`CcccClient`]
///
/// An explicit `endpoint` wins over discovery; otherwise the endpoint is
/// resolved from `cccc_home` (or `CCCC_HOME`, or `~/.cccc`).
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub cccc_home: Option<PathBuf>,
    pub endpoint: Option<Endpoint>,
    pub timeout: Option<Duration>,
    /// Actor name used when a convenience method is not given `by`
    pub by: Option<String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.cccc_home = Some(home.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_by(mut self, by: impl Into<String>) -> Self {
        self.by = Some(by.into());
        self
    }
}

/// Requirements checked by [`CcccClient::assert_compatible`]
#[derive(Debug, Clone)]
pub struct CompatibilityOptions {
    /// Minimum `ipc_v` the daemon must report
    pub require_ipc_v: i64,
    /// Capability flags; entries set to `true` must be truthy in the ping result
    pub require_capabilities: BTreeMap<String, bool>,
    /// Operations that must be known to the daemon
    pub require_ops: Vec<String>,
}

impl Default for CompatibilityOptions {
    fn default() -> Self {
        Self {
            require_ipc_v: 1,
            require_capabilities: BTreeMap::new(),
            require_ops: Vec::new(),
        }
    }
}

impl CompatibilityOptions {
    pub fn require_ipc_v(mut self, version: i64) -> Self {
        self.require_ipc_v = version;
        self
    }

    pub fn require_capability(mut self, name: impl Into<String>) -> Self {
        self.require_capabilities.insert(name.into(), true);
        self
    }

    pub fn require_op(mut self, op: impl Into<String>) -> Self {
        self.require_ops.push(op.into());
        self
    }
}

/// Client for the cccc daemon
#[derive(Debug, Clone)]
pub struct CcccClient {
    endpoint: Endpoint,
    timeout: Duration,
    by: String,
}

impl CcccClient {
    /// Build a client, resolving the endpoint unless one is given
    ///
    /// Never fails: discovery falls back to the conventional socket path.
    pub fn new(options: ClientOptions) -> Self {
        let endpoint = match options.endpoint {
            Some(endpoint) => endpoint,
            None => discover_endpoint(options.cccc_home.as_deref()),
        };
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let by = options
            .by
            .filter(|by| !by.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BY.to_string());

        debug!(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64, "Client created");

        Self {
            endpoint,
            timeout,
            by,
        }
    }

    /// Client talking to a fixed endpoint with default settings
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self::new(ClientOptions::new().with_endpoint(endpoint))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Actor used as `by` when a convenience method is not given one
    pub fn default_by(&self) -> &str {
        &self.by
    }

    /// Send one request and return the full response envelope
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unavailable` on transport failure and
    /// `ClientError::Api` when the daemon answers `ok: false`.
    pub async fn call_raw(
        &self,
        op: &str,
        args: Map<String, Value>,
    ) -> Result<Response, ClientError> {
        self.call_raw_with_timeout(op, args, self.timeout).await
    }

    /// Like [`call_raw`](Self::call_raw) with a per-call timeout
    pub async fn call_raw_with_timeout(
        &self,
        op: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let request = Request::new(op, args);
        let response = call_daemon(&self.endpoint, &request, timeout).await?;

        if !response.ok {
            let err = DaemonApiError::from_response(response, "error", "daemon error");
            debug!(op = op, code = %err.code, "Daemon returned error");
            return Err(err.into());
        }

        Ok(response)
    }

    /// Send one request and return its `result` object (empty when absent)
    pub async fn call(
        &self,
        op: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ClientError> {
        Ok(self.call_raw(op, args).await?.result_map())
    }

    /// Check the daemon against version, capability and operation requirements
    ///
    /// Returns the ping result unchanged when every requirement holds.
    /// Operations are probed one at a time with empty arguments; the first
    /// `unknown_op` answer fails the check, any other daemon error means the
    /// operation exists.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Incompatible` when a requirement fails, and
    /// `ClientError::Unavailable`/`ClientError::Api` when the ping itself
    /// fails or a probe cannot reach the daemon.
    pub async fn assert_compatible(
        &self,
        options: &CompatibilityOptions,
    ) -> Result<Map<String, Value>, ClientError> {
        let ping = self.call("ping", Map::new()).await?;

        let ipc_v = ping.get("ipc_v").map(ipc_version).unwrap_or(0);
        if ipc_v < options.require_ipc_v {
            return Err(ClientError::incompatible(format!(
                "daemon ipc_v={} is incompatible (require ipc_v>={})",
                ipc_v, options.require_ipc_v
            )));
        }

        let capabilities = match ping.get("capabilities") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for (name, wanted) in &options.require_capabilities {
            if *wanted && !capabilities.get(name).is_some_and(truthy) {
                return Err(ClientError::incompatible(format!(
                    "daemon capability missing: {}=true is required",
                    name
                )));
            }
        }

        for op in &options.require_ops {
            let op = op.trim();
            if op.is_empty() || RESERVED_OPS.contains(&op) {
                continue;
            }
            match self.call_raw(op, Map::new()).await {
                Ok(_) => {}
                Err(ClientError::Api(err)) if err.code == "unknown_op" => {
                    return Err(ClientError::incompatible(format!(
                        "daemon does not support op: {}",
                        op
                    )));
                }
                Err(ClientError::Api(err)) => {
                    debug!(op = op, code = %err.code, "Probe rejected, op is known");
                }
                Err(err) => return Err(err),
            }
        }

        info!(ipc_v = ipc_v, endpoint = %self.endpoint, "Daemon is compatible");
        Ok(ping)
    }

    /// Open an `events_stream` subscription with raw arguments
    ///
    /// The timeout covers connect, request write and handshake read only.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unavailable` if the handshake cannot be
    /// completed and `ClientError::Api` if the daemon rejects it. The socket
    /// is closed before either error is returned.
    pub async fn subscribe(
        &self,
        args: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<EventStream, ClientError> {
        let request = Request::new("events_stream", args);
        let connection =
            open_events_stream(&self.endpoint, &request, timeout.unwrap_or(self.timeout)).await?;

        if !connection.handshake.ok {
            let StreamConnection { handshake, lines } = connection;
            drop(lines);
            return Err(
                DaemonApiError::from_response(handshake, "unknown", "Handshake failed").into(),
            );
        }

        Ok(EventStream::new(connection))
    }
}

/// Integer `ipc_v` from a number or numeric string; anything else is 0
fn ipc_version(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// JSON truthiness: false, 0, "", [], {} and null are false
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    type Handler = Arc<dyn Fn(&Request) -> Value + Send + Sync>;

    /// Fake daemon answering every connection with `handler(request)`
    ///
    /// Returns the client and the list of requests seen so far.
    fn fake_daemon(handler: Handler) -> (TempDir, CcccClient, Arc<Mutex<Vec<Request>>>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ccccd.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        tokio::spawn(async move {
            while let Ok((stream, _addr)) = listener.accept().await {
                let handler = handler.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream);
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let request: Request = serde_json::from_str(&line).unwrap();
                    let reply = handler(&request);
                    log.lock().unwrap().push(request);
                    let mut stream = reader.into_inner();
                    let mut out = serde_json::to_vec(&reply).unwrap();
                    out.push(b'\n');
                    let _ = stream.write_all(&out).await;
                });
            }
        });

        let client = CcccClient::with_endpoint(Endpoint::unix(path));
        (dir, client, seen)
    }

    fn ping_daemon(ping: Value) -> Handler {
        Arc::new(move |request: &Request| match request.op.as_str() {
            "ping" => json!({"v": 1, "ok": true, "result": ping.clone()}),
            "group_show" => json!({"ok": false, "error": {"code": "missing_group_id", "message": "group_id required"}}),
            _ => json!({"ok": false, "error": {"code": "unknown_op", "message": "unknown op"}}),
        })
    }

    #[tokio::test]
    async fn test_call_returns_result_map() {
        let (_dir, client, seen) = fake_daemon(ping_daemon(json!({"ipc_v": 1, "pong": true})));

        let result = client.call("ping", Map::new()).await.unwrap();
        assert_eq!(result.get("pong"), Some(&json!(true)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].op, "ping");
        assert!(seen[0].args.is_empty());
    }

    #[tokio::test]
    async fn test_call_raw_translates_api_error() {
        let (_dir, client, _seen) = fake_daemon(Arc::new(|_request: &Request| {
            json!({"ok": false, "error": {"code": "group_not_found", "message": "no such group"}})
        }));

        let err = client.call_raw("group_show", Map::new()).await.unwrap_err();
        let ClientError::Api(api) = err else {
            panic!("expected api error, got {:?}", err);
        };
        assert_eq!(api.code, "group_not_found");
        assert_eq!(api.message, "no such group");
        assert!(api.details.is_empty());
        assert!(api.raw.is_some_and(|raw| !raw.ok));
    }

    #[tokio::test]
    async fn test_call_raw_error_without_payload() {
        let (_dir, client, _seen) = fake_daemon(Arc::new(|_request: &Request| json!({"ok": false})));

        let err = client.call_raw("groups", Map::new()).await.unwrap_err();
        assert_eq!(err.api_code(), Some("error"));
        assert_eq!(err.to_string(), "error: daemon error");
    }

    #[tokio::test]
    async fn test_compatible_daemon_returns_ping() {
        let ping = json!({"ipc_v": 1, "capabilities": {"foo": true}});
        let (_dir, client, seen) = fake_daemon(ping_daemon(ping.clone()));

        let options = CompatibilityOptions::default()
            .require_capability("foo")
            .require_op("group_show")
            .require_op("events_stream");
        let result = client.assert_compatible(&options).await.unwrap();
        assert_eq!(Value::Object(result), ping);

        // events_stream is reserved and never probed
        let ops: Vec<String> = seen.lock().unwrap().iter().map(|r| r.op.clone()).collect();
        assert_eq!(ops, vec!["ping".to_string(), "group_show".to_string()]);
    }

    #[tokio::test]
    async fn test_incompatible_ipc_version() {
        let (_dir, client, _seen) =
            fake_daemon(ping_daemon(json!({"ipc_v": 1, "capabilities": {"foo": true}})));

        let err = client
            .assert_compatible(&CompatibilityOptions::default().require_ipc_v(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Incompatible { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_incompatible_missing_capability() {
        let (_dir, client, _seen) =
            fake_daemon(ping_daemon(json!({"ipc_v": 1, "capabilities": {"foo": true, "baz": 0}})));

        let err = client
            .assert_compatible(&CompatibilityOptions::default().require_capability("bar"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bar"));
        assert!(matches!(err, ClientError::Incompatible { .. }));

        let err = client
            .assert_compatible(&CompatibilityOptions::default().require_capability("baz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Incompatible { .. }));
    }

    #[tokio::test]
    async fn test_unknown_op_probe_short_circuits() {
        let (_dir, client, seen) = fake_daemon(ping_daemon(json!({"ipc_v": 1})));

        let options = CompatibilityOptions::default()
            .require_op("term_resize")
            .require_op("group_show");
        let err = client.assert_compatible(&options).await.unwrap_err();
        assert!(matches!(err, ClientError::Incompatible { .. }));
        assert!(err.to_string().contains("term_resize"));

        // Second op is never probed
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ping_result_with_string_ipc_version() {
        let (_dir, client, _seen) = fake_daemon(ping_daemon(json!({"ipc_v": "3"})));
        let options = CompatibilityOptions::default().require_ipc_v(3);
        assert!(client.assert_compatible(&options).await.is_ok());
    }

    #[tokio::test]
    async fn test_handshake_rejection_closes_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ccccd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _addr) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut stream = reader.into_inner();
            stream
                .write_all(b"{\"ok\":false,\"error\":{\"code\":\"group_not_found\",\"message\":\"nope\"}}\n")
                .await
                .unwrap();

            // Client hangs up; the next read is EOF and nothing else arrives
            let mut buf = Vec::new();
            let n = stream.read_to_end(&mut buf).await.unwrap();
            assert_eq!(n, 0);
        });

        let client = CcccClient::with_endpoint(Endpoint::unix(&path));
        let err = client.subscribe(Map::new(), None).await.unwrap_err();
        assert_eq!(err.api_code(), Some("group_not_found"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejection_without_payload() {
        let (_dir, client, _seen) = fake_daemon(Arc::new(|_request: &Request| json!({"ok": false})));

        let err = client.subscribe(Map::new(), None).await.unwrap_err();
        assert_eq!(err.api_code(), Some("unknown"));
        assert!(err.to_string().contains("Handshake failed"));
    }

    fn loose_error_replies() -> Vec<(Value, &'static str, &'static str)> {
        vec![
            (json!({"ok": false, "error": "boom"}), "", ""),
            (
                json!({"ok": false, "error": {"code": "group_not_found", "message": null}}),
                "group_not_found",
                "",
            ),
            (
                json!({"ok": false, "error": {"code": "bad", "message": "nope", "details": "text"}}),
                "bad",
                "nope",
            ),
        ]
    }

    fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
        if value.is_empty() {
            fallback
        } else {
            value
        }
    }

    #[tokio::test]
    async fn test_call_raw_loose_error_payloads_are_api_errors() {
        for (reply, code, message) in loose_error_replies() {
            let (_dir, client, _seen) =
                fake_daemon(Arc::new(move |_request: &Request| reply.clone()));

            match client.call_raw("groups", Map::new()).await {
                Err(ClientError::Api(err)) => {
                    assert_eq!(err.code, or_default(code, "error"));
                    assert_eq!(err.message, or_default(message, "daemon error"));
                    assert!(err.details.is_empty());
                }
                other => panic!("expected an API error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_loose_error_payloads_are_api_errors() {
        for (reply, code, message) in loose_error_replies() {
            let (_dir, client, _seen) =
                fake_daemon(Arc::new(move |_request: &Request| reply.clone()));

            match client.subscribe(Map::new(), None).await {
                Err(ClientError::Api(err)) => {
                    assert_eq!(err.code, or_default(code, "unknown"));
                    assert_eq!(err.message, or_default(message, "Handshake failed"));
                    assert!(err.details.is_empty());
                }
                Err(other) => panic!("expected an API error, got {:?}", other),
                Ok(_) => panic!("handshake with ok:false must be rejected"),
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_yields_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ccccd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _addr) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut stream = reader.into_inner();
            stream
                .write_all(
                    b"{\"ok\":true,\"result\":{}}\n{\"t\":\"heartbeat\",\"ts\":\"1\"}\nnot json\n{\"t\":\"heartbeat\",\"ts\":\"2\"}\n",
                )
                .await
                .unwrap();
        });

        let client = CcccClient::with_endpoint(Endpoint::unix(&path));
        let mut events = client.subscribe(Map::new(), None).await.unwrap();
        assert!(events.handshake().ok);

        let mut count = 0;
        while let Some(item) = events.next_item().await.unwrap() {
            assert_eq!(item.kind(), "heartbeat");
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_unavailable_when_nothing_listens() {
        let dir = TempDir::new().unwrap();
        let client = CcccClient::new(ClientOptions::new().with_home(dir.path()));

        assert_eq!(
            client.endpoint(),
            &Endpoint::unix(dir.path().join("daemon").join("ccccd.sock"))
        );
        let err = client.call("ping", Map::new()).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_options_defaults() {
        let client = CcccClient::with_endpoint(Endpoint::tcp("127.0.0.1", 9765));
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(client.default_by(), "user");

        let client = CcccClient::new(
            ClientOptions::new()
                .with_endpoint(Endpoint::Unset)
                .with_timeout(Duration::from_secs(2))
                .with_by("peer-1"),
        );
        assert_eq!(client.timeout(), Duration::from_secs(2));
        assert_eq!(client.default_by(), "peer-1");
    }

    #[test]
    fn test_truthiness_and_version_parsing() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));

        assert_eq!(ipc_version(&json!(2)), 2);
        assert_eq!(ipc_version(&json!("4")), 4);
        assert_eq!(ipc_version(&json!("x")), 0);
        assert_eq!(ipc_version(&json!(null)), 0);
    }
}
