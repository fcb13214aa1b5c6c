//! Newline-delimited JSON-RPC 2.0 over TCP.
//!
//! One connection per plugin instance, opened lazily and reopened after a
//! transport failure. Calls are multiplexed on the request id: a reader
//! task routes each response to the call waiting on that id, and a writer
//! task sends whole request lines, so a slow call never holds up another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use plexus_core::{ConfigDataNode, ConfigPolicy, Metric};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::client::{CollectorClient, PluginRpc, ProcessorClient, PublisherClient};
use crate::error::{RpcError, RpcResult};

/// RPC method names.
pub mod methods {
    /// Liveness check.
    pub const PING: &str = "Plugin.Ping";
    /// Ask the plugin to exit.
    pub const KILL: &str = "Plugin.Kill";
    /// Fetch the config policy.
    pub const GET_CONFIG_POLICY: &str = "Plugin.GetConfigPolicy";
    /// Advertised metrics.
    pub const GET_METRIC_TYPES: &str = "Collector.GetMetricTypes";
    /// Collect values.
    pub const COLLECT_METRICS: &str = "Collector.CollectMetrics";
    /// Process metrics.
    pub const PROCESS: &str = "Processor.Process";
    /// Publish metrics.
    pub const PUBLISH: &str = "Publisher.Publish";
}

type Reply = oneshot::Sender<RpcResult<Value>>;

/// Calls waiting for a response, keyed by request id.
#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, Reply>,
}

#[derive(Default)]
struct Shared {
    pending: StdMutex<PendingCalls>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_open(&self) -> bool {
        !self.pending().closed
    }

    fn complete(&self, id: u64, outcome: RpcResult<Value>) {
        let reply = self.pending().calls.remove(&id);
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            },
            // The caller gave up, usually on a timeout.
            None => trace!(id, "Dropping rpc response with no waiting call"),
        }
    }

    /// Mark the connection closed and fail every waiting call.
    fn close(&self, error: &RpcError) {
        let drained: Vec<Reply> = {
            let mut pending = self.pending();
            pending.closed = true;
            pending.calls.drain().map(|(_, reply)| reply).collect()
        };
        for reply in drained {
            let _ = reply.send(Err(error.clone()));
        }
    }
}

/// Removes a call from the pending map when it finishes or is cancelled.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().calls.remove(&self.id);
    }
}

struct Connection {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn open(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        let shared = Arc::new(Shared::default());
        let (outgoing, lines) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_responses(read, Arc::clone(&shared)));
        let writer = tokio::spawn(write_requests(write, lines, Arc::clone(&shared)));
        Self {
            shared,
            outgoing,
            reader,
            writer,
        }
    }

    fn is_open(&self) -> bool {
        self.shared.is_open() && !self.outgoing.is_closed()
    }

    /// Send `line` and wait for the response to `id`.
    async fn call(&self, id: u64, line: String) -> RpcResult<Value> {
        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                return Err(RpcError::Closed);
            }
            pending.calls.insert(id, reply);
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };
        self.outgoing.send(line).map_err(|_| RpcError::Closed)?;
        response.await.map_err(|_| RpcError::Closed)?
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_responses(read: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(read).lines();
    let failure = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break RpcError::Closed,
            Err(e) => break RpcError::Io(e.to_string()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response: RpcResponse = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => break RpcError::Protocol(e.to_string()),
        };
        let Some(id) = response.id else {
            debug!("Dropping rpc response without an id");
            continue;
        };
        let outcome = match response.error {
            Some(err) => Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        shared.complete(id, outcome);
    };
    debug!(error = %failure, "Rpc connection closed");
    shared.close(&failure);
}

async fn write_requests(
    mut write: OwnedWriteHalf,
    mut lines: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    while let Some(line) = lines.recv().await {
        let written = match write.write_all(line.as_bytes()).await {
            Ok(()) => write.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            shared.close(&RpcError::Io(e.to_string()));
            return;
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProcessResult {
    content_type: String,
    content: String,
}

/// JSON-RPC client for one plugin instance.
pub struct JsonRpcClient {
    address: String,
    token: String,
    timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client for `address`; `token` is sent with every call when
    /// non-empty.
    #[must_use]
    pub fn new(address: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    /// The plugin's listen address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Call `method` and decode its result.
    ///
    /// # Errors
    ///
    /// Transport, timeout, decode and remote failures.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        let result = tokio::time::timeout(self.timeout, self.call_raw(method, params))
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
            })??;
        serde_json::from_value(result).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    async fn call_raw(&self, method: &str, mut params: Value) -> RpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.token.is_empty()
            && let Value::Object(map) = &mut params
        {
            map.insert("token".into(), Value::String(self.token.clone()));
        }
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line =
            serde_json::to_string(&request).map_err(|e| RpcError::Protocol(e.to_string()))?;
        line.push('\n');

        let conn = self.connection().await?;
        trace!(address = %self.address, method, id, "rpc call");
        conn.call(id, line).await
    }

    /// The open connection, reconnecting if the last one closed.
    async fn connection(&self) -> RpcResult<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref()
            && conn.is_open()
        {
            return Ok(Arc::clone(conn));
        }
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| RpcError::Connect {
                address: self.address.clone(),
                message: e.to_string(),
            })?;
        let conn = Arc::new(Connection::open(stream));
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }
}

#[async_trait]
impl PluginRpc for JsonRpcClient {
    async fn ping(&self) -> RpcResult<()> {
        self.call::<Value>(methods::PING, json!({})).await.map(|_| ())
    }

    async fn kill(&self, reason: &str) -> RpcResult<()> {
        self.call::<Value>(methods::KILL, json!({ "reason": reason }))
            .await
            .map(|_| ())
    }

    async fn get_config_policy(&self) -> RpcResult<ConfigPolicy> {
        let value: Value = self.call(methods::GET_CONFIG_POLICY, json!({})).await?;
        if value.is_null() {
            return Ok(ConfigPolicy::default());
        }
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl CollectorClient for JsonRpcClient {
    async fn get_metric_types(&self, config: &ConfigDataNode) -> RpcResult<Vec<Metric>> {
        self.call(methods::GET_METRIC_TYPES, json!({ "config": config }))
            .await
    }

    async fn collect_metrics(&self, metrics: &[Metric]) -> RpcResult<Vec<Metric>> {
        self.call(methods::COLLECT_METRICS, json!({ "metrics": metrics }))
            .await
    }
}

#[async_trait]
impl ProcessorClient for JsonRpcClient {
    async fn process(
        &self,
        metrics: &[Metric],
        config: &ConfigDataNode,
    ) -> RpcResult<(String, Vec<u8>)> {
        let result: ProcessResult = self
            .call(
                methods::PROCESS,
                json!({ "metrics": metrics, "config": config }),
            )
            .await?;
        let content = STANDARD
            .decode(result.content.as_bytes())
            .map_err(|e| RpcError::Protocol(format!("invalid content encoding: {e}")))?;
        Ok((result.content_type, content))
    }
}

#[async_trait]
impl PublisherClient for JsonRpcClient {
    async fn publish(&self, metrics: &[Metric], config: &ConfigDataNode) -> RpcResult<()> {
        self.call::<Value>(
            methods::PUBLISH,
            json!({ "metrics": metrics, "config": config }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::Namespace;
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one connection, answering each request with `reply(method, params)`.
    async fn serve<F>(reply: F) -> String
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        serve_with_delay(|_| Duration::ZERO, reply).await
    }

    /// Like [`serve`], but each request is answered on its own task after
    /// `delay(method)`, so replies can come back out of order.
    async fn serve_with_delay<D, F>(delay: D, reply: F) -> String
    where
        D: Fn(&str) -> Duration + Send + Sync + 'static,
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let delay = Arc::new(delay);
        let reply = Arc::new(reply);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, write) = stream.into_split();
            let write = Arc::new(Mutex::new(write));
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let (delay, reply, write) =
                    (Arc::clone(&delay), Arc::clone(&reply), Arc::clone(&write));
                tokio::spawn(async move {
                    let method = request["method"].as_str().unwrap().to_string();
                    tokio::time::sleep(delay(&method)).await;
                    let mut response = reply(&method, &request["params"]);
                    response["jsonrpc"] = json!("2.0");
                    response["id"] = request["id"].clone();
                    let mut out = response.to_string();
                    out.push('\n');
                    let _ = write.lock().await.write_all(out.as_bytes()).await;
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_ping_and_token() {
        let address = serve(|method, params| {
            assert_eq!(method, methods::PING);
            assert_eq!(params["token"], "secret");
            json!({ "result": null })
        })
        .await;
        let client = JsonRpcClient::new(address, "secret", Duration::from_secs(2));
        client.ping().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_round_trip() {
        let address = serve(|_, params| {
            let mut metrics = params["metrics"].clone();
            metrics[0]["data"] = json!(42);
            json!({ "result": metrics })
        })
        .await;
        let client = JsonRpcClient::new(address, "", Duration::from_secs(2));
        let request = vec![Metric::new(Namespace::parse("/intel/mock/foo").unwrap(), 1)];
        let collected = client.collect_metrics(&request).await.unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].data, json!(42));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let address =
            serve(|_, _| json!({ "error": { "code": -32000, "message": "boom" } })).await;
        let client = JsonRpcClient::new(address, "", Duration::from_secs(2));
        let err = client.ping().await.unwrap_err();
        assert_eq!(
            err,
            RpcError::Remote {
                code: -32000,
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn test_process_decodes_content() {
        let address = serve(|_, _| {
            json!({ "result": { "content_type": "text/plain", "content": STANDARD.encode(b"hi") } })
        })
        .await;
        let client = JsonRpcClient::new(address, "", Duration::from_secs(2));
        let (content_type, content) = client.process(&[], &ConfigDataNode::new()).await.unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(content, b"hi");
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let client = JsonRpcClient::new(address, "", Duration::from_secs(2));
        assert!(matches!(
            client.ping().await.unwrap_err(),
            RpcError::Connect { .. }
        ));
    }

    fn slow_collect(method: &str) -> Duration {
        if method == methods::COLLECT_METRICS {
            Duration::from_millis(800)
        } else {
            Duration::ZERO
        }
    }

    fn echo_metrics(method: &str, params: &Value) -> Value {
        if method == methods::COLLECT_METRICS {
            json!({ "result": params["metrics"].clone() })
        } else {
            json!({ "result": null })
        }
    }

    #[tokio::test]
    async fn test_ping_answered_while_collect_in_flight() {
        let address = serve_with_delay(slow_collect, echo_metrics).await;
        let client = Arc::new(JsonRpcClient::new(address, "", Duration::from_secs(5)));

        let collecting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let request = vec![Metric::new(Namespace::parse("/intel/mock/foo").unwrap(), 1)];
                client.collect_metrics(&request).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_millis(300), client.ping())
            .await
            .expect("ping waited behind collect")
            .unwrap();
        assert!(!collecting.is_finished());
        assert_eq!(collecting.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_call_leaves_connection_usable() {
        let address = serve_with_delay(slow_collect, echo_metrics).await;
        let client = JsonRpcClient::new(address, "", Duration::from_millis(200));

        let err = client.collect_metrics(&[]).await.unwrap_err();
        assert_eq!(
            err,
            RpcError::Timeout {
                method: methods::COLLECT_METRICS.into()
            }
        );
        client.ping().await.unwrap();

        // The late collect reply has no caller left and is dropped.
        tokio::time::sleep(Duration::from_millis(800)).await;
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_fails_waiting_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let _ = lines.next_line().await;
        });
        let client = JsonRpcClient::new(address, "", Duration::from_secs(2));
        assert_eq!(client.ping().await.unwrap_err(), RpcError::Closed);
    }
}
