//! Deadline-bounded JSON/HTTP client for agent RPCs.
//!
//! One management operation gets one [`Deadline`]; every RPC it issues
//! runs under whatever budget is left. The client opens a fresh
//! connection per call (agent RPCs are rare and small), performs an
//! http1 handshake, and decodes the `RpcResponse` envelope.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::wire::{
    BondEntity, CreateEntity, DeleteEntity, ReplicationReady, RevokeEntity, RpcResponse,
    SlaveEntity, UnbondEntity,
};

/// Header carrying the caller's remaining budget in milliseconds. The
/// agent bounds its entity-lock wait by this value.
pub const DEADLINE_HEADER: &str = "x-deadline-ms";

/// Budget for one management operation when the operator configured none.
pub const DEFAULT_OP_BUDGET: Duration = Duration::from_secs(30);

/// Longest an agent waits on a busy entity lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(3);

// ── Deadline ───────────────────────────────────────────────────────

/// Time budget for one management operation.
///
/// Created once when the operation starts; `remaining()` feeds each
/// downstream RPC. An exhausted deadline fails the call before any
/// network activity.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// Deadline with the stock operation budget.
    pub fn after_default() -> Self {
        Self::after(DEFAULT_OP_BUDGET)
    }

    /// Rebuild a deadline from the wire header value (milliseconds).
    pub fn from_millis_header(value: &str) -> Option<Self> {
        let ms = value.trim().parse::<u64>().ok()?;
        Some(Self::after(Duration::from_millis(ms)))
    }

    /// The budget this deadline started with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, or `None` once exhausted.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }

    /// How long an entity lock may be waited on under this deadline.
    pub fn lock_wait(&self) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(DEFAULT_LOCK_WAIT),
            None => Duration::ZERO,
        }
    }
}

// ── AgentCall ──────────────────────────────────────────────────────

/// One method per agent RPC. The control plane holds this as a trait
/// object so tests substitute scripted agents.
#[async_trait]
pub trait AgentCall: Send + Sync {
    async fn create_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &CreateEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn delete_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &DeleteEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn start_entity(&self, addr: &str, entity: &str, deadline: Deadline)
    -> RpcResult<RpcResponse>;

    async fn stop_entity(&self, addr: &str, entity: &str, deadline: Deadline)
    -> RpcResult<RpcResponse>;

    async fn status_entity(
        &self,
        addr: &str,
        entity: &str,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn bond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &BondEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn unbond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &UnbondEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn slave_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &SlaveEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn replication_ready(
        &self,
        addr: &str,
        entity: &str,
        req: &ReplicationReady,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;

    async fn revoke_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &RevokeEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse>;
}

// ── AgentClient ────────────────────────────────────────────────────

/// The production [`AgentCall`] implementation over hyper.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentClient;

impl AgentClient {
    pub fn new() -> Self {
        Self
    }

    async fn call(
        &self,
        addr: &str,
        method: Method,
        path: &str,
        body: Vec<u8>,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let Some(remaining) = deadline.remaining() else {
            return Err(RpcError::DeadlineExhausted(deadline.budget()));
        };
        let uri = format!("http://{addr}{path}");

        let exchange = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| RpcError::Unreachable {
                    addr: addr.to_string(),
                    source: e,
                })?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) =
                http1::handshake(io).await.map_err(|e| RpcError::Http {
                    addr: addr.to_string(),
                    source: e,
                })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", addr)
                .header("content-type", "application/json")
                .header("user-agent", "dbfleet-rpc/0.1")
                .header(DEADLINE_HEADER, remaining.as_millis().to_string())
                .body(Full::new(Bytes::from(body)))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| RpcError::Http {
                    addr: addr.to_string(),
                    source: e,
                })?;

            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| RpcError::Http {
                    addr: addr.to_string(),
                    source: e,
                })?
                .to_bytes();

            if !status.is_success() {
                return Err(RpcError::Status {
                    addr: addr.to_string(),
                    status: status.as_u16(),
                });
            }
            serde_json::from_slice(&bytes).map_err(|e| RpcError::Envelope {
                addr: addr.to_string(),
                source: e,
            })
        };

        match tokio::time::timeout(remaining, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%addr, %uri, "agent rpc timed out");
                Err(RpcError::Timeout {
                    addr: addr.to_string(),
                })
            }
        }
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        addr: &str,
        path: &str,
        req: &T,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let body = serde_json::to_vec(req).map_err(RpcError::Encode)?;
        self.call(addr, Method::POST, path, body, deadline).await
    }
}

#[async_trait]
impl AgentCall for AgentClient {
    async fn create_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &CreateEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}"), req, deadline)
            .await
    }

    async fn delete_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &DeleteEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let body = serde_json::to_vec(req).map_err(RpcError::Encode)?;
        self.call(
            addr,
            Method::DELETE,
            &format!("/v1/entities/{entity}"),
            body,
            deadline,
        )
        .await
    }

    async fn start_entity(
        &self,
        addr: &str,
        entity: &str,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.call(
            addr,
            Method::POST,
            &format!("/v1/entities/{entity}/start"),
            Vec::new(),
            deadline,
        )
        .await
    }

    async fn stop_entity(
        &self,
        addr: &str,
        entity: &str,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.call(
            addr,
            Method::POST,
            &format!("/v1/entities/{entity}/stop"),
            Vec::new(),
            deadline,
        )
        .await
    }

    async fn status_entity(
        &self,
        addr: &str,
        entity: &str,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.call(
            addr,
            Method::GET,
            &format!("/v1/entities/{entity}/status"),
            Vec::new(),
            deadline,
        )
        .await
    }

    async fn bond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &BondEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}/bond"), req, deadline)
            .await
    }

    async fn unbond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &UnbondEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}/unbond"), req, deadline)
            .await
    }

    async fn slave_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &SlaveEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}/slave"), req, deadline)
            .await
    }

    async fn replication_ready(
        &self,
        addr: &str,
        entity: &str,
        req: &ReplicationReady,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}/ready"), req, deadline)
            .await
    }

    async fn revoke_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &RevokeEntity,
        deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.post_json(addr, &format!("/v1/entities/{entity}/revoke"), req, deadline)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // ── Test helpers ────────────────────────────────────────────────

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0)
    }

    /// Read one full HTTP request (head plus declared body) as a string.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                if buf.len() - (end + 4) >= content_length(&head) {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve one canned envelope, forwarding the raw request for assertions.
    async fn canned_agent(
        body: &'static str,
    ) -> (std::net::SocketAddr, tokio::sync::oneshot::Receiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let _ = tx.send(request);
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(resp.as_bytes()).await;
        });
        (addr, rx)
    }

    fn bond_request() -> BondEntity {
        BondEntity {
            master: crate::wire::MasterSide {
                database_id: 3,
                host: "10.0.0.5".to_string(),
                port: 3306,
                repl_user: "repluser-9".to_string(),
                repl_passwd: "repl-abcdef".to_string(),
                file: None,
                position: None,
                schemas: Vec::new(),
            },
            force: false,
        }
    }

    // ── Deadline ────────────────────────────────────────────────────

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::after(Duration::from_millis(40));
        assert!(deadline.remaining().is_some());
        std::thread::sleep(Duration::from_millis(60));
        assert!(deadline.remaining().is_none());
    }

    #[test]
    fn lock_wait_caps_at_default() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        assert_eq!(deadline.lock_wait(), DEFAULT_LOCK_WAIT);
    }

    #[test]
    fn lock_wait_shrinks_with_short_budget() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(deadline.lock_wait() <= Duration::from_millis(100));
    }

    #[test]
    fn deadline_from_header_value() {
        let deadline = Deadline::from_millis_header("2500").unwrap();
        assert!(deadline.remaining().unwrap() <= Duration::from_millis(2500));
        assert!(Deadline::from_millis_header("soon").is_none());
    }

    // ── AgentClient ─────────────────────────────────────────────────

    #[tokio::test]
    async fn decodes_success_envelope() {
        let (addr, _rx) =
            canned_agent(r#"{"resultcode":"success","result":"bonded","data":[]}"#).await;
        let client = AgentClient::new();

        let resp = client
            .bond_entity(
                &addr.to_string(),
                "db-7",
                &bond_request(),
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.result, "bonded");
    }

    #[tokio::test]
    async fn decodes_locked_envelope() {
        let (addr, _rx) =
            canned_agent(r#"{"resultcode":"locked","result":"entity busy"}"#).await;
        let client = AgentClient::new();

        let resp = client
            .start_entity(
                &addr.to_string(),
                "db-7",
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert!(resp.is_locked());
    }

    #[tokio::test]
    async fn request_carries_path_and_deadline_header() {
        let (addr, rx) =
            canned_agent(r#"{"resultcode":"success","result":"ok"}"#).await;
        let client = AgentClient::new();

        client
            .bond_entity(
                &addr.to_string(),
                "db-7",
                &bond_request(),
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let request = rx.await.unwrap();
        assert!(request.starts_with("POST "));
        assert!(request.contains("/v1/entities/db-7/bond"));
        assert!(request.to_lowercase().contains("x-deadline-ms:"));
        assert!(request.contains("repluser-9"));
    }

    #[tokio::test]
    async fn status_uses_get() {
        let (addr, rx) = canned_agent(
            r#"{"resultcode":"success","result":"ok","data":[{"entity":"db-7","running":true,"port":3306}]}"#,
        )
        .await;
        let client = AgentClient::new();

        let resp = client
            .status_entity(
                &addr.to_string(),
                "db-7",
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        let status: crate::wire::EntityStatus = resp.first().unwrap();
        assert!(status.running);

        let request = rx.await.unwrap();
        assert!(request.starts_with("GET "));
        assert!(request.contains("/v1/entities/db-7/status"));
    }

    #[tokio::test]
    async fn unreachable_agent_is_an_error() {
        let client = AgentClient::new();
        // Bind then drop, so the port is free but nothing listens.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client
            .start_entity(
                &addr.to_string(),
                "db-7",
                Deadline::after(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn exhausted_deadline_fails_before_connecting() {
        let client = AgentClient::new();
        let deadline = Deadline::after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = client
            .start_entity("127.0.0.1:1", "db-7", deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::DeadlineExhausted(_)));
    }

    #[tokio::test]
    async fn malformed_envelope_is_an_error() {
        let (addr, _rx) = canned_agent("not json at all").await;
        let client = AgentClient::new();

        let err = client
            .start_entity(
                &addr.to_string(),
                "db-7",
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Envelope { .. }));
    }
}
