//! Transports: how a collaborator reaches its peers.
//!
//! `HttpTransport` talks JSON over plain HTTP/1 to the routes mounted by
//! [`crate::server::peer_router`]. `LoopbackTransport` routes calls to
//! cases and schedulers registered in the same process, with per-node
//! reachability switches for fault injection.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use collab_core::{Card, Digest, Task};
use collab_scheduler::Scheduler;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::debug;

use crate::case::Case;
use crate::error::{ClusterError, ClusterResult};
use crate::executor::run_local;
use crate::message::CardMessage;

/// Remote procedure calls a collaborator makes against a peer.
pub trait Transport: Send + Sync + 'static {
    /// Deliver one gossip message and return the peer's reply, if any.
    fn exchange(
        &self,
        peer: &Card,
        msg: CardMessage,
    ) -> impl Future<Output = ClusterResult<Option<CardMessage>>> + Send;

    /// Run a batch on the peer's local scheduler.
    fn distribute(
        &self,
        peer: &Card,
        tasks: BTreeMap<usize, Task>,
    ) -> impl Future<Output = ClusterResult<BTreeMap<usize, Task>>> + Send;
}

// ── HTTP ───────────────────────────────────────────────────────────

/// Default connect deadline.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// JSON-over-HTTP/1 client. One connection per call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    dial_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

impl HttpTransport {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }

    /// Ask a node to spread a batch across its cluster view.
    pub async fn dispatch(
        &self,
        peer: &Card,
        tasks: &BTreeMap<usize, Task>,
    ) -> ClusterResult<BTreeMap<usize, Task>> {
        self.post(peer, "/dispatch", tasks).await
    }

    /// Fetch a node's current digest.
    pub async fn digest(&self, peer: &Card) -> ClusterResult<Digest> {
        self.send(peer, Method::GET, "/digest", Bytes::new()).await
    }

    async fn post<B, R>(&self, peer: &Card, route: &str, body: &B) -> ClusterResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| ClusterError::Codec(e.to_string()))?;
        self.send(peer, Method::POST, route, Bytes::from(payload)).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        peer: &Card,
        method: Method,
        route: &str,
        payload: Bytes,
    ) -> ClusterResult<R> {
        let address = peer.identity();
        let path = format!("{}{route}", peer.api());

        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ClusterError::Connection(format!("{address}: dial timed out")))?
            .map_err(|e| ClusterError::Connection(format!("{address}: {e}")))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ClusterError::Connection(format!("{address}: handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "peer connection closed with error");
            }
        });

        let req = Request::builder()
            .method(method)
            .uri(path.as_str())
            .header(HOST, address.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, "collab/0.1")
            .body(Full::new(payload))
            .map_err(|e| ClusterError::Codec(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ClusterError::Connection(format!("{address}{path}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClusterError::Connection(format!("{address}{path}: {e}")))?
            .to_bytes();

        if !status.is_success() {
            debug!(%status, %address, %path, "peer returned non-2xx");
            return Err(ClusterError::Connection(format!(
                "{address}{path}: HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        serde_json::from_slice(&body).map_err(|e| ClusterError::Codec(e.to_string()))
    }
}

impl Transport for HttpTransport {
    async fn exchange(&self, peer: &Card, msg: CardMessage) -> ClusterResult<Option<CardMessage>> {
        self.post(peer, "/exchange", &msg).await
    }

    async fn distribute(
        &self,
        peer: &Card,
        tasks: BTreeMap<usize, Task>,
    ) -> ClusterResult<BTreeMap<usize, Task>> {
        self.post(peer, "/distribute", &tasks).await
    }
}

// ── Loopback ───────────────────────────────────────────────────────

struct LoopbackNode {
    case: Arc<Case>,
    scheduler: Arc<Scheduler>,
    reachable: bool,
}

/// In-process transport keyed by card identity.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    nodes: Arc<RwLock<HashMap<String, LoopbackNode>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a node reachable under its local card's identity.
    pub fn register(&self, case: Arc<Case>, scheduler: Arc<Scheduler>) {
        let identity = case.local().identity();
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, LoopbackNode {
                case,
                scheduler,
                reachable: true,
            });
    }

    /// Toggle whether calls to `identity` succeed.
    pub fn set_reachable(&self, identity: &str, reachable: bool) {
        if let Some(node) = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(identity)
        {
            node.reachable = reachable;
        }
    }

    fn node(&self, peer: &Card) -> ClusterResult<(Arc<Case>, Arc<Scheduler>)> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(&peer.identity()) {
            Some(n) if n.reachable => Ok((Arc::clone(&n.case), Arc::clone(&n.scheduler))),
            Some(_) => Err(ClusterError::Connection(format!("{peer}: unreachable"))),
            None => Err(ClusterError::Connection(format!("{peer}: connection refused"))),
        }
    }
}

impl Transport for LoopbackTransport {
    async fn exchange(&self, peer: &Card, msg: CardMessage) -> ClusterResult<Option<CardMessage>> {
        let (case, _) = self.node(peer)?;
        Ok(case.exchange(&msg))
    }

    async fn distribute(
        &self,
        peer: &Card,
        tasks: BTreeMap<usize, Task>,
    ) -> ClusterResult<BTreeMap<usize, Task>> {
        let (_, scheduler) = self.node(peer)?;
        Ok(run_local(&scheduler, tasks).await)
    }
}
