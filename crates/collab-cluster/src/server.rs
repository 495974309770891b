//! Peer HTTP server.
//!
//! Mounts the collaborator's routes under the local card's API prefix
//! (`/collaborator` unless the card overrides it).
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `{api}/exchange` | One gossip step; replies with the next message or `null` |
//! | POST | `{api}/distribute` | Run a batch on this node's scheduler |
//! | POST | `{api}/dispatch` | Spread a batch across the cluster |
//! | GET | `{api}/digest` | Current membership digest |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use collab_core::{Digest, Task};
use serde::Serialize;
use tracing::{debug, warn};

use crate::collaborator::Collaborator;
use crate::error::ClusterError;
use crate::executor::run_local;
use crate::message::CardMessage;
use crate::transport::Transport;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(e: &ClusterError) -> Response {
    let status = match e {
        ClusterError::NoPeers => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::Codec(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: e.to_string() })).into_response()
}

/// Build the peer router for `collaborator`.
pub fn peer_router<T: Transport>(collaborator: Arc<Collaborator<T>>) -> Router {
    let prefix = collaborator.case().local().api();

    let routes = Router::new()
        .route("/exchange", post(exchange::<T>))
        .route("/distribute", post(distribute::<T>))
        .route("/dispatch", post(dispatch::<T>))
        .route("/digest", get(digest::<T>))
        .with_state(collaborator);

    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

/// POST {api}/exchange
async fn exchange<T: Transport>(
    State(collaborator): State<Arc<Collaborator<T>>>,
    Json(msg): Json<CardMessage>,
) -> Json<Option<CardMessage>> {
    debug!(from = %msg.from, msg_type = u8::from(msg.msg_type), "gossip message received");
    Json(collaborator.case().exchange(&msg))
}

/// POST {api}/distribute
async fn distribute<T: Transport>(
    State(collaborator): State<Arc<Collaborator<T>>>,
    Json(tasks): Json<BTreeMap<usize, Task>>,
) -> Json<BTreeMap<usize, Task>> {
    debug!(tasks = tasks.len(), "remote batch received");
    Json(run_local(collaborator.scheduler(), tasks).await)
}

/// POST {api}/dispatch
async fn dispatch<T: Transport>(
    State(collaborator): State<Arc<Collaborator<T>>>,
    Json(tasks): Json<BTreeMap<usize, Task>>,
) -> Response {
    match collaborator.sync_distribute(tasks).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => {
            warn!(error = %e, "dispatch rejected");
            error_response(&e)
        }
    }
}

/// GET {api}/digest
async fn digest<T: Transport>(State(collaborator): State<Arc<Collaborator<T>>>) -> Json<Digest> {
    Json(collaborator.case().digest())
}
