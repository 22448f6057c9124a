//! HTTP/JSON face of a peer.
//!
//! Server side: one `POST /rpc/<method>` rocket route per protocol method,
//! each served on a blocking worker so inbound calls run concurrently.
//! Client side: [HttpTransport], a reqwest blocking client that speaks the
//! same routes.

use std::sync::Arc;
use std::time::Duration;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::chord_node::ChordNode;
use crate::chord_util::Identifier;
use crate::config::Config;
use crate::error::{ChordError, Result};
use crate::node_info::{PeerRef, TopoInfo};
use crate::rpc::{RpcReply, RpcRequest, Transport};

/// Body of the methods that take an identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdArg {
    pub id: Identifier,
}

type RpcResponse = std::result::Result<Json<Value>, (Status, String)>;

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Must be built outside of an async runtime.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(3)
            .build()
            .map_err(|e| ChordError::Endpoint(format!("building http client: {}", e)))?;
        Ok(HttpTransport { client })
    }

    /// Fetch the debugging snapshot served at `/topology`.
    pub fn topology(&self, peer: &PeerRef) -> Result<TopoInfo> {
        let url = format!("http://{}/topology", peer.endpoint());
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ChordError::unreachable(peer, e))?;
        if !resp.status().is_success() {
            return Err(ChordError::unreachable(peer, resp.status()));
        }
        let text = resp.text().map_err(|e| ChordError::unreachable(peer, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Transport for HttpTransport {
    fn call(&self, peer: &PeerRef, request: RpcRequest) -> Result<RpcReply> {
        let url = format!("http://{}/rpc/{}", peer.endpoint(), request.method());
        let mut builder = self.client.post(&url);
        if let Some(body) = request_body(&request)? {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let resp = builder
            .send()
            .map_err(|e| ChordError::unreachable(peer, e))?;
        let status = resp.status();
        let text = resp.text().map_err(|e| ChordError::unreachable(peer, e))?;
        if !status.is_success() {
            return Err(ChordError::unreachable(peer, format!("{}: {}", status, text)));
        }
        decode_reply(&request, &text)
    }
}

/// JSON body for `request`, or `None` for methods without arguments.
pub fn request_body(request: &RpcRequest) -> Result<Option<String>> {
    let body = match request {
        RpcRequest::FindSuccessor(id) | RpcRequest::ClosestPrecedingNode(id) => {
            Some(serde_json::to_string(&IdArg { id: *id })?)
        }
        RpcRequest::Join(peer) | RpcRequest::Notify(peer) => Some(serde_json::to_string(peer)?),
        RpcRequest::GetInfo
        | RpcRequest::Create
        | RpcRequest::GetPredecessor
        | RpcRequest::GetSuccessorList => None,
    };
    Ok(body)
}

/// Parse the reply body of `request` into the shape that method returns.
pub fn decode_reply(request: &RpcRequest, text: &str) -> Result<RpcReply> {
    let method = request.method();
    let unexpected = |e: serde_json::Error| {
        debug!("undecodable reply to {}: {}", method, e);
        ChordError::UnexpectedReply { method }
    };
    let reply = match request {
        RpcRequest::GetInfo | RpcRequest::FindSuccessor(_) | RpcRequest::ClosestPrecedingNode(_) => {
            RpcReply::Peer(serde_json::from_str(text).map_err(unexpected)?)
        }
        RpcRequest::GetPredecessor => RpcReply::MaybePeer(serde_json::from_str(text).map_err(unexpected)?),
        RpcRequest::GetSuccessorList => RpcReply::Peers(serde_json::from_str(text).map_err(unexpected)?),
        RpcRequest::Create | RpcRequest::Join(_) | RpcRequest::Notify(_) => RpcReply::Done,
    };
    Ok(reply)
}

fn reply_to_json(reply: RpcReply) -> Result<Value> {
    let value = match reply {
        RpcReply::Peer(peer) => serde_json::to_value(peer)?,
        RpcReply::MaybePeer(peer) => serde_json::to_value(peer)?,
        RpcReply::Peers(peers) => serde_json::to_value(peers)?,
        RpcReply::Done => Value::Bool(true),
    };
    Ok(value)
}

/// Run `request` against the node on a blocking worker; the handler may
/// itself make outbound calls.
async fn dispatch(node: &State<Arc<ChordNode>>, request: RpcRequest) -> RpcResponse {
    let node = Arc::clone(node.inner());
    let method = request.method();
    let handled = rocket::tokio::task::spawn_blocking(move || {
        node.handle(request).and_then(reply_to_json)
    })
    .await;
    match handled {
        Ok(Ok(value)) => Ok(Json(value)),
        Ok(Err(err)) => {
            warn!("rpc {} failed: {}", method, err);
            Err((Status::BadGateway, err.to_string()))
        }
        Err(join_err) => Err((Status::InternalServerError, join_err.to_string())),
    }
}

#[post("/rpc/get_info")]
async fn get_info(node: &State<Arc<ChordNode>>) -> RpcResponse {
    dispatch(node, RpcRequest::GetInfo).await
}

#[post("/rpc/create")]
async fn create(node: &State<Arc<ChordNode>>) -> RpcResponse {
    dispatch(node, RpcRequest::Create).await
}

#[post("/rpc/join", format = "json", data = "<bootstrap>")]
async fn join(node: &State<Arc<ChordNode>>, bootstrap: Json<PeerRef>) -> RpcResponse {
    dispatch(node, RpcRequest::Join(bootstrap.into_inner())).await
}

#[post("/rpc/find_successor", format = "json", data = "<arg>")]
async fn find_successor(node: &State<Arc<ChordNode>>, arg: Json<IdArg>) -> RpcResponse {
    dispatch(node, RpcRequest::FindSuccessor(arg.id)).await
}

#[post("/rpc/closest_preceding_node", format = "json", data = "<arg>")]
async fn closest_preceding_node(node: &State<Arc<ChordNode>>, arg: Json<IdArg>) -> RpcResponse {
    dispatch(node, RpcRequest::ClosestPrecedingNode(arg.id)).await
}

#[post("/rpc/notify", format = "json", data = "<candidate>")]
async fn notify(node: &State<Arc<ChordNode>>, candidate: Json<PeerRef>) -> RpcResponse {
    dispatch(node, RpcRequest::Notify(candidate.into_inner())).await
}

#[post("/rpc/get_predecessor")]
async fn get_predecessor(node: &State<Arc<ChordNode>>) -> RpcResponse {
    dispatch(node, RpcRequest::GetPredecessor).await
}

#[post("/rpc/get_successor_list")]
async fn get_successor_list(node: &State<Arc<ChordNode>>) -> RpcResponse {
    dispatch(node, RpcRequest::GetSuccessorList).await
}

#[get("/topology")]
fn topology(node: &State<Arc<ChordNode>>) -> std::result::Result<Json<TopoInfo>, (Status, String)> {
    node.topology()
        .map(Json)
        .map_err(|e| (Status::InternalServerError, e.to_string()))
}

/// Rocket instance serving `node` on the configured bind address and port.
pub fn build_rocket(node: Arc<ChordNode>, config: &Config) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.bind_address.clone()))
        .merge(("port", config.port))
        .merge(("log_level", "critical"))
        .merge(("cli_colors", false));

    rocket::custom(figment).manage(node).mount(
        "/",
        routes![
            get_info,
            create,
            join,
            find_successor,
            closest_preceding_node,
            notify,
            get_predecessor,
            get_successor_list,
            topology,
        ],
    )
}
