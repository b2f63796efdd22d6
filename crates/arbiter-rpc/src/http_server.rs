//! Status RPC over HTTP
//!
//! JSON-RPC 2.0 on `POST /`, single calls and batches.

use crate::methods::{
    handle_get_arbiter_info, handle_get_intents, handle_get_pending_proposals,
    handle_get_sync_height, handle_list_unspent, RpcContext, RpcError,
};
use axum::{
    extract::State,
    http::{header, Method},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// One call of a request body
#[derive(Debug, Deserialize)]
pub struct RpcCall {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Reply to one call; exactly one of `result` and `error` is set
#[derive(Debug, Serialize)]
pub struct RpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

#[derive(Debug, Serialize)]
pub struct ReplyError {
    pub code: i32,
    pub message: String,
}

impl RpcReply {
    fn new(id: Value, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (
                None,
                Some(ReplyError {
                    code: e.code(),
                    message: e.to_string(),
                }),
            ),
        };
        Self {
            jsonrpc: "2.0",
            id,
            result,
            error,
        }
    }
}

/// A single call or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RpcBody {
    Single(RpcCall),
    Batch(Vec<RpcCall>),
}

pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// `POST /` behind a permissive CORS layer
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Bind `addr` and serve until the task is dropped
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        tracing::info!("Status RPC server listening on {}", local);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(body): Json<RpcBody>,
) -> Json<Value> {
    let reply = |call: RpcCall| {
        let outcome = dispatch_method(&context, &call.method, call.params);
        RpcReply::new(call.id, outcome)
    };

    let replies = match body {
        RpcBody::Single(call) => serde_json::to_value(reply(call)),
        RpcBody::Batch(calls) => {
            serde_json::to_value(calls.into_iter().map(reply).collect::<Vec<_>>())
        }
    };
    Json(replies.unwrap_or_else(|e| {
        json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": -32603, "message": e.to_string() },
        })
    }))
}

/// Params arrive either positionally or as an object
fn param<'a>(params: &'a Value, index: usize, name: &str) -> Option<&'a str> {
    match params {
        Value::Array(values) => values.get(index).and_then(Value::as_str),
        Value::Object(map) => map.get(name).and_then(Value::as_str),
        _ => None,
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}

fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!(method, "status rpc call");
    match method {
        "getarbiterinfo" => to_value(handle_get_arbiter_info(ctx)?),

        "getsyncheight" => {
            let chain = param(&params, 0, "chain");
            to_value(handle_get_sync_height(ctx, chain)?)
        }

        "listunspent" => {
            let chain = param(&params, 0, "chain")
                .ok_or_else(|| RpcError::InvalidParams("Missing chain".to_string()))?;
            let address = param(&params, 1, "address");
            to_value(handle_list_unspent(ctx, chain, address)?)
        }

        "getpendingproposals" => to_value(handle_get_pending_proposals(ctx)?),

        "getintents" => to_value(handle_get_intents(ctx)?),

        "getversion" => Ok(json!({
            "arbiter-version": env!("CARGO_PKG_VERSION"),
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}
