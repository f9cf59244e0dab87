//! JSON-RPC query layer over a [`Chain`].
//!
//! Each method is a handler struct implementing [`RpcHandler`]: `parse` turns
//! the positional params into the struct, `handle` runs it against the shared
//! [`RpcApiContext`]. Requests are routed by namespace, then by method name.

pub mod eth;
pub mod net;
pub mod types;
pub mod utils;
pub mod web3;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::chain::Chain;
use crate::filter::FilterRegistry;
use eth::account::{GetBalanceRequest, GetCodeRequest, GetStorageAtRequest, GetTransactionCountRequest};
use eth::block::{
    BlockNumberRequest, GetBlockByHashRequest, GetBlockByNumberRequest, GetBlockTransactionCountRequest,
    GetUncleByBlockRequest, GetUncleCountRequest,
};
use eth::client::{Accounts, ChainId, Coinbase, GasPrice, Hashrate, Mining, ProtocolVersion, Syncing};
use eth::filter::{
    DeleteFilterRequest, FilterChangesRequest, FilterLogsRequest, LogsRequest, NewBlockFilterRequest,
    NewFilterRequest, NewPendingTransactionFilterRequest,
};
use eth::transaction::{
    CallRequest, EstimateGasRequest, GetTransactionByBlockIndexRequest, GetTransactionByHashRequest,
    GetTransactionReceiptRequest, SendRawTransactionRequest,
};
use utils::{RpcErr, RpcErrorMetadata, RpcErrorResponse, RpcNamespace, RpcRequest, RpcRequestId, RpcSuccessResponse};

#[derive(Deserialize)]
#[serde(untagged)]
pub enum RpcRequestWrapper {
    Single(RpcRequest),
    Multiple(Vec<RpcRequest>),
}

/// State shared by every request. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct RpcApiContext {
    pub chain: Arc<RwLock<Chain>>,
    /// Filters installed through `eth_newFilter` and friends.
    pub active_filters: Arc<Mutex<FilterRegistry>>,
}

impl RpcApiContext {
    pub fn new(chain: Chain) -> Self {
        Self { chain: Arc::new(RwLock::new(chain)), active_filters: Arc::new(Mutex::new(FilterRegistry::new())) }
    }

    pub fn chain(&self) -> Result<RwLockReadGuard<'_, Chain>, RpcErr> {
        self.chain.read().map_err(|_| RpcErr::Internal("chain lock poisoned".to_string()))
    }

    pub fn chain_mut(&self) -> Result<RwLockWriteGuard<'_, Chain>, RpcErr> {
        self.chain.write().map_err(|_| RpcErr::Internal("chain lock poisoned".to_string()))
    }

    pub fn filters(&self) -> Result<MutexGuard<'_, FilterRegistry>, RpcErr> {
        self.active_filters.lock().map_err(|_| RpcErr::Internal("filter lock poisoned".to_string()))
    }
}

pub trait RpcHandler: Sized {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr>;

    fn call(req: &RpcRequest, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let request = Self::parse(&req.params)?;
        request.handle(context)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr>;
}

pub fn map_http_requests(req: &RpcRequest, context: &RpcApiContext) -> Result<Value, RpcErr> {
    debug!(method = %req.method, "rpc request");
    match req.namespace() {
        Ok(RpcNamespace::Eth) => map_eth_requests(req, context),
        Ok(RpcNamespace::Web3) => map_web3_requests(req, context),
        Ok(RpcNamespace::Net) => map_net_requests(req, context),
        Err(rpc_err) => Err(rpc_err),
    }
}

pub fn map_eth_requests(req: &RpcRequest, context: &RpcApiContext) -> Result<Value, RpcErr> {
    match req.method.as_str() {
        "eth_chainId" => ChainId::call(req, context),
        "eth_gasPrice" => GasPrice::call(req, context),
        "eth_hashrate" => Hashrate::call(req, context),
        "eth_accounts" => Accounts::call(req, context),
        "eth_coinbase" => Coinbase::call(req, context),
        "eth_protocolVersion" => ProtocolVersion::call(req, context),
        "eth_syncing" => Syncing::call(req, context),
        "eth_mining" => Mining::call(req, context),
        "eth_blockNumber" => BlockNumberRequest::call(req, context),
        "eth_getBlockByNumber" => GetBlockByNumberRequest::call(req, context),
        "eth_getBlockByHash" => GetBlockByHashRequest::call(req, context),
        "eth_getBlockTransactionCountByNumber" => GetBlockTransactionCountRequest::call(req, context),
        "eth_getBlockTransactionCountByHash" => GetBlockTransactionCountRequest::call(req, context),
        "eth_getUncleByBlockNumberAndIndex" | "eth_getUncleByBlockHashAndIndex" => {
            GetUncleByBlockRequest::call(req, context)
        }
        "eth_getUncleCountByBlockNumber" | "eth_getUncleCountByBlockHash" => GetUncleCountRequest::call(req, context),
        "eth_getBalance" => GetBalanceRequest::call(req, context),
        "eth_getTransactionCount" => GetTransactionCountRequest::call(req, context),
        "eth_getCode" => GetCodeRequest::call(req, context),
        "eth_getStorageAt" => GetStorageAtRequest::call(req, context),
        "eth_sendRawTransaction" => SendRawTransactionRequest::call(req, context),
        "eth_getTransactionByHash" => GetTransactionByHashRequest::call(req, context),
        "eth_getTransactionByBlockNumberAndIndex" | "eth_getTransactionByBlockHashAndIndex" => {
            GetTransactionByBlockIndexRequest::call(req, context)
        }
        "eth_getTransactionReceipt" => GetTransactionReceiptRequest::call(req, context),
        "eth_call" => CallRequest::call(req, context),
        "eth_estimateGas" => EstimateGasRequest::call(req, context),
        "eth_getLogs" => LogsRequest::call(req, context),
        "eth_newFilter" => NewFilterRequest::call(req, context),
        "eth_newBlockFilter" => NewBlockFilterRequest::call(req, context),
        "eth_newPendingTransactionFilter" => NewPendingTransactionFilterRequest::call(req, context),
        "eth_getFilterChanges" => FilterChangesRequest::call(req, context),
        "eth_getFilterLogs" => FilterLogsRequest::call(req, context),
        "eth_uninstallFilter" => DeleteFilterRequest::call(req, context),
        unknown_eth_method => Err(RpcErr::MethodNotFound(unknown_eth_method.to_owned())),
    }
}

pub fn map_web3_requests(req: &RpcRequest, context: &RpcApiContext) -> Result<Value, RpcErr> {
    match req.method.as_str() {
        "web3_clientVersion" => web3::ClientVersion::call(req, context),
        "web3_sha3" => web3::Sha3::call(req, context),
        unknown_web3_method => Err(RpcErr::MethodNotFound(unknown_web3_method.to_owned())),
    }
}

pub fn map_net_requests(req: &RpcRequest, context: &RpcApiContext) -> Result<Value, RpcErr> {
    match req.method.as_str() {
        "net_version" => net::Version::call(req, context),
        "net_listening" => net::Listening::call(req, context),
        "net_peerCount" => net::PeerCount::call(req, context),
        unknown_net_method => Err(RpcErr::MethodNotFound(unknown_net_method.to_owned())),
    }
}

pub fn rpc_response<E>(id: RpcRequestId, res: Result<Value, E>) -> Result<Value, RpcErr>
where
    E: Into<RpcErrorMetadata>,
{
    Ok(match res {
        Ok(result) => serde_json::to_value(RpcSuccessResponse { id, jsonrpc: "2.0".to_string(), result }),
        Err(error) => serde_json::to_value(RpcErrorResponse { id, jsonrpc: "2.0".to_string(), error: error.into() }),
    }?)
}

/// Serve one request body, single or batched.
pub fn handle_request_body(body: &str, context: &RpcApiContext) -> Result<Value, RpcErr> {
    match serde_json::from_str::<RpcRequestWrapper>(body) {
        Ok(RpcRequestWrapper::Single(request)) => {
            let res = map_http_requests(&request, context);
            rpc_response(request.id, res)
        }
        Ok(RpcRequestWrapper::Multiple(requests)) => {
            let mut responses = Vec::with_capacity(requests.len());
            for req in requests {
                let res = map_http_requests(&req, context);
                responses.push(rpc_response(req.id, res)?);
            }
            Ok(Value::Array(responses))
        }
        Err(_) => rpc_response(
            RpcRequestId::String("".to_string()),
            Err(RpcErr::BadParams("Invalid request body".to_string())),
        ),
    }
}

async fn handle_http_request(
    State(service_context): State<RpcApiContext>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let res = handle_request_body(&body, &service_context).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(res))
}

pub fn router(context: RpcApiContext) -> Router {
    Router::new().route("/", post(handle_http_request)).with_state(context)
}

/// Seal an empty block every `block_time` seconds.
pub async fn produce_blocks(context: RpcApiContext, block_time: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(block_time));
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        match context.chain_mut() {
            Ok(mut chain) => {
                chain.seal_block();
            }
            Err(e) => {
                tracing::error!(error = %e, "block production stopped");
                return;
            }
        }
    }
}

pub async fn start_api(http_addr: SocketAddr, chain: Chain) -> Result<(), RpcErr> {
    let block_time = chain.config().block_time;
    let context = RpcApiContext::new(chain);
    if block_time > 0 {
        tokio::spawn(produce_blocks(context.clone(), block_time));
    }
    let listener = TcpListener::bind(http_addr).await.map_err(|error| RpcErr::Internal(error.to_string()))?;
    info!("Starting HTTP server at {http_addr}");
    axum::serve(listener, router(context)).await.map_err(|error| RpcErr::Internal(error.to_string()))
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_utils::*;
    use super::*;

    #[test]
    fn unknown_method_and_namespace() {
        let ctx = context();
        assert_eq!(call(&ctx, "eth_foo", json!([]))["code"], -32601);
        assert_eq!(call(&ctx, "admin_nodeInfo", json!([]))["code"], -32601);
    }

    #[test]
    fn batch_preserves_ids() {
        let ctx = context();
        let body = r#"[{"jsonrpc":"2.0","id":7,"method":"eth_chainId","params":[]},
                       {"jsonrpc":"2.0","id":"x","method":"net_version"}]"#;
        let res = handle_request_body(body, &ctx).unwrap();
        assert_eq!(res[0]["id"], 7);
        assert_eq!(res[0]["result"], "0x2b");
        assert_eq!(res[1]["id"], "x");
        assert_eq!(res[1]["result"], "43");
    }

    #[test]
    fn malformed_body_is_an_error_response() {
        let res = handle_request_body("{", &context()).unwrap();
        assert_eq!(res["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn serves_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(context())).await });

        let response = post_json(addr, r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#""result":"0x2b""#), "{response}");

        let response = post_json(addr, r#"{"jsonrpc":"2.0","id":2,"method":"eth_uninstallFilter","params":["0x99"]}"#).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#""code":-32000"#), "{response}");
        assert!(response.contains("filter not found"), "{response}");
    }

    async fn post_json(addr: SocketAddr, body: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let request = format!(
            "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}
