use serde_json::{json, Value};

use crate::rpc::utils::RpcErr;
use crate::rpc::{RpcApiContext, RpcHandler};

/// The network id, which is the chain id in decimal.
pub struct Version;
impl RpcHandler for Version {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(context.chain()?.config().chain_id.to_string()))
    }
}

pub struct Listening;
impl RpcHandler for Listening {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(true))
    }
}

pub struct PeerCount;
impl RpcHandler for PeerCount {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!("0x0"))
    }
}
