use serde_json::{json, Value};

use crate::rpc::utils::{param, parse_bytes, RpcErr};
use crate::rpc::{RpcApiContext, RpcHandler};
use crate::word::keccak256;

pub struct ClientVersion;
impl RpcHandler for ClientVersion {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(format!("evm-node/v{}", env!("CARGO_PKG_VERSION"))))
    }
}

/// Keccak-256 of the given data.
pub struct Sha3 {
    pub data: Vec<u8>,
}

impl RpcHandler for Sha3 {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { data: parse_bytes(param(params, 0, "data")?, "data")? })
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(keccak256(&self.data)))
    }
}
