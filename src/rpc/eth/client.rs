use serde_json::{json, Value};

use crate::rpc::utils::{quantity, RpcErr};
use crate::rpc::{RpcApiContext, RpcHandler};

pub struct ChainId;
impl RpcHandler for ChainId {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(quantity(context.chain()?.config().chain_id)))
    }
}

pub struct GasPrice;
impl RpcHandler for GasPrice {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(quantity(context.chain()?.config().gas_price)))
    }
}

pub struct Coinbase;
impl RpcHandler for Coinbase {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(context.chain()?.config().coinbase))
    }
}

/// The node holds no keys.
pub struct Accounts;
impl RpcHandler for Accounts {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!([]))
    }
}

pub struct Hashrate;
impl RpcHandler for Hashrate {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!("0x0"))
    }
}

pub struct ProtocolVersion;
impl RpcHandler for ProtocolVersion {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(1))
    }
}

pub struct Syncing;
impl RpcHandler for Syncing {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(false))
    }
}

pub struct Mining;
impl RpcHandler for Mining {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(false))
    }
}
