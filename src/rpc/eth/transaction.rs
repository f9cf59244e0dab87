use primitive_types::H256;
use serde_json::{json, Value};

use crate::chain::BlockTag;
use crate::executor::{self, CallRequest as CallParams};
use crate::rpc::eth::block::BlockRef;
use crate::rpc::types::{rpc_receipt, rpc_transaction};
use crate::rpc::utils::{
    block_tag_or_latest, hex_data, param, parse_address, parse_bytes, parse_hash, parse_u256, parse_u64, quantity,
    RpcErr,
};
use crate::rpc::{RpcApiContext, RpcHandler};

pub struct SendRawTransactionRequest {
    pub data: Vec<u8>,
}

impl RpcHandler for SendRawTransactionRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { data: parse_bytes(param(params, 0, "data")?, "data")? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let hash = context.chain_mut()?.submit_raw_transaction(&self.data)?;
        Ok(json!(hash))
    }
}

pub struct GetTransactionByHashRequest {
    pub transaction_hash: H256,
}

impl RpcHandler for GetTransactionByHashRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { transaction_hash: parse_hash(param(params, 0, "hash")?, "hash")? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(chain.transaction(&self.transaction_hash).map_or(Value::Null, rpc_transaction))
    }
}

/// Serves both `ByBlockNumberAndIndex` and `ByBlockHashAndIndex`.
pub struct GetTransactionByBlockIndexRequest {
    pub block: BlockRef,
    pub index: u64,
}

impl RpcHandler for GetTransactionByBlockIndexRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self {
            block: BlockRef::parse(param(params, 0, "block")?, "block")?,
            index: parse_u64(param(params, 1, "index")?, "index")?,
        })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        let tx = self
            .block
            .resolve(&chain)
            .and_then(|b| usize::try_from(self.index).ok().and_then(|i| b.transactions.get(i)));
        Ok(tx.map_or(Value::Null, rpc_transaction))
    }
}

pub struct GetTransactionReceiptRequest {
    pub transaction_hash: H256,
}

impl RpcHandler for GetTransactionReceiptRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { transaction_hash: parse_hash(param(params, 0, "hash")?, "hash")? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(chain.receipt(&self.transaction_hash).map_or(Value::Null, rpc_receipt))
    }
}

/// Parse a call object: `{from, to, gas, gasPrice, value, data | input}`.
fn parse_call_object(value: &Value) -> Result<CallParams, RpcErr> {
    let object = value.as_object().ok_or_else(|| RpcErr::WrongParam("transaction".to_string()))?;
    let field = |name: &'static str| object.get(name).filter(|v| !v.is_null());
    let data = match field("input").or_else(|| field("data")) {
        Some(v) => parse_bytes(v, "data")?,
        None => Vec::new(),
    };
    Ok(CallParams {
        from: field("from").map(|v| parse_address(v, "from")).transpose()?,
        to: field("to").map(|v| parse_address(v, "to")).transpose()?,
        gas: field("gas").map(|v| parse_u64(v, "gas")).transpose()?,
        gas_price: field("gasPrice").map(|v| parse_u256(v, "gasPrice")).transpose()?,
        value: field("value").map(|v| parse_u256(v, "value")).transpose()?,
        data,
    })
}

pub struct CallRequest {
    pub transaction: CallParams,
    pub block: BlockTag,
}

impl RpcHandler for CallRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self {
            transaction: parse_call_object(param(params, 0, "transaction")?)?,
            block: block_tag_or_latest(params, 1)?,
        })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        let number = chain.resolve(self.block).ok_or_else(|| RpcErr::Server("header not found".to_string()))?;
        let state = chain.state_at(BlockTag::Number(number)).ok_or_else(|| RpcErr::Internal("missing state".to_string()))?;
        let output = executor::simulate(state, &chain.call_env(number), &self.transaction)?.into_result()?;
        Ok(json!(hex_data(&output)))
    }
}

pub struct EstimateGasRequest {
    pub transaction: CallParams,
    pub block: BlockTag,
}

impl RpcHandler for EstimateGasRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self {
            transaction: parse_call_object(param(params, 0, "transaction")?)?,
            block: block_tag_or_latest(params, 1)?,
        })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        let number = chain.resolve(self.block).ok_or_else(|| RpcErr::Server("header not found".to_string()))?;
        let state = chain.state_at(BlockTag::Number(number)).ok_or_else(|| RpcErr::Internal("missing state".to_string()))?;
        let gas = executor::estimate_gas(state, &chain.call_env(number), &self.transaction)?;
        Ok(json!(quantity(gas)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::DEFAULT_FUNDED_ACCOUNT;
    use crate::rpc::test_utils::{call, context};

    #[test]
    fn estimate_and_call_plain_transfer() {
        let ctx = context();
        let tx = json!({"from": DEFAULT_FUNDED_ACCOUNT, "to": "0x1111111111111111111111111111111111111111", "value": "0x64"});
        assert_eq!(call(&ctx, "eth_estimateGas", json!([tx])), "0x5208");
        assert_eq!(call(&ctx, "eth_call", json!([tx, "latest"])), "0x");
        // Nothing was committed.
        assert_eq!(call(&ctx, "eth_getBalance", json!(["0x1111111111111111111111111111111111111111"])), "0x0");
    }

    #[test]
    fn unknown_transaction_is_null() {
        let ctx = context();
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(call(&ctx, "eth_getTransactionByHash", json!([hash])), json!(null));
        assert_eq!(call(&ctx, "eth_getTransactionReceipt", json!([hash])), json!(null));
        assert_eq!(call(&ctx, "eth_getTransactionByBlockNumberAndIndex", json!(["0x0", "0x0"])), json!(null));
    }

    #[test]
    fn malformed_raw_transaction_is_rejected() {
        let ctx = context();
        assert_eq!(call(&ctx, "eth_sendRawTransaction", json!(["0xc0"]))["code"], -32000);
        assert_eq!(call(&ctx, "eth_sendRawTransaction", json!(["c0"]))["code"], -32602);
        assert_eq!(call(&ctx, "eth_sendRawTransaction", json!([]))["code"], -32602);
    }
}
