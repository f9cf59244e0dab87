use primitive_types::H256;
use serde_json::{json, Value};

use crate::block::Block;
use crate::chain::{BlockTag, Chain};
use crate::rpc::types::rpc_block;
use crate::rpc::utils::{param, parse_block_tag, parse_hash, quantity, RpcErr};
use crate::rpc::{RpcApiContext, RpcHandler};

/// A block named either by number/tag or by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Tag(BlockTag),
    Hash(H256),
}

impl BlockRef {
    pub fn parse(value: &Value, name: &str) -> Result<Self, RpcErr> {
        match value.as_str() {
            Some(s) if s.len() == 66 => Ok(BlockRef::Hash(parse_hash(value, name)?)),
            _ => Ok(BlockRef::Tag(parse_block_tag(value, name)?)),
        }
    }

    pub fn resolve<'a>(&self, chain: &'a Chain) -> Option<&'a Block> {
        match self {
            BlockRef::Tag(tag) => chain.block_by_tag(*tag),
            BlockRef::Hash(hash) => chain.block_by_hash(hash),
        }
    }
}

fn full_flag(params: &Option<Vec<Value>>) -> Result<bool, RpcErr> {
    match params.as_ref().and_then(|p| p.get(1)) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(RpcErr::WrongParam("hydrated".to_string())),
    }
}

pub struct BlockNumberRequest;

impl RpcHandler for BlockNumberRequest {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(json!(quantity(context.chain()?.latest_number())))
    }
}

pub struct GetBlockByNumberRequest {
    pub block: BlockTag,
    pub hydrated: bool,
}

impl RpcHandler for GetBlockByNumberRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { block: parse_block_tag(param(params, 0, "block")?, "block")?, hydrated: full_flag(params)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(chain.block_by_tag(self.block).map_or(Value::Null, |b| rpc_block(b, self.hydrated)))
    }
}

pub struct GetBlockByHashRequest {
    pub block: H256,
    pub hydrated: bool,
}

impl RpcHandler for GetBlockByHashRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { block: parse_hash(param(params, 0, "hash")?, "hash")?, hydrated: full_flag(params)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(chain.block_by_hash(&self.block).map_or(Value::Null, |b| rpc_block(b, self.hydrated)))
    }
}

/// Serves both `ByNumber` and `ByHash`. `pending` yields null: no pool is kept.
pub struct GetBlockTransactionCountRequest {
    pub block: BlockRef,
}

impl RpcHandler for GetBlockTransactionCountRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { block: BlockRef::parse(param(params, 0, "block")?, "block")? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        if self.block == BlockRef::Tag(BlockTag::Pending) {
            return Ok(Value::Null);
        }
        let chain = context.chain()?;
        Ok(self.block.resolve(&chain).map_or(Value::Null, |b| json!(quantity(b.transactions.len() as u64))))
    }
}

/// There are never uncles.
pub struct GetUncleByBlockRequest;

impl RpcHandler for GetUncleByBlockRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        BlockRef::parse(param(params, 0, "block")?, "block")?;
        param(params, 1, "index")?;
        Ok(Self)
    }

    fn handle(&self, _context: &RpcApiContext) -> Result<Value, RpcErr> {
        Ok(Value::Null)
    }
}

pub struct GetUncleCountRequest {
    pub block: BlockRef,
}

impl RpcHandler for GetUncleCountRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { block: BlockRef::parse(param(params, 0, "block")?, "block")? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(self.block.resolve(&chain).map_or(Value::Null, |_| json!("0x0")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::rpc::test_utils::{call, context};

    #[test]
    fn genesis_and_sealed_blocks() {
        let ctx = context();
        let genesis = call(&ctx, "eth_getBlockByNumber", json!(["0x0", false]));
        assert_eq!(genesis["number"], "0x0");
        assert_eq!(genesis["parentHash"], format!("0x{}", "0".repeat(64)));
        assert_eq!(call(&ctx, "eth_getBlockByHash", json!([genesis["hash"], true]))["hash"], genesis["hash"]);

        ctx.chain_mut().unwrap().seal_block();
        assert_eq!(call(&ctx, "eth_blockNumber", json!([])), "0x1");
        let latest = call(&ctx, "eth_getBlockByNumber", json!(["latest", false]));
        assert_eq!(latest["parentHash"], genesis["hash"]);
        assert_ne!(latest["hash"], genesis["hash"]);
        assert_eq!(call(&ctx, "eth_getBlockByNumber", json!(["0x9", false])), json!(null));
    }

    #[test]
    fn transaction_and_uncle_counts() {
        let ctx = context();
        assert_eq!(call(&ctx, "eth_getBlockTransactionCountByNumber", json!(["earliest"])), "0x0");
        assert_eq!(call(&ctx, "eth_getBlockTransactionCountByNumber", json!(["0x0"])), "0x0");
        assert_eq!(call(&ctx, "eth_getBlockTransactionCountByNumber", json!(["pending"])), json!(null));
        let hash = call(&ctx, "eth_getBlockByNumber", json!(["0x0", false]))["hash"].clone();
        assert_eq!(call(&ctx, "eth_getBlockTransactionCountByHash", json!([hash])), "0x0");
        assert_eq!(call(&ctx, "eth_getUncleByBlockNumberAndIndex", json!(["0x0", "0x0"])), json!(null));
        assert_eq!(call(&ctx, "eth_getUncleCountByBlockNumber", json!(["latest"])), "0x0");
        assert_eq!(call(&ctx, "eth_getBlockByNumber", json!([]))["code"], -32602);
    }
}
