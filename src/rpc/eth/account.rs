use primitive_types::{H160, U256};
use serde_json::{json, Value};

use crate::chain::BlockTag;
use crate::rpc::utils::{block_tag_or_latest, hex_data, param, parse_address, parse_u256, quantity, RpcErr};
use crate::rpc::{RpcApiContext, RpcHandler};
use crate::state::AccountStore;
use crate::word::u256_to_h256;

/// Run `f` against the post-state of `block`.
fn with_state<T>(
    context: &RpcApiContext,
    block: BlockTag,
    f: impl FnOnce(&AccountStore) -> T,
) -> Result<T, RpcErr> {
    let chain = context.chain()?;
    let state = chain.state_at(block).ok_or_else(|| RpcErr::Server("header not found".to_string()))?;
    Ok(f(state))
}

fn address_and_block(params: &Option<Vec<Value>>) -> Result<(H160, BlockTag), RpcErr> {
    let address = parse_address(param(params, 0, "address")?, "address")?;
    Ok((address, block_tag_or_latest(params, 1)?))
}

pub struct GetBalanceRequest {
    pub address: H160,
    pub block: BlockTag,
}

impl RpcHandler for GetBalanceRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        let (address, block) = address_and_block(params)?;
        Ok(Self { address, block })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        with_state(context, self.block, |s| json!(s.balance(&self.address)))
    }
}

pub struct GetTransactionCountRequest {
    pub address: H160,
    pub block: BlockTag,
}

impl RpcHandler for GetTransactionCountRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        let (address, block) = address_and_block(params)?;
        Ok(Self { address, block })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        with_state(context, self.block, |s| json!(quantity(s.nonce(&self.address))))
    }
}

pub struct GetCodeRequest {
    pub address: H160,
    pub block: BlockTag,
}

impl RpcHandler for GetCodeRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        let (address, block) = address_and_block(params)?;
        Ok(Self { address, block })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        with_state(context, self.block, |s| json!(hex_data(s.code(&self.address))))
    }
}

pub struct GetStorageAtRequest {
    pub address: H160,
    pub storage_slot: U256,
    pub block: BlockTag,
}

impl RpcHandler for GetStorageAtRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self {
            address: parse_address(param(params, 0, "address")?, "address")?,
            storage_slot: parse_u256(param(params, 1, "slot")?, "slot")?,
            block: block_tag_or_latest(params, 2)?,
        })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        with_state(context, self.block, |s| json!(u256_to_h256(s.storage(&self.address, self.storage_slot))))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::DEFAULT_FUNDED_ACCOUNT;
    use crate::rpc::test_utils::{call, context};

    #[test]
    fn genesis_balance_and_defaults() {
        let ctx = context();
        assert_eq!(call(&ctx, "eth_getBalance", json!([DEFAULT_FUNDED_ACCOUNT, "latest"])), "0x6b14e9f7e4f5a505a");
        assert_eq!(call(&ctx, "eth_getBalance", json!([DEFAULT_FUNDED_ACCOUNT])), "0x6b14e9f7e4f5a505a");
        assert_eq!(call(&ctx, "eth_getTransactionCount", json!([DEFAULT_FUNDED_ACCOUNT, "earliest"])), "0x0");
        assert_eq!(call(&ctx, "eth_getCode", json!([DEFAULT_FUNDED_ACCOUNT, "latest"])), "0x");
        assert_eq!(
            call(&ctx, "eth_getStorageAt", json!([DEFAULT_FUNDED_ACCOUNT, "0x0", "latest"])),
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn bad_params() {
        let ctx = context();
        assert_eq!(call(&ctx, "eth_getBalance", json!([]))["code"], -32602);
        assert_eq!(call(&ctx, "eth_getBalance", json!(["0x12", "latest"]))["code"], -32602);
        assert_eq!(call(&ctx, "eth_getBalance", json!([DEFAULT_FUNDED_ACCOUNT, "0x5"]))["code"], -32000);
    }
}
