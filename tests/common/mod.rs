#![allow(dead_code)]

use evm_node::rpc::{handle_request_body, RpcApiContext};
use evm_node::word::keccak256;
use evm_node::{Chain, NodeConfig, Transaction};
use primitive_types::{H160, U256};
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use serde_json::{json, Value};

pub const CHAIN_ID: u64 = 43;
pub const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

/// A locally held key that signs EIP-155 transactions.
pub struct Signer {
    key: SecretKey,
    pub address: H160,
}

impl Signer {
    pub fn new(seed: u8) -> Self {
        let key = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
        let public = PublicKey::from_secret_key(SECP256K1, &key);
        let hash = keccak256(&public.serialize_uncompressed()[1..]);
        Self { key, address: H160::from_slice(&hash[12..]) }
    }

    pub fn sign(&self, mut tx: Transaction) -> String {
        let hash = tx.signing_hash(Some(CHAIN_ID));
        let message = secp256k1::Message::from_digest(hash.to_fixed_bytes());
        let (recovery_id, sig) = SECP256K1.sign_ecdsa_recoverable(&message, &self.key).serialize_compact();
        tx.v = CHAIN_ID * 2 + 35 + i32::from(recovery_id) as u64;
        tx.r = U256::from_big_endian(&sig[..32]);
        tx.s = U256::from_big_endian(&sig[32..]);
        format!("0x{}", hex::encode(tx.encode()))
    }

    pub fn address_hex(&self) -> String {
        format!("{:?}", self.address)
    }
}

/// A node with block production off and `signer` funded with 1000 ether.
pub fn node(signer: &Signer) -> RpcApiContext {
    let mut config = NodeConfig { block_time: 0, ..NodeConfig::default() };
    config.alloc.insert(signer.address_hex(), json!({ "balance": "1000000000000000000000" }));
    RpcApiContext::new(Chain::new(config).expect("genesis"))
}

fn request(ctx: &RpcApiContext, method: &str, params: Value) -> Value {
    let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string();
    handle_request_body(&body, ctx).expect("response")
}

/// The `result` of a call that must succeed.
pub fn rpc(ctx: &RpcApiContext, method: &str, params: Value) -> Value {
    let mut response = request(ctx, method, params);
    assert!(response.get("error").is_none(), "{method} failed: {response}");
    response["result"].take()
}

/// The `error` object of a call that must fail.
pub fn rpc_error(ctx: &RpcApiContext, method: &str, params: Value) -> Value {
    let mut response = request(ctx, method, params);
    assert!(response.get("result").is_none(), "{method} unexpectedly succeeded: {response}");
    response["error"].take()
}

pub fn transfer(nonce: u64, to: &str, value: u64) -> Transaction {
    Transaction {
        nonce,
        gas_price: U256::one(),
        gas_limit: 21_000,
        to: Some(evm_node::state::parse_h160(to).expect("address")),
        value: U256::from(value),
        ..Transaction::default()
    }
}

pub fn quantity(v: &Value) -> U256 {
    evm_node::state::parse_u256(v.as_str().expect("quantity string")).expect("hex quantity")
}
