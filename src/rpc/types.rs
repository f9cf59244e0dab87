//! JSON shapes of blocks, transactions, receipts and logs.

use serde_json::{json, Value};

use crate::block::{Block, Log, Receipt, SealedTransaction};
use crate::rpc::utils::{hex_data, quantity};

pub fn rpc_log(log: &Log) -> Value {
    json!({
        "address": log.address,
        "topics": log.topics,
        "data": hex_data(&log.data),
        "blockNumber": quantity(log.block_number),
        "blockHash": log.block_hash,
        "transactionHash": log.transaction_hash,
        "transactionIndex": quantity(log.transaction_index),
        "logIndex": quantity(log.log_index),
        "transactionLogIndex": quantity(log.transaction_log_index),
        "removed": false,
    })
}

pub fn rpc_logs<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Value {
    Value::Array(logs.into_iter().map(rpc_log).collect())
}

pub fn rpc_transaction(tx: &SealedTransaction) -> Value {
    let t = &tx.tx;
    json!({
        "hash": tx.hash,
        "nonce": quantity(t.nonce),
        "blockHash": tx.block_hash,
        "blockNumber": quantity(tx.block_number),
        "transactionIndex": quantity(tx.index),
        "from": tx.from,
        "to": t.to,
        "value": t.value,
        "gasPrice": t.gas_price,
        "gas": quantity(t.gas_limit),
        "input": hex_data(&t.data),
        "creates": t.is_create().then(|| crate::machine::create_address(tx.from, t.nonce)),
        "raw": hex_data(&t.encode()),
        "chainId": t.chain_id().map(quantity),
        "v": quantity(t.v),
        "r": t.r,
        "s": t.s,
    })
}

pub fn rpc_receipt(receipt: &Receipt) -> Value {
    json!({
        "transactionHash": receipt.transaction_hash,
        "transactionIndex": quantity(receipt.transaction_index),
        "blockHash": receipt.block_hash,
        "blockNumber": quantity(receipt.block_number),
        "from": receipt.from,
        "to": receipt.to,
        "cumulativeGasUsed": quantity(receipt.cumulative_gas_used),
        "gasUsed": quantity(receipt.gas_used),
        "contractAddress": receipt.contract_address,
        "logs": rpc_logs(&receipt.logs),
        "logsBloom": receipt.logs_bloom,
        "status": quantity(u64::from(receipt.status)),
    })
}

/// Block object; `full` selects transaction objects over hashes.
pub fn rpc_block(block: &Block, full: bool) -> Value {
    let h = &block.header;
    let transactions: Vec<Value> = if full {
        block.transactions.iter().map(rpc_transaction).collect()
    } else {
        block.transactions.iter().map(|t| json!(t.hash)).collect()
    };
    json!({
        "number": quantity(h.number),
        "hash": block.hash,
        "parentHash": h.parent_hash,
        "sha3Uncles": h.ommers_hash,
        "author": h.coinbase,
        "miner": h.coinbase,
        "stateRoot": h.state_root,
        "transactionsRoot": h.transactions_root,
        "receiptsRoot": h.receipts_root,
        "logsBloom": h.logs_bloom,
        "difficulty": h.difficulty,
        "totalDifficulty": Value::Null,
        "gasLimit": quantity(h.gas_limit),
        "gasUsed": quantity(h.gas_used),
        "timestamp": quantity(h.timestamp),
        "extraData": hex_data(&h.extra_data),
        "mixHash": h.mix_hash,
        "nonce": hex_data(&h.nonce),
        "sealFields": [json!(h.mix_hash), json!(hex_data(&h.nonce))],
        "size": quantity(block.size),
        "transactions": transactions,
        "uncles": [],
    })
}
