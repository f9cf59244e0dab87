use ethbloom::{Bloom, Input};
use primitive_types::{H160, H256, U256};
use rlp::RlpStream;

use crate::executor::ExecutedTransaction;
use crate::machine::LogEntry;
use crate::transaction::Transaction;
use crate::trie::{ordered_trie_root, EMPTY_LIST_HASH, EMPTY_TRIE_ROOT};
use crate::word::keccak256;

/// Reported size of the genesis block.
pub const GENESIS_SIZE: u64 = 505;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: H256,
    pub ommers_hash: H256,
    pub coinbase: H160,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: [u8; 8],
}

impl Header {
    fn append_to(&self, s: &mut RlpStream) {
        s.begin_list(15);
        s.append(&self.parent_hash);
        s.append(&self.ommers_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.logs_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        s.append(&self.extra_data);
        s.append(&self.mix_hash);
        s.append(&self.nonce.to_vec());
    }

    pub fn rlp(&self) -> Vec<u8> {
        let mut s = RlpStream::new();
        self.append_to(&mut s);
        s.out().to_vec()
    }

    pub fn hash(&self) -> H256 {
        keccak256(&self.rlp())
    }
}

/// A log together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: u64,
    /// Position among all logs of the block.
    pub log_index: u64,
    /// Position among the logs of its transaction.
    pub transaction_log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub transaction_index: u64,
    pub block_hash: H256,
    pub block_number: u64,
    pub from: H160,
    pub to: Option<H160>,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub contract_address: Option<H160>,
    pub logs: Vec<Log>,
    pub logs_bloom: Bloom,
    pub status: bool,
}

/// A transaction as included in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedTransaction {
    pub tx: Transaction,
    pub hash: H256,
    pub from: H160,
    pub block_hash: H256,
    pub block_number: u64,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub hash: H256,
    pub transactions: Vec<SealedTransaction>,
    pub receipts: Vec<Receipt>,
    pub size: u64,
}

pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a LogEntry>) -> Bloom {
    let mut bloom = Bloom::default();
    for log in logs {
        bloom.accrue(Input::Raw(log.address.as_bytes()));
        for topic in &log.topics {
            bloom.accrue(Input::Raw(topic.as_bytes()));
        }
    }
    bloom
}

/// Consensus receipt encoding: `[status, cumulativeGasUsed, logsBloom, logs]`.
fn encode_receipt(status: bool, cumulative_gas_used: u64, bloom: &Bloom, logs: &[LogEntry]) -> Vec<u8> {
    let mut s = RlpStream::new_list(4);
    s.append(&u8::from(status));
    s.append(&cumulative_gas_used);
    s.append(bloom);
    s.begin_list(logs.len());
    for log in logs {
        s.begin_list(3);
        s.append(&log.address);
        s.append_list::<H256, H256>(&log.topics);
        s.append(&log.data);
    }
    s.out().to_vec()
}

/// Fields of a block that are fixed before its transactions are known.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub parent_hash: H256,
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: H160,
    pub gas_limit: u64,
}

impl Block {
    pub fn genesis(state_root: H256, gas_limit: u64, timestamp: u64) -> Self {
        let header = Header {
            parent_hash: H256::zero(),
            ommers_hash: EMPTY_LIST_HASH,
            coinbase: H160::zero(),
            state_root,
            transactions_root: EMPTY_TRIE_ROOT,
            receipts_root: EMPTY_LIST_HASH,
            logs_bloom: Bloom::default(),
            difficulty: U256::zero(),
            number: 0,
            gas_limit,
            gas_used: 0,
            timestamp,
            extra_data: Vec::new(),
            mix_hash: H256::zero(),
            nonce: [0; 8],
        };
        let hash = header.hash();
        Block { header, hash, transactions: Vec::new(), receipts: Vec::new(), size: GENESIS_SIZE }
    }

    /// Seal executed transactions into a block, filling in positional data
    /// for transactions, receipts and logs.
    pub fn assemble(template: BlockTemplate, state_root: H256, executed: Vec<ExecutedTransaction>) -> Self {
        let mut cumulative = 0u64;
        let mut bloom = Bloom::default();
        let mut consensus_receipts = Vec::with_capacity(executed.len());
        let mut receipt_blooms = Vec::with_capacity(executed.len());
        for e in &executed {
            cumulative += e.outcome.gas_used;
            let receipt_bloom = logs_bloom(&e.outcome.logs);
            bloom.accrue_bloom(&receipt_bloom);
            consensus_receipts.push(encode_receipt(e.outcome.status, cumulative, &receipt_bloom, &e.outcome.logs));
            receipt_blooms.push(receipt_bloom);
        }

        let header = Header {
            parent_hash: template.parent_hash,
            ommers_hash: EMPTY_LIST_HASH,
            coinbase: template.coinbase,
            state_root,
            transactions_root: ordered_trie_root(executed.iter().map(|e| e.tx.encode())),
            receipts_root: ordered_trie_root(consensus_receipts),
            logs_bloom: bloom,
            difficulty: U256::zero(),
            number: template.number,
            gas_limit: template.gas_limit,
            gas_used: cumulative,
            timestamp: template.timestamp,
            extra_data: Vec::new(),
            mix_hash: H256::zero(),
            nonce: [0; 8],
        };
        let hash = header.hash();

        let mut s = RlpStream::new_list(3);
        header.append_to(&mut s);
        s.begin_list(executed.len());
        for e in &executed {
            s.append_raw(&e.tx.encode(), 1);
        }
        s.begin_list(0);
        let size = s.out().len() as u64;

        let mut transactions = Vec::with_capacity(executed.len());
        let mut receipts = Vec::with_capacity(executed.len());
        let mut cumulative = 0u64;
        let mut log_index = 0u64;
        for ((index, e), logs_bloom) in executed.into_iter().enumerate().zip(receipt_blooms) {
            let index = index as u64;
            cumulative += e.outcome.gas_used;
            let logs = e
                .outcome
                .logs
                .into_iter()
                .enumerate()
                .map(|(i, entry)| {
                    let log = Log {
                        address: entry.address,
                        topics: entry.topics,
                        data: entry.data,
                        block_number: header.number,
                        block_hash: hash,
                        transaction_hash: e.hash,
                        transaction_index: index,
                        log_index,
                        transaction_log_index: i as u64,
                    };
                    log_index += 1;
                    log
                })
                .collect();
            receipts.push(Receipt {
                transaction_hash: e.hash,
                transaction_index: index,
                block_hash: hash,
                block_number: header.number,
                from: e.from,
                to: e.tx.to,
                cumulative_gas_used: cumulative,
                gas_used: e.outcome.gas_used,
                contract_address: e.outcome.contract_address,
                logs,
                logs_bloom,
                status: e.outcome.status,
            });
            transactions.push(SealedTransaction {
                tx: e.tx,
                hash: e.hash,
                from: e.from,
                block_hash: hash,
                block_number: header.number,
                index,
            });
        }

        Block { header, hash, transactions, receipts, size }
    }
}
