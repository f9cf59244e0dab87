//! The canonical chain: sealed blocks, their post-states and lookup indices.

use std::collections::HashMap;

use primitive_types::{H160, H256};
use tracing::{info, warn};

use crate::block::{Block, BlockTemplate, Receipt, SealedTransaction};
use crate::config::{ConfigError, NodeConfig};
use crate::executor::{apply, ExecutedTransaction};
use crate::machine::BlockEnv;
use crate::state::{AccountStore, JournaledState};
use crate::transaction::{Transaction, TxError};

/// A block reference as accepted by the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
    Earliest,
    /// No pool is kept, so this names the same block as `Latest`.
    Pending,
}

impl BlockTag {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(BlockTag::Latest),
            "earliest" => Some(BlockTag::Earliest),
            "pending" => Some(BlockTag::Pending),
            _ => {
                let digits = s.strip_prefix("0x")?;
                u64::from_str_radix(digits, 16).ok().map(BlockTag::Number)
            }
        }
    }
}

#[derive(Debug)]
pub struct Chain {
    config: NodeConfig,
    blocks: Vec<Block>,
    /// Post-state of each block, indexed by block number.
    states: Vec<AccountStore>,
    by_hash: HashMap<H256, u64>,
    /// Transaction hash -> (block number, index in block).
    tx_index: HashMap<H256, (u64, usize)>,
}

impl Chain {
    pub fn new(config: NodeConfig) -> Result<Self, ConfigError> {
        let genesis_state = config.genesis_state()?;
        let genesis = Block::genesis(genesis_state.state_root(), config.block_gas_limit, config.genesis_timestamp);
        info!(hash = ?genesis.hash, state_root = ?genesis.header.state_root, "genesis block");
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash, 0);
        Ok(Self { config, blocks: vec![genesis], states: vec![genesis_state], by_hash, tx_index: HashMap::new() })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn latest(&self) -> &Block {
        // Genesis is always present.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn latest_number(&self) -> u64 {
        self.latest().header.number
    }

    /// Block number a tag refers to, or `None` past the head.
    pub fn resolve(&self, tag: BlockTag) -> Option<u64> {
        match tag {
            BlockTag::Latest | BlockTag::Pending => Some(self.latest_number()),
            BlockTag::Earliest => Some(0),
            BlockTag::Number(n) => (n <= self.latest_number()).then_some(n),
        }
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(number).ok()?)
    }

    pub fn block_by_hash(&self, hash: &H256) -> Option<&Block> {
        self.by_hash.get(hash).and_then(|n| self.block(*n))
    }

    pub fn block_by_tag(&self, tag: BlockTag) -> Option<&Block> {
        self.resolve(tag).and_then(|n| self.block(n))
    }

    /// Blocks numbered `from..=to`, clamped to the head.
    pub fn blocks_between(&self, from: u64, to: u64) -> impl Iterator<Item = &Block> {
        let to = to.min(self.latest_number());
        let range = if from > to { 0..0 } else { from as usize..to as usize + 1 };
        self.blocks[range].iter()
    }

    pub fn state_at(&self, tag: BlockTag) -> Option<&AccountStore> {
        self.resolve(tag).and_then(|n| self.states.get(n as usize))
    }

    pub fn transaction(&self, hash: &H256) -> Option<&SealedTransaction> {
        let (number, index) = self.tx_index.get(hash)?;
        self.block(*number)?.transactions.get(*index)
    }

    pub fn receipt(&self, hash: &H256) -> Option<&Receipt> {
        let (number, index) = self.tx_index.get(hash)?;
        self.block(*number)?.receipts.get(*index)
    }

    fn env_for(&self, number: u64) -> BlockEnv {
        let start = (number as usize).saturating_sub(256);
        let end = (number as usize).min(self.blocks.len());
        BlockEnv {
            coinbase: self.config.coinbase,
            timestamp: self.config.genesis_timestamp + number * self.config.block_time,
            number,
            gas_limit: self.config.block_gas_limit,
            chain_id: self.config.chain_id,
            difficulty: Default::default(),
            ancestor_hashes: self.blocks[start.min(end)..end].iter().map(|b| b.hash).collect(),
        }
    }

    /// Environment the next sealed block executes in.
    pub fn pending_env(&self) -> BlockEnv {
        self.env_for(self.latest_number() + 1)
    }

    /// Environment for read-only execution on top of block `number`'s post-state.
    pub fn call_env(&self, number: u64) -> BlockEnv {
        self.env_for(number + 1)
    }

    /// Decode, validate and apply a signed transaction, sealing it into a new block.
    pub fn submit_raw_transaction(&mut self, raw: &[u8]) -> Result<H256, TxError> {
        let tx = Transaction::decode(raw)?;
        let from = tx.recover_sender()?;
        self.submit(tx, from)
    }

    pub fn submit(&mut self, tx: Transaction, from: H160) -> Result<H256, TxError> {
        let hash = tx.hash();
        let env = self.pending_env();
        let mut state = JournaledState::new(self.states[self.states.len() - 1].clone());
        let outcome = match apply(&mut state, &env, &tx, from) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(?hash, ?from, error = %e, "rejected transaction");
                return Err(e);
            }
        };
        info!(?hash, ?from, status = outcome.status, gas_used = outcome.gas_used, "accepted transaction");
        self.seal(state.into_store(), vec![ExecutedTransaction { tx, hash, from, outcome }]);
        Ok(hash)
    }

    /// Seal an empty block on top of the head.
    pub fn seal_block(&mut self) -> &Block {
        let state = self.states[self.states.len() - 1].clone();
        self.seal(state, Vec::new())
    }

    fn seal(&mut self, state: AccountStore, executed: Vec<ExecutedTransaction>) -> &Block {
        let parent = self.latest();
        let number = parent.header.number + 1;
        let template = BlockTemplate {
            parent_hash: parent.hash,
            number,
            timestamp: self.config.genesis_timestamp + number * self.config.block_time,
            coinbase: self.config.coinbase,
            gas_limit: self.config.block_gas_limit,
        };
        let block = Block::assemble(template, state.state_root(), executed);
        for (i, tx) in block.transactions.iter().enumerate() {
            self.tx_index.insert(tx.hash, (number, i));
        }
        self.by_hash.insert(block.hash, number);
        info!(number, hash = ?block.hash, txs = block.transactions.len(), gas_used = block.header.gas_used, "sealed block");
        self.blocks.push(block);
        self.states.push(state);
        self.latest()
    }
}
