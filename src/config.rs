//! Node configuration, loadable from a JSON file.
//!
//! ```json
//! {
//!   "chain_id": 43,
//!   "block_time": 6,
//!   "alloc": {
//!     "0x6be02d1d3665660d22ff9624b7be0551ee1ac91b": { "balance": "0x6b14e9f7e4f5a505a" }
//!   }
//! }
//! ```

use std::path::Path;

use primitive_types::H160;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::state::{AccountStore, StateJsonError};

/// Account funded at genesis when no `alloc` is configured.
pub const DEFAULT_FUNDED_ACCOUNT: &str = "0x6be02d1d3665660d22ff9624b7be0551ee1ac91b";
/// 123.456789000000000090 ether.
pub const DEFAULT_FUNDED_BALANCE: &str = "0x6b14e9f7e4f5a505a";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("genesis alloc: {0}")]
    Alloc(#[from] StateJsonError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: u64,
    /// Price reported by `eth_gasPrice`, in wei.
    pub gas_price: u64,
    pub block_gas_limit: u64,
    /// Seconds between blocks; also the timestamp step.
    pub block_time: u64,
    pub genesis_timestamp: u64,
    pub coinbase: H160,
    pub listen: String,
    /// Genesis accounts, same shape as the `accounts` object of a world file.
    pub alloc: Map<String, Value>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut alloc = Map::new();
        alloc.insert(DEFAULT_FUNDED_ACCOUNT.to_string(), json!({ "balance": DEFAULT_FUNDED_BALANCE }));
        Self {
            chain_id: 43,
            gas_price: 1,
            block_gas_limit: 4_294_967_295,
            block_time: 6,
            genesis_timestamp: 0,
            coinbase: H160::zero(),
            listen: "127.0.0.1:8545".to_string(),
            alloc,
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&text)?;
        config.genesis_state()?;
        Ok(config)
    }

    pub fn genesis_state(&self) -> Result<AccountStore, ConfigError> {
        let world = json!({ "accounts": Value::Object(self.alloc.clone()) });
        Ok(AccountStore::from_json(&world)?)
    }
}
