pub mod opcodes;
pub mod disasm;
pub mod word;
pub mod gas;
pub mod trie;
pub mod state;
pub mod machine;
pub mod transaction;
pub mod executor;
pub mod block;
pub mod chain;
pub mod config;
pub mod filter;
pub mod rpc;

pub use block::{Block, Receipt};
pub use chain::{BlockTag, Chain};
pub use config::NodeConfig;
pub use machine::{BlockEnv, Evm, EvmError, ExecutionResult, Halt, Message, TxEnv};
pub use state::{Account, AccountStore, JournaledState};
pub use transaction::{Transaction, TxError};
