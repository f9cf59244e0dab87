//! Applying transactions to the account store, and read-only execution for
//! `eth_call` / `eth_estimateGas`.

use primitive_types::{H160, H256, U256};
use thiserror::Error;
use tracing::debug;

use crate::gas::intrinsic_gas;
use crate::machine::{create_address, BlockEnv, Evm, EvmError, Halt, LogEntry, Message, TxEnv};
use crate::state::{AccountStore, JournaledState};
use crate::transaction::{Transaction, TxError};

/// Result of applying one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub status: bool,
    pub gas_used: u64,
    pub contract_address: Option<H160>,
    pub logs: Vec<LogEntry>,
    pub output: Vec<u8>,
    pub halt: Halt,
}

/// A transaction that has been applied and awaits sealing.
#[derive(Debug, Clone)]
pub struct ExecutedTransaction {
    pub tx: Transaction,
    pub hash: H256,
    pub from: H160,
    pub outcome: TxOutcome,
}

/// Checks that must pass before any gas is charged.
pub fn validate(store: &AccountStore, block: &BlockEnv, tx: &Transaction, sender: H160) -> Result<(), TxError> {
    if let Some(id) = tx.chain_id() {
        if id != block.chain_id {
            return Err(TxError::ChainId { expected: block.chain_id, got: id });
        }
    }
    if tx.gas_limit > block.gas_limit {
        return Err(TxError::GasLimit { got: tx.gas_limit, limit: block.gas_limit });
    }
    let intrinsic = intrinsic_gas(&tx.data, tx.is_create());
    if tx.gas_limit < intrinsic {
        return Err(TxError::IntrinsicGas { have: tx.gas_limit, want: intrinsic });
    }

    let expected = store.nonce(&sender);
    if tx.nonce < expected {
        return Err(TxError::NonceTooLow { expected, got: tx.nonce });
    }
    if tx.nonce > expected {
        return Err(TxError::NonceTooHigh { expected, got: tx.nonce });
    }

    let have = store.balance(&sender);
    let want = U256::from(tx.gas_limit)
        .checked_mul(tx.gas_price)
        .and_then(|fee| fee.checked_add(tx.value))
        .unwrap_or(U256::MAX);
    if have < want {
        return Err(TxError::InsufficientFunds { have, want });
    }
    Ok(())
}

/// Validate and execute `tx` from `sender`, charging fees and crediting the coinbase.
///
/// A validation failure leaves `state` untouched. Execution failures still
/// consume gas and bump the nonce; only the frame's own changes are rolled back.
pub fn apply(
    state: &mut JournaledState,
    block: &BlockEnv,
    tx: &Transaction,
    sender: H160,
) -> Result<TxOutcome, TxError> {
    validate(state.store(), block, tx, sender)?;

    let upfront = U256::from(tx.gas_limit) * tx.gas_price;
    state.sub_balance(sender, upfront);
    state.increment_nonce(sender);

    let gas = tx.gas_limit - intrinsic_gas(&tx.data, tx.is_create());
    let msg = match tx.to {
        Some(to) => Message::call(sender, to, tx.value, tx.data.clone(), gas),
        None => Message::create(sender, create_address(sender, tx.nonce), tx.value, tx.data.clone(), gas),
    };
    let env = TxEnv { origin: sender, gas_price: tx.gas_price };
    let result = Evm::new(state, block, env).transact(msg);

    let spent = tx.gas_limit - result.gas_left;
    let success = result.halt.is_success();
    let refund = if success { result.refund.min(spent / 2) } else { 0 };
    let gas_used = spent - refund;

    if success {
        for addr in &result.selfdestructs {
            state.destroy(*addr);
        }
    }
    state.add_balance(sender, U256::from(tx.gas_limit - gas_used) * tx.gas_price);
    state.add_balance(block.coinbase, U256::from(gas_used) * tx.gas_price);

    debug!(?sender, nonce = tx.nonce, gas_used, halt = ?result.halt, "applied transaction");
    Ok(TxOutcome {
        status: success,
        gas_used,
        contract_address: result.created,
        logs: result.logs,
        output: result.output,
        halt: result.halt,
    })
}

/// Parameters of `eth_call` / `eth_estimateGas`. Missing fields take defaults
/// from the block: zero sender, block gas limit, zero value.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<H160>,
    pub to: Option<H160>,
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("execution reverted")]
    Reverted(Vec<u8>),
    #[error(transparent)]
    Vm(#[from] EvmError),
}

/// Outcome of a read-only execution.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub halt: Halt,
    pub gas_used: u64,
    pub output: Vec<u8>,
}

impl CallOutcome {
    pub fn into_result(self) -> Result<Vec<u8>, CallError> {
        match self.halt {
            Halt::Stop | Halt::Return => Ok(self.output),
            Halt::Revert => Err(CallError::Reverted(self.output)),
            Halt::Exception(e) => Err(CallError::Vm(e)),
        }
    }
}

/// Execute `req` on `state` and roll every change back afterwards. No fees
/// are charged and the sender nonce is not checked.
fn run_scratch(state: &mut JournaledState, block: &BlockEnv, req: &CallRequest, gas_limit: u64) -> Result<CallOutcome, CallError> {
    let intrinsic = intrinsic_gas(&req.data, req.to.is_none());
    if gas_limit < intrinsic {
        return Err(TxError::IntrinsicGas { have: gas_limit, want: intrinsic }.into());
    }
    let from = req.from.unwrap_or_default();
    let value = req.value.unwrap_or_default();
    let gas = gas_limit - intrinsic;

    let checkpoint = state.checkpoint();
    let msg = match req.to {
        Some(to) => Message::call(from, to, value, req.data.clone(), gas),
        None => {
            let address = create_address(from, state.store().nonce(&from));
            state.increment_nonce(from);
            Message::create(from, address, value, req.data.clone(), gas)
        }
    };
    let env = TxEnv { origin: from, gas_price: req.gas_price.unwrap_or_default() };
    let result = Evm::new(state, block, env).transact(msg);
    state.revert_to(checkpoint);

    let spent = gas_limit - result.gas_left;
    let refund = if result.halt.is_success() { result.refund.min(spent / 2) } else { 0 };
    Ok(CallOutcome { halt: result.halt, gas_used: spent - refund, output: result.output })
}

pub fn simulate(store: &AccountStore, block: &BlockEnv, req: &CallRequest) -> Result<CallOutcome, CallError> {
    let mut state = JournaledState::new(store.clone());
    run_scratch(&mut state, block, req, req.gas.unwrap_or(block.gas_limit))
}

/// Smallest gas limit under which `req` succeeds, by bisection between a
/// failing lower bound and the request's (or block's) gas limit.
pub fn estimate_gas(store: &AccountStore, block: &BlockEnv, req: &CallRequest) -> Result<u64, CallError> {
    let mut state = JournaledState::new(store.clone());
    let mut hi = req.gas.unwrap_or(block.gas_limit);

    let first = run_scratch(&mut state, block, req, hi)?;
    if !first.halt.is_success() {
        return first.into_result().map(|_| hi);
    }
    // Anything below the gas actually consumed fails; start just under it.
    let mut lo = first.gas_used.saturating_sub(1).max(intrinsic_gas(&req.data, req.to.is_none()) - 1);
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        let ok = match run_scratch(&mut state, block, req, mid) {
            Ok(outcome) => outcome.halt.is_success(),
            Err(_) => false,
        };
        if ok {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    debug!(gas = hi, "estimated gas");
    Ok(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Account;

    fn sender() -> H160 {
        H160::repeat_byte(0xaa)
    }

    fn block() -> BlockEnv {
        BlockEnv {
            coinbase: H160::repeat_byte(0xcc),
            number: 1,
            gas_limit: 10_000_000,
            chain_id: 43,
            ..BlockEnv::default()
        }
    }

    fn funded() -> AccountStore {
        let mut store = AccountStore::new();
        store.insert(sender(), Account { balance: U256::from(10u64).pow(U256::from(18)), ..Account::default() });
        store
    }

    fn tx(nonce: u64, to: Option<H160>, value: u64, data: Vec<u8>) -> Transaction {
        Transaction {
            nonce,
            gas_price: U256::from(2),
            gas_limit: 200_000,
            to,
            value: U256::from(value),
            data,
            v: 27,
            ..Transaction::default()
        }
    }

    #[test]
    fn transfer_charges_gas_and_pays_coinbase() {
        let store = funded();
        let before = store.balance(&sender());
        let mut state = JournaledState::new(store);
        let to = H160::repeat_byte(0x01);
        let out = apply(&mut state, &block(), &tx(0, Some(to), 1000, vec![]), sender()).unwrap();
        assert!(out.status);
        assert_eq!(out.gas_used, 21_000);
        let s = state.store();
        assert_eq!(s.balance(&to), U256::from(1000));
        assert_eq!(s.balance(&sender()), before - 1000 - 42_000);
        assert_eq!(s.balance(&block().coinbase), U256::from(42_000));
        assert_eq!(s.nonce(&sender()), 1);
    }

    #[test]
    fn rejects_bad_nonce_and_funds_without_side_effects() {
        let store = funded();
        let mut state = JournaledState::new(store.clone());
        let to = Some(H160::repeat_byte(0x01));
        assert!(matches!(
            apply(&mut state, &block(), &tx(1, to, 0, vec![]), sender()),
            Err(TxError::NonceTooHigh { expected: 0, got: 1 })
        ));
        assert!(matches!(
            apply(&mut state, &block(), &tx(0, to, 0, vec![]), H160::repeat_byte(0x02)),
            Err(TxError::InsufficientFunds { .. })
        ));
        let mut low = tx(0, to, 0, vec![1]);
        low.gas_limit = 21_000;
        assert!(matches!(apply(&mut state, &block(), &low, sender()), Err(TxError::IntrinsicGas { .. })));
        let mut wrong_chain = tx(0, to, 0, vec![]);
        wrong_chain.v = 37;
        assert_eq!(
            apply(&mut state, &block(), &wrong_chain, sender()),
            Err(TxError::ChainId { expected: 43, got: 1 })
        );
        assert_eq!(state.store(), &store);
    }

    #[test]
    fn failed_execution_consumes_gas_and_bumps_nonce() {
        let mut state = JournaledState::new(funded());
        // INVALID
        let out = apply(&mut state, &block(), &tx(0, None, 5, vec![0xfe]), sender()).unwrap();
        assert!(!out.status);
        assert_eq!(out.gas_used, 200_000);
        assert_eq!(out.contract_address, None);
        assert_eq!(state.store().nonce(&sender()), 1);
        assert!(!state.store().exists(&create_address(sender(), 0)));
    }

    #[test]
    fn create_deploys_runtime_code() {
        let mut state = JournaledState::new(funded());
        // Returns the single byte 0x00 as runtime code.
        let init = vec![0x60, 0x00, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];
        let out = apply(&mut state, &block(), &tx(0, None, 0, init), sender()).unwrap();
        assert!(out.status);
        let addr = create_address(sender(), 0);
        assert_eq!(out.contract_address, Some(addr));
        assert_eq!(state.store().code(&addr), &[0x00]);
    }

    #[test]
    fn call_reports_revert_data() {
        let mut store = funded();
        let target = H160::repeat_byte(0x42);
        // mstore8(0, 0x2a); revert(0, 1)
        let code = vec![0x60, 0x2a, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xfd];
        store.insert(target, Account { code, ..Account::default() });
        let req = CallRequest { to: Some(target), ..CallRequest::default() };
        let out = simulate(&store, &block(), &req).unwrap();
        assert_eq!(out.into_result(), Err(CallError::Reverted(vec![0x2a])));
        assert!(matches!(estimate_gas(&store, &block(), &req), Err(CallError::Reverted(_))));
    }

    #[test]
    fn estimate_matches_plain_transfer_and_storage_write() {
        let mut store = funded();
        let req = CallRequest { from: Some(sender()), to: Some(H160::repeat_byte(0x05)), ..CallRequest::default() };
        assert_eq!(estimate_gas(&store, &block(), &req).unwrap(), 21_000);

        let target = H160::repeat_byte(0x43);
        // sstore(0, 1)
        store.insert(target, Account { code: vec![0x60, 0x01, 0x60, 0x00, 0x55], ..Account::default() });
        let req = CallRequest { to: Some(target), ..CallRequest::default() };
        let estimate = estimate_gas(&store, &block(), &req).unwrap();
        assert_eq!(estimate, 21_000 + 3 + 3 + 20_000);
        let out = simulate(&store, &block(), &req).unwrap();
        assert_eq!(out.gas_used, estimate);
        assert_eq!(store.storage(&target, U256::zero()), U256::zero());
    }
}
