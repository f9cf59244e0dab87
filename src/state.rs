use std::collections::BTreeMap;

use primitive_types::{H160, H256, U256};
use rlp::RlpStream;
use serde_json::{json, Value};

use crate::trie::trie_root;
use crate::word::{keccak256, u256_to_h256};

/// keccak of empty code.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
    pub storage: BTreeMap<U256, U256>,
}

impl Account {
    pub fn code_hash(&self) -> H256 {
        if self.code.is_empty() { EMPTY_CODE_HASH } else { keccak256(&self.code) }
    }

    /// EIP-161 emptiness: no code, zero nonce, zero balance.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }

    pub fn storage_root(&self) -> H256 {
        trie_root(self.storage.iter().filter(|(_, v)| !v.is_zero()).map(|(k, v)| {
            (keccak256(u256_to_h256(*k).as_bytes()).as_bytes().to_vec(), rlp::encode(v).to_vec())
        }))
    }

    fn rlp(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(4);
        s.append(&self.nonce);
        s.append(&self.balance);
        s.append(&self.storage_root());
        s.append(&self.code_hash());
        s.out().to_vec()
    }
}

/// The committed world state: address -> account. Absent accounts read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStore {
    accounts: BTreeMap<H160, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &H160) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn exists(&self, address: &H160) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn balance(&self, address: &H160) -> U256 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or_default()
    }

    pub fn nonce(&self, address: &H160) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn code(&self, address: &H160) -> &[u8] {
        self.accounts.get(address).map(|a| a.code.as_slice()).unwrap_or(&[])
    }

    pub fn code_hash(&self, address: &H160) -> H256 {
        self.accounts.get(address).map(Account::code_hash).unwrap_or(EMPTY_CODE_HASH)
    }

    pub fn storage(&self, address: &H160, key: U256) -> U256 {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(&key).copied())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, address: H160, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H160, &Account)> {
        self.accounts.iter()
    }

    pub fn state_root(&self) -> H256 {
        trie_root(
            self.accounts
                .iter()
                .map(|(addr, acc)| (keccak256(addr.as_bytes()).as_bytes().to_vec(), acc.rlp())),
        )
    }

    /// Load the `{"accounts": {addr: {balance, nonce, code, storage}}}` world format.
    /// Quantities may be `0x`-hex or decimal.
    pub fn from_json(v: &Value) -> Result<Self, StateJsonError> {
        let mut store = AccountStore::new();
        let Some(accs) = v.get("accounts").and_then(|x| x.as_object()) else {
            return Ok(store);
        };
        for (k, val) in accs {
            let addr = parse_h160(k).ok_or_else(|| StateJsonError::Address(k.clone()))?;
            let mut a = Account::default();
            if let Some(bal) = val.get("balance") {
                a.balance = json_u256(bal).ok_or(StateJsonError::Field("balance"))?;
            }
            if let Some(nonce) = val.get("nonce") {
                a.nonce = json_u256(nonce)
                    .filter(|n| *n <= U256::from(u64::MAX))
                    .ok_or(StateJsonError::Field("nonce"))?
                    .low_u64();
            }
            if let Some(code) = val.get("code").and_then(|x| x.as_str()) {
                a.code = parse_hex(code).ok_or(StateJsonError::Field("code"))?;
            }
            if let Some(stor) = val.get("storage").and_then(|x| x.as_object()) {
                for (sk, sv) in stor {
                    let key = parse_u256(sk).ok_or(StateJsonError::Field("storage key"))?;
                    let value = json_u256(sv).ok_or(StateJsonError::Field("storage value"))?;
                    a.storage.insert(key, value);
                }
            }
            store.insert(addr, a);
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Value {
        let mut accounts = serde_json::Map::new();
        for (addr, acc) in &self.accounts {
            let mut stor = serde_json::Map::new();
            for (k, v) in &acc.storage {
                stor.insert(format!("0x{:x}", k), Value::String(format!("0x{:x}", v)));
            }
            accounts.insert(
                format!("{:?}", addr),
                json!({
                    "nonce": acc.nonce,
                    "balance": format!("0x{:x}", acc.balance),
                    "code": format!("0x{}", hex::encode(&acc.code)),
                    "storage": Value::Object(stor),
                }),
            );
        }
        json!({ "accounts": Value::Object(accounts) })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateJsonError {
    #[error("invalid account key {0}")]
    Address(String),
    #[error("invalid account.{0}")]
    Field(&'static str),
}

pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).ok()
}

pub fn parse_h160(s: &str) -> Option<H160> {
    let b = parse_hex(s)?;
    if b.len() != 20 {
        return None;
    }
    Some(H160::from_slice(&b))
}

pub fn parse_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if digits.is_empty() || digits.len() > 64 {
            return None;
        }
        U256::from_str_radix(digits, 16).ok()
    } else {
        U256::from_dec_str(s).ok()
    }
}

fn json_u256(v: &Value) -> Option<U256> {
    match v {
        Value::String(s) => parse_u256(s),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

/// One undoable change to the working state.
#[derive(Debug, Clone)]
enum JournalEntry {
    Created(H160),
    Balance(H160, U256),
    Nonce(H160, u64),
    Code(H160, Vec<u8>),
    Storage(H160, U256, U256),
    Destroyed(H160, Account),
}

/// Working copy of the account store with an append-only change journal.
///
/// A checkpoint is just the journal length; reverting to it undoes every
/// entry recorded after that index, newest first.
#[derive(Debug, Clone)]
pub struct JournaledState {
    store: AccountStore,
    journal: Vec<JournalEntry>,
}

impl JournaledState {
    pub fn new(store: AccountStore) -> Self {
        Self { store, journal: Vec::new() }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn into_store(self) -> AccountStore {
        self.store
    }

    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    pub fn revert_to(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            let Some(entry) = self.journal.pop() else { break };
            match entry {
                JournalEntry::Created(addr) => {
                    self.store.accounts.remove(&addr);
                }
                JournalEntry::Balance(addr, prev) => self.account_mut(addr).balance = prev,
                JournalEntry::Nonce(addr, prev) => self.account_mut(addr).nonce = prev,
                JournalEntry::Code(addr, prev) => self.account_mut(addr).code = prev,
                JournalEntry::Storage(addr, key, prev) => {
                    let storage = &mut self.account_mut(addr).storage;
                    if prev.is_zero() {
                        storage.remove(&key);
                    } else {
                        storage.insert(key, prev);
                    }
                }
                JournalEntry::Destroyed(addr, prev) => {
                    self.store.accounts.insert(addr, prev);
                }
            }
        }
    }

    fn account_mut(&mut self, addr: H160) -> &mut Account {
        self.store.accounts.entry(addr).or_default()
    }

    // Entries for an account must land after its `Created` entry so that
    // reverting restores fields before removing the account.
    fn touch(&mut self, addr: H160) {
        if !self.store.accounts.contains_key(&addr) {
            self.journal.push(JournalEntry::Created(addr));
            self.store.accounts.insert(addr, Account::default());
        }
    }

    pub fn set_balance(&mut self, addr: H160, balance: U256) {
        let prev = self.store.balance(&addr);
        self.touch(addr);
        self.journal.push(JournalEntry::Balance(addr, prev));
        self.account_mut(addr).balance = balance;
    }

    pub fn add_balance(&mut self, addr: H160, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let current = self.store.balance(&addr);
        self.set_balance(addr, current.saturating_add(amount));
    }

    /// Debit `amount`; returns false and leaves state untouched if the balance is short.
    pub fn sub_balance(&mut self, addr: H160, amount: U256) -> bool {
        let current = self.store.balance(&addr);
        if current < amount {
            return false;
        }
        if !amount.is_zero() {
            self.set_balance(addr, current - amount);
        }
        true
    }

    pub fn transfer(&mut self, from: H160, to: H160, value: U256) -> bool {
        if !self.sub_balance(from, value) {
            return false;
        }
        self.add_balance(to, value);
        true
    }

    pub fn increment_nonce(&mut self, addr: H160) {
        let prev = self.store.nonce(&addr);
        self.touch(addr);
        self.journal.push(JournalEntry::Nonce(addr, prev));
        self.account_mut(addr).nonce = prev.saturating_add(1);
    }

    pub fn set_code(&mut self, addr: H160, code: Vec<u8>) {
        let prev = self.store.code(&addr).to_vec();
        self.touch(addr);
        self.journal.push(JournalEntry::Code(addr, prev));
        self.account_mut(addr).code = code;
    }

    pub fn set_storage(&mut self, addr: H160, key: U256, value: U256) {
        let prev = self.store.storage(&addr, key);
        self.touch(addr);
        self.journal.push(JournalEntry::Storage(addr, key, prev));
        let storage = &mut self.account_mut(addr).storage;
        if value.is_zero() {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    /// Create (or reset) the account at `addr` for contract deployment, keeping its balance.
    pub fn create_account(&mut self, addr: H160) {
        let balance = self.store.balance(&addr);
        if let Some(prev) = self.store.accounts.remove(&addr) {
            self.journal.push(JournalEntry::Destroyed(addr, prev));
        }
        self.journal.push(JournalEntry::Created(addr));
        self.store.accounts.insert(addr, Account { nonce: 1, balance, ..Account::default() });
    }

    pub fn destroy(&mut self, addr: H160) {
        if let Some(prev) = self.store.accounts.remove(&addr) {
            self.journal.push(JournalEntry::Destroyed(addr, prev));
        }
    }
}
