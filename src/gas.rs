//! Istanbul gas schedule.

pub const ZERO: u64 = 0;
pub const BASE: u64 = 2;
pub const VERYLOW: u64 = 3;
pub const LOW: u64 = 5;
pub const MID: u64 = 8;
pub const HIGH: u64 = 10;
pub const JUMPDEST: u64 = 1;

pub const EXP: u64 = 10;
pub const EXP_BYTE: u64 = 50;
pub const SHA3: u64 = 30;
pub const SHA3_WORD: u64 = 6;
pub const COPY_WORD: u64 = 3;
pub const MEMORY_WORD: u64 = 3;
pub const QUAD_COEFF_DIV: u64 = 512;

pub const BALANCE: u64 = 700;
pub const EXTCODE: u64 = 700;
pub const EXTCODEHASH: u64 = 700;
pub const BLOCKHASH: u64 = 20;
pub const SELFBALANCE: u64 = 5;

pub const SLOAD: u64 = 800;
pub const SSTORE_SET: u64 = 20_000;
pub const SSTORE_RESET: u64 = 5_000;
pub const SSTORE_CLEARS_REFUND: i64 = 15_000;
pub const SSTORE_SENTRY: u64 = 2_300;

pub const LOG: u64 = 375;
pub const LOG_TOPIC: u64 = 375;
pub const LOG_DATA: u64 = 8;

pub const CALL: u64 = 700;
pub const CALL_VALUE: u64 = 9_000;
pub const CALL_STIPEND: u64 = 2_300;
pub const NEW_ACCOUNT: u64 = 25_000;

pub const CREATE: u64 = 32_000;
pub const CODE_DEPOSIT_BYTE: u64 = 200;

pub const SELFDESTRUCT: u64 = 5_000;
pub const SELFDESTRUCT_REFUND: i64 = 24_000;

pub const TX: u64 = 21_000;
pub const TX_CREATE: u64 = 32_000;
pub const TX_DATA_ZERO: u64 = 4;
pub const TX_DATA_NONZERO: u64 = 16;

pub const ECRECOVER: u64 = 3_000;
pub const SHA256: u64 = 60;
pub const SHA256_WORD: u64 = 12;
pub const IDENTITY: u64 = 15;
pub const IDENTITY_WORD: u64 = 3;

pub fn words(size: usize) -> u64 {
    (size as u64).div_ceil(32)
}

pub fn memory_cost(words: u64) -> u64 {
    MEMORY_WORD * words + words * words / QUAD_COEFF_DIV
}

/// Gas forwarded to a child frame: the request capped at all but one 64th of what is left.
pub fn call_gas(available: u64, requested: u64) -> u64 {
    let cap = available - available / 64;
    requested.min(cap)
}

/// Gas charged before execution for a transaction's payload.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> u64 {
    let zeros = data.iter().filter(|b| **b == 0).count() as u64;
    let nonzeros = data.len() as u64 - zeros;
    let base = if is_create { TX + TX_CREATE } else { TX };
    base + zeros * TX_DATA_ZERO + nonzeros * TX_DATA_NONZERO
}
