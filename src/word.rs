//! 256-bit word helpers: two's-complement signed arithmetic, modular ops with
//! 512-bit intermediates, and conversions between words, addresses and hashes.

use primitive_types::{H160, H256, U256, U512};
use tiny_keccak::{Hasher, Keccak};

pub fn keccak256(data: &[u8]) -> H256 {
    let mut out = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(data);
    hasher.finalize(&mut out);
    H256(out)
}

pub fn bool_to_u256(b: bool) -> U256 {
    if b { U256::one() } else { U256::zero() }
}

pub fn is_negative(v: U256) -> bool {
    v.bit(255)
}

pub fn neg(v: U256) -> U256 {
    (!v).overflowing_add(U256::one()).0
}

fn abs(v: U256) -> U256 {
    if is_negative(v) { neg(v) } else { v }
}

pub fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let q = abs(a) / abs(b);
    if is_negative(a) != is_negative(b) { neg(q) } else { q }
}

pub fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let r = abs(a) % abs(b);
    if is_negative(a) { neg(r) } else { r }
}

pub fn addmod(a: U256, b: U256, n: U256) -> U256 {
    if n.is_zero() {
        return U256::zero();
    }
    let r = (U512::from(a) + U512::from(b)) % U512::from(n);
    narrow(r)
}

pub fn mulmod(a: U256, b: U256, n: U256) -> U256 {
    if n.is_zero() {
        return U256::zero();
    }
    narrow(a.full_mul(b) % U512::from(n))
}

// Callers only pass values already reduced below a U256 modulus.
fn narrow(v: U512) -> U256 {
    let mut buf = [0u8; 64];
    v.to_big_endian(&mut buf);
    U256::from_big_endian(&buf[32..])
}

pub fn signextend(b: U256, x: U256) -> U256 {
    if b >= U256::from(31) {
        return x;
    }
    let bit = b.low_u64() as usize * 8 + 7;
    let mask = (U256::one() << (bit + 1)) - U256::one();
    if x.bit(bit) { x | !mask } else { x & mask }
}

pub fn slt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

pub fn sgt(a: U256, b: U256) -> bool {
    slt(b, a)
}

/// BYTE: the `i`-th most significant byte of `x`.
pub fn byte(i: U256, x: U256) -> U256 {
    if i >= U256::from(32) {
        return U256::zero();
    }
    U256::from(x.byte(31 - i.low_u64() as usize))
}

pub fn shl(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256) { U256::zero() } else { value << shift.low_u64() as usize }
}

pub fn shr(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256) { U256::zero() } else { value >> shift.low_u64() as usize }
}

pub fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256) {
        return if negative { U256::MAX } else { U256::zero() };
    }
    let s = shift.low_u64() as usize;
    if s == 0 || !negative {
        return value >> s;
    }
    (value >> s) | (U256::MAX << (256 - s))
}

/// Clamp to usize; anything above saturates and is rejected by gas accounting.
pub fn u256_to_usize(v: U256) -> usize {
    if v > U256::from(usize::MAX as u64) {
        usize::MAX
    } else {
        v.low_u64() as usize
    }
}

pub fn u256_to_u64_saturating(v: U256) -> u64 {
    if v > U256::from(u64::MAX) { u64::MAX } else { v.low_u64() }
}

pub fn h160_to_u256(a: H160) -> U256 {
    let mut buf = [0u8; 32];
    buf[12..].copy_from_slice(a.as_bytes());
    U256::from_big_endian(&buf)
}

pub fn u256_to_h160(v: U256) -> H160 {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    H160::from_slice(&buf[12..])
}

pub fn h256_to_u256(h: H256) -> U256 {
    U256::from_big_endian(h.as_bytes())
}

pub fn u256_to_h256(v: U256) -> H256 {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    H256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minus(n: u64) -> U256 {
        neg(U256::from(n))
    }

    #[test]
    fn signed_division_and_modulo() {
        assert_eq!(sdiv(minus(10), U256::from(3)), minus(3));
        assert_eq!(sdiv(minus(10), minus(3)), U256::from(3));
        assert_eq!(smod(minus(10), U256::from(3)), minus(1));
        assert_eq!(smod(U256::from(10), minus(3)), U256::from(1));
        assert_eq!(sdiv(U256::from(7), U256::zero()), U256::zero());
        let min = U256::one() << 255;
        assert_eq!(sdiv(min, U256::MAX), min);
    }

    #[test]
    fn modular_ops_use_wide_intermediates() {
        assert_eq!(addmod(U256::MAX, U256::from(2), U256::MAX), U256::from(2));
        assert_eq!(mulmod(U256::MAX, U256::MAX, U256::from(12)), U256::from(9));
        assert_eq!(mulmod(U256::from(5), U256::from(5), U256::zero()), U256::zero());
    }

    #[test]
    fn sign_extension() {
        assert_eq!(signextend(U256::zero(), U256::from(0xff)), U256::MAX);
        assert_eq!(signextend(U256::zero(), U256::from(0x7f)), U256::from(0x7f));
        assert_eq!(signextend(U256::one(), U256::from(0x12f5)), U256::from(0x12f5));
        assert_eq!(signextend(U256::from(40), U256::from(0xff)), U256::from(0xff));
    }

    #[test]
    fn signed_comparisons() {
        assert!(slt(minus(1), U256::zero()));
        assert!(!slt(U256::zero(), minus(1)));
        assert!(sgt(U256::from(2), minus(5)));
        assert!(slt(minus(5), minus(2)));
    }

    #[test]
    fn shifts_and_byte() {
        assert_eq!(shl(U256::from(4), U256::one()), U256::from(16));
        assert_eq!(shr(U256::from(256), U256::MAX), U256::zero());
        assert_eq!(sar(U256::from(4), minus(16)), minus(1));
        assert_eq!(sar(U256::from(300), minus(16)), U256::MAX);
        assert_eq!(sar(U256::from(1), U256::from(16)), U256::from(8));
        assert_eq!(byte(U256::from(31), U256::from(0xabcd)), U256::from(0xcd));
        assert_eq!(byte(U256::from(32), U256::MAX), U256::zero());
    }

    #[test]
    fn address_word_conversion() {
        let a = H160::from_low_u64_be(0xdead_beef);
        assert_eq!(u256_to_h160(h160_to_u256(a)), a);
        assert_eq!(u256_to_h160(U256::MAX), H160::repeat_byte(0xff));
    }

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            format!("{:x}", keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
