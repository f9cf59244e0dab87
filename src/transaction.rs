//! Legacy (pre-typed) transactions: RLP decoding, EIP-155 signing hashes and
//! sender recovery.

use primitive_types::{H160, H256, U256};
use rlp::{DecoderError, Rlp, RlpStream};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use thiserror::Error;

use crate::word::keccak256;

/// secp256k1n / 2; signatures with a larger `s` are malleable and rejected.
const SECP256K1N_HALF: U256 = U256([
    0xdfe92f46681b20a0,
    0x5d576e7357a4501d,
    0xffffffffffffffff,
    0x7fffffffffffffff,
]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("rlp: {0}")]
    Decode(#[from] DecoderError),
    #[error("invalid sender")]
    InvalidSignature,
    #[error("invalid chain id: expected {expected}, got {got}")]
    ChainId { expected: u64, got: u64 },
    #[error("nonce too low: next nonce {expected}, tx nonce {got}")]
    NonceTooLow { expected: u64, got: u64 },
    #[error("nonce too high: next nonce {expected}, tx nonce {got}")]
    NonceTooHigh { expected: u64, got: u64 },
    #[error("insufficient funds for gas * price + value: have {have} want {want}")]
    InsufficientFunds { have: U256, want: U256 },
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGas { have: u64, want: u64 },
    #[error("exceeds block gas limit: {got} > {limit}")]
    GasLimit { got: u64, limit: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<H160>,
    pub value: U256,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl Transaction {
    pub fn decode(bytes: &[u8]) -> Result<Self, TxError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return Err(DecoderError::RlpExpectedToBeList.into());
        }
        if rlp.payload_info()?.total() != bytes.len() {
            return Err(DecoderError::RlpInconsistentLengthAndData.into());
        }
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen.into());
        }
        let to_item = rlp.at(3)?;
        let to = if to_item.is_empty() {
            None
        } else {
            let raw = to_item.data()?;
            if raw.len() != 20 {
                return Err(DecoderError::RlpInvalidLength.into());
            }
            Some(H160::from_slice(raw))
        };
        Ok(Self {
            nonce: rlp.val_at(0)?,
            gas_price: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            to,
            value: rlp.val_at(4)?,
            data: rlp.val_at(5)?,
            v: rlp.val_at(6)?,
            r: rlp.val_at(7)?,
            s: rlp.val_at(8)?,
        })
    }

    fn append_payload(&self, s: &mut RlpStream) {
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        match &self.to {
            Some(to) => s.append(to),
            None => s.append_empty_data(),
        };
        s.append(&self.value);
        s.append(&self.data);
    }

    /// Signed RLP encoding, as accepted by `eth_sendRawTransaction`.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(9);
        self.append_payload(&mut s);
        s.append(&self.v);
        s.append(&self.r);
        s.append(&self.s);
        s.out().to_vec()
    }

    pub fn hash(&self) -> H256 {
        keccak256(&self.encode())
    }

    /// Chain id committed to by the signature, `None` for pre-EIP-155 signatures.
    pub fn chain_id(&self) -> Option<u64> {
        (self.v >= 35).then(|| (self.v - 35) / 2)
    }

    fn recovery_id(&self) -> Result<i32, TxError> {
        match self.v {
            27 | 28 => Ok((self.v - 27) as i32),
            v if v >= 35 => Ok(((v - 35) % 2) as i32),
            _ => Err(TxError::InvalidSignature),
        }
    }

    pub fn signing_hash(&self, chain_id: Option<u64>) -> H256 {
        let mut s = RlpStream::new_list(if chain_id.is_some() { 9 } else { 6 });
        self.append_payload(&mut s);
        if let Some(id) = chain_id {
            s.append(&id);
            s.append_empty_data();
            s.append_empty_data();
        }
        keccak256(&s.out())
    }

    pub fn recover_sender(&self) -> Result<H160, TxError> {
        if self.r.is_zero() || self.s.is_zero() || self.s > SECP256K1N_HALF {
            return Err(TxError::InvalidSignature);
        }
        let mut sig = [0u8; 64];
        self.r.to_big_endian(&mut sig[..32]);
        self.s.to_big_endian(&mut sig[32..]);
        let hash = self.signing_hash(self.chain_id());
        recover_unchecked(hash, &sig, self.recovery_id()?).map_err(|_| TxError::InvalidSignature)
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// Recover the signing address for a compact `r || s` signature. No malleability check.
pub fn recover_unchecked(hash: H256, sig: &[u8], recovery_id: i32) -> Result<H160, secp256k1::Error> {
    let signature = RecoverableSignature::from_compact(sig, RecoveryId::try_from(recovery_id)?)?;
    let public = secp256k1::SECP256K1
        .recover_ecdsa(&secp256k1::Message::from_digest(hash.to_fixed_bytes()), &signature)?;
    let hash = keccak256(&public.serialize_uncompressed()[1..]);
    Ok(H160::from_slice(&hash[12..]))
}
