//! Merkle-Patricia root computation over an in-memory key/value set.
//!
//! Nodes are RLP encoded bottom-up; an encoding shorter than 32 bytes is
//! embedded in its parent, anything longer is referenced by its Keccak hash.
//! The root is always hashed.

use primitive_types::H256;
use rlp::RlpStream;

use crate::word::keccak256;

/// keccak(rlp("")), the root of an empty trie.
pub const EMPTY_TRIE_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

/// keccak(rlp([])), used for the uncle hash and the genesis receipts root.
pub const EMPTY_LIST_HASH: H256 = H256([
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4, 0x1a,
    0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4, 0x93, 0x47,
]);

enum EncodedNode {
    Raw(Vec<u8>),
    Hashed(H256),
}

impl EncodedNode {
    fn from_rlp(bytes: Vec<u8>) -> Self {
        if bytes.len() >= 32 {
            EncodedNode::Hashed(keccak256(&bytes))
        } else {
            EncodedNode::Raw(bytes)
        }
    }
}

fn append_child(s: &mut RlpStream, node: EncodedNode) {
    match node {
        EncodedNode::Raw(b) => s.append_raw(&b, 1),
        EncodedNode::Hashed(h) => s.append(&h),
    };
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

fn hex_prefix(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag = if leaf { 2u8 } else { 0u8 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// `items` is sorted by key, keys are unique and share the first `depth` nibbles.
fn encode(items: &[(Vec<u8>, Vec<u8>)], depth: usize) -> Vec<u8> {
    if items.len() == 1 {
        let (key, value) = &items[0];
        let mut s = RlpStream::new_list(2);
        s.append(&hex_prefix(&key[depth..], true));
        s.append(value);
        return s.out().to_vec();
    }

    let first = &items[0].0[depth..];
    let last = &items[items.len() - 1].0[depth..];
    let shared = shared_prefix(first, last);
    if shared > 0 {
        let mut s = RlpStream::new_list(2);
        s.append(&hex_prefix(&first[..shared], false));
        append_child(&mut s, EncodedNode::from_rlp(encode(items, depth + shared)));
        return s.out().to_vec();
    }

    let mut s = RlpStream::new_list(17);
    let (value, rest) = match items.first() {
        Some((key, value)) if key.len() == depth => (Some(value), &items[1..]),
        _ => (None, items),
    };
    let mut start = 0;
    for nibble in 0u8..16 {
        let end = start + rest[start..].iter().take_while(|(k, _)| k[depth] == nibble).count();
        if end == start {
            s.append_empty_data();
        } else {
            append_child(&mut s, EncodedNode::from_rlp(encode(&rest[start..end], depth + 1)));
        }
        start = end;
    }
    match value {
        Some(v) => s.append(v),
        None => s.append_empty_data(),
    };
    s.out().to_vec()
}

/// Root of the trie holding every `(key, value)` pair. Later duplicates win.
pub fn trie_root<I>(pairs: I) -> H256
where
    I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
    let mut items: Vec<(Vec<u8>, Vec<u8>)> =
        pairs.into_iter().map(|(k, v)| (to_nibbles(&k), v)).collect();
    if items.is_empty() {
        return EMPTY_TRIE_ROOT;
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.reverse();
    items.dedup_by(|a, b| a.0 == b.0);
    items.reverse();
    keccak256(&encode(&items, 0))
}

/// Root of a trie keyed by `rlp(index)`, as used for transactions and receipts.
pub fn ordered_trie_root<I>(values: I) -> H256
where
    I: IntoIterator<Item = Vec<u8>>,
{
    trie_root(
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (rlp::encode(&(i as u64)).to_vec(), v)),
    )
}
