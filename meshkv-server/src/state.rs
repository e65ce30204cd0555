use std::fmt;
use std::sync::LazyLock;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use meshkv_common::{KeyHash, KEY_HASH_SIZE};

/// Size of a state token in bytes: key hash plus big-endian revision.
pub const STATE_TOKEN_SIZE: usize = KEY_HASH_SIZE + 8;

/// Number of bits in a state token.
pub const STATE_TOKEN_BITS: usize = STATE_TOKEN_SIZE * 8;

/// A leaf splits into two children once it holds more than this many
/// tokens.
const SPLIT_THRESHOLD: usize = 32;

/// An interior node collapses back into a leaf once its subtree holds at
/// most this many tokens.
const JOIN_THRESHOLD: usize = 16;

/// Modulus of the sum field. It is larger than 2^128, so 16-byte tokens
/// embed injectively.
static PRIME: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(b"530512889551602322505127520352579437339", 10).expect("valid prime literal")
});

/// One element of the store's replicated state: `key-hash ‖ revision`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateToken([u8; STATE_TOKEN_SIZE]);

impl StateToken {
    pub fn new(kh: KeyHash, revision: u64) -> Self {
        let mut bytes = [0u8; STATE_TOKEN_SIZE];
        bytes[..KEY_HASH_SIZE].copy_from_slice(kh.as_bytes());
        bytes[KEY_HASH_SIZE..].copy_from_slice(&revision.to_be_bytes());
        StateToken(bytes)
    }

    pub fn from_bytes(bytes: [u8; STATE_TOKEN_SIZE]) -> Self {
        StateToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; STATE_TOKEN_SIZE] {
        &self.0
    }

    pub fn key_hash(&self) -> KeyHash {
        let mut kh = [0u8; KEY_HASH_SIZE];
        kh.copy_from_slice(&self.0[..KEY_HASH_SIZE]);
        KeyHash::from_bytes(kh)
    }

    pub fn revision(&self) -> u64 {
        u64::from_be_bytes(self.0[KEY_HASH_SIZE..].try_into().expect("8-byte slice"))
    }

    fn bit(&self, index: usize) -> usize {
        ((self.0[index / 8] >> (7 - index % 8)) & 1) as usize
    }
}

impl fmt::Debug for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// An element of ZZ_p used as a subtree fingerprint.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Zp(BigUint);

impl Zp {
    pub fn zero() -> Self {
        Zp(BigUint::default())
    }

    pub fn from_token(token: &StateToken) -> Self {
        Zp(BigUint::from_bytes_be(token.as_bytes()))
    }

    pub fn add(&mut self, other: &Zp) {
        self.0 = (&self.0 + &other.0) % &*PRIME;
    }

    pub fn sub(&mut self, other: &Zp) {
        self.0 = (&self.0 + (&*PRIME - &other.0)) % &*PRIME;
    }

    /// Canonical big-endian digest of the field element, suitable for
    /// equality comparison across the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

/// A bit path identifying a subtree of the state set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    bits: [u8; STATE_TOKEN_SIZE],
    len: u8,
}

impl Prefix {
    pub fn root() -> Self {
        Prefix { bits: [0u8; STATE_TOKEN_SIZE], len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extends the path by one bit.
    pub fn child(&self, bit: usize) -> Self {
        let mut bits = self.bits;
        if bit != 0 {
            bits[self.len as usize / 8] |= 1 << (7 - self.len as usize % 8);
        }
        Prefix { bits, len: self.len + 1 }
    }

    pub fn bit(&self, index: usize) -> usize {
        ((self.bits[index / 8] >> (7 - index % 8)) & 1) as usize
    }

    /// Returns `true` if the token's leading bits equal this path.
    pub fn matches(&self, token: &StateToken) -> bool {
        (0..self.len as usize).all(|index| self.bit(index) == token.bit(index))
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for index in 0..self.len as usize {
            write!(f, "{}", self.bit(index))?;
        }
        write!(f, "/{}", self.len)
    }
}

#[derive(Clone)]
enum NodeKind {
    Leaf(Vec<StateToken>),
    Interior(Box<[Node; 2]>),
}

#[derive(Clone)]
struct Node {
    count: usize,
    sum: Zp,
    kind: NodeKind,
}

impl Node {
    fn empty_leaf() -> Node {
        Node { count: 0, sum: Zp::zero(), kind: NodeKind::Leaf(Vec::new()) }
    }

    fn insert(&mut self, token: StateToken, depth: usize) -> bool {
        let inserted = match &mut self.kind {
            NodeKind::Leaf(tokens) => match tokens.binary_search(&token) {
                Ok(_) => false,
                Err(position) => {
                    tokens.insert(position, token);
                    true
                }
            },
            NodeKind::Interior(children) => children[token.bit(depth)].insert(token, depth + 1),
        };
        if inserted {
            self.count += 1;
            self.sum.add(&Zp::from_token(&token));
            if self.count > SPLIT_THRESHOLD && depth < STATE_TOKEN_BITS {
                self.split(depth);
            }
        }
        inserted
    }

    fn remove(&mut self, token: &StateToken, depth: usize) -> bool {
        let removed = match &mut self.kind {
            NodeKind::Leaf(tokens) => match tokens.binary_search(token) {
                Ok(position) => {
                    tokens.remove(position);
                    true
                }
                Err(_) => false,
            },
            NodeKind::Interior(children) => children[token.bit(depth)].remove(token, depth + 1),
        };
        if removed {
            self.count -= 1;
            self.sum.sub(&Zp::from_token(token));
            if self.count <= JOIN_THRESHOLD {
                self.join();
            }
        }
        removed
    }

    fn contains(&self, token: &StateToken, depth: usize) -> bool {
        match &self.kind {
            NodeKind::Leaf(tokens) => tokens.binary_search(token).is_ok(),
            NodeKind::Interior(children) => children[token.bit(depth)].contains(token, depth + 1),
        }
    }

    /// Splits a leaf into two children on the bit at `depth`.
    fn split(&mut self, depth: usize) {
        let tokens = match &mut self.kind {
            NodeKind::Leaf(tokens) => std::mem::take(tokens),
            NodeKind::Interior(_) => return,
        };
        let mut children = Box::new([Node::empty_leaf(), Node::empty_leaf()]);
        for token in tokens {
            let child = &mut children[token.bit(depth)];
            child.count += 1;
            child.sum.add(&Zp::from_token(&token));
            match &mut child.kind {
                NodeKind::Leaf(child_tokens) => child_tokens.push(token),
                NodeKind::Interior(_) => unreachable!("fresh child is a leaf"),
            }
        }
        self.kind = NodeKind::Interior(children);
    }

    /// Collapses an interior node back into a sorted leaf.
    fn join(&mut self) {
        if matches!(self.kind, NodeKind::Leaf(_)) {
            return;
        }
        let mut tokens = Vec::with_capacity(self.count);
        self.collect(&mut tokens);
        self.kind = NodeKind::Leaf(tokens);
    }

    fn collect(&self, out: &mut Vec<StateToken>) {
        match &self.kind {
            NodeKind::Leaf(tokens) => out.extend_from_slice(tokens),
            NodeKind::Interior(children) => {
                children[0].collect(out);
                children[1].collect(out);
            }
        }
    }

    fn node_info(&self, prefix: &Prefix, depth: usize) -> (u64, Zp) {
        if depth == prefix.len() {
            return (self.count as u64, self.sum.clone());
        }
        match &self.kind {
            NodeKind::Interior(children) => children[prefix.bit(depth)].node_info(prefix, depth + 1),
            NodeKind::Leaf(tokens) => {
                let mut count = 0u64;
                let mut sum = Zp::zero();
                for token in tokens {
                    if prefix.matches(token) {
                        count += 1;
                        sum.add(&Zp::from_token(token));
                    }
                }
                (count, sum)
            }
        }
    }

    fn items_under(&self, prefix: &Prefix, depth: usize, out: &mut Vec<StateToken>) {
        if depth == prefix.len() {
            self.collect(out);
            return;
        }
        match &self.kind {
            NodeKind::Interior(children) => children[prefix.bit(depth)].items_under(prefix, depth + 1, out),
            NodeKind::Leaf(tokens) => {
                out.extend(tokens.iter().filter(|token| prefix.matches(token)).copied());
            }
        }
    }
}

/// The set of state tokens, backed by a binary prefix tree whose nodes
/// cache element counts and ZZ_p sums for the reconciler.
///
/// `Clone` yields a point-in-time snapshot usable as a reconcilable view.
#[derive(Clone)]
pub struct StateSet {
    root: Node,
}

impl StateSet {
    pub fn new() -> Self {
        StateSet { root: Node::empty_leaf() }
    }

    /// Adds the provided token; returns `false` if it was already present.
    pub fn insert(&mut self, token: StateToken) -> bool {
        self.root.insert(token, 0)
    }

    /// Removes the provided token; returns `false` if it was absent.
    pub fn remove(&mut self, token: &StateToken) -> bool {
        self.root.remove(token, 0)
    }

    pub fn contains(&self, token: &StateToken) -> bool {
        self.root.contains(token, 0)
    }

    pub fn len(&self) -> usize {
        self.root.count
    }

    pub fn is_empty(&self) -> bool {
        self.root.count == 0
    }

    /// Returns all tokens in the set, in token order.
    pub fn items(&self) -> Vec<StateToken> {
        let mut items = Vec::with_capacity(self.root.count);
        self.root.collect(&mut items);
        items.sort_unstable();
        items
    }

    /// Count and fingerprint of the subtree under the provided path.
    pub fn node_info(&self, prefix: &Prefix) -> (u64, Zp) {
        self.root.node_info(prefix, 0)
    }

    /// All tokens under the provided path, in token order.
    pub fn items_under(&self, prefix: &Prefix) -> Vec<StateToken> {
        let mut items = Vec::new();
        self.root.items_under(prefix, 0, &mut items);
        items.sort_unstable();
        items
    }
}

impl Default for StateSet {
    fn default() -> Self {
        StateSet::new()
    }
}
