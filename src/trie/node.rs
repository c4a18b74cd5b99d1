use array_init::array_init;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::kv_store::Hash;
use crate::trie::encode::{compact_decode, compact_encode, Nibble, PathError};

/// Node type tag for the empty-trie sentinel (hashed, never stored)
pub const NODE_TYPE_EMPTY: u8 = 0;
/// Node type tag for branch nodes
pub const NODE_TYPE_BRANCH: u8 = 1;
/// Node type tag for extension nodes
pub const NODE_TYPE_EXTENSION: u8 = 2;
/// Node type tag for leaf nodes
pub const NODE_TYPE_LEAF: u8 = 3;

const SLOT_EMPTY: u8 = 0;
const SLOT_OCCUPIED: u8 = 1;

/// Root hash of the empty trie
///
/// SHA-256 of the one-byte sentinel encoding `[NODE_TYPE_EMPTY]`. Every empty
/// trie reports this hash, across instances and across runs.
pub const EMPTY_TREE_ROOT_HASH: Hash = [
    0x6e, 0x34, 0x0b, 0x9c, 0xff, 0xb3, 0x7a, 0x98, 0x9c, 0xa5, 0x44, 0xe6, 0xbb, 0x78, 0x0a,
    0x2c, 0x78, 0x90, 0x1d, 0x3f, 0xb3, 0x37, 0x38, 0x76, 0x85, 0x11, 0xa3, 0x06, 0x17, 0xaf,
    0xa0, 0x1d,
];

/// Error type for node construction and (de)serialization
#[derive(Debug, Error)]
pub enum NodeError {
    /// Encoding fails schema checks
    #[error("malformed node: {0}")]
    Malformed(String),

    /// Path error
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Node types in the Merkle Patricia Trie
///
/// Children are referenced by hash, never held inline: the hash of a node is
/// the SHA-256 of its canonical encoding, so the trie forms a DAG whose root
/// hash commits to the entire key/value set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Branch node with up to 16 children, indexed by nibble
    Branch {
        /// Child node hashes, one slot per hex digit
        children: [Option<Hash>; 16],
        /// Hash of the value stored at this branch, if some key ends here
        value: Option<Hash>,
    },

    /// Extension node carrying a shared nibble prefix to a branch
    Extension {
        /// Shared nibble prefix; never empty
        path: Vec<Nibble>,
        /// Hash of the child node, which is always a branch
        child: Hash,
    },

    /// Leaf node terminating a key
    Leaf {
        /// Remaining nibble suffix of the stored key; may be empty
        path: Vec<Nibble>,
        /// Hash of the value in the value store
        value_hash: Hash,
    },
}

impl Node {
    /// Create a branch node
    ///
    /// A branch must either fan out (at least two occupied slots) or carry a
    /// terminal value; anything narrower has a canonical short-node form.
    pub fn branch(children: [Option<Hash>; 16], value: Option<Hash>) -> Result<Self, NodeError> {
        let occupied = children.iter().filter(|slot| slot.is_some()).count();
        if occupied < 2 && value.is_none() {
            return Err(NodeError::Malformed(format!(
                "branch with {} children and no value",
                occupied
            )));
        }
        Ok(Node::Branch { children, value })
    }

    /// Create an extension node
    pub fn extension(path: Vec<Nibble>, child: Hash) -> Result<Self, NodeError> {
        if path.is_empty() {
            return Err(NodeError::Malformed("extension with empty path".to_string()));
        }
        check_path(&path)?;
        Ok(Node::Extension { path, child })
    }

    /// Create a leaf node
    pub fn leaf(path: Vec<Nibble>, value_hash: Hash) -> Result<Self, NodeError> {
        check_path(&path)?;
        Ok(Node::Leaf { path, value_hash })
    }

    /// Serialize the node to its canonical binary encoding
    ///
    /// The encoding is a tagged record: one type byte, then for branches the
    /// 16 slots in ascending nibble order (empty marker or marker + 32-byte
    /// hash) and the optional terminal value hash behind a presence byte; for
    /// short nodes a big-endian u16 path length in nibbles, the
    /// compact-encoded path, and the 32-byte child or value hash. Empty slots
    /// are explicit, so two nodes with the same semantic content always
    /// encode to identical bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Branch { children, value } => {
                let mut out = Vec::with_capacity(2 + 17 * 33);
                out.push(NODE_TYPE_BRANCH);
                for slot in children.iter() {
                    push_slot(&mut out, slot.as_ref());
                }
                push_slot(&mut out, value.as_ref());
                out
            }
            Node::Extension { path, child } => encode_short(NODE_TYPE_EXTENSION, path, child),
            Node::Leaf { path, value_hash } => encode_short(NODE_TYPE_LEAF, path, value_hash),
        }
    }

    /// Deserialize a node from its canonical binary encoding
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        if bytes.is_empty() {
            return Err(NodeError::Malformed("empty node encoding".to_string()));
        }

        match bytes[0] {
            NODE_TYPE_BRANCH => decode_branch(&bytes[1..]),
            NODE_TYPE_EXTENSION | NODE_TYPE_LEAF => decode_short(bytes[0], &bytes[1..]),
            tag => Err(NodeError::Malformed(format!(
                "unknown node type tag {}",
                tag
            ))),
        }
    }

    /// Calculate the hash of this node: SHA-256 of the canonical encoding
    pub fn hash(&self) -> Hash {
        Sha256::digest(self.encode()).into()
    }

    /// Get the node type as a string
    pub fn node_type(&self) -> &'static str {
        match self {
            Node::Branch { .. } => "branch",
            Node::Extension { .. } => "extension",
            Node::Leaf { .. } => "leaf",
        }
    }

    /// Number of occupied child slots; zero for short nodes
    pub fn child_count(&self) -> usize {
        match self {
            Node::Branch { children, .. } => {
                children.iter().filter(|slot| slot.is_some()).count()
            }
            _ => 0,
        }
    }
}

/// Canonical encoding of the empty-trie sentinel
pub fn empty_sentinel_encoding() -> Vec<u8> {
    vec![NODE_TYPE_EMPTY]
}

fn check_path(path: &[Nibble]) -> Result<(), NodeError> {
    for &nibble in path {
        if nibble > 0x0F {
            return Err(NodeError::Path(PathError::InvalidNibble(nibble)));
        }
    }
    // The path length field in the encoding is a u16.
    if path.len() > u16::MAX as usize {
        return Err(NodeError::Malformed(format!(
            "path of {} nibbles exceeds encodable length",
            path.len()
        )));
    }
    Ok(())
}

fn push_slot(out: &mut Vec<u8>, hash: Option<&Hash>) {
    match hash {
        Some(hash) => {
            out.push(SLOT_OCCUPIED);
            out.extend_from_slice(hash);
        }
        None => out.push(SLOT_EMPTY),
    }
}

fn encode_short(tag: u8, path: &[Nibble], hash: &Hash) -> Vec<u8> {
    let packed = compact_encode(path, tag == NODE_TYPE_LEAF);
    let mut out = Vec::with_capacity(3 + packed.len() + 32);
    out.push(tag);
    out.extend_from_slice(&(path.len() as u16).to_be_bytes());
    out.extend_from_slice(&packed);
    out.extend_from_slice(hash);
    out
}

fn decode_branch(body: &[u8]) -> Result<Node, NodeError> {
    let mut pos = 0;
    let mut children: [Option<Hash>; 16] = array_init(|_| None);

    for slot in children.iter_mut() {
        let (hash, next) = read_slot(body, pos)?;
        *slot = hash;
        pos = next;
    }

    let (value, pos) = read_slot(body, pos)?;
    if pos != body.len() {
        return Err(NodeError::Malformed(format!(
            "{} trailing bytes after branch encoding",
            body.len() - pos
        )));
    }

    // Arity is a whole-tree invariant checked by structural validation, not
    // a schema rule; decode only rejects records the encoder cannot emit.
    Ok(Node::Branch { children, value })
}

fn read_slot(body: &[u8], pos: usize) -> Result<(Option<Hash>, usize), NodeError> {
    match body.get(pos) {
        Some(&SLOT_EMPTY) => Ok((None, pos + 1)),
        Some(&SLOT_OCCUPIED) => {
            let hash = read_hash(body, pos + 1)?;
            Ok((Some(hash), pos + 1 + 32))
        }
        Some(&marker) => Err(NodeError::Malformed(format!(
            "invalid slot marker {}",
            marker
        ))),
        None => Err(NodeError::Malformed("truncated branch encoding".to_string())),
    }
}

fn read_hash(body: &[u8], pos: usize) -> Result<Hash, NodeError> {
    let end = pos + 32;
    if end > body.len() {
        return Err(NodeError::Malformed("truncated hash".to_string()));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&body[pos..end]);
    Ok(hash)
}

fn decode_short(tag: u8, body: &[u8]) -> Result<Node, NodeError> {
    if body.len() < 2 {
        return Err(NodeError::Malformed("truncated path length".to_string()));
    }
    let nib_len = u16::from_be_bytes([body[0], body[1]]) as usize;

    // Flag byte plus two nibbles per packed byte.
    let packed_len = 1 + nib_len / 2;
    let path_end = 2 + packed_len;
    if body.len() < path_end {
        return Err(NodeError::Malformed("truncated compact path".to_string()));
    }

    let (path, is_leaf) = compact_decode(&body[2..path_end])?;
    if path.len() != nib_len {
        return Err(NodeError::Malformed(format!(
            "declared path length {} but decoded {}",
            nib_len,
            path.len()
        )));
    }
    if is_leaf != (tag == NODE_TYPE_LEAF) {
        return Err(NodeError::Malformed(
            "leaf flag disagrees with node type tag".to_string(),
        ));
    }

    if body.len() != path_end + 32 {
        return Err(NodeError::Malformed(format!(
            "short node body of {} bytes, expected {}",
            body.len(),
            path_end + 32
        )));
    }
    let hash = read_hash(body, path_end)?;

    match tag {
        NODE_TYPE_EXTENSION => Node::extension(path, hash),
        _ => Node::leaf(path, hash),
    }
}
