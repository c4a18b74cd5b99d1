use std::fmt::Write as _;
use std::path::Path;

use array_init::array_init;
use log::{debug, info};
use thiserror::Error;

use crate::kv_store::Hash;
use crate::node_store::{NodeStore, NodeStoreError};
use crate::trie::encode::{bytes_to_nibbles, common_prefix_len, nibbles_to_hex, Nibble};
use crate::trie::node::{Node, NodeError, EMPTY_TREE_ROOT_HASH};
use crate::value_store::{ValueStore, ValueStoreError};

/// Error type for trie operations
#[derive(Debug, Error)]
pub enum TrieError {
    /// Node error
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// Node store error
    #[error("node store error: {0}")]
    NodeStore(#[from] NodeStoreError),

    /// Value store error
    #[error("value store error: {0}")]
    ValueStore(#[from] ValueStoreError),

    /// The requested root hash is not in the node store
    #[error("unknown root hash: {0}")]
    UnknownRoot(String),

    /// A referenced node is missing from the node store
    #[error("missing node: {0}")]
    MissingNode(String),

    /// A referenced value is missing from the value store
    #[error("missing value: {0}")]
    MissingValue(String),

    /// Structural validation found an invariant violation
    #[error("structure mismatch: {0}")]
    StructureMismatch(String),
}

/// Result type for trie operations
pub type TrieResult<T> = Result<T, TrieError>;

/// A persistent, content-addressed Merkle Patricia Trie
///
/// Maps arbitrary byte keys to arbitrary byte values. Every `put` yields a
/// new root hash committing to the entire key/value set; any previously
/// observed root hash reopens that exact state with `open_at_root`.
///
/// The trie owns two stores: the node store (node hash → canonical node
/// encoding) and the value store (value hash → raw value bytes). Both are
/// write-once under content addressing, so nodes orphaned by later mutations
/// stay on disk and keep old roots readable.
///
/// One instance is a single-writer structure: `put` takes `&mut self`, reads
/// take `&self`. Instances opened over disjoint store paths are independent.
pub struct MerklePatriciaTrie {
    node_store: NodeStore,
    value_store: ValueStore,
    root: Option<Node>,
}

impl std::fmt::Debug for MerklePatriciaTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerklePatriciaTrie").finish()
    }
}

impl MerklePatriciaTrie {
    /// Open an empty trie over the two store paths
    ///
    /// The stores are created if missing; existing stores are reused as node
    /// and value backing (content addressing makes stale entries harmless).
    pub fn open_empty(value_db_path: &Path, node_db_path: &Path) -> TrieResult<Self> {
        let value_store = ValueStore::open(value_db_path)?;
        let node_store = NodeStore::open(node_db_path)?;
        info!(
            "opened empty trie (values: {}, nodes: {})",
            value_db_path.display(),
            node_db_path.display()
        );
        Ok(Self {
            node_store,
            value_store,
            root: None,
        })
    }

    /// Open a trie at a previously observed root hash
    ///
    /// The root node is loaded eagerly; fails with `UnknownRoot` when the
    /// node store has no entry for `root`.
    pub fn open_at_root(root: Hash, value_db_path: &Path, node_db_path: &Path) -> TrieResult<Self> {
        let value_store = ValueStore::open(value_db_path)?;
        let node_store = NodeStore::open(node_db_path)?;

        let root_node = match node_store.get(&root)? {
            Some(node) => node,
            None => return Err(TrieError::UnknownRoot(hex::encode(root))),
        };
        info!("opened trie at root {}", hex::encode(root));

        Ok(Self {
            node_store,
            value_store,
            root: Some(root_node),
        })
    }

    /// Insert a key-value pair
    ///
    /// The value is written to the value store first; the nodes along the
    /// key's nibble path are then rewritten bottom-up, each new node stored
    /// under its own hash. Existing stored nodes are never mutated.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        let value_hash = self.value_store.put(value)?;
        let path = bytes_to_nibbles(key);

        let new_root = match self.root.clone() {
            None => Node::leaf(path, value_hash)?,
            Some(node) => self.insert_at(node, &path, value_hash)?,
        };

        self.node_store.put(&new_root)?;
        debug!(
            "put key {} -> root {}",
            hex::encode(key),
            hex::encode(new_root.hash())
        );
        self.root = Some(new_root);
        Ok(())
    }

    /// Get the value stored under a key
    ///
    /// An absent key is `Ok(None)`, not an error. A node referenced by the
    /// tree but missing from the node store fails with `MissingNode`.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let path = bytes_to_nibbles(key);

        let root = match &self.root {
            Some(node) => node,
            None => return Ok(None),
        };

        match self.lookup_at(root, &path)? {
            None => Ok(None),
            Some(value_hash) => match self.value_store.get(&value_hash)? {
                Some(bytes) => Ok(Some(bytes)),
                None => Err(TrieError::MissingValue(hex::encode(value_hash))),
            },
        }
    }

    /// The root hash: the commitment to the entire key/value set
    ///
    /// An empty trie returns `EMPTY_TREE_ROOT_HASH`.
    pub fn root_hash(&self) -> Hash {
        match &self.root {
            Some(node) => node.hash(),
            None => EMPTY_TREE_ROOT_HASH,
        }
    }

    /// The root node, or `None` for an empty trie
    pub fn root_node(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Recompute the hash of the subtree rooted at `node`, verifying its
    /// structure on the way
    ///
    /// Children are decoded from the node store and re-encoded; any
    /// disagreement between a stored child hash and the recomputed one, and
    /// any shape violation (empty extension path, extension child that is
    /// not a branch, branch without fan-out or terminal value, value hash
    /// absent from the value store) fails with `StructureMismatch`.
    pub fn validate_structure(&self, node: &Node) -> TrieResult<Hash> {
        match node {
            Node::Leaf { value_hash, .. } => {
                self.check_value(value_hash)?;
            }
            Node::Extension { path, child } => {
                if path.is_empty() {
                    return Err(TrieError::StructureMismatch(
                        "extension with empty path".to_string(),
                    ));
                }
                let child_node = self.get_node(child)?;
                if !matches!(child_node, Node::Branch { .. }) {
                    return Err(TrieError::StructureMismatch(format!(
                        "extension child {} is a {}",
                        hex::encode(child),
                        child_node.node_type()
                    )));
                }
                self.check_child(child, &child_node)?;
            }
            Node::Branch { children, value } => {
                for child in children.iter().flatten() {
                    let child_node = self.get_node(child)?;
                    self.check_child(child, &child_node)?;
                }
                if let Some(value_hash) = value {
                    self.check_value(value_hash)?;
                }
                if node.child_count() < 2 && value.is_none() {
                    return Err(TrieError::StructureMismatch(format!(
                        "branch with {} children and no value",
                        node.child_count()
                    )));
                }
            }
        }
        Ok(node.hash())
    }

    /// Human-readable dump of the tree, for debugging
    ///
    /// The format is not part of the contract.
    pub fn print(&self) -> String {
        let mut out = String::new();
        match &self.root {
            None => out.push_str("<empty trie>\n"),
            Some(root) => {
                let _ = writeln!(out, "trie root {}", hex::encode(self.root_hash()));
                self.print_at(root, 1, &mut out);
            }
        }
        out
    }

    /// Close both data stores; idempotent
    ///
    /// Every further operation on this instance fails with a closed-store
    /// error.
    pub fn close_data_stores(&self) -> TrieResult<()> {
        self.value_store.close()?;
        self.node_store.close()?;
        Ok(())
    }

    // === Internal helpers ===

    fn get_node(&self, hash: &Hash) -> TrieResult<Node> {
        match self.node_store.get(hash)? {
            Some(node) => Ok(node),
            None => Err(TrieError::MissingNode(hex::encode(hash))),
        }
    }

    fn check_child(&self, stored_hash: &Hash, child_node: &Node) -> TrieResult<()> {
        let recomputed = self.validate_structure(child_node)?;
        if recomputed != *stored_hash {
            return Err(TrieError::StructureMismatch(format!(
                "stored child hash {} disagrees with recomputed {}",
                hex::encode(stored_hash),
                hex::encode(recomputed)
            )));
        }
        Ok(())
    }

    fn check_value(&self, value_hash: &Hash) -> TrieResult<()> {
        if !self.value_store.contains(value_hash)? {
            return Err(TrieError::StructureMismatch(format!(
                "referenced value {} missing from value store",
                hex::encode(value_hash)
            )));
        }
        Ok(())
    }

    /// Recursive insert into the subtree rooted at `node` with the remaining
    /// nibble path, returning the replacement node
    ///
    /// New interior nodes are persisted as they are built; the caller stores
    /// the returned node itself.
    fn insert_at(&self, node: Node, path: &[Nibble], value_hash: Hash) -> TrieResult<Node> {
        match node {
            Node::Leaf {
                path: leaf_path,
                value_hash: leaf_value,
            } => {
                if leaf_path == path {
                    // Same key: overwrite the value hash.
                    return Ok(Node::leaf(leaf_path, value_hash)?);
                }
                self.split_leaf(&leaf_path, leaf_value, path, value_hash)
            }

            Node::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix_len(path, &ext_path);

                if common == ext_path.len() {
                    // Full prefix match: descend into the child branch.
                    let child_node = self.get_node(&child)?;
                    let new_child = self.insert_at(child_node, &path[common..], value_hash)?;
                    let new_child_hash = self.node_store.put(&new_child)?;
                    return Ok(Node::extension(ext_path, new_child_hash)?);
                }

                self.split_extension(&ext_path, child, common, path, value_hash)
            }

            Node::Branch { children, value } => {
                if path.is_empty() {
                    // The key ends exactly here.
                    return Ok(Node::branch(children, Some(value_hash))?);
                }

                let idx = path[0] as usize;
                let rest = &path[1..];

                let new_child = match children[idx] {
                    None => Node::leaf(rest.to_vec(), value_hash)?,
                    Some(child_hash) => {
                        let child_node = self.get_node(&child_hash)?;
                        self.insert_at(child_node, rest, value_hash)?
                    }
                };

                let mut children = children;
                children[idx] = Some(self.node_store.put(&new_child)?);
                Ok(Node::branch(children, value)?)
            }
        }
    }

    /// Split a leaf against a diverging insertion path
    ///
    /// Both remainders hang off a fresh branch; a remainder that is fully
    /// consumed becomes the branch's terminal value instead of a child. The
    /// shared prefix, if any, becomes an extension above the branch.
    fn split_leaf(
        &self,
        leaf_path: &[Nibble],
        leaf_value: Hash,
        path: &[Nibble],
        value_hash: Hash,
    ) -> TrieResult<Node> {
        let common = common_prefix_len(path, leaf_path);
        let leaf_rest = &leaf_path[common..];
        let path_rest = &path[common..];

        let mut children: [Option<Hash>; 16] = array_init(|_| None);
        let mut terminal = None;

        if leaf_rest.is_empty() {
            terminal = Some(leaf_value);
        } else {
            let moved = Node::leaf(leaf_rest[1..].to_vec(), leaf_value)?;
            children[leaf_rest[0] as usize] = Some(self.node_store.put(&moved)?);
        }

        if path_rest.is_empty() {
            terminal = Some(value_hash);
        } else {
            let inserted = Node::leaf(path_rest[1..].to_vec(), value_hash)?;
            children[path_rest[0] as usize] = Some(self.node_store.put(&inserted)?);
        }

        let branch = Node::branch(children, terminal)?;
        self.wrap_in_extension(&path[..common], branch)
    }

    /// Split an extension whose path diverges from the insertion path at
    /// `common` nibbles
    fn split_extension(
        &self,
        ext_path: &[Nibble],
        child: Hash,
        common: usize,
        path: &[Nibble],
        value_hash: Hash,
    ) -> TrieResult<Node> {
        let ext_rest = &ext_path[common..];
        let path_rest = &path[common..];

        let mut children: [Option<Hash>; 16] = array_init(|_| None);
        let mut terminal = None;

        // The downstream subtree keeps its branch child, behind a shorter
        // extension when more than one nibble of the old path remains.
        let downstream = if ext_rest.len() == 1 {
            child
        } else {
            let shortened = Node::extension(ext_path[common + 1..].to_vec(), child)?;
            self.node_store.put(&shortened)?
        };
        children[ext_rest[0] as usize] = Some(downstream);

        if path_rest.is_empty() {
            terminal = Some(value_hash);
        } else {
            let inserted = Node::leaf(path_rest[1..].to_vec(), value_hash)?;
            children[path_rest[0] as usize] = Some(self.node_store.put(&inserted)?);
        }

        let branch = Node::branch(children, terminal)?;
        self.wrap_in_extension(&path[..common], branch)
    }

    /// Wrap a branch in an extension over the shared prefix, or return it
    /// unwrapped when there is no prefix
    fn wrap_in_extension(&self, shared: &[Nibble], branch: Node) -> TrieResult<Node> {
        if shared.is_empty() {
            return Ok(branch);
        }
        let branch_hash = self.node_store.put(&branch)?;
        Ok(Node::extension(shared.to_vec(), branch_hash)?)
    }

    fn lookup_at(&self, node: &Node, path: &[Nibble]) -> TrieResult<Option<Hash>> {
        match node {
            Node::Leaf {
                path: leaf_path,
                value_hash,
            } => {
                if leaf_path == path {
                    Ok(Some(*value_hash))
                } else {
                    Ok(None)
                }
            }

            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.len() < ext_path.len() || &path[..ext_path.len()] != ext_path.as_slice() {
                    return Ok(None);
                }
                let child_node = self.get_node(child)?;
                self.lookup_at(&child_node, &path[ext_path.len()..])
            }

            Node::Branch { children, value } => {
                if path.is_empty() {
                    return Ok(*value);
                }
                match children[path[0] as usize] {
                    None => Ok(None),
                    Some(child_hash) => {
                        let child_node = self.get_node(&child_hash)?;
                        self.lookup_at(&child_node, &path[1..])
                    }
                }
            }
        }
    }

    fn print_at(&self, node: &Node, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match node {
            Node::Leaf { path, value_hash } => {
                let _ = writeln!(
                    out,
                    "{}leaf path=<{}> value={}",
                    pad,
                    nibbles_to_hex(path),
                    hex::encode(value_hash)
                );
            }
            Node::Extension { path, child } => {
                let _ = writeln!(out, "{}ext path=<{}> ->", pad, nibbles_to_hex(path));
                self.print_child(child, depth + 1, out);
            }
            Node::Branch { children, value } => {
                match value {
                    Some(value_hash) => {
                        let _ = writeln!(out, "{}branch value={}", pad, hex::encode(value_hash));
                    }
                    None => {
                        let _ = writeln!(out, "{}branch", pad);
                    }
                }
                for (i, child) in children.iter().enumerate() {
                    if let Some(child_hash) = child {
                        let _ = writeln!(out, "{}[{:x}] ->", pad, i);
                        self.print_child(child_hash, depth + 1, out);
                    }
                }
            }
        }
    }

    fn print_child(&self, hash: &Hash, depth: usize, out: &mut String) {
        match self.node_store.get(hash) {
            Ok(Some(node)) => self.print_at(&node, depth, out),
            Ok(None) => {
                let _ = writeln!(out, "{}<missing node {}>", "  ".repeat(depth), hex::encode(hash));
            }
            Err(e) => {
                let _ = writeln!(
                    out,
                    "{}<unreadable node {}: {}>",
                    "  ".repeat(depth),
                    hex::encode(hash),
                    e
                );
            }
        }
    }
}
