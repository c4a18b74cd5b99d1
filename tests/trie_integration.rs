use std::path::PathBuf;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tempfile::{tempdir, TempDir};

use merklekv::{Hash, MerklePatriciaTrie, Node, NodeStore, EMPTY_TREE_ROOT_HASH};

fn db_paths(dir: &TempDir) -> (PathBuf, PathBuf) {
    (dir.path().join("values"), dir.path().join("nodes"))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn value_hash(value: &[u8]) -> Hash {
    Sha256::digest(value).into()
}

#[test]
fn test_empty_tree_creation() {
    let dir = tempdir().unwrap();
    let (values, nodes) = db_paths(&dir);

    let trie = MerklePatriciaTrie::open_empty(&values, &nodes).unwrap();
    assert!(trie.root_node().is_none());
    assert_eq!(trie.root_hash(), EMPTY_TREE_ROOT_HASH);

    trie.close_data_stores().unwrap();

    // Fresh empty tries agree on the root constant.
    let dir2 = tempdir().unwrap();
    let (values2, nodes2) = db_paths(&dir2);
    let trie2 = MerklePatriciaTrie::open_empty(&values2, &nodes2).unwrap();
    assert_eq!(trie2.root_hash(), EMPTY_TREE_ROOT_HASH);
    trie2.close_data_stores().unwrap();
}

#[test]
fn test_simple_tree_ops() {
    let dir = tempdir().unwrap();
    let (values, nodes) = db_paths(&dir);

    // User data k,v can be any bytes.
    let k = b"the-name-of-my-cat";
    let v = b"zifton-the-immortal";

    let mut trie = MerklePatriciaTrie::open_empty(&values, &nodes).unwrap();
    trie.put(k, v).unwrap();

    assert!(trie.root_node().is_some());
    assert_eq!(trie.get(k).unwrap(), Some(v.to_vec()));

    let root_hash = trie.root_hash();
    trie.close_data_stores().unwrap();

    // Restore the tree from its root hash and read the data back.
    let trie = MerklePatriciaTrie::open_at_root(root_hash, &values, &nodes).unwrap();
    assert!(trie.root_node().is_some());
    assert_eq!(trie.root_hash(), root_hash);
    assert_eq!(trie.get(k).unwrap(), Some(v.to_vec()));

    trie.close_data_stores().unwrap();
}

struct ComplexKeys {
    k1: Vec<u8>,
    k2: Vec<u8>,
    k3: Vec<u8>,
    k4: Vec<u8>,
    v1: Vec<u8>,
    v2: Vec<u8>,
    v3: Vec<u8>,
    v4: Vec<u8>,
}

impl ComplexKeys {
    fn new() -> Self {
        Self {
            k1: hex::decode("123456").unwrap(),
            k2: hex::decode("112456").unwrap(),
            k3: hex::decode("112457").unwrap(),
            k4: hex::decode("123457").unwrap(),
            v1: b"zifton".to_vec(),
            v2: b"tantalus".to_vec(),
            v3: random_bytes(100),
            v4: random_bytes(100),
        }
    }
}

fn validate_root(trie: &MerklePatriciaTrie) {
    let root = trie.root_node().expect("expected non-empty tree").clone();
    assert_eq!(trie.validate_structure(&root).unwrap(), trie.root_hash());
}

#[test]
fn test_complex_tree_ops() {
    let keys = ComplexKeys::new();
    let dir = tempdir().unwrap();
    let (values, nodes) = db_paths(&dir);

    let mut trie = MerklePatriciaTrie::open_empty(&values, &nodes).unwrap();

    trie.put(&keys.k1, &keys.v1).unwrap();
    validate_root(&trie);
    assert_eq!(trie.get(&keys.k1).unwrap(), Some(keys.v1.clone()));

    trie.put(&keys.k2, &keys.v2).unwrap();
    validate_root(&trie);
    assert_eq!(trie.get(&keys.k1).unwrap(), Some(keys.v1.clone()));
    assert_eq!(trie.get(&keys.k2).unwrap(), Some(keys.v2.clone()));

    // k3 is not there yet: a clean miss, not an error.
    assert_eq!(trie.get(&keys.k3).unwrap(), None);

    trie.put(&keys.k3, &keys.v3).unwrap();
    validate_root(&trie);
    assert_eq!(trie.get(&keys.k1).unwrap(), Some(keys.v1.clone()));
    assert_eq!(trie.get(&keys.k2).unwrap(), Some(keys.v2.clone()));
    assert_eq!(trie.get(&keys.k3).unwrap(), Some(keys.v3.clone()));

    trie.put(&keys.k4, &keys.v4).unwrap();
    validate_root(&trie);
    assert_eq!(trie.get(&keys.k1).unwrap(), Some(keys.v1.clone()));
    assert_eq!(trie.get(&keys.k2).unwrap(), Some(keys.v2.clone()));
    assert_eq!(trie.get(&keys.k3).unwrap(), Some(keys.v3.clone()));
    assert_eq!(trie.get(&keys.k4).unwrap(), Some(keys.v4.clone()));

    let root_hash = trie.root_hash();
    trie.close_data_stores().unwrap();

    // Walk the persisted nodes directly and check the exact final shape:
    //
    // root: ext <1>
    //   branch
    //     [1] -> ext <245> -> branch
    //                           [6] -> leaf <> (v2)
    //                           [7] -> leaf <> (v3)
    //     [2] -> ext <345> -> branch
    //                           [6] -> leaf <> (v1)
    //                           [7] -> leaf <> (v4)
    let store = NodeStore::open(&nodes).unwrap();

    let root = store.get(&root_hash).unwrap().expect("missing root node");
    let top_branch = match root {
        Node::Extension { ref path, ref child } => {
            assert_eq!(path.as_slice(), &[1u8][..]);
            store.get(child).unwrap().expect("missing top branch")
        }
        other => panic!("expected extension at root, got {}", other.node_type()),
    };

    let (slot1, slot2) = match top_branch {
        Node::Branch { children, value } => {
            assert!(value.is_none());
            let occupied: Vec<usize> = (0..16).filter(|&i| children[i].is_some()).collect();
            assert_eq!(occupied, vec![1, 2]);
            (children[1].unwrap(), children[2].unwrap())
        }
        other => panic!("expected branch, got {}", other.node_type()),
    };

    assert_subtree(&store, &slot1, &[2, 4, 5], &keys.v2, &keys.v3);
    assert_subtree(&store, &slot2, &[3, 4, 5], &keys.v1, &keys.v4);

    store.close().unwrap();
}

/// Check an `ext -> branch{[6] leaf, [7] leaf}` subtree with empty leaf paths
fn assert_subtree(store: &NodeStore, hash: &Hash, ext_path: &[u8], v6: &[u8], v7: &[u8]) {
    let ext = store.get(hash).unwrap().expect("missing extension");
    let branch_hash = match ext {
        Node::Extension { ref path, ref child } => {
            assert_eq!(path.as_slice(), ext_path);
            *child
        }
        other => panic!("expected extension, got {}", other.node_type()),
    };

    let branch = store.get(&branch_hash).unwrap().expect("missing branch");
    match branch {
        Node::Branch { children, value } => {
            assert!(value.is_none());
            let occupied: Vec<usize> = (0..16).filter(|&i| children[i].is_some()).collect();
            assert_eq!(occupied, vec![6, 7]);
            assert_leaf(store, &children[6].unwrap(), v6);
            assert_leaf(store, &children[7].unwrap(), v7);
        }
        other => panic!("expected branch, got {}", other.node_type()),
    }
}

fn assert_leaf(store: &NodeStore, hash: &Hash, value: &[u8]) {
    match store.get(hash).unwrap().expect("missing leaf") {
        Node::Leaf {
            path,
            value_hash: stored,
        } => {
            assert!(path.is_empty());
            assert_eq!(stored, value_hash(value));
        }
        other => panic!("expected leaf, got {}", other.node_type()),
    }
}

#[test]
fn test_insertion_order_does_not_change_root() {
    let keys = ComplexKeys::new();

    let dir_a = tempdir().unwrap();
    let (values_a, nodes_a) = db_paths(&dir_a);
    let mut a = MerklePatriciaTrie::open_empty(&values_a, &nodes_a).unwrap();
    a.put(&keys.k1, &keys.v1).unwrap();
    a.put(&keys.k2, &keys.v2).unwrap();
    a.put(&keys.k3, &keys.v3).unwrap();
    a.put(&keys.k4, &keys.v4).unwrap();

    let dir_b = tempdir().unwrap();
    let (values_b, nodes_b) = db_paths(&dir_b);
    let mut b = MerklePatriciaTrie::open_empty(&values_b, &nodes_b).unwrap();
    b.put(&keys.k3, &keys.v3).unwrap();
    b.put(&keys.k1, &keys.v1).unwrap();
    b.put(&keys.k4, &keys.v4).unwrap();
    b.put(&keys.k2, &keys.v2).unwrap();

    assert_eq!(a.root_hash(), b.root_hash());
    for (k, v) in [
        (&keys.k1, &keys.v1),
        (&keys.k2, &keys.v2),
        (&keys.k3, &keys.v3),
        (&keys.k4, &keys.v4),
    ] {
        assert_eq!(b.get(k).unwrap(), Some(v.clone()));
    }

    a.close_data_stores().unwrap();
    b.close_data_stores().unwrap();
}

#[test]
fn test_reopen_preserves_all_keys() {
    let dir = tempdir().unwrap();
    let (values, nodes) = db_paths(&dir);

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0u32..32)
        .map(|i| (format!("key-{}", i).into_bytes(), random_bytes(40)))
        .collect();

    let mut trie = MerklePatriciaTrie::open_empty(&values, &nodes).unwrap();
    for (k, v) in &pairs {
        trie.put(k, v).unwrap();
    }
    let root_hash = trie.root_hash();
    validate_root(&trie);
    trie.close_data_stores().unwrap();

    let reopened = MerklePatriciaTrie::open_at_root(root_hash, &values, &nodes).unwrap();
    assert_eq!(reopened.root_hash(), root_hash);
    for (k, v) in &pairs {
        assert_eq!(reopened.get(k).unwrap(), Some(v.clone()));
    }
    validate_root(&reopened);
    reopened.close_data_stores().unwrap();
}

#[test]
fn test_earlier_roots_stay_readable() {
    let dir = tempdir().unwrap();
    let (values, nodes) = db_paths(&dir);

    let mut trie = MerklePatriciaTrie::open_empty(&values, &nodes).unwrap();
    trie.put(b"first", b"one").unwrap();
    let early_root = trie.root_hash();
    trie.put(b"second", b"two").unwrap();
    trie.close_data_stores().unwrap();

    // Nodes are write-once: the earlier root still opens the earlier state.
    let old = MerklePatriciaTrie::open_at_root(early_root, &values, &nodes).unwrap();
    assert_eq!(old.get(b"first").unwrap(), Some(b"one".to_vec()));
    assert_eq!(old.get(b"second").unwrap(), None);
    old.close_data_stores().unwrap();
}
