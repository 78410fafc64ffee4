//! Append-only Poseidon Merkle registry.
//!
//! A sparse binary tree of fixed depth with node value
//! `poseidon2(left, right)`. Empty subtrees default to the field element 0
//! at every level, the same convention the membership circuit uses, so a
//! fresh member at leaf 0 proves against an all-zero sibling path. Nodes
//! are stored in a sparse map so memory stays proportional to the number
//! of inserted leaves even at the production depth of 20.
//!
//! Writes are two-phase: [`MerkleTree::preview_insert`] computes the new
//! root and node updates without mutating the tree, the caller persists
//! leaf and root inside its store transaction, and only after commit does
//! [`MerkleTree::apply_updates`] advance the in-memory state. The tree
//! therefore never runs ahead of the store.

use std::collections::HashMap;

use ark_bn254::Fr;
use rusqlite::{params, Connection, OptionalExtension};

use crate::field::{fr_to_hex, parse_field_hex};
use crate::poseidon::poseidon2;
use crate::IdentityError;

/// Node updates produced by a previewed insertion: `((level, index), value)`
/// for the leaf and every ancestor up to the root.
pub type NodeUpdates = Vec<((usize, usize), Fr)>;

/// A sparse append-only Poseidon Merkle tree.
#[derive(Debug)]
pub struct MerkleTree {
    /// Depth of the tree (number of levels excluding the root).
    depth: usize,
    /// Next available leaf index.
    next_index: usize,
    /// Sparse node storage. Key: (level, index); level 0 is the leaves.
    nodes: HashMap<(usize, usize), Fr>,
}

impl MerkleTree {
    /// Creates a new empty tree of the given depth.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            next_index: 0,
            nodes: HashMap::new(),
        }
    }

    /// The tree depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of leaves inserted so far.
    pub fn leaf_count(&self) -> usize {
        self.next_index
    }

    /// Maximum number of leaves (2^depth).
    pub fn capacity(&self) -> usize {
        1 << self.depth
    }

    fn node(&self, level: usize, index: usize) -> Fr {
        *self.nodes.get(&(level, index)).unwrap_or(&Fr::from(0u64))
    }

    /// The current root.
    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    /// The current root as 64-char lower-case hex.
    pub fn root_hex(&self) -> String {
        fr_to_hex(self.root())
    }

    /// Computes the leaf index, new root, and node updates that inserting
    /// `leaf` would produce, without mutating the tree.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::CapacityExceeded`] when the tree is full.
    /// Returns [`IdentityError::Poseidon`] if hashing fails.
    pub fn preview_insert(&self, leaf: Fr) -> Result<(usize, Fr, NodeUpdates), IdentityError> {
        if self.next_index >= self.capacity() {
            return Err(IdentityError::CapacityExceeded);
        }

        let index = self.next_index;
        let mut updates = Vec::with_capacity(self.depth + 1);
        let mut current_idx = index;
        let mut current_val = leaf;
        updates.push(((0, current_idx), current_val));

        for level in 0..self.depth {
            // The sibling is never on the new leaf's own path, so reading
            // it from the existing node map is safe during a preview.
            let sibling = self.node(level, current_idx ^ 1);
            current_val = if current_idx & 1 == 0 {
                poseidon2(current_val, sibling)?
            } else {
                poseidon2(sibling, current_val)?
            };
            current_idx /= 2;
            updates.push(((level + 1, current_idx), current_val));
        }

        Ok((index, current_val, updates))
    }

    /// Applies a previewed insertion after its transaction committed.
    pub fn apply_updates(&mut self, next_index: usize, updates: NodeUpdates) {
        for ((level, idx), val) in updates {
            self.nodes.insert((level, idx), val);
        }
        self.next_index = next_index;
    }

    /// Inserts a leaf directly (restore and test paths, where there is no
    /// preview/commit split).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::CapacityExceeded`] when the tree is full.
    pub fn insert(&mut self, leaf: Fr) -> Result<usize, IdentityError> {
        let (index, _, updates) = self.preview_insert(leaf)?;
        self.apply_updates(index + 1, updates);
        Ok(index)
    }

    /// Generates the authentication path for the leaf at `index`.
    ///
    /// Returns `(path_elements, path_index_bits)`. `path_index_bits[i]` is
    /// the position of the authenticated node at level i: 0 means it is
    /// the left child (bit 0 is the leaf level). This encoding is
    /// contractually mirrored inside the membership circuit.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotFound`] if `index` has no leaf.
    pub fn get_proof(&self, index: usize) -> Result<(Vec<Fr>, Vec<u8>), IdentityError> {
        if index >= self.next_index {
            return Err(IdentityError::NotFound(format!("leaf index {index}")));
        }

        let mut path_elements = Vec::with_capacity(self.depth);
        let mut path_index_bits = Vec::with_capacity(self.depth);
        let mut current_idx = index;

        for level in 0..self.depth {
            path_elements.push(self.node(level, current_idx ^ 1));
            path_index_bits.push((current_idx & 1) as u8);
            current_idx /= 2;
        }

        Ok((path_elements, path_index_bits))
    }

    /// Writes the leaf and the root swap for a previewed insertion into the
    /// caller's transaction: the new leaf row, retirement of the previous
    /// active root, and the new active root.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Database`] if any statement fails.
    pub fn persist_insert(
        &self,
        conn: &Connection,
        index: usize,
        leaf_hex: &str,
        new_root: Fr,
    ) -> Result<(), IdentityError> {
        conn.execute(
            "INSERT INTO vrp_leaves (leaf_index, commitment_hex) VALUES (?1, ?2)",
            params![index as i64, leaf_hex],
        )?;

        conn.execute("UPDATE vrp_roots SET active = 0 WHERE active = 1", [])?;
        conn.execute(
            "INSERT INTO vrp_roots (root_hex, active) VALUES (?1, 1)
             ON CONFLICT(root_hex) DO UPDATE SET active = 1",
            params![fr_to_hex(new_root)],
        )?;

        Ok(())
    }

    /// Rebuilds the tree from the `vrp_leaves` log.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::RootMismatch`] if the rebuilt root differs
    /// from the stored active root: the leaf log and root log have
    /// diverged and the server must not serve proofs from either.
    pub fn restore(conn: &Connection, depth: usize) -> Result<Self, IdentityError> {
        let mut tree = Self::new(depth);

        let mut stmt =
            conn.prepare("SELECT commitment_hex FROM vrp_leaves ORDER BY leaf_index ASC")?;
        let leaves = stmt.query_map([], |row| row.get::<_, String>(0))?;

        for leaf_hex in leaves {
            let leaf_hex = leaf_hex?;
            let (leaf, _) = parse_field_hex(&leaf_hex).map_err(|_| {
                IdentityError::InvalidInput(format!("corrupt stored leaf '{leaf_hex}'"))
            })?;
            tree.insert(leaf)?;
        }

        let stored: Option<String> = conn
            .query_row("SELECT root_hex FROM vrp_roots WHERE active = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(stored_hex) = stored {
            let computed_hex = tree.root_hex();
            if stored_hex != computed_hex {
                return Err(IdentityError::RootMismatch {
                    computed: computed_hex,
                    stored: stored_hex,
                });
            }
        }

        Ok(tree)
    }

    /// Deterministically recomputes the root from the leaf log without
    /// touching in-memory state. Used by tests and after restore.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Database`] if the leaf log cannot be read.
    pub fn recompute(conn: &Connection, depth: usize) -> Result<String, IdentityError> {
        let mut tree = Self::new(depth);

        let mut stmt =
            conn.prepare("SELECT commitment_hex FROM vrp_leaves ORDER BY leaf_index ASC")?;
        let leaves = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for leaf_hex in leaves {
            let leaf_hex = leaf_hex?;
            let (leaf, _) = parse_field_hex(&leaf_hex).map_err(|_| {
                IdentityError::InvalidInput(format!("corrupt stored leaf '{leaf_hex}'"))
            })?;
            tree.insert(leaf)?;
        }

        Ok(tree.root_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poseidon::poseidon2;

    #[test]
    fn empty_tree_root_is_zero() {
        let tree = MerkleTree::new(5);
        assert_eq!(tree.root(), Fr::from(0u64));
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn insert_assigns_dense_indices_and_moves_root() {
        let mut tree = MerkleTree::new(3);
        let initial_root = tree.root();

        assert_eq!(tree.insert(Fr::from(1u64)).unwrap(), 0);
        assert_ne!(tree.root(), initial_root);
        assert_eq!(tree.insert(Fr::from(2u64)).unwrap(), 1);
        assert_eq!(tree.insert(Fr::from(3u64)).unwrap(), 2);
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn proof_authenticates_against_root() {
        let mut tree = MerkleTree::new(4);
        for i in 1..=5u64 {
            tree.insert(Fr::from(i)).unwrap();
        }

        for index in 0..5usize {
            let (elements, bits) = tree.get_proof(index).unwrap();
            assert_eq!(elements.len(), 4);

            let mut current = Fr::from(index as u64 + 1);
            for (element, bit) in elements.iter().zip(bits.iter()) {
                current = if *bit == 0 {
                    poseidon2(current, *element).unwrap()
                } else {
                    poseidon2(*element, current).unwrap()
                };
            }
            assert_eq!(current, tree.root(), "proof for leaf {index} failed");
        }
    }

    #[test]
    fn first_leaf_path_is_all_left_with_zero_siblings() {
        let mut tree = MerkleTree::new(20);
        tree.insert(Fr::from(42u64)).unwrap();
        let (elements, bits) = tree.get_proof(0).unwrap();
        assert_eq!(bits, vec![0u8; 20]);
        // With a single leaf every sibling is the empty default 0.
        assert_eq!(elements, vec![Fr::from(0u64); 20]);
    }

    #[test]
    fn single_leaf_root_is_iterated_hash_with_zero() {
        let mut tree = MerkleTree::new(20);
        let leaf = Fr::from(42u64);
        tree.insert(leaf).unwrap();

        let mut expected = leaf;
        for _ in 0..20 {
            expected = poseidon2(expected, Fr::from(0u64)).unwrap();
        }
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn preview_does_not_mutate_until_applied() {
        let mut tree = MerkleTree::new(3);
        tree.insert(Fr::from(1u64)).unwrap();
        let root_before = tree.root();

        let (index, new_root, updates) = tree.preview_insert(Fr::from(2u64)).unwrap();
        assert_eq!(index, 1);
        assert_eq!(tree.root(), root_before, "preview must not move the root");
        assert_eq!(tree.leaf_count(), 1);

        tree.apply_updates(index + 1, updates);
        assert_eq!(tree.root(), new_root);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn capacity_exceeded_at_2_pow_depth() {
        let mut tree = MerkleTree::new(1);
        tree.insert(Fr::from(1u64)).unwrap();
        tree.insert(Fr::from(2u64)).unwrap();

        assert!(matches!(
            tree.insert(Fr::from(3u64)),
            Err(IdentityError::CapacityExceeded)
        ));
        assert!(matches!(
            tree.preview_insert(Fr::from(3u64)),
            Err(IdentityError::CapacityExceeded)
        ));
    }

    #[test]
    fn proof_for_absent_leaf_is_not_found() {
        let mut tree = MerkleTree::new(3);
        tree.insert(Fr::from(1u64)).unwrap();

        assert!(tree.get_proof(0).is_ok());
        assert!(matches!(tree.get_proof(1), Err(IdentityError::NotFound(_))));
        assert!(matches!(tree.get_proof(99), Err(IdentityError::NotFound(_))));
    }

    #[test]
    fn path_stable_until_next_append() {
        let mut tree = MerkleTree::new(4);
        tree.insert(Fr::from(1u64)).unwrap();
        let first = tree.get_proof(0).unwrap();
        let again = tree.get_proof(0).unwrap();
        assert_eq!(first, again);

        tree.insert(Fr::from(2u64)).unwrap();
        let after = tree.get_proof(0).unwrap();
        assert_ne!(first.0, after.0, "sibling at the leaf level changed");
    }
}
