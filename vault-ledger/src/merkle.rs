//! Merkle commitment for reward claims
//!
//! Builds the tree an on-chain distributor verifies claims against.
//!
//! # Design
//!
//! - Leaves are `keccak256(keccak256(abi.encode(account, token, amount)))`;
//!   the double hash keeps a leaf from ever being read as an inner node
//! - Leaves are sorted ascending before placement, so the root does not
//!   depend on input order
//! - Inner nodes hash `min(left, right) ++ max(left, right)`, so a proof is
//!   a plain list of siblings with no direction bits
//! - The tree is an array of `2n - 1` nodes: node `v` has children
//!   `2v + 1` and `2v + 2`, the sorted leaves fill the tail in reverse

use crate::{
    types::{keccak256, Address, B256, U256},
    Error, Result,
};
use alloy_sol_types::SolValue;

/// Commitment to one `(account, reward_token, amount)` claim
pub fn leaf_hash(account: Address, reward_token: Address, amount: U256) -> B256 {
    keccak256(keccak256((account, reward_token, amount).abi_encode()))
}

/// Hash two nodes in canonical order
pub fn hash_pair(a: B256, b: B256) -> B256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    keccak256((low, high).abi_encode())
}

/// Fold a leaf through its proof
pub fn compute_root(leaf: B256, proof: &[B256]) -> B256 {
    proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling))
}

/// Check one claim against a root
pub fn verify(
    root: B256,
    account: Address,
    reward_token: Address,
    amount: U256,
    proof: &[B256],
) -> bool {
    compute_root(leaf_hash(account, reward_token, amount), proof) == root
}

/// Array-backed tree over sorted leaf hashes
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `2n - 1` nodes, root at index 0
    nodes: Vec<B256>,

    /// Leaf hashes in ascending order
    sorted_leaves: Vec<B256>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes in any order
    pub fn from_leaf_hashes(mut leaves: Vec<B256>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::DegenerateInput(
                "cannot commit to an empty leaf set".to_string(),
            ));
        }

        leaves.sort_unstable();
        if let Some(pair) = leaves.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::InvariantViolation(format!(
                "duplicate merkle leaf {}",
                pair[0]
            )));
        }

        let n = leaves.len();
        if n == 1 {
            return Ok(Self {
                nodes: vec![leaves[0]],
                sorted_leaves: leaves,
            });
        }

        let size = 2 * n - 1;
        let mut nodes = vec![B256::ZERO; size];
        for (i, leaf) in leaves.iter().enumerate() {
            nodes[size - 1 - i] = *leaf;
        }
        for v in (0..size - n).rev() {
            nodes[v] = hash_pair(nodes[2 * v + 1], nodes[2 * v + 2]);
        }

        Ok(Self {
            nodes,
            sorted_leaves: leaves,
        })
    }

    /// Root hash
    pub fn root(&self) -> B256 {
        self.nodes[0]
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.sorted_leaves.len()
    }

    /// Always false, empty trees cannot be built
    pub fn is_empty(&self) -> bool {
        self.sorted_leaves.is_empty()
    }

    /// Sibling path from a leaf to the root
    pub fn proof(&self, leaf: B256) -> Option<Vec<B256>> {
        let position = self.sorted_leaves.binary_search(&leaf).ok()?;
        let mut index = self.nodes.len() - 1 - position;
        let mut proof = Vec::new();

        while index > 0 {
            let sibling = if index % 2 == 0 { index - 1 } else { index + 1 };
            proof.push(self.nodes[sibling]);
            index = (index - 1) >> 1;
        }

        Some(proof)
    }
}

/// One committed claim with its proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedClaim {
    /// Beneficiary
    pub account: Address,
    /// Claimable amount
    pub amount: U256,
    /// Sibling hashes from leaf to root
    pub proof: Vec<B256>,
}

/// Root plus a proof for every account, for one reward token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleCommitment {
    /// Tree root
    pub root: B256,
    /// Token the claims are paid in
    pub reward_token: Address,
    /// Claims in input order
    pub claims: Vec<CommittedClaim>,
}

impl MerkleCommitment {
    /// Build the commitment for parallel `accounts` / `amounts`
    pub fn build(accounts: &[Address], amounts: &[U256], reward_token: Address) -> Result<Self> {
        if accounts.len() != amounts.len() {
            return Err(Error::DegenerateInput(format!(
                "{} accounts but {} amounts",
                accounts.len(),
                amounts.len()
            )));
        }

        let leaves: Vec<B256> = accounts
            .iter()
            .zip(amounts)
            .map(|(account, amount)| leaf_hash(*account, reward_token, *amount))
            .collect();
        let tree = MerkleTree::from_leaf_hashes(leaves.clone())?;

        let mut claims = Vec::with_capacity(leaves.len());
        for ((account, amount), leaf) in accounts.iter().zip(amounts).zip(&leaves) {
            let proof = tree.proof(*leaf).ok_or_else(|| {
                Error::InvariantViolation(format!("leaf of {} missing from tree", account))
            })?;
            claims.push(CommittedClaim {
                account: *account,
                amount: *amount,
                proof,
            });
        }

        tracing::info!(root = %tree.root(), leaves = tree.len(), "Merkle commitment built");

        Ok(Self {
            root: tree.root(),
            reward_token,
            claims,
        })
    }

    /// Check every claim against the root
    pub fn verify_all(&self) -> bool {
        self.claims.iter().all(|claim| {
            verify(
                self.root,
                claim.account,
                self.reward_token,
                claim.amount,
                &claim.proof,
            )
        })
    }
}
