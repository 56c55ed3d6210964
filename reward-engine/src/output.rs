//! Reward files
//!
//! Two payloads leave a run:
//!
//! - the reward CSV, one `user,reward` row per account, amounts in base
//!   units as decimal strings
//! - the commitment artifact JSON, the Merkle root plus one entry per
//!   account carrying everything a claim transaction needs
//!
//! Hashes are `0x`-prefixed 32-byte hex strings. Amounts are decimal
//! strings so no JSON number ever has to hold a 256-bit value.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use vault_ledger::{
    merkle::{CommittedClaim, MerkleCommitment},
    Address, RewardRecord, B256, U256,
};

#[derive(Debug, Serialize, Deserialize)]
struct RewardRow {
    user: Address,
    reward: String,
}

/// Write rewards as `user,reward` CSV, creating parent directories
pub fn write_rewards_csv(path: impl AsRef<Path>, rewards: &[RewardRecord]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for record in rewards {
        writer.serialize(RewardRow {
            user: record.account,
            reward: record.amount.to_string(),
        })?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), rows = rewards.len(), "Reward file written");
    Ok(())
}

/// Read a `user,reward` CSV in file order, duplicates kept
pub fn read_rewards_csv(path: impl AsRef<Path>) -> Result<Vec<RewardRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut rewards = Vec::new();
    for row in reader.deserialize() {
        let row: RewardRow = row?;
        rewards.push(RewardRecord {
            account: row.user,
            amount: parse_amount(&row.reward)?,
        });
    }
    Ok(rewards)
}

/// Parse a decimal base-unit amount
pub fn parse_amount(value: &str) -> Result<U256> {
    U256::from_str_radix(value.trim(), 10)
        .map_err(|e| Error::Serialization(format!("invalid amount {:?}: {}", value, e)))
}

mod decimal {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use vault_ledger::U256;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = String::deserialize(deserializer)?;
        U256::from_str_radix(&value, 10).map_err(D::Error::custom)
    }
}

/// One claim in the commitment artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Claiming account
    pub address: Address,
    /// Reward token
    pub reward: Address,
    /// Claimable amount in base units
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Sibling hashes from leaf to root
    pub proof: Vec<B256>,
}

/// Merkle root plus every claim, as published for claimers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentArtifact {
    /// Merkle root
    pub root: B256,
    /// Claims in commitment order
    pub data: Vec<ArtifactEntry>,
}

impl CommitmentArtifact {
    /// Artifact for a built commitment
    pub fn from_commitment(commitment: &MerkleCommitment) -> Self {
        Self {
            root: commitment.root,
            data: commitment
                .claims
                .iter()
                .map(|claim| ArtifactEntry {
                    address: claim.account,
                    reward: commitment.reward_token,
                    amount: claim.amount,
                    proof: claim.proof.clone(),
                })
                .collect(),
        }
    }

    /// Commitment described by the artifact; all entries must share one reward token
    pub fn to_commitment(&self) -> Result<MerkleCommitment> {
        let reward_token = self.data.first().map(|entry| entry.reward).ok_or_else(|| {
            Error::degenerate("commitment artifact has no entries")
        })?;
        if let Some(entry) = self.data.iter().find(|entry| entry.reward != reward_token) {
            return Err(Error::Serialization(format!(
                "entry for {} pays {} but the artifact pays {}",
                entry.address, entry.reward, reward_token
            )));
        }

        Ok(MerkleCommitment {
            root: self.root,
            reward_token,
            claims: self
                .data
                .iter()
                .map(|entry| CommittedClaim {
                    account: entry.address,
                    amount: entry.amount,
                    proof: entry.proof.clone(),
                })
                .collect(),
        })
    }

    /// Accounts whose proof does not reproduce the root
    pub fn invalid_claims(&self) -> Vec<Address> {
        self.data
            .iter()
            .filter(|entry| {
                !vault_ledger::merkle::verify(
                    self.root,
                    entry.address,
                    entry.reward,
                    entry.amount,
                    &entry.proof,
                )
            })
            .map(|entry| entry.address)
            .collect()
    }

    /// Write as pretty JSON, creating parent directories
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;

        tracing::info!(path = %path.display(), root = %self.root, "Commitment artifact written");
        Ok(())
    }

    /// Read from JSON
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
