//! Merge reward files
//!
//! Several runs (one per vault, or one per reward period) each produce a
//! reward CSV. Aggregation sums them per account before a single
//! commitment is built over the merged amounts.

use crate::{allocator::sort_rewards, output::read_rewards_csv, Result};
use std::{collections::BTreeMap, path::Path};
use vault_ledger::{Address, RewardRecord, U256};

/// Sum rewards per account across batches
///
/// Zero totals are dropped; the result uses the reward ordering.
pub fn aggregate_batches(batches: &[Vec<RewardRecord>]) -> Result<Vec<RewardRecord>> {
    let mut totals: BTreeMap<Address, U256> = BTreeMap::new();
    for record in batches.iter().flatten() {
        let entry = totals.entry(record.account).or_default();
        *entry = entry.checked_add(record.amount).ok_or_else(|| {
            vault_ledger::Error::Overflow(format!("aggregated reward of {}", record.account))
        })?;
    }

    let mut rewards: Vec<RewardRecord> = totals
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(account, amount)| RewardRecord { account, amount })
        .collect();
    sort_rewards(&mut rewards);
    Ok(rewards)
}

/// Read and merge reward CSVs
pub fn aggregate_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RewardRecord>> {
    let batches = paths
        .iter()
        .map(|path| read_rewards_csv(path))
        .collect::<Result<Vec<_>>>()?;

    let rewards = aggregate_batches(&batches)?;
    tracing::info!(
        files = paths.len(),
        accounts = rewards.len(),
        "Reward files aggregated"
    );
    Ok(rewards)
}
