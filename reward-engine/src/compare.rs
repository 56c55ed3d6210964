//! Cross-check a reward file against an independently produced one
//!
//! Both sides are keyed by account. Duplicate rows are reported and the
//! last row wins. Accounts present on one side only are reported and left
//! out of the error totals.

use crate::Result;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use vault_ledger::{Address, RewardRecord, U256};

/// Largest per-account difference, in base units, treated as rounding
pub const DEFAULT_TOLERANCE: u64 = 100;

/// Per-account differences between two reward sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonReport {
    /// Accounts rewarded externally but not locally
    pub missing_local: Vec<Address>,
    /// Accounts rewarded locally but not externally
    pub missing_external: Vec<Address>,
    /// Accounts listed more than once in the local set
    pub duplicates_local: Vec<Address>,
    /// Accounts listed more than once in the external set
    pub duplicates_external: Vec<Address>,
    /// Largest absolute difference over shared accounts
    pub max_error: U256,
    /// Sum of absolute differences over shared accounts
    pub cumulative_error: U256,
    /// Shared accounts whose difference exceeds the tolerance, with that difference
    pub over_tolerance: Vec<(Address, U256)>,
    /// Tolerance used
    pub tolerance: U256,
}

impl ComparisonReport {
    /// No missing accounts, no duplicates and every difference within tolerance
    pub fn is_clean(&self) -> bool {
        self.missing_local.is_empty()
            && self.missing_external.is_empty()
            && self.duplicates_local.is_empty()
            && self.duplicates_external.is_empty()
            && self.over_tolerance.is_empty()
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for account in &self.duplicates_local {
            writeln!(f, "duplicate in local: {}", account)?;
        }
        for account in &self.duplicates_external {
            writeln!(f, "duplicate in external: {}", account)?;
        }
        for account in &self.missing_local {
            writeln!(f, "missing locally: {}", account)?;
        }
        for account in &self.missing_external {
            writeln!(f, "missing externally: {}", account)?;
        }
        for (account, error) in &self.over_tolerance {
            writeln!(f, "{} differs by {} (> {})", account, error, self.tolerance)?;
        }
        writeln!(f, "max error: {}", self.max_error)?;
        write!(f, "cumulative error: {}", self.cumulative_error)
    }
}

fn index(records: &[RewardRecord]) -> (BTreeMap<Address, U256>, Vec<Address>) {
    let mut amounts = BTreeMap::new();
    let mut duplicates = BTreeSet::new();
    for record in records {
        if amounts.insert(record.account, record.amount).is_some() {
            duplicates.insert(record.account);
        }
    }
    (amounts, duplicates.into_iter().collect())
}

/// Compare `local` against `external`
pub fn compare_rewards(
    local: &[RewardRecord],
    external: &[RewardRecord],
    tolerance: U256,
) -> Result<ComparisonReport> {
    let (local, duplicates_local) = index(local);
    let (external, duplicates_external) = index(external);

    let missing_local = external
        .keys()
        .filter(|account| !local.contains_key(*account))
        .copied()
        .collect();
    let missing_external = local
        .keys()
        .filter(|account| !external.contains_key(*account))
        .copied()
        .collect();

    let mut max_error = U256::ZERO;
    let mut cumulative_error = U256::ZERO;
    let mut over_tolerance = Vec::new();
    for (account, ours) in &local {
        let Some(theirs) = external.get(account) else {
            continue;
        };
        let error = if ours >= theirs {
            *ours - *theirs
        } else {
            *theirs - *ours
        };

        max_error = max_error.max(error);
        cumulative_error = cumulative_error.checked_add(error).ok_or_else(|| {
            vault_ledger::Error::Overflow("cumulative comparison error".to_string())
        })?;
        if error > tolerance {
            over_tolerance.push((*account, error));
        }
    }

    Ok(ComparisonReport {
        missing_local,
        missing_external,
        duplicates_local,
        duplicates_external,
        max_error,
        cumulative_error,
        over_tolerance,
        tolerance,
    })
}
