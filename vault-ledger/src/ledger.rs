//! Event-sourced vault balance ledger
//!
//! Replays ordered vault `Transfer` events into per-holder balances and
//! checks the replayed state against the chain at reconciliation blocks.
//!
//! # Invariants
//!
//! - Deterministic replay: same events, same balances, same holder order
//! - Resumable: advancing to `B` then to `B'` equals advancing to `B'`
//! - Conservation: at every reconciliation block each holder matches its
//!   on-chain balance and the sum of balances equals total supply
//!
//! # Example
//!
//! ```
//! use vault_ledger::{ledger::replay, Address, TransferEvent, U256};
//!
//! let alice = Address::repeat_byte(1);
//! let events = vec![TransferEvent {
//!     from: Address::ZERO,
//!     to: alice,
//!     amount: U256::from(100),
//!     block: 5,
//! }];
//!
//! let snapshot = replay(&events, 10).unwrap();
//! assert_eq!(snapshot.balance_of(alice), U256::from(100));
//! ```

use crate::{
    provider::ChainDataProvider,
    types::{Address, BlockNumber, TransferEvent, U256, ZERO_ADDRESS},
    Error, Result,
};
use std::collections::HashMap;

/// Per-holder vault balances derived from transfer events
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    /// Events ordered by block
    events: Vec<TransferEvent>,

    /// Index of the next event to apply
    cursor: usize,

    /// Highest block the ledger has been advanced to
    advanced_to: Option<BlockNumber>,

    /// Holders in first-seen order (never evicted)
    holders: Vec<Address>,

    /// Current balances
    balances: HashMap<Address, U256>,
}

impl BalanceLedger {
    /// Create a ledger over events sorted ascending by block
    pub fn new(events: Vec<TransferEvent>) -> Result<Self> {
        if let Some(pair) = events.windows(2).find(|pair| pair[0].block > pair[1].block) {
            return Err(Error::DegenerateInput(format!(
                "transfer events out of order: block {} after block {}",
                pair[1].block, pair[0].block
            )));
        }

        Ok(Self {
            events,
            cursor: 0,
            advanced_to: None,
            holders: Vec::new(),
            balances: HashMap::new(),
        })
    }

    /// Block of the first event, if any
    pub fn first_block(&self) -> Option<BlockNumber> {
        self.events.first().map(|event| event.block)
    }

    /// Highest block the ledger has been advanced to
    pub fn advanced_to(&self) -> Option<BlockNumber> {
        self.advanced_to
    }

    /// Number of events not yet applied
    pub fn pending_events(&self) -> usize {
        self.events.len() - self.cursor
    }

    /// Block of the next event not yet applied
    pub fn next_event_block(&self) -> Option<BlockNumber> {
        self.events.get(self.cursor).map(|event| event.block)
    }

    /// Apply every event up to and including `block`
    ///
    /// Returns the number of events applied by this call.
    pub fn advance_to(&mut self, block: BlockNumber) -> Result<usize> {
        if let Some(current) = self.advanced_to {
            if block < current {
                return Err(Error::DegenerateInput(format!(
                    "ledger cannot rewind from block {} to block {}",
                    current, block
                )));
            }
        }

        let mut applied = 0;
        while let Some(event) = self.events.get(self.cursor).copied() {
            if event.block > block {
                break;
            }
            self.apply(&event)?;
            self.cursor += 1;
            applied += 1;
        }

        self.advanced_to = Some(block);
        Ok(applied)
    }

    fn apply(&mut self, event: &TransferEvent) -> Result<()> {
        if event.from != ZERO_ADDRESS {
            let balance = self.balance_of(event.from);
            let updated = balance.checked_sub(event.amount).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "holder {} spends {} at block {} with balance {}",
                    event.from, event.amount, event.block, balance
                ))
            })?;
            *self.entry(event.from) = updated;
        }

        if event.to != ZERO_ADDRESS {
            let updated = self
                .balance_of(event.to)
                .checked_add(event.amount)
                .ok_or_else(|| {
                    Error::Overflow(format!("balance of {} at block {}", event.to, event.block))
                })?;
            *self.entry(event.to) = updated;
        }

        Ok(())
    }

    fn entry(&mut self, holder: Address) -> &mut U256 {
        if !self.balances.contains_key(&holder) {
            self.holders.push(holder);
        }
        self.balances.entry(holder).or_default()
    }

    /// Current balance of a holder
    pub fn balance_of(&self, holder: Address) -> U256 {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    /// Every holder ever seen, in first-seen order
    pub fn holders(&self) -> &[Address] {
        &self.holders
    }

    /// `(holder, balance)` in first-seen order, zero balances included
    pub fn balances(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.holders
            .iter()
            .map(move |holder| (*holder, self.balance_of(*holder)))
    }

    /// Sum of all balances
    pub fn total(&self) -> Result<U256> {
        self.balances().try_fold(U256::ZERO, |acc, (holder, balance)| {
            acc.checked_add(balance)
                .ok_or_else(|| Error::Overflow(format!("ledger total at holder {}", holder)))
        })
    }

    /// Freeze the current state
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            block: self.advanced_to,
            balances: self.balances().collect(),
        }
    }

    /// Compare the replayed state against the chain at `block`
    ///
    /// Any difference means the event feed has a gap and the run must stop.
    pub async fn reconcile(
        &self,
        provider: &dyn ChainDataProvider,
        token: Address,
        block: BlockNumber,
    ) -> Result<()> {
        if self.advanced_to != Some(block) {
            return Err(Error::DegenerateInput(format!(
                "reconciliation at block {} but ledger is at {:?}",
                block, self.advanced_to
            )));
        }

        let (onchain, total_supply) = provider
            .token_balances_and_supply(token, &self.holders, block)
            .await?;

        let onchain_total = onchain.iter().try_fold(U256::ZERO, |acc, balance| {
            acc.checked_add(*balance)
                .ok_or_else(|| Error::Overflow(format!("on-chain total at block {}", block)))
        })?;
        if onchain_total != total_supply {
            return Err(Error::InvariantViolation(format!(
                "block {}: total supply {} != sum of on-chain balances {}",
                block, total_supply, onchain_total
            )));
        }

        for (holder, actual) in self.holders.iter().zip(&onchain) {
            let expected = self.balance_of(*holder);
            if expected != *actual {
                return Err(Error::InvariantViolation(format!(
                    "block {}: holder {} replayed balance {} != on-chain balance {}",
                    block, holder, expected, actual
                )));
            }
        }

        let replayed_total = self.total()?;
        if replayed_total != total_supply {
            return Err(Error::InvariantViolation(format!(
                "block {}: replayed total {} != total supply {}",
                block, replayed_total, total_supply
            )));
        }

        tracing::debug!(block, holders = self.holders.len(), "Ledger reconciled");
        Ok(())
    }
}

/// Balances at one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Block the snapshot reflects
    pub block: Option<BlockNumber>,

    /// `(holder, balance)` in first-seen order
    pub balances: Vec<(Address, U256)>,
}

impl LedgerSnapshot {
    /// Balance of one holder
    pub fn balance_of(&self, holder: Address) -> U256 {
        self.balances
            .iter()
            .find(|(candidate, _)| *candidate == holder)
            .map(|(_, balance)| *balance)
            .unwrap_or_default()
    }
}

/// Replay `events` up to and including `upto`
pub fn replay(events: &[TransferEvent], upto: BlockNumber) -> Result<LedgerSnapshot> {
    let mut ledger = BalanceLedger::new(events.to_vec())?;
    ledger.advance_to(upto)?;
    Ok(ledger.snapshot())
}
