//! Vault Ledger
//!
//! Event-sourced vault share balances, the chain data boundary and the
//! Merkle commitment used to publish reward claims.
//!
//! # Architecture
//!
//! - **Event Sourcing**: Holder balances are derived only from `Transfer` events
//! - **Reconciliation**: Replayed state is checked against on-chain reads
//! - **Merkle Tree**: Sorted, double-hashed leaves with canonical pair ordering
//! - **Provider Boundary**: All chain access goes through one async trait

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod contracts;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod provider;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

// Re-exports
pub use error::{Error, Result};
pub use ledger::{BalanceLedger, LedgerSnapshot};
pub use merkle::MerkleCommitment;
pub use metrics::Metrics;
pub use provider::{ChainDataProvider, EventFilter};
pub use types::{
    Address, BlockNumber, Bytes, CallOutcome, ContractCall, RawLog, RewardRecord, TransferEvent,
    B256, U256,
};
