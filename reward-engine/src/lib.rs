//! Reward Engine
//!
//! Computes time-weighted vault rewards and commits them to a Merkle root.
//!
//! # Architecture
//!
//! A run covers one vault over an inclusive block window:
//!
//! 1. **Collection**: Replay vault `Transfer` events into the balance ledger
//! 2. **Discovery**: Build a position service for every configured pool
//! 3. **Allocation**: Integrate resolved balances over blocks and split the
//!    reward proportionally
//! 4. **Commitment**: Build the Merkle tree and write the reward files
//!
//! Pools (LP tokens, concentrated-liquidity NFTs, lending markets) hold
//! vault shares on behalf of their users; their balance is passed through
//! to those users before integration.
//!
//! # Example
//!
//! ```no_run
//! use reward_engine::{Config, RewardEngine};
//! use std::sync::Arc;
//! use vault_ledger::ChainDataProvider;
//!
//! async fn run(provider: Arc<dyn ChainDataProvider>) -> reward_engine::Result<()> {
//!     let config = Config::from_file("rewards.toml")?;
//!     let engine = RewardEngine::new(provider, config)?;
//!
//!     let summary = engine.run().await?;
//!     println!("Committed {} rewards under {}", summary.accounts, summary.root);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod aggregate;
pub mod allocator;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod positions;

// Re-exports
pub use allocator::{CumulativeBalances, RewardAllocator, RewardWindow};
pub use compare::{compare_rewards, ComparisonReport};
pub use config::{Config, ServiceConfig};
pub use engine::{RewardEngine, RunSummary};
pub use error::{Error, Result};
pub use output::CommitmentArtifact;
pub use positions::{Distribution, PositionValuation};
