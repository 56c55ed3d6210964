//! Position valuation services
//!
//! A position valuation service maps one contract that holds vault shares
//! (a pool) to the accounts that own the pool, with a share weight each.
//! The allocator only depends on [`PositionValuation`]; the three variants
//! differ in where the weights come from:
//!
//! - [`PoolShareService`]: fungible LP token balances
//! - [`ConcentratedLiquidityService`]: per-NFT `fees + principal` in the vault token
//! - [`LendingMarketService`]: collateral supplied to isolated lending markets
//!
//! # Caching
//!
//! Every service walks a [`BlockCursor`] over the blocks at which its own
//! protocol emitted events. A query recomputes only when the cursor passed
//! at least one such block; otherwise the previous [`Distribution`] is
//! returned without touching the provider. Queries must never go back in
//! time.

pub mod calls;
pub mod concentrated;
pub mod lending;
pub mod pool_share;

pub use concentrated::ConcentratedLiquidityService;
pub use lending::LendingMarketService;
pub use pool_share::PoolShareService;

use crate::{config::ServiceConfig, Error, Result};
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use vault_ledger::{Address, BlockNumber, ChainDataProvider, U256};

/// Attribution of a pool's holdings to its beneficiaries at one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Pool identity, the address that holds vault shares
    pub pool: Address,

    /// `(beneficiary, share)` with strictly positive shares
    pub shares: Vec<(Address, U256)>,

    /// Block of the last recomputation, `None` before the first one
    pub as_of: Option<BlockNumber>,

    /// Number of recomputations so far
    pub revision: u64,
}

impl Distribution {
    /// Distribution with no beneficiaries
    pub fn empty(pool: Address) -> Self {
        Self {
            pool,
            shares: Vec::new(),
            as_of: None,
            revision: 0,
        }
    }

    /// Sum of all shares
    pub fn total_shares(&self) -> Result<U256> {
        checked_sum(self.shares.iter().map(|(_, share)| *share), || {
            format!("shares of pool {}", self.pool)
        })
    }

    /// Whether nobody holds a share
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// Strictly increasing walk over a service's event blocks
#[derive(Debug, Clone, Default)]
pub struct BlockCursor {
    blocks: Vec<BlockNumber>,
    next: usize,
    last_query: Option<BlockNumber>,
}

impl BlockCursor {
    /// Cursor over `blocks` in any order, duplicates removed
    pub fn new(blocks: impl IntoIterator<Item = BlockNumber>) -> Self {
        let mut blocks: Vec<BlockNumber> = blocks.into_iter().collect();
        blocks.sort_unstable();
        blocks.dedup();
        Self {
            blocks,
            next: 0,
            last_query: None,
        }
    }

    /// Consume every block up to and including `block`
    ///
    /// Returns whether at least one block was consumed, i.e. whether the
    /// caller's cached result is stale.
    pub fn advance(&mut self, block: BlockNumber) -> Result<bool> {
        if let Some(last) = self.last_query {
            if block < last {
                return Err(Error::degenerate(format!(
                    "query for block {} after block {}",
                    block, last
                )));
            }
        }
        self.last_query = Some(block);

        let start = self.next;
        while self.blocks.get(self.next).is_some_and(|b| *b <= block) {
            self.next += 1;
        }
        Ok(self.next > start)
    }

    /// Next block that will invalidate the cache
    pub fn next_block(&self) -> Option<BlockNumber> {
        self.blocks.get(self.next).copied()
    }

    /// Blocks not consumed yet
    pub fn remaining(&self) -> usize {
        self.blocks.len() - self.next
    }
}

/// Cursor plus the distribution it last produced
#[derive(Debug, Clone)]
pub struct CachedDistribution {
    cursor: BlockCursor,
    current: Arc<Distribution>,
}

impl CachedDistribution {
    /// Empty cache for `pool` invalidated at `blocks`
    pub fn new(pool: Address, blocks: impl IntoIterator<Item = BlockNumber>) -> Self {
        Self {
            cursor: BlockCursor::new(blocks),
            current: Arc::new(Distribution::empty(pool)),
        }
    }

    /// Whether a query at `block` needs a recomputation
    pub fn is_stale_at(&mut self, block: BlockNumber) -> Result<bool> {
        self.cursor.advance(block)
    }

    /// Replace the cached distribution, dropping zero shares
    pub fn store(&mut self, block: BlockNumber, shares: Vec<(Address, U256)>) -> Arc<Distribution> {
        self.current = Arc::new(Distribution {
            pool: self.current.pool,
            shares: shares.into_iter().filter(|(_, share)| !share.is_zero()).collect(),
            as_of: Some(block),
            revision: self.current.revision + 1,
        });
        self.current.clone()
    }

    /// Last computed distribution
    pub fn current(&self) -> Arc<Distribution> {
        self.current.clone()
    }

    /// Next block that will invalidate the cache
    pub fn next_block(&self) -> Option<BlockNumber> {
        self.cursor.next_block()
    }
}

/// Common contract of all position valuation services
#[async_trait]
pub trait PositionValuation: Send + Sync + fmt::Debug {
    /// Short service name for logs
    fn name(&self) -> &'static str;

    /// Address that holds vault shares on behalf of the beneficiaries
    fn pool(&self) -> Address;

    /// Next block at which a query would recompute
    fn next_block(&self) -> Option<BlockNumber>;

    /// Current `(beneficiary, share)` attribution at `block`
    ///
    /// Blocks must be queried in non-decreasing order. A query that does
    /// not pass a new event block returns the cached distribution and
    /// issues no provider calls.
    async fn calculate_distributions(
        &mut self,
        provider: &dyn ChainDataProvider,
        block: BlockNumber,
    ) -> Result<Arc<Distribution>>;
}

/// Build the service described by `config` from the protocol's event history
///
/// `at_block` pins the reads of immutable pool parameters.
pub async fn discover(
    provider: &dyn ChainDataProvider,
    vault: Address,
    config: &ServiceConfig,
    at_block: BlockNumber,
) -> Result<Box<dyn PositionValuation>> {
    let service: Box<dyn PositionValuation> = match config {
        ServiceConfig::PoolShare { pool } => {
            Box::new(PoolShareService::discover(provider, *pool).await?)
        }
        ServiceConfig::ConcentratedLiquidity {
            pool,
            gauge,
            position_manager,
            sugar,
        } => Box::new(
            ConcentratedLiquidityService::discover(
                provider,
                concentrated::Contracts {
                    vault,
                    pool: *pool,
                    gauge: *gauge,
                    position_manager: *position_manager,
                    sugar: *sugar,
                },
                at_block,
            )
            .await?,
        ),
        ServiceConfig::LendingMarket { morpho } => {
            Box::new(LendingMarketService::discover(provider, vault, *morpho).await?)
        }
    };

    tracing::info!(
        service = service.name(),
        pool = %service.pool(),
        "Position service ready"
    );
    Ok(service)
}

/// Overflow-checked sum
pub(crate) fn checked_sum(
    values: impl IntoIterator<Item = U256>,
    context: impl FnOnce() -> String,
) -> Result<U256> {
    let mut total = U256::ZERO;
    for value in values {
        match total.checked_add(value) {
            Some(sum) => total = sum,
            None => return Err(vault_ledger::Error::Overflow(context()).into()),
        }
    }
    Ok(total)
}
