//! Fungible LP token pools
//!
//! Beneficiaries are the LP token holders, weighted by LP balance. The
//! holder set is every sender and receiver of an LP transfer, so a single
//! batched `balanceOf` read per recomputation covers the whole supply.

use super::{checked_sum, CachedDistribution, Distribution, PositionValuation};
use crate::{Error, Result};
use async_trait::async_trait;
use std::{collections::BTreeSet, sync::Arc};
use vault_ledger::{
    types::ZERO_ADDRESS, Address, BlockNumber, ChainDataProvider, EventFilter, TransferEvent,
};

/// Pool-share valuation over one LP token
#[derive(Debug, Clone)]
pub struct PoolShareService {
    pool: Address,
    /// Every LP holder ever seen, sorted
    holders: Vec<Address>,
    cache: CachedDistribution,
}

impl PoolShareService {
    /// Service over known holders, recomputed at `blocks`
    pub fn new(
        pool: Address,
        holders: impl IntoIterator<Item = Address>,
        blocks: impl IntoIterator<Item = BlockNumber>,
    ) -> Self {
        let holders: BTreeSet<Address> = holders.into_iter().collect();
        Self {
            pool,
            holders: holders.into_iter().collect(),
            cache: CachedDistribution::new(pool, blocks),
        }
    }

    /// Holders and recomputation blocks from the pool's own logs
    ///
    /// Any pool log can move value (swaps, syncs), so every log block is a
    /// recomputation point; only `Transfer` logs contribute holders.
    pub async fn discover(provider: &dyn ChainDataProvider, pool: Address) -> Result<Self> {
        let logs = provider.list_events(pool, EventFilter::Any).await?;

        let mut holders = BTreeSet::new();
        for log in logs.iter().filter(|log| log.is_erc20_transfer()) {
            let transfer = TransferEvent::from_log(log)?;
            holders.insert(transfer.from);
            holders.insert(transfer.to);
        }

        tracing::debug!(
            %pool,
            logs = logs.len(),
            holders = holders.len(),
            "Discovered LP holders"
        );

        Ok(Self::new(
            pool,
            holders,
            logs.iter().map(|log| log.block_number),
        ))
    }

    /// Known LP holders
    pub fn holders(&self) -> &[Address] {
        &self.holders
    }
}

#[async_trait]
impl PositionValuation for PoolShareService {
    fn name(&self) -> &'static str {
        "pool-share"
    }

    fn pool(&self) -> Address {
        self.pool
    }

    fn next_block(&self) -> Option<BlockNumber> {
        self.cache.next_block()
    }

    async fn calculate_distributions(
        &mut self,
        provider: &dyn ChainDataProvider,
        block: BlockNumber,
    ) -> Result<Arc<Distribution>> {
        if !self.cache.is_stale_at(block)? {
            return Ok(self.cache.current());
        }

        let (balances, total_supply) = provider
            .token_balances_and_supply(self.pool, &self.holders, block)
            .await?;

        let held = checked_sum(balances.iter().copied(), || {
            format!("LP balances of {} at block {}", self.pool, block)
        })?;
        if held != total_supply {
            return Err(Error::invariant(format!(
                "block {}: pool {} LP balances sum to {} but total supply is {}",
                block, self.pool, held, total_supply
            )));
        }

        // Minimum liquidity locked at the zero address counts toward the
        // supply above, but nobody can claim for it. The vault ledger never
        // credits the zero address either, so this drops no vault balance.
        let shares = self
            .holders
            .iter()
            .copied()
            .zip(balances)
            .filter(|(holder, _)| *holder != ZERO_ADDRESS)
            .collect();

        tracing::debug!(pool = %self.pool, block, "Pool shares recomputed");
        Ok(self.cache.store(block, shares))
    }
}
