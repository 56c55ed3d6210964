//! Isolated lending markets using the vault as collateral
//!
//! Beneficiaries are the `onBehalf` accounts of collateral positions in
//! every market whose collateral token is the vault. The lending contract's
//! vault balance must equal the sum of all tracked collateral.

use super::{
    calls::{self, IMorpho},
    checked_sum, CachedDistribution, Distribution, PositionValuation,
};
use crate::{Error, Result};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use vault_ledger::{
    contracts::{decode_event, erc20_balance_of, IERC20},
    provider::read_batch,
    Address, BlockNumber, ChainDataProvider, ContractCall, EventFilter, RawLog, B256, U256,
};

/// Market id and position owner
pub type PositionKey = (B256, Address);

/// Lending-market valuation over one lending singleton
#[derive(Debug, Clone)]
pub struct LendingMarketService {
    vault: Address,
    morpho: Address,
    /// Every collateral position ever touched, sorted
    keys: Vec<PositionKey>,
    cache: CachedDistribution,
}

impl LendingMarketService {
    /// Service over known position keys, recomputed at `blocks`
    pub fn new(
        vault: Address,
        morpho: Address,
        keys: impl IntoIterator<Item = PositionKey>,
        blocks: impl IntoIterator<Item = BlockNumber>,
    ) -> Self {
        let keys: BTreeSet<PositionKey> = keys.into_iter().collect();
        Self {
            vault,
            morpho,
            keys: keys.into_iter().collect(),
            cache: CachedDistribution::new(morpho, blocks),
        }
    }

    /// Markets and positions from the lending contract's event history
    pub async fn discover(
        provider: &dyn ChainDataProvider,
        vault: Address,
        morpho: Address,
    ) -> Result<Self> {
        let mut markets = BTreeSet::new();
        let created = provider
            .list_events(
                morpho,
                EventFilter::Topic(IMorpho::CreateMarket::SIGNATURE_HASH),
            )
            .await?;
        for log in &created {
            let event: IMorpho::CreateMarket = decode_event(log)?;
            if event.marketParams.collateralToken == vault {
                markets.insert(event.id);
            }
        }

        let mut keys = BTreeSet::new();
        let mut blocks = Vec::new();
        for log in provider.list_events(morpho, EventFilter::Any).await? {
            let Some((market, owner)) = collateral_position(&log)? else {
                continue;
            };
            if !markets.contains(&market) {
                continue;
            }
            keys.insert((market, owner));
            blocks.push(log.block_number);
        }

        tracing::debug!(
            %morpho,
            markets = markets.len(),
            positions = keys.len(),
            "Discovered collateral positions"
        );

        Ok(Self::new(vault, morpho, keys, blocks))
    }

    /// Tracked position keys
    pub fn keys(&self) -> &[PositionKey] {
        &self.keys
    }
}

/// Position whose collateral the log changes, `None` for other events
fn collateral_position(log: &RawLog) -> Result<Option<PositionKey>> {
    let Some(topic) = log.topic0() else {
        return Ok(None);
    };

    let key = if topic == IMorpho::SupplyCollateral::SIGNATURE_HASH {
        let event: IMorpho::SupplyCollateral = decode_event(log)?;
        (event.id, event.onBehalf)
    } else if topic == IMorpho::WithdrawCollateral::SIGNATURE_HASH {
        let event: IMorpho::WithdrawCollateral = decode_event(log)?;
        (event.id, event.onBehalf)
    } else if topic == IMorpho::Liquidate::SIGNATURE_HASH {
        let event: IMorpho::Liquidate = decode_event(log)?;
        (event.id, event.borrower)
    } else {
        return Ok(None);
    };
    Ok(Some(key))
}

#[async_trait]
impl PositionValuation for LendingMarketService {
    fn name(&self) -> &'static str {
        "lending-market"
    }

    fn pool(&self) -> Address {
        self.morpho
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

        let mut batch: Vec<ContractCall> = self
            .keys
            .iter()
            .map(|(market, user)| calls::market_position(self.morpho, *market, *user))
            .collect();
        batch.push(erc20_balance_of(self.vault, self.morpho));
        let outcomes = read_batch(provider, &batch, block).await?;

        let mut collateral = Vec::with_capacity(self.keys.len());
        for (index, (market, user)) in self.keys.iter().enumerate() {
            let position =
                calls::required::<IMorpho::positionCall>(&outcomes[index], &batch[index], block)?;
            collateral.push((*market, *user, U256::from(position.collateral)));
        }
        let last = batch.len() - 1;
        let held = calls::required::<IERC20::balanceOfCall>(&outcomes[last], &batch[last], block)?;

        let tracked = checked_sum(collateral.iter().map(|(_, _, amount)| *amount), || {
            format!("collateral in {} at block {}", self.morpho, block)
        })?;
        if tracked != held {
            return Err(Error::invariant(format!(
                "block {}: tracked collateral {} != vault balance {} of lending contract {}",
                block, tracked, held, self.morpho
            )));
        }

        let mut per_user: BTreeMap<Address, U256> = BTreeMap::new();
        for (_, user, amount) in collateral {
            let entry = per_user.entry(user).or_default();
            // Bounded by `tracked`, which did not overflow
            *entry += amount;
        }

        tracing::debug!(morpho = %self.morpho, block, "Collateral shares recomputed");
        Ok(self.cache.store(block, per_user.into_iter().collect()))
    }
}
