//! Concentrated-liquidity pools with NFT positions
//!
//! Each position NFT of the pool is worth `fees + principal` in the vault
//! token at the current pool price. Ownership is tracked from the position
//! manager's ERC-721 `Transfer` history and cross-checked with `ownerOf`
//! at every recomputation.
//!
//! Staking moves the NFT into the pool's gauge. A staked position is
//! attributed to the account whose stake record lists it, and to the
//! depositor when no stake record does.

use super::{
    calls::{self, ICLGauge, ICLPool, INonfungiblePositionManager, ISugarHelper, PoolKey},
    CachedDistribution, Distribution, PositionValuation,
};
use crate::{Error, Result};
use alloy_primitives::aliases::U160;
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use vault_ledger::{
    contracts::{decode_event, erc721_owner_of, IERC721},
    provider::read_batch,
    types::{TRANSFER_TOPIC, ZERO_ADDRESS},
    Address, BlockNumber, ChainDataProvider, ContractCall, EventFilter, U256,
};

/// Contracts a concentrated-liquidity service reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contracts {
    /// Vault token, one side of the pool
    pub vault: Address,
    /// Pool
    pub pool: Address,
    /// Staking gauge of the pool
    pub gauge: Address,
    /// NFT position manager
    pub position_manager: Address,
    /// Position math helper
    pub sugar: Address,
}

/// One ERC-721 transfer of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTransfer {
    /// Block of the transfer
    pub block: BlockNumber,
    /// Previous owner, zero on mint
    pub from: Address,
    /// New owner, zero on burn
    pub to: Address,
}

#[derive(Debug, Clone)]
struct Position {
    token_id: U256,
    minted_at: BlockNumber,
    burnt_at: Option<BlockNumber>,
    transfers: Vec<OwnershipTransfer>,
    applied: usize,
    /// Owner of record; the depositor while staked
    owner: Address,
    staked: bool,
}

impl Position {
    fn from_history(token_id: U256, transfers: Vec<OwnershipTransfer>) -> Option<Self> {
        let minted_at = transfers.iter().find(|t| t.from == ZERO_ADDRESS)?.block;
        let burnt_at = transfers
            .iter()
            .find(|t| t.to == ZERO_ADDRESS)
            .map(|t| t.block);
        Some(Self {
            token_id,
            minted_at,
            burnt_at,
            transfers,
            applied: 0,
            owner: ZERO_ADDRESS,
            staked: false,
        })
    }

    fn apply_transfers(&mut self, gauge: Address, block: BlockNumber) {
        while let Some(transfer) = self.transfers.get(self.applied) {
            if transfer.block > block {
                break;
            }
            if transfer.to == gauge {
                self.staked = true;
                self.owner = transfer.from;
            } else {
                self.staked = false;
                self.owner = transfer.to;
            }
            self.applied += 1;
        }
    }
}

/// Active position as seen at one block
#[derive(Debug, Clone, Copy)]
struct Holding {
    token_id: U256,
    owner: Address,
    staked: bool,
}

/// Concentrated-liquidity valuation over the NFT positions of one pool
#[derive(Debug, Clone)]
pub struct ConcentratedLiquidityService {
    contracts: Contracts,
    /// 0 when the vault is `token0`, 1 when it is `token1`
    token_index: usize,
    positions: BTreeMap<U256, Position>,
    /// Everyone who ever held one of the positions, excluding the gauge
    accounts: Vec<Address>,
    cache: CachedDistribution,
}

impl ConcentratedLiquidityService {
    /// Service over positions already known to belong to the pool
    ///
    /// `histories` holds each position's full transfer list, mint first.
    /// Positions without a mint transfer are ignored.
    pub fn new(
        contracts: Contracts,
        token_index: usize,
        histories: BTreeMap<U256, Vec<OwnershipTransfer>>,
        pool_blocks: impl IntoIterator<Item = BlockNumber>,
    ) -> Self {
        let mut accounts = BTreeSet::new();
        let mut blocks: Vec<BlockNumber> = pool_blocks.into_iter().collect();
        let mut positions = BTreeMap::new();

        for (token_id, transfers) in histories {
            for transfer in &transfers {
                blocks.push(transfer.block);
                for account in [transfer.from, transfer.to] {
                    if account != ZERO_ADDRESS && account != contracts.gauge {
                        accounts.insert(account);
                    }
                }
            }
            match Position::from_history(token_id, transfers) {
                Some(position) => {
                    positions.insert(token_id, position);
                }
                None => tracing::warn!(%token_id, "Position has no mint transfer, ignored"),
            }
        }

        Self {
            contracts,
            token_index,
            positions,
            accounts: accounts.into_iter().collect(),
            cache: CachedDistribution::new(contracts.pool, blocks),
        }
    }

    /// Positions of the pool and recomputation blocks from on-chain history
    ///
    /// Pool immutables are read at `at_block`; each position's pool
    /// membership is read at its mint block.
    pub async fn discover(
        provider: &dyn ChainDataProvider,
        contracts: Contracts,
        at_block: BlockNumber,
    ) -> Result<Self> {
        let pool_calls = [
            calls::token0(contracts.pool),
            calls::token1(contracts.pool),
            calls::tick_spacing(contracts.pool),
        ];
        let outcomes = read_batch(provider, &pool_calls, at_block).await?;
        let token0 = calls::required::<ICLPool::token0Call>(&outcomes[0], &pool_calls[0], at_block)?;
        let token1 = calls::required::<ICLPool::token1Call>(&outcomes[1], &pool_calls[1], at_block)?;
        let tick_spacing =
            calls::required::<ICLPool::tickSpacingCall>(&outcomes[2], &pool_calls[2], at_block)?;
        let pool_key = PoolKey {
            token0,
            token1,
            tick_spacing,
        };

        let token_index = if contracts.vault == token0 {
            0
        } else if contracts.vault == token1 {
            1
        } else {
            return Err(Error::Config(format!(
                "pool {} does not trade vault {}",
                contracts.pool, contracts.vault
            )));
        };

        let mut histories: BTreeMap<U256, Vec<OwnershipTransfer>> = BTreeMap::new();
        let nft_logs = provider
            .list_events(contracts.position_manager, EventFilter::Topic(TRANSFER_TOPIC))
            .await?;
        for log in nft_logs.iter().filter(|log| log.is_erc721_transfer()) {
            let transfer: IERC721::Transfer = decode_event(log)?;
            histories
                .entry(transfer.tokenId)
                .or_default()
                .push(OwnershipTransfer {
                    block: log.block_number,
                    from: transfer.from,
                    to: transfer.to,
                });
        }

        let mut by_mint_block: BTreeMap<BlockNumber, Vec<U256>> = BTreeMap::new();
        for (token_id, transfers) in &histories {
            if let Some(mint) = transfers.iter().find(|t| t.from == ZERO_ADDRESS) {
                by_mint_block.entry(mint.block).or_default().push(*token_id);
            }
        }

        let mut members = BTreeSet::new();
        for (block, token_ids) in by_mint_block {
            let position_calls: Vec<ContractCall> = token_ids
                .iter()
                .map(|token_id| calls::positions(contracts.position_manager, *token_id))
                .collect();
            let outcomes = read_batch(provider, &position_calls, block).await?;
            for (token_id, outcome) in token_ids.into_iter().zip(&outcomes) {
                match calls::optional::<INonfungiblePositionManager::positionsCall>(outcome)? {
                    Some(position) => {
                        if PoolKey::from_position(&position) == pool_key {
                            members.insert(token_id);
                        }
                    }
                    None => tracing::debug!(
                        %token_id,
                        block,
                        "Position data unavailable, not counted for the pool"
                    ),
                }
            }
        }
        histories.retain(|token_id, _| members.contains(token_id));

        let pool_logs = provider.list_events(contracts.pool, EventFilter::Any).await?;

        tracing::debug!(
            pool = %contracts.pool,
            positions = histories.len(),
            pool_logs = pool_logs.len(),
            "Discovered concentrated-liquidity positions"
        );

        Ok(Self::new(
            contracts,
            token_index,
            histories,
            pool_logs.iter().map(|log| log.block_number),
        ))
    }

    /// Number of positions not burnt yet
    pub fn tracked_positions(&self) -> usize {
        self.positions.len()
    }

    async fn sqrt_price(&self, provider: &dyn ChainDataProvider, block: BlockNumber) -> Result<U160> {
        let call = [calls::slot0(self.contracts.pool)];
        let outcomes = read_batch(provider, &call, block).await?;
        let slot0 = calls::required::<ICLPool::slot0Call>(&outcomes[0], &call[0], block)?;
        Ok(slot0.sqrtPriceX96)
    }
}

#[async_trait]
impl PositionValuation for ConcentratedLiquidityService {
    fn name(&self) -> &'static str {
        "concentrated-liquidity"
    }

    fn pool(&self) -> Address {
        self.contracts.pool
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

        let gauge = self.contracts.gauge;
        self.positions
            .retain(|_, position| position.burnt_at.map_or(true, |burnt| burnt > block));
        let mut holdings = Vec::new();
        for position in self.positions.values_mut() {
            position.apply_transfers(gauge, block);
            if position.minted_at <= block {
                holdings.push(Holding {
                    token_id: position.token_id,
                    owner: position.owner,
                    staked: position.staked,
                });
            }
        }

        if holdings.is_empty() {
            return Ok(self.cache.store(block, Vec::new()));
        }

        let sqrt_price = self.sqrt_price(provider, block).await?;
        let Contracts {
            position_manager,
            sugar,
            ..
        } = self.contracts;

        let mut batch = Vec::with_capacity(holdings.len() * 3 + self.accounts.len());
        for holding in &holdings {
            batch.push(erc721_owner_of(position_manager, holding.token_id));
            batch.push(calls::sugar_fees(sugar, position_manager, holding.token_id));
            batch.push(calls::sugar_principal(
                sugar,
                position_manager,
                holding.token_id,
                sqrt_price,
            ));
        }
        let any_staked = holdings.iter().any(|holding| holding.staked);
        if any_staked {
            batch.extend(
                self.accounts
                    .iter()
                    .map(|account| calls::staked_values(gauge, *account)),
            );
        }
        let outcomes = read_batch(provider, &batch, block).await?;

        let mut staker_of: HashMap<U256, Address> = HashMap::new();
        if any_staked {
            let stake_outcomes = &outcomes[holdings.len() * 3..];
            for (account, outcome) in self.accounts.iter().zip(stake_outcomes) {
                let Some(staked) = calls::optional::<ICLGauge::stakedValuesCall>(outcome)? else {
                    tracing::debug!(%account, block, "Stake record unavailable");
                    continue;
                };
                for token_id in staked {
                    staker_of.insert(token_id, *account);
                }
            }
        }

        let mut balances: BTreeMap<Address, U256> = BTreeMap::new();
        for (index, holding) in holdings.iter().enumerate() {
            let base = index * 3;
            let Some(onchain_owner) = calls::optional::<IERC721::ownerOfCall>(&outcomes[base])? else {
                tracing::debug!(token_id = %holding.token_id, block, "Position owner unavailable, skipped");
                continue;
            };
            let expected = if holding.staked { gauge } else { holding.owner };
            if onchain_owner != expected {
                return Err(Error::invariant(format!(
                    "block {}: position {} is held by {} on chain but transfers say {}",
                    block, holding.token_id, onchain_owner, expected
                )));
            }

            let fees =
                calls::required::<ISugarHelper::feesCall>(&outcomes[base + 1], &batch[base + 1], block)?;
            let principal = calls::required::<ISugarHelper::principalCall>(
                &outcomes[base + 2],
                &batch[base + 2],
                block,
            )?;
            let fees = [fees.amount0, fees.amount1];
            let principal = [principal.amount0, principal.amount1];
            let value = fees[self.token_index]
                .checked_add(principal[self.token_index])
                .ok_or_else(|| {
                    vault_ledger::Error::Overflow(format!(
                        "value of position {} at block {}",
                        holding.token_id, block
                    ))
                })?;

            let beneficiary = if holding.staked {
                staker_of
                    .get(&holding.token_id)
                    .copied()
                    .unwrap_or(holding.owner)
            } else {
                holding.owner
            };

            let entry = balances.entry(beneficiary).or_default();
            *entry = entry.checked_add(value).ok_or_else(|| {
                vault_ledger::Error::Overflow(format!(
                    "position value of {} at block {}",
                    beneficiary, block
                ))
            })?;
        }

        tracing::debug!(
            pool = %self.contracts.pool,
            block,
            positions = holdings.len(),
            "Position values recomputed"
        );
        Ok(self.cache.store(block, balances.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolValue;
    use vault_ledger::{fake::FakeChain, B256};

    const VAULT: Address = Address::new([0x0a; 20]);
    const OTHER: Address = Address::new([0x0b; 20]);
    const POOL: Address = Address::new([0xc0; 20]);
    const GAUGE: Address = Address::new([0x6a; 20]);
    const MANAGER: Address = Address::new([0x3d; 20]);
    const SUGAR: Address = Address::new([0x5a; 20]);

    fn contracts() -> Contracts {
        Contracts {
            vault: VAULT,
            pool: POOL,
            gauge: GAUGE,
            position_manager: MANAGER,
            sugar: SUGAR,
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn amounts(amount0: u64, amount1: u64) -> Option<Vec<u8>> {
        Some((U256::from(amount0), U256::from(amount1)).abi_encode())
    }

    fn address_result(address: Address) -> Option<Vec<u8>> {
        Some(address.abi_encode())
    }

    /// `positions(tokenId)` return of a position in the `(VAULT, token1, 100)` pool
    fn position_data(token1: Address) -> Vec<u8> {
        (
            U256::ZERO,
            Address::ZERO,
            VAULT,
            token1,
            U256::from(100),
            U256::ZERO,
            U256::ZERO,
            U256::from(1_000_000),
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
        )
            .abi_encode()
    }

    fn slot0_data(sqrt_price: u64) -> Vec<u8> {
        (U256::from(sqrt_price), U256::ZERO, U256::ZERO, U256::ZERO, U256::ZERO, true).abi_encode()
    }

    const SQRT_PRICE: u64 = 1 << 32;

    /// Pool trading the vault against OTHER, position 1 minted to addr(1)
    /// at block 10, position 2 minted at block 11 in a different pool
    fn chain() -> FakeChain {
        let chain = FakeChain::new();
        chain.set_call(calls::token0(POOL), 0, address_result(VAULT));
        chain.set_call(calls::token1(POOL), 0, address_result(OTHER));
        chain.set_call(calls::tick_spacing(POOL), 0, Some(U256::from(100).abi_encode()));
        chain.set_call(calls::slot0(POOL), 0, Some(slot0_data(SQRT_PRICE)));
        chain.push_event(POOL, vec![B256::repeat_byte(0xee)], Vec::new(), 10);

        chain.push_nft_transfer(MANAGER, ZERO_ADDRESS, addr(1), 1, 10);
        chain.set_call(
            calls::positions(MANAGER, U256::from(1)),
            10,
            Some(position_data(OTHER)),
        );
        chain.set_call(erc721_owner_of(MANAGER, U256::from(1)), 10, address_result(addr(1)));
        chain.set_call(
            calls::sugar_fees(SUGAR, MANAGER, U256::from(1)),
            10,
            amounts(5, 1),
        );
        chain.set_call(
            calls::sugar_principal(SUGAR, MANAGER, U256::from(1), U160::from(SQRT_PRICE)),
            10,
            amounts(95, 7),
        );

        chain.push_nft_transfer(MANAGER, ZERO_ADDRESS, addr(2), 2, 11);
        chain.set_call(
            calls::positions(MANAGER, U256::from(2)),
            11,
            Some(position_data(addr(0x99))),
        );
        chain
    }

    fn stake(chain: &FakeChain, owner: Address, block: BlockNumber) {
        chain.push_nft_transfer(MANAGER, owner, GAUGE, 1, block);
        chain.set_call(erc721_owner_of(MANAGER, U256::from(1)), block, address_result(GAUGE));
    }

    #[tokio::test]
    async fn test_discovery_filters_foreign_positions() {
        let chain = chain();
        let service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();

        assert_eq!(service.tracked_positions(), 1);
        assert_eq!(service.token_index, 0);
        assert_eq!(service.accounts, vec![addr(1)]);
    }

    #[tokio::test]
    async fn test_value_in_vault_token() {
        let chain = chain();
        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();

        assert!(service
            .calculate_distributions(&chain, 9)
            .await
            .unwrap()
            .is_empty());
        let distribution = service.calculate_distributions(&chain, 10).await.unwrap();
        assert_eq!(distribution.shares, vec![(addr(1), U256::from(100))]);
    }

    #[tokio::test]
    async fn test_queries_between_pool_events_hit_the_cache() {
        let chain = chain();
        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();

        let first = service.calculate_distributions(&chain, 10).await.unwrap();
        let reads = chain.batch_reads();
        let repeated = service.calculate_distributions(&chain, 10).await.unwrap();
        let later = service.calculate_distributions(&chain, 50).await.unwrap();

        assert_eq!(chain.batch_reads(), reads);
        assert!(Arc::ptr_eq(&first, &repeated));
        assert!(Arc::ptr_eq(&first, &later));
        assert_eq!(later.as_of, Some(10));

        let err = service.calculate_distributions(&chain, 9).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ledger(vault_ledger::Error::DegenerateInput(_))
        ));
    }

    #[tokio::test]
    async fn test_staked_position_without_record_stays_with_depositor() {
        let chain = chain();
        stake(&chain, addr(1), 20);

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let distribution = service.calculate_distributions(&chain, 20).await.unwrap();

        assert_eq!(distribution.shares, vec![(addr(1), U256::from(100))]);
    }

    #[tokio::test]
    async fn test_empty_stake_record_leaves_position_with_depositor() {
        let chain = chain();
        stake(&chain, addr(1), 20);
        chain.set_call(
            calls::staked_values(GAUGE, addr(1)),
            20,
            Some(Vec::<U256>::new().abi_encode()),
        );

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let distribution = service.calculate_distributions(&chain, 20).await.unwrap();

        assert_eq!(distribution.shares, vec![(addr(1), U256::from(100))]);
    }

    #[tokio::test]
    async fn test_stake_record_names_beneficiary() {
        let chain = chain();
        chain.push_nft_transfer(MANAGER, addr(1), addr(3), 1, 15);
        chain.set_call(erc721_owner_of(MANAGER, U256::from(1)), 15, address_result(addr(3)));
        stake(&chain, addr(3), 20);
        // The stake record lists the position under the previous owner
        chain.set_call(
            calls::staked_values(GAUGE, addr(1)),
            20,
            Some(vec![U256::from(1)].abi_encode()),
        );

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let before = service.calculate_distributions(&chain, 15).await.unwrap();
        let after = service.calculate_distributions(&chain, 20).await.unwrap();

        assert_eq!(before.shares, vec![(addr(3), U256::from(100))]);
        assert_eq!(after.shares, vec![(addr(1), U256::from(100))]);
    }

    #[tokio::test]
    async fn test_burnt_position_is_pruned() {
        let chain = chain();
        chain.push_nft_transfer(MANAGER, addr(1), ZERO_ADDRESS, 1, 30);

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        service.calculate_distributions(&chain, 29).await.unwrap();
        let distribution = service.calculate_distributions(&chain, 30).await.unwrap();

        assert!(distribution.is_empty());
        assert_eq!(service.tracked_positions(), 0);
    }

    #[tokio::test]
    async fn test_missing_owner_is_skipped() {
        let chain = chain();
        chain.set_call(erc721_owner_of(MANAGER, U256::from(1)), 12, None);
        chain.push_event(POOL, vec![B256::repeat_byte(0xee)], Vec::new(), 12);

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let distribution = service.calculate_distributions(&chain, 12).await.unwrap();

        assert!(distribution.is_empty());
    }

    #[tokio::test]
    async fn test_owner_mismatch_is_fatal() {
        let chain = chain();
        chain.set_call(erc721_owner_of(MANAGER, U256::from(1)), 12, address_result(addr(7)));
        chain.push_event(POOL, vec![B256::repeat_byte(0xee)], Vec::new(), 12);

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let err = service.calculate_distributions(&chain, 12).await.unwrap_err();

        assert!(err.is_fatal_invariant());
    }

    #[tokio::test]
    async fn test_failed_sugar_read_is_fatal() {
        let chain = chain();
        chain.set_call(calls::sugar_fees(SUGAR, MANAGER, U256::from(1)), 12, None);
        chain.push_event(POOL, vec![B256::repeat_byte(0xee)], Vec::new(), 12);

        let mut service = ConcentratedLiquidityService::discover(&chain, contracts(), 100)
            .await
            .unwrap();
        let err = service.calculate_distributions(&chain, 12).await.unwrap_err();

        assert!(err.is_fatal_invariant());
        assert!(err.to_string().contains("fees"));
    }

    #[tokio::test]
    async fn test_pool_without_vault_rejected() {
        let chain = chain();
        let contracts = Contracts {
            vault: addr(0x77),
            ..contracts()
        };

        let err = ConcentratedLiquidityService::discover(&chain, contracts, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
