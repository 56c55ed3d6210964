//! Reward allocator
//!
//! Walks the vault ledger over the reward window, resolves pooled balances
//! to their beneficiaries and integrates the result over blocks.
//!
//! # Algorithm
//!
//! For every block `b` in `[from_block, to_block]`:
//!
//! 1. Apply the vault transfers of block `b`
//! 2. Reconcile the ledger at `from_block + k * stride` and at `to_block`
//! 3. Query every position service at `b`; a holder that is a pool is
//!    replaced by the pool's beneficiaries, weighted
//!    `balance * share / total_shares` (floor)
//! 4. Add each beneficiary's resolved balance to its cumulative balance
//!
//! The resolved balances only change at blocks where the ledger, a service
//! or a reconciliation has something to do, so the walk jumps between those
//! blocks and adds `contribution * span`. The sums are identical to the
//! block-by-block integral.
//!
//! Rewards are then `cumulative * reward / total` (floor), with the
//! withdrawal queue removed first. Rounding dust is not redistributed.

use crate::{
    positions::{Distribution, PositionValuation},
    Error, Result,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
use vault_ledger::{
    Address, BalanceLedger, BlockNumber, ChainDataProvider, Metrics, RewardRecord, U256,
};

/// Block-weighted balance integral per beneficiary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CumulativeBalances {
    balances: BTreeMap<Address, U256>,
}

impl CumulativeBalances {
    /// Empty integral
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to `account`
    pub fn add(&mut self, account: Address, amount: U256) -> Result<()> {
        let entry = self.balances.entry(account).or_default();
        *entry = entry.checked_add(amount).ok_or_else(|| {
            vault_ledger::Error::Overflow(format!("cumulative balance of {}", account))
        })?;
        Ok(())
    }

    /// Add a per-block contribution held for `span` blocks
    pub fn add_span(&mut self, contribution: &BTreeMap<Address, U256>, span: u64) -> Result<()> {
        let span = U256::from(span);
        for (account, amount) in contribution {
            let weighted = amount.checked_mul(span).ok_or_else(|| {
                vault_ledger::Error::Overflow(format!("balance of {} times {} blocks", account, span))
            })?;
            self.add(*account, weighted)?;
        }
        Ok(())
    }

    /// Cumulative balance of one account
    pub fn get(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    /// Drop an account, returning its balance
    pub fn remove(&mut self, account: Address) -> Option<U256> {
        self.balances.remove(&account)
    }

    /// Sum over all accounts
    pub fn total(&self) -> Result<U256> {
        crate::positions::checked_sum(self.balances.values().copied(), || {
            "total cumulative balance".to_string()
        })
    }

    /// `(account, cumulative)` in address order
    pub fn iter(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.balances.iter().map(|(account, amount)| (*account, *amount))
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// Whether no account accumulated anything
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

/// Reward window of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardWindow {
    /// First rewarded block (inclusive)
    pub from_block: BlockNumber,
    /// Last rewarded block (inclusive)
    pub to_block: BlockNumber,
    /// Blocks between ledger reconciliations
    pub reconcile_stride: u64,
}

impl RewardWindow {
    fn is_checkpoint(&self, block: BlockNumber) -> bool {
        (block - self.from_block) % self.reconcile_stride == 0 || block == self.to_block
    }

    /// First checkpoint after `block`, capped at `to_block`
    fn next_checkpoint(&self, block: BlockNumber) -> BlockNumber {
        let periods = (block - self.from_block) / self.reconcile_stride + 1;
        periods
            .checked_mul(self.reconcile_stride)
            .and_then(|offset| offset.checked_add(self.from_block))
            .map_or(self.to_block, |next| next.min(self.to_block))
    }
}

/// Drives the ledger and the position services over a reward window
pub struct RewardAllocator<'a> {
    provider: &'a dyn ChainDataProvider,
    vault: Address,
    services: Vec<Box<dyn PositionValuation>>,
    metrics: Metrics,
}

impl<'a> std::fmt::Debug for RewardAllocator<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardAllocator")
            .field("vault", &self.vault)
            .field("services", &self.services)
            .finish()
    }
}

impl<'a> RewardAllocator<'a> {
    /// Allocator for `vault`; at most one service per pool
    pub fn new(
        provider: &'a dyn ChainDataProvider,
        vault: Address,
        services: Vec<Box<dyn PositionValuation>>,
        metrics: Metrics,
    ) -> Result<Self> {
        let mut pools = HashSet::new();
        for service in &services {
            if !pools.insert(service.pool()) {
                return Err(Error::Config(format!(
                    "pool {} is registered by more than one service",
                    service.pool()
                )));
            }
        }

        Ok(Self {
            provider,
            vault,
            services,
            metrics,
        })
    }

    /// Integrate resolved balances over `window`
    pub async fn accumulate(
        &mut self,
        ledger: &mut BalanceLedger,
        window: RewardWindow,
    ) -> Result<CumulativeBalances> {
        // `to_block + 1` bounds every span
        if window.from_block > window.to_block
            || window.to_block == BlockNumber::MAX
            || window.reconcile_stride == 0
        {
            return Err(Error::degenerate(format!(
                "window [{}, {}] with stride {}",
                window.from_block, window.to_block, window.reconcile_stride
            )));
        }

        if window.from_block > 0 {
            let applied = ledger.advance_to(window.from_block - 1)?;
            self.metrics.record_transfers(applied);
        }

        let mut cumulative = CumulativeBalances::new();
        let mut block = window.from_block;
        loop {
            let applied = ledger.advance_to(block)?;
            self.metrics.record_transfers(applied);

            if window.is_checkpoint(block) {
                tracing::info!("Processing {} / {}", block, window.to_block);
                ledger.reconcile(self.provider, self.vault, block).await?;
                self.metrics.record_reconciliation();
            }

            let contribution = self.resolve(ledger, block).await?;

            let mut next = window.next_checkpoint(block);
            if next == block {
                next = block + 1;
            }
            let pending = ledger
                .next_event_block()
                .into_iter()
                .chain(self.services.iter().filter_map(|s| s.next_block()));
            for candidate in pending {
                if candidate > block && candidate < next {
                    next = candidate;
                }
            }
            let next = next.min(window.to_block + 1);

            let span = next - block;
            cumulative.add_span(&contribution, span)?;
            self.metrics.record_blocks(span);

            if next > window.to_block {
                break;
            }
            block = next;
        }

        tracing::info!(
            accounts = cumulative.len(),
            from_block = window.from_block,
            to_block = window.to_block,
            "Cumulative balances complete"
        );
        Ok(cumulative)
    }

    /// Resolved per-beneficiary balances at `block`
    async fn resolve(
        &mut self,
        ledger: &BalanceLedger,
        block: BlockNumber,
    ) -> Result<BTreeMap<Address, U256>> {
        let mut pools: HashMap<Address, Arc<Distribution>> = HashMap::new();
        for service in &mut self.services {
            let before = service.next_block();
            let distribution = service.calculate_distributions(self.provider, block).await?;
            if service.next_block() != before {
                self.metrics.record_recomputation();
            }
            pools.insert(distribution.pool, distribution);
        }

        let mut resolved = BTreeMap::new();
        for (holder, balance) in ledger.balances() {
            if !balance.is_zero() {
                redistribute(&pools, holder, balance, 0, &mut resolved)?;
            }
        }
        Ok(resolved)
    }
}

/// Push `balance` of `holder` down to final beneficiaries
///
/// Pools may hold shares of other pools; the depth of that nesting is
/// bounded by the number of pools, deeper means a cycle.
pub fn redistribute(
    pools: &HashMap<Address, Arc<Distribution>>,
    holder: Address,
    balance: U256,
    depth: usize,
    resolved: &mut BTreeMap<Address, U256>,
) -> Result<()> {
    let Some(distribution) = pools.get(&holder) else {
        let entry = resolved.entry(holder).or_default();
        *entry = entry.checked_add(balance).ok_or_else(|| {
            vault_ledger::Error::Overflow(format!("resolved balance of {}", holder))
        })?;
        return Ok(());
    };

    if depth >= pools.len() {
        return Err(Error::invariant(format!(
            "pool {} nests deeper than {} pools, shares form a cycle",
            holder,
            pools.len()
        )));
    }

    let total = distribution.total_shares()?;
    if total.is_zero() {
        return Ok(());
    }
    for (beneficiary, share) in &distribution.shares {
        let weighted = balance.checked_mul(*share).ok_or_else(|| {
            vault_ledger::Error::Overflow(format!("balance of pool {} times share", holder))
        })? / total;
        if !weighted.is_zero() {
            redistribute(pools, *beneficiary, weighted, depth + 1, resolved)?;
        }
    }
    Ok(())
}

/// `reward_amount * 10^decimals` in base units
pub fn scaled_reward(reward_amount: u64, decimals: u8) -> Result<U256> {
    U256::from(10u64)
        .checked_pow(U256::from(decimals))
        .and_then(|unit| unit.checked_mul(U256::from(reward_amount)))
        .ok_or_else(|| {
            vault_ledger::Error::Overflow(format!(
                "reward {} with {} decimals",
                reward_amount, decimals
            ))
            .into()
        })
}

/// Split `reward` proportionally to cumulative balances
///
/// The withdrawal queue is removed first, if present. Zero rewards are
/// dropped. Output is sorted by amount descending, then address ascending.
pub fn allocate_rewards(
    mut cumulative: CumulativeBalances,
    withdrawal_queue: Address,
    reward: U256,
) -> Result<Vec<RewardRecord>> {
    cumulative.remove(withdrawal_queue);

    let total = cumulative.total()?;
    if total.is_zero() {
        return Err(Error::degenerate(
            "total cumulative balance is zero, nothing to allocate against",
        ));
    }

    let mut rewards = Vec::with_capacity(cumulative.len());
    for (account, balance) in cumulative.iter() {
        let amount = balance.checked_mul(reward).ok_or_else(|| {
            vault_ledger::Error::Overflow(format!("reward share of {}", account))
        })? / total;
        if !amount.is_zero() {
            rewards.push(RewardRecord { account, amount });
        }
    }

    sort_rewards(&mut rewards);
    Ok(rewards)
}

/// Order rewards by amount descending, then address ascending
pub fn sort_rewards(rewards: &mut [RewardRecord]) {
    rewards.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.account.cmp(&b.account)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::{
        calls,
        concentrated::{Contracts, OwnershipTransfer},
        ConcentratedLiquidityService, LendingMarketService, PoolShareService,
    };
    use alloy_primitives::aliases::U160;
    use alloy_sol_types::SolValue;
    use vault_ledger::{
        contracts::erc721_owner_of, fake::FakeChain, types::ZERO_ADDRESS, TransferEvent, B256,
    };

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn transfer(from: Address, to: Address, amount: u64, block: u64) -> TransferEvent {
        TransferEvent {
            from,
            to,
            amount: U256::from(amount),
            block,
        }
    }

    fn distribution(pool: Address, shares: &[(Address, u64)]) -> Arc<Distribution> {
        Arc::new(Distribution {
            pool,
            shares: shares
                .iter()
                .map(|(account, share)| (*account, U256::from(*share)))
                .collect(),
            as_of: Some(1),
            revision: 1,
        })
    }

    fn window(from_block: u64, to_block: u64) -> RewardWindow {
        RewardWindow {
            from_block,
            to_block,
            reconcile_stride: 5000,
        }
    }

    #[test]
    fn test_checkpoints() {
        let window = RewardWindow {
            from_block: 100,
            to_block: 250,
            reconcile_stride: 50,
        };
        assert!(window.is_checkpoint(100));
        assert!(window.is_checkpoint(150));
        assert!(!window.is_checkpoint(151));
        assert!(window.is_checkpoint(250));
        assert_eq!(window.next_checkpoint(100), 150);
        assert_eq!(window.next_checkpoint(151), 200);
        assert_eq!(window.next_checkpoint(240), 250);
    }

    #[test]
    fn test_checkpoint_past_block_range_caps_at_window_end() {
        let window = RewardWindow {
            from_block: 5,
            to_block: 8,
            reconcile_stride: u64::MAX,
        };
        assert!(window.is_checkpoint(5));
        assert!(!window.is_checkpoint(6));
        assert_eq!(window.next_checkpoint(5), 8);

        let window = RewardWindow {
            from_block: 10,
            to_block: u64::MAX - 1,
            reconcile_stride: u64::MAX - 5,
        };
        assert_eq!(window.next_checkpoint(10), u64::MAX - 1);
    }

    #[tokio::test]
    async fn test_huge_stride_reconciles_only_at_window_ends() {
        let vault = addr(0xaa);
        let events = vec![transfer(ZERO_ADDRESS, addr(1), 100, 1)];
        let chain = FakeChain::new();
        chain.push_transfer(vault, events[0]);

        let mut ledger = BalanceLedger::new(events).unwrap();
        let metrics = Metrics::new().unwrap();
        let mut allocator = RewardAllocator::new(&chain, vault, Vec::new(), metrics.clone()).unwrap();
        let cumulative = allocator
            .accumulate(
                &mut ledger,
                RewardWindow {
                    from_block: 5,
                    to_block: 8,
                    reconcile_stride: u64::MAX,
                },
            )
            .await
            .unwrap();

        assert_eq!(cumulative.get(addr(1)), U256::from(400));
        assert_eq!(metrics.blocks_processed.get(), 4);
        assert_eq!(metrics.reconciliations.get(), 2);
    }

    #[tokio::test]
    async fn test_window_ending_at_last_block_number_rejected() {
        let chain = FakeChain::new();
        let mut ledger = BalanceLedger::new(Vec::new()).unwrap();
        let mut allocator =
            RewardAllocator::new(&chain, addr(0xaa), Vec::new(), Metrics::new().unwrap()).unwrap();

        let err = allocator
            .accumulate(&mut ledger, window(u64::MAX - 1, u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ledger(vault_ledger::Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_rewards_split_by_cumulative_balance() {
        let mut cumulative = CumulativeBalances::new();
        cumulative.add(addr(1), U256::from(120)).unwrap();
        cumulative.add(addr(2), U256::from(180)).unwrap();
        cumulative.add(addr(9), U256::ZERO).unwrap();

        let reward = scaled_reward(1000, 18).unwrap();
        let rewards = allocate_rewards(cumulative, addr(9), reward).unwrap();

        assert_eq!(
            rewards,
            vec![
                RewardRecord {
                    account: addr(2),
                    amount: scaled_reward(600, 18).unwrap()
                },
                RewardRecord {
                    account: addr(1),
                    amount: scaled_reward(400, 18).unwrap()
                },
            ]
        );
    }

    #[test]
    fn test_withdrawal_queue_excluded_and_ties_by_address() {
        let mut cumulative = CumulativeBalances::new();
        cumulative.add(addr(3), U256::from(10)).unwrap();
        cumulative.add(addr(1), U256::from(10)).unwrap();
        cumulative.add(addr(7), U256::from(1000)).unwrap();

        let rewards = allocate_rewards(cumulative, addr(7), U256::from(100)).unwrap();

        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards[0].account, addr(1));
        assert_eq!(rewards[1].account, addr(3));
        assert!(rewards.iter().all(|r| r.amount == U256::from(50)));
    }

    #[test]
    fn test_zero_total_is_degenerate() {
        let mut cumulative = CumulativeBalances::new();
        cumulative.add(addr(7), U256::from(10)).unwrap();

        let err = allocate_rewards(cumulative, addr(7), U256::from(100)).unwrap_err();
        assert!(matches!(
            err,
            Error::Ledger(vault_ledger::Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_dust_rewards_dropped() {
        let mut cumulative = CumulativeBalances::new();
        cumulative.add(addr(1), U256::from(1)).unwrap();
        cumulative.add(addr(2), U256::from(1_000_000)).unwrap();

        let rewards = allocate_rewards(cumulative, ZERO_ADDRESS, U256::from(10)).unwrap();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].account, addr(2));
    }

    #[test]
    fn test_scaled_reward_overflow() {
        assert!(scaled_reward(1, 78).is_err());
        assert_eq!(scaled_reward(3, 2).unwrap(), U256::from(300));
    }

    #[test]
    fn test_nested_pools_resolve_to_beneficiaries() {
        let outer = addr(0xa0);
        let inner = addr(0xb0);
        let mut pools = HashMap::new();
        pools.insert(outer, distribution(outer, &[(addr(1), 1), (inner, 3)]));
        pools.insert(inner, distribution(inner, &[(addr(2), 1), (addr(3), 1)]));

        let mut resolved = BTreeMap::new();
        redistribute(&pools, outer, U256::from(400), 0, &mut resolved).unwrap();

        assert_eq!(resolved.get(&addr(1)), Some(&U256::from(100)));
        assert_eq!(resolved.get(&addr(2)), Some(&U256::from(150)));
        assert_eq!(resolved.get(&addr(3)), Some(&U256::from(150)));
        assert!(!resolved.contains_key(&inner));
    }

    #[test]
    fn test_pool_cycle_rejected() {
        let a = addr(0xa0);
        let b = addr(0xb0);
        let mut pools = HashMap::new();
        pools.insert(a, distribution(a, &[(b, 1)]));
        pools.insert(b, distribution(b, &[(a, 1)]));

        let mut resolved = BTreeMap::new();
        let err = redistribute(&pools, a, U256::from(10), 0, &mut resolved).unwrap_err();
        assert!(err.is_fatal_invariant());
    }

    #[test]
    fn test_empty_pool_contributes_nothing() {
        let pool = addr(0xa0);
        let mut pools = HashMap::new();
        pools.insert(pool, distribution(pool, &[]));

        let mut resolved = BTreeMap::new();
        redistribute(&pools, pool, U256::from(10), 0, &mut resolved).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_floor_division_per_beneficiary() {
        let pool = addr(0xa0);
        let mut pools = HashMap::new();
        pools.insert(
            pool,
            distribution(pool, &[(addr(1), 1), (addr(2), 1), (addr(3), 1)]),
        );

        let mut resolved = BTreeMap::new();
        redistribute(&pools, pool, U256::from(10), 0, &mut resolved).unwrap();

        let total = resolved.values().fold(U256::ZERO, |acc, v| acc + *v);
        assert_eq!(total, U256::from(9));
    }

    #[tokio::test]
    async fn test_direct_holders_integrate_over_window() {
        let vault = addr(0xaa);
        let events = vec![
            transfer(ZERO_ADDRESS, addr(1), 100, 4),
            transfer(addr(1), addr(2), 60, 10),
        ];
        let chain = FakeChain::new();
        for event in &events {
            chain.push_transfer(vault, *event);
        }

        let mut ledger = BalanceLedger::new(events).unwrap();
        let metrics = Metrics::new().unwrap();
        let mut allocator = RewardAllocator::new(&chain, vault, Vec::new(), metrics.clone()).unwrap();
        let cumulative = allocator
            .accumulate(&mut ledger, window(10, 12))
            .await
            .unwrap();

        assert_eq!(cumulative.get(addr(1)), U256::from(120));
        assert_eq!(cumulative.get(addr(2)), U256::from(180));
        assert_eq!(metrics.blocks_processed.get(), 3);
        assert_eq!(metrics.reconciliations.get(), 2);
    }

    #[tokio::test]
    async fn test_span_accumulation_matches_block_by_block() {
        let vault = addr(0xaa);
        let events = vec![
            transfer(ZERO_ADDRESS, addr(1), 100, 1),
            transfer(addr(1), addr(2), 30, 7),
            transfer(addr(2), addr(3), 10, 15),
            transfer(addr(1), ZERO_ADDRESS, 20, 18),
        ];
        let chain = FakeChain::new();
        for event in &events {
            chain.push_transfer(vault, *event);
        }

        let mut ledger = BalanceLedger::new(events.clone()).unwrap();
        let mut allocator =
            RewardAllocator::new(&chain, vault, Vec::new(), Metrics::new().unwrap()).unwrap();
        let cumulative = allocator
            .accumulate(
                &mut ledger,
                RewardWindow {
                    from_block: 5,
                    to_block: 20,
                    reconcile_stride: 4,
                },
            )
            .await
            .unwrap();

        let mut expected = CumulativeBalances::new();
        for block in 5..=20 {
            let snapshot = vault_ledger::ledger::replay(&events, block).unwrap();
            for (holder, balance) in snapshot.balances {
                expected.add(holder, balance).unwrap();
            }
        }
        for (account, amount) in expected.iter() {
            assert_eq!(cumulative.get(account), amount);
        }
    }

    #[tokio::test]
    async fn test_pool_holder_is_replaced_by_lp_holders() {
        let vault = addr(0xaa);
        let pool = addr(0x50);
        let events = vec![
            transfer(ZERO_ADDRESS, addr(1), 100, 1),
            transfer(addr(1), pool, 50, 2),
        ];
        let chain = FakeChain::new();
        for event in &events {
            chain.push_transfer(vault, *event);
        }
        chain.push_transfer(pool, transfer(ZERO_ADDRESS, addr(2), 70, 2));
        chain.push_transfer(pool, transfer(ZERO_ADDRESS, addr(3), 30, 2));

        let service = PoolShareService::discover(&chain, pool).await.unwrap();
        let mut ledger = BalanceLedger::new(events).unwrap();
        let mut allocator = RewardAllocator::new(
            &chain,
            vault,
            vec![Box::new(service)],
            Metrics::new().unwrap(),
        )
        .unwrap();
        let cumulative = allocator
            .accumulate(&mut ledger, window(3, 4))
            .await
            .unwrap();

        assert_eq!(cumulative.get(addr(1)), U256::from(100));
        assert_eq!(cumulative.get(addr(2)), U256::from(70));
        assert_eq!(cumulative.get(addr(3)), U256::from(30));
        assert_eq!(cumulative.get(pool), U256::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_pool_rejected() {
        let chain = FakeChain::new();
        let pool = addr(0x50);
        let services: Vec<Box<dyn PositionValuation>> = vec![
            Box::new(PoolShareService::new(pool, Vec::new(), Vec::new())),
            Box::new(PoolShareService::new(pool, Vec::new(), Vec::new())),
        ];

        let err = RewardAllocator::new(&chain, addr(0xaa), services, Metrics::new().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_vault_balance_routed_through_position_and_market() {
        let vault = addr(0xaa);
        let pool = addr(0xc0);
        let morpho = addr(0x40);
        let contracts = Contracts {
            vault,
            pool,
            gauge: addr(0x6a),
            position_manager: addr(0x3d),
            sugar: addr(0x5a),
        };
        let market = B256::repeat_byte(1);
        let sqrt_price = 1u64 << 32;

        let events = vec![
            transfer(ZERO_ADDRESS, addr(1), 100, 1),
            transfer(addr(1), pool, 40, 2),
            transfer(addr(1), morpho, 30, 2),
        ];
        let chain = FakeChain::new();
        for event in &events {
            chain.push_transfer(vault, *event);
        }

        // Position 1 of addr(2) is worth 10 + 30 vault tokens
        chain.set_call(
            calls::slot0(pool),
            0,
            Some(
                (
                    U256::from(sqrt_price),
                    U256::ZERO,
                    U256::ZERO,
                    U256::ZERO,
                    U256::ZERO,
                    true,
                )
                    .abi_encode(),
            ),
        );
        chain.set_call(
            erc721_owner_of(contracts.position_manager, U256::from(1)),
            0,
            Some(addr(2).abi_encode()),
        );
        chain.set_call(
            calls::sugar_fees(contracts.sugar, contracts.position_manager, U256::from(1)),
            0,
            Some((U256::from(10), U256::ZERO).abi_encode()),
        );
        chain.set_call(
            calls::sugar_principal(
                contracts.sugar,
                contracts.position_manager,
                U256::from(1),
                U160::from(sqrt_price),
            ),
            0,
            Some((U256::from(30), U256::from(5)).abi_encode()),
        );
        let histories = BTreeMap::from([(
            U256::from(1),
            vec![OwnershipTransfer {
                block: 2,
                from: ZERO_ADDRESS,
                to: addr(2),
            }],
        )]);
        let concentrated = ConcentratedLiquidityService::new(contracts, 0, histories, [2]);

        // Collateral of addr(3) and addr(4) in one vault market
        for (user, collateral) in [(addr(3), 10u64), (addr(4), 20)] {
            chain.set_call(
                calls::market_position(morpho, market, user),
                0,
                Some((U256::ZERO, U256::ZERO, U256::from(collateral)).abi_encode()),
            );
        }
        let lending =
            LendingMarketService::new(vault, morpho, [(market, addr(3)), (market, addr(4))], [2]);

        let mut ledger = BalanceLedger::new(events).unwrap();
        let metrics = Metrics::new().unwrap();
        let mut allocator = RewardAllocator::new(
            &chain,
            vault,
            vec![Box::new(concentrated), Box::new(lending)],
            metrics.clone(),
        )
        .unwrap();
        let cumulative = allocator
            .accumulate(&mut ledger, window(3, 4))
            .await
            .unwrap();

        assert_eq!(cumulative.get(addr(1)), U256::from(60));
        assert_eq!(cumulative.get(addr(2)), U256::from(80));
        assert_eq!(cumulative.get(addr(3)), U256::from(20));
        assert_eq!(cumulative.get(addr(4)), U256::from(40));
        assert_eq!(cumulative.get(pool), U256::ZERO);
        assert_eq!(cumulative.get(morpho), U256::ZERO);
        assert_eq!(metrics.service_recomputations.get(), 2);
    }
}
