//! Main reward engine
//!
//! Orchestrates one reward run for one vault: transfer collection, service
//! discovery, allocation, commitment and output.

use crate::{
    allocator::{allocate_rewards, scaled_reward, RewardAllocator, RewardWindow},
    config::Config,
    output::{write_rewards_csv, CommitmentArtifact},
    positions::{self, PositionValuation},
    Error, Result,
};
use std::{fmt, path::PathBuf, sync::Arc};
use vault_ledger::{
    types::{transfers_from_logs, TRANSFER_TOPIC},
    BalanceLedger, ChainDataProvider, EventFilter, MerkleCommitment, Metrics, RewardRecord,
    TransferEvent, B256, U256,
};

/// Files and figures of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Reward CSV
    pub rewards_path: PathBuf,
    /// Commitment artifact JSON
    pub artifact_path: PathBuf,
    /// Merkle root
    pub root: B256,
    /// Rewarded accounts
    pub accounts: usize,
    /// Sum of all rewards, at most the configured reward
    pub distributed: U256,
}

/// Reward engine
pub struct RewardEngine {
    /// Finalized chain state
    provider: Arc<dyn ChainDataProvider>,

    /// Configuration
    config: Config,

    /// Run counters
    metrics: Metrics,
}

impl fmt::Debug for RewardEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewardEngine")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl RewardEngine {
    /// Create new reward engine
    pub fn new(provider: Arc<dyn ChainDataProvider>, config: Config) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new().map_err(|e| Error::Other(format!("metrics: {}", e)))?;

        Ok(Self {
            provider,
            config,
            metrics,
        })
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run counters
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Vault transfers up to the end of the window, in chain order
    pub async fn collect_transfers(&self) -> Result<Vec<TransferEvent>> {
        let logs = self
            .provider
            .list_events(self.config.vault, EventFilter::Topic(TRANSFER_TOPIC))
            .await?;
        let mut transfers = transfers_from_logs(&logs)?;
        transfers.retain(|transfer| transfer.block <= self.config.to_block);

        tracing::info!("Collected {} vault transfers", transfers.len());
        Ok(transfers)
    }

    /// One position service per configured pool
    pub async fn build_services(&self) -> Result<Vec<Box<dyn PositionValuation>>> {
        let mut services = Vec::with_capacity(self.config.services.len());
        for service in &self.config.services {
            services.push(
                positions::discover(
                    self.provider.as_ref(),
                    self.config.vault,
                    service,
                    self.config.to_block,
                )
                .await?,
            );
        }
        Ok(services)
    }

    /// Rewards of the window, sorted, nothing written
    pub async fn compute_rewards(&self) -> Result<Vec<RewardRecord>> {
        tracing::info!(
            vault = %self.config.vault,
            from_block = self.config.from_block,
            to_block = self.config.to_block,
            "Starting reward run"
        );

        let mut ledger = BalanceLedger::new(self.collect_transfers().await?)?;
        let services = self.build_services().await?;

        let mut allocator = RewardAllocator::new(
            self.provider.as_ref(),
            self.config.vault,
            services,
            self.metrics.clone(),
        )?;
        let cumulative = allocator
            .accumulate(
                &mut ledger,
                RewardWindow {
                    from_block: self.config.from_block,
                    to_block: self.config.to_block,
                    reconcile_stride: self.config.reconcile_stride,
                },
            )
            .await?;

        let reward = scaled_reward(self.config.reward_amount, self.config.reward_decimals)?;
        let rewards = allocate_rewards(cumulative, self.config.withdrawal_queue, reward)?;

        tracing::info!("Allocated rewards to {} accounts", rewards.len());
        Ok(rewards)
    }

    /// Rewards plus their Merkle commitment, nothing written
    pub async fn commit(&self) -> Result<(Vec<RewardRecord>, MerkleCommitment)> {
        let rewards = self.compute_rewards().await?;

        let accounts: Vec<_> = rewards.iter().map(|record| record.account).collect();
        let amounts: Vec<_> = rewards.iter().map(|record| record.amount).collect();
        let commitment = MerkleCommitment::build(&accounts, &amounts, self.config.reward_token)?;

        Ok((rewards, commitment))
    }

    /// Full run; files are written only once everything succeeded
    pub async fn run(&self) -> Result<RunSummary> {
        let (rewards, commitment) = self.commit().await?;

        let distributed = rewards
            .iter()
            .try_fold(U256::ZERO, |acc, record| acc.checked_add(record.amount))
            .ok_or_else(|| vault_ledger::Error::Overflow("distributed total".to_string()))?;

        let run_dir = self.config.run_dir();
        let rewards_path = run_dir.join(format!("{}.csv", self.config.vault));
        let artifact_path = run_dir.join(format!("{}.json", self.config.vault));
        write_rewards_csv(&rewards_path, &rewards)?;
        CommitmentArtifact::from_commitment(&commitment).write_json(&artifact_path)?;

        tracing::info!(
            root = %commitment.root,
            accounts = rewards.len(),
            %distributed,
            "Reward run complete"
        );

        Ok(RunSummary {
            rewards_path,
            artifact_path,
            root: commitment.root,
            accounts: rewards.len(),
            distributed,
        })
    }
}
