//! Configuration for a reward run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vault_ledger::{Address, BlockNumber};

/// Reward run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Vault token whose holders are rewarded
    pub vault: Address,

    /// Withdrawal queue, holds vault shares but is never rewarded
    pub withdrawal_queue: Address,

    /// Token the rewards are paid in
    pub reward_token: Address,

    /// First block of the reward window (inclusive)
    pub from_block: BlockNumber,

    /// Last block of the reward window (inclusive)
    pub to_block: BlockNumber,

    /// Reward in whole tokens, scaled by `10^reward_decimals`
    pub reward_amount: u64,

    /// Run label, names the output subdirectory
    pub label: String,

    /// Blocks between ledger reconciliations
    #[serde(default = "default_reconcile_stride")]
    pub reconcile_stride: u64,

    /// Decimals of the reward token
    #[serde(default = "default_reward_decimals")]
    pub reward_decimals: u8,

    /// Root directory for reward files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Positions holding vault shares on behalf of other accounts
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// One position valuation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceConfig {
    /// Fungible LP token pool
    PoolShare {
        /// Pool (also the LP token)
        pool: Address,
    },

    /// Concentrated-liquidity pool with NFT positions
    ConcentratedLiquidity {
        /// Pool
        pool: Address,
        /// Staking gauge of the pool
        gauge: Address,
        /// NFT position manager
        position_manager: Address,
        /// Position math helper
        sugar: Address,
    },

    /// Isolated lending markets using the vault as collateral
    LendingMarket {
        /// Lending singleton
        morpho: Address,
    },
}

fn default_reconcile_stride() -> u64 {
    5000
}

fn default_reward_decimals() -> u8 {
    18
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./distributions")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: Address::ZERO,
            withdrawal_queue: Address::ZERO,
            reward_token: Address::ZERO,
            from_block: 0,
            to_block: 0,
            reward_amount: 0,
            label: "local".to_string(),
            reconcile_stride: default_reconcile_stride(),
            reward_decimals: default_reward_decimals(),
            output_dir: default_output_dir(),
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `REWARD_CONFIG`, then apply environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("REWARD_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(dir) = std::env::var("REWARD_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Reject windows and strides the allocator cannot run
    pub fn validate(&self) -> crate::Result<()> {
        if self.from_block > self.to_block {
            return Err(crate::Error::Config(format!(
                "from_block {} is after to_block {}",
                self.from_block, self.to_block
            )));
        }
        if self.to_block == u64::MAX {
            return Err(crate::Error::Config(
                "to_block must leave room for the end of the window".to_string(),
            ));
        }
        if self.reconcile_stride == 0 {
            return Err(crate::Error::Config(
                "reconcile_stride must be positive".to_string(),
            ));
        }
        if self.reward_decimals > 77 {
            return Err(crate::Error::Config(format!(
                "reward_decimals {} does not fit in 256 bits",
                self.reward_decimals
            )));
        }
        Ok(())
    }

    /// Directory the reward files of this run are written to
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.label)
    }
}
