//! Reward file tool
//!
//! Works on the files a reward run leaves behind: merge and commit reward
//! CSVs, cross-check two reward sets, verify a published artifact.

use anyhow::Context;
use clap::Parser;
use reward_engine::{
    aggregate::aggregate_files,
    compare::{compare_rewards, DEFAULT_TOLERANCE},
    output::{read_rewards_csv, write_rewards_csv},
    CommitmentArtifact,
};
use std::path::PathBuf;
use vault_ledger::{Address, MerkleCommitment, U256};

#[derive(Parser)]
#[command(name = "reward-tool", about = "Vault reward file tool")]
struct Cli {
    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Sum reward CSVs per account and commit them to a Merkle root.
    Commit {
        /// Token the rewards are paid in.
        #[arg(long, env = "REWARD_TOKEN")]
        reward_token: Address,

        /// Merged reward CSV to write.
        #[arg(long)]
        rewards_out: Option<PathBuf>,

        /// Commitment artifact JSON to write.
        #[arg(long)]
        out: PathBuf,

        /// Reward CSVs (`user,reward`) to merge.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Compare a local reward CSV against an external one.
    Compare {
        /// Locally computed rewards.
        local: PathBuf,

        /// Independently computed rewards.
        external: PathBuf,

        /// Largest per-account difference treated as rounding.
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: u64,
    },

    /// Check every proof of a commitment artifact against its root.
    Verify {
        /// Commitment artifact JSON.
        artifact: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Commit {
            reward_token,
            rewards_out,
            out,
            inputs,
        } => {
            let rewards = aggregate_files(&inputs)?;
            let accounts: Vec<Address> = rewards.iter().map(|record| record.account).collect();
            let amounts: Vec<U256> = rewards.iter().map(|record| record.amount).collect();
            let commitment = MerkleCommitment::build(&accounts, &amounts, reward_token)
                .context("building commitment")?;

            if let Some(path) = rewards_out {
                write_rewards_csv(&path, &rewards)?;
            }
            CommitmentArtifact::from_commitment(&commitment).write_json(&out)?;

            println!("{}", commitment.root);
        }
        Command::Compare {
            local,
            external,
            tolerance,
        } => {
            let local = read_rewards_csv(&local)
                .with_context(|| format!("reading {}", local.display()))?;
            let external = read_rewards_csv(&external)
                .with_context(|| format!("reading {}", external.display()))?;

            let report = compare_rewards(&local, &external, U256::from(tolerance))?;
            println!("{}", report);
            if !report.is_clean() {
                anyhow::bail!("reward sets differ");
            }
        }
        Command::Verify { artifact } => {
            let parsed = CommitmentArtifact::read_json(&artifact)
                .with_context(|| format!("reading {}", artifact.display()))?;

            let invalid = parsed.invalid_claims();
            for account in &invalid {
                tracing::error!(%account, "Proof does not match root");
            }
            if !invalid.is_empty() {
                anyhow::bail!("{} of {} proofs are invalid", invalid.len(), parsed.data.len());
            }
            tracing::info!(root = %parsed.root, claims = parsed.data.len(), "All proofs valid");
        }
    }

    Ok(())
}
