//! Core types for the ledger
//!
//! All amounts are exact 256-bit unsigned integers, all identities are
//! 20-byte EVM addresses. Nothing here ever rounds.

use crate::{
    contracts::{decode_event, IERC20},
    Error, Result,
};
pub use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};

/// Block height
pub type BlockNumber = u64;

/// Mint/burn sentinel, never a real holder
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// `Transfer(address,address,uint256)` topic0, shared by ERC-20 and ERC-721
pub const TRANSFER_TOPIC: B256 = IERC20::Transfer::SIGNATURE_HASH;

/// Raw log as returned by the chain data provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, topic0 is the event signature
    pub topics: Vec<B256>,
    /// Non-indexed payload
    pub data: Bytes,
    /// Block the log was emitted in
    pub block_number: BlockNumber,
    /// Position of the log within its block
    pub log_index: u64,
}

impl RawLog {
    /// Event signature topic, if any
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    /// Whether this is an ERC-20 `Transfer` (value in data)
    pub fn is_erc20_transfer(&self) -> bool {
        self.topic0() == Some(TRANSFER_TOPIC) && self.topics.len() == 3
    }

    /// Whether this is an ERC-721 `Transfer` (tokenId indexed)
    pub fn is_erc721_transfer(&self) -> bool {
        self.topic0() == Some(TRANSFER_TOPIC) && self.topics.len() == 4
    }
}

/// One vault token movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Sender (zero address for mints)
    pub from: Address,
    /// Receiver (zero address for burns)
    pub to: Address,
    /// Amount moved
    pub amount: U256,
    /// Block height
    pub block: BlockNumber,
}

impl TransferEvent {
    /// Decode an ERC-20 `Transfer` log
    pub fn from_log(log: &RawLog) -> Result<Self> {
        if !log.is_erc20_transfer() {
            return Err(Error::Decode(format!(
                "log at block {} index {} is not an ERC-20 transfer",
                log.block_number, log.log_index
            )));
        }

        let transfer: IERC20::Transfer = decode_event(log)?;
        Ok(Self {
            from: transfer.from,
            to: transfer.to,
            amount: transfer.value,
            block: log.block_number,
        })
    }

    /// Whether this event creates supply
    pub fn is_mint(&self) -> bool {
        self.from == ZERO_ADDRESS
    }

    /// Whether this event destroys supply
    pub fn is_burn(&self) -> bool {
        self.to == ZERO_ADDRESS
    }
}

/// Decode and order vault transfer logs
///
/// Logs are sorted by `(block, log_index)` with a stable sort so that
/// provider emission order breaks any remaining ties.
pub fn transfers_from_logs(logs: &[RawLog]) -> Result<Vec<TransferEvent>> {
    let mut ordered: Vec<&RawLog> = logs.iter().filter(|log| log.is_erc20_transfer()).collect();
    ordered.sort_by_key(|log| (log.block_number, log.log_index));
    ordered.into_iter().map(TransferEvent::from_log).collect()
}

/// Final reward of one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecord {
    /// Beneficiary
    pub account: Address,
    /// Reward in the smallest unit of the reward token
    pub amount: U256,
}

/// One read-only call inside a batched read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractCall {
    /// Contract to call
    pub target: Address,
    /// ABI encoded calldata
    pub calldata: Bytes,
}

impl ContractCall {
    /// Create a call
    pub fn new(target: Address, calldata: impl Into<Bytes>) -> Self {
        Self {
            target,
            calldata: calldata.into(),
        }
    }
}

/// Result of one call inside a batched read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Whether the call succeeded
    pub success: bool,
    /// Raw return data (revert data on failure)
    pub return_data: Bytes,
}

impl CallOutcome {
    /// Successful call
    pub fn ok(return_data: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            return_data: return_data.into(),
        }
    }

    /// Failed call
    pub fn failed() -> Self {
        Self {
            success: false,
            return_data: Bytes::new(),
        }
    }

    /// Return data of a successful call, `None` means "no data"
    pub fn data(&self) -> Option<&[u8]> {
        self.success.then_some(self.return_data.as_ref())
    }
}
