//! In-memory chain for tests
//!
//! Logs are stored as pushed. Reads are answered from values registered
//! with [`FakeChain::set_call`], valid from a block onwards; ERC-20
//! `balanceOf` / `totalSupply` reads that were not registered are derived
//! from the token's own `Transfer` logs, so balances always agree with
//! the event history by construction.

use crate::{
    contracts::{IERC20, IERC721},
    ledger::replay,
    provider::{ChainDataProvider, EventFilter},
    types::{
        transfers_from_logs, Address, BlockNumber, Bytes, CallOutcome, ContractCall, RawLog,
        TransferEvent, B256, U256, ZERO_ADDRESS,
    },
    Result,
};
use alloy_sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic in-memory [`ChainDataProvider`]
#[derive(Debug, Default)]
pub struct FakeChain {
    logs: Mutex<Vec<RawLog>>,
    calls: Mutex<HashMap<ContractCall, BTreeMap<BlockNumber, Option<Bytes>>>>,
    batch_reads: AtomicUsize,
}

impl FakeChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a log; its index is the number of logs already in that block
    pub fn push_event(
        &self,
        address: Address,
        topics: Vec<B256>,
        data: Vec<u8>,
        block: BlockNumber,
    ) {
        let mut logs = self.logs.lock();
        let log_index = logs.iter().filter(|log| log.block_number == block).count() as u64;
        logs.push(RawLog {
            address,
            topics,
            data: data.into(),
            block_number: block,
            log_index,
        });
    }

    /// Append `event` as emitted by `address`
    pub fn push_sol_event<E: SolEvent>(&self, address: Address, event: &E, block: BlockNumber) {
        let log = event.encode_log_data();
        self.push_event(address, log.topics().to_vec(), log.data.to_vec(), block);
    }

    /// Append an ERC-20 `Transfer` of `token`
    pub fn push_transfer(&self, token: Address, event: TransferEvent) {
        let transfer = IERC20::Transfer {
            from: event.from,
            to: event.to,
            value: event.amount,
        };
        self.push_sol_event(token, &transfer, event.block);
    }

    /// Append an ERC-721 `Transfer` of `collection`
    pub fn push_nft_transfer(
        &self,
        collection: Address,
        from: Address,
        to: Address,
        token_id: u64,
        block: BlockNumber,
    ) {
        let transfer = IERC721::Transfer {
            from,
            to,
            tokenId: U256::from(token_id),
        };
        self.push_sol_event(collection, &transfer, block);
    }

    /// Register the result of `call` from `from_block` onwards; `None` makes it fail
    pub fn set_call(&self, call: ContractCall, from_block: BlockNumber, result: Option<Vec<u8>>) {
        self.calls
            .lock()
            .entry(call)
            .or_default()
            .insert(from_block, result.map(Bytes::from));
    }

    /// Number of `batch_read` invocations so far
    pub fn batch_reads(&self) -> usize {
        self.batch_reads.load(Ordering::SeqCst)
    }

    fn registered(&self, call: &ContractCall, block: BlockNumber) -> Option<Option<Bytes>> {
        let calls = self.calls.lock();
        calls
            .get(call)
            .and_then(|history| history.range(..=block).next_back())
            .map(|(_, result)| result.clone())
    }

    fn derived_erc20(&self, call: &ContractCall, block: BlockNumber) -> Option<Vec<u8>> {
        let calldata = call.calldata.as_ref();

        let logs: Vec<RawLog> = self
            .logs
            .lock()
            .iter()
            .filter(|log| log.address == call.target)
            .cloned()
            .collect();
        let events = transfers_from_logs(&logs).ok()?;

        let value = if calldata.starts_with(&IERC20::balanceOfCall::SELECTOR) {
            let holder = IERC20::balanceOfCall::abi_decode(calldata).ok()?.account;
            replay(&events, block).ok()?.balance_of(holder)
        } else if calldata.starts_with(&IERC20::totalSupplyCall::SELECTOR) {
            let mut supply = U256::ZERO;
            for event in events.iter().filter(|event| event.block <= block) {
                if event.from == ZERO_ADDRESS {
                    supply = supply.checked_add(event.amount)?;
                }
                if event.to == ZERO_ADDRESS {
                    supply = supply.checked_sub(event.amount)?;
                }
            }
            supply
        } else {
            return None;
        };

        Some(value.abi_encode())
    }
}

#[async_trait]
impl ChainDataProvider for FakeChain {
    async fn list_events(&self, address: Address, filter: EventFilter) -> Result<Vec<RawLog>> {
        let mut logs: Vec<RawLog> = self
            .logs
            .lock()
            .iter()
            .filter(|log| log.address == address && filter.matches(log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn batch_read(
        &self,
        calls: &[ContractCall],
        block: BlockNumber,
    ) -> Result<Vec<CallOutcome>> {
        self.batch_reads.fetch_add(1, Ordering::SeqCst);

        Ok(calls
            .iter()
            .map(|call| match self.registered(call, block) {
                Some(Some(data)) => CallOutcome::ok(data),
                Some(None) => CallOutcome::failed(),
                None => self
                    .derived_erc20(call, block)
                    .map(CallOutcome::ok)
                    .unwrap_or_else(CallOutcome::failed),
            })
            .collect())
    }
}
