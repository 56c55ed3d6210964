//! Chain data provider boundary
//!
//! The reward pipeline never talks to a node directly. Everything it needs
//! from the chain goes through [`ChainDataProvider`]: ordered event
//! listing and block-pinned batched reads. Pagination and retry with
//! backoff are the implementor's business; from the caller's side each
//! method either returns a complete answer or a [`Error::Provider`].

use crate::{
    contracts::{self, IERC20},
    types::{Address, BlockNumber, CallOutcome, ContractCall, RawLog, B256, U256},
    Error, Result,
};
use async_trait::async_trait;

/// Which logs of a contract to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Every log emitted by the contract
    Any,
    /// Only logs whose topic0 matches
    Topic(B256),
}

impl EventFilter {
    /// Whether a log passes the filter
    pub fn matches(&self, log: &RawLog) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Topic(topic) => log.topic0() == Some(*topic),
        }
    }
}

/// Read-only access to finalized chain state
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// All logs of `address` passing `filter`, ascending by block and log index
    async fn list_events(&self, address: Address, filter: EventFilter) -> Result<Vec<RawLog>>;

    /// Multicall-style batched read pinned to `block`
    ///
    /// One outcome per call, in call order. A failed call is "no data",
    /// not an error; what it means is up to the caller.
    async fn batch_read(
        &self,
        calls: &[ContractCall],
        block: BlockNumber,
    ) -> Result<Vec<CallOutcome>>;

    /// Balances of `holders` and total supply of `token` at `block`
    ///
    /// Every read here is required, so a failed call is fatal.
    async fn token_balances_and_supply(
        &self,
        token: Address,
        holders: &[Address],
        block: BlockNumber,
    ) -> Result<(Vec<U256>, U256)> {
        let mut calls: Vec<ContractCall> = holders
            .iter()
            .map(|holder| contracts::erc20_balance_of(token, *holder))
            .collect();
        calls.push(contracts::erc20_total_supply(token));

        let outcomes = self.batch_read(&calls, block).await?;
        if outcomes.len() != calls.len() {
            return Err(Error::Provider(format!(
                "batch read returned {} results for {} calls",
                outcomes.len(),
                calls.len()
            )));
        }

        let required = |index: usize| {
            outcomes[index].data().ok_or_else(|| {
                Error::Provider(format!(
                    "required read on {} failed at block {}",
                    calls[index].target, block
                ))
            })
        };

        let balances = (0..holders.len())
            .map(|i| contracts::decode_returns::<IERC20::balanceOfCall>(required(i)?))
            .collect::<Result<Vec<U256>>>()?;
        let total_supply =
            contracts::decode_returns::<IERC20::totalSupplyCall>(required(holders.len())?)?;
        Ok((balances, total_supply))
    }
}

/// Read a batch and check the provider kept the one-outcome-per-call contract
pub async fn read_batch(
    provider: &dyn ChainDataProvider,
    calls: &[ContractCall],
    block: BlockNumber,
) -> Result<Vec<CallOutcome>> {
    let outcomes = provider.batch_read(calls, block).await?;
    if outcomes.len() != calls.len() {
        return Err(Error::Provider(format!(
            "batch read returned {} results for {} calls",
            outcomes.len(),
            calls.len()
        )));
    }
    Ok(outcomes)
}
