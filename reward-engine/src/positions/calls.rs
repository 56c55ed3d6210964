//! Protocol interfaces, call builders and required-read decoding
//!
//! Every contract the position services read is declared here with
//! `sol!`. Builders return a [`ContractCall`] ready for a batched read;
//! [`required`] and [`optional`] turn its outcome into the typed return.

use crate::{Error, Result};
use alloy_primitives::aliases::U160;
use alloy_sol_types::{sol_data, SolCall, SolType};
use vault_ledger::{
    contracts::{contract_call, decode_returns},
    types::{Address, BlockNumber, ContractCall, B256, U256},
    CallOutcome,
};

mod interfaces {
    #![allow(missing_docs)]

    alloy_sol_types::sol! {
        #[derive(Debug)]
        interface ICLPool {
            function token0() external view returns (address);
            function token1() external view returns (address);
            function tickSpacing() external view returns (int24);
            function slot0() external view returns (
                uint160 sqrtPriceX96,
                int24 tick,
                uint16 observationIndex,
                uint16 observationCardinality,
                uint16 observationCardinalityNext,
                bool unlocked
            );
        }

        #[derive(Debug)]
        interface INonfungiblePositionManager {
            function positions(uint256 tokenId) external view returns (
                uint96 nonce,
                address operator,
                address token0,
                address token1,
                int24 tickSpacing,
                int24 tickLower,
                int24 tickUpper,
                uint128 liquidity,
                uint256 feeGrowthInside0LastX128,
                uint256 feeGrowthInside1LastX128,
                uint128 tokensOwed0,
                uint128 tokensOwed1
            );
        }

        #[derive(Debug)]
        interface ISugarHelper {
            function fees(address positionManager, uint256 tokenId)
                external view returns (uint256 amount0, uint256 amount1);
            function principal(address positionManager, uint256 tokenId, uint160 sqrtRatioX96)
                external view returns (uint256 amount0, uint256 amount1);
        }

        #[derive(Debug)]
        interface ICLGauge {
            function stakedValues(address depositor) external view returns (uint256[] memory);
        }

        #[derive(Debug, PartialEq, Eq)]
        struct MarketParams {
            address loanToken;
            address collateralToken;
            address oracle;
            address irm;
            uint256 lltv;
        }

        #[derive(Debug)]
        interface IMorpho {
            event CreateMarket(bytes32 indexed id, MarketParams marketParams);
            event SupplyCollateral(
                bytes32 indexed id,
                address indexed caller,
                address indexed onBehalf,
                uint256 assets
            );
            event WithdrawCollateral(
                bytes32 indexed id,
                address caller,
                address indexed onBehalf,
                address indexed receiver,
                uint256 assets
            );
            event Liquidate(
                bytes32 indexed id,
                address indexed caller,
                address indexed borrower,
                uint256 repaidAssets,
                uint256 repaidShares,
                uint256 seizedAssets,
                uint256 badDebtAssets,
                uint256 badDebtShares
            );

            function position(bytes32 id, address user) external view returns (
                uint256 supplyShares,
                uint128 borrowShares,
                uint128 collateral
            );
        }
    }
}

pub use interfaces::{
    ICLGauge, ICLPool, IMorpho, INonfungiblePositionManager, ISugarHelper, MarketParams,
};

/// Rust side of a Solidity `int24`
pub type TickSpacing = <sol_data::Int<24> as SolType>::RustType;

/// `token0()` of a pool
pub fn token0(pool: Address) -> ContractCall {
    contract_call(pool, &ICLPool::token0Call {})
}

/// `token1()` of a pool
pub fn token1(pool: Address) -> ContractCall {
    contract_call(pool, &ICLPool::token1Call {})
}

/// `tickSpacing()` of a pool
pub fn tick_spacing(pool: Address) -> ContractCall {
    contract_call(pool, &ICLPool::tickSpacingCall {})
}

/// `slot0()` of a concentrated-liquidity pool
pub fn slot0(pool: Address) -> ContractCall {
    contract_call(pool, &ICLPool::slot0Call {})
}

/// `positions(tokenId)` on the NFT position manager
pub fn positions(position_manager: Address, token_id: U256) -> ContractCall {
    contract_call(
        position_manager,
        &INonfungiblePositionManager::positionsCall { tokenId: token_id },
    )
}

/// Uncollected fees of a position
pub fn sugar_fees(sugar: Address, position_manager: Address, token_id: U256) -> ContractCall {
    contract_call(
        sugar,
        &ISugarHelper::feesCall {
            positionManager: position_manager,
            tokenId: token_id,
        },
    )
}

/// Principal of a position at the given pool price
pub fn sugar_principal(
    sugar: Address,
    position_manager: Address,
    token_id: U256,
    sqrt_price_x96: U160,
) -> ContractCall {
    contract_call(
        sugar,
        &ISugarHelper::principalCall {
            positionManager: position_manager,
            tokenId: token_id,
            sqrtRatioX96: sqrt_price_x96,
        },
    )
}

/// Token ids `depositor` has staked in `gauge`
pub fn staked_values(gauge: Address, depositor: Address) -> ContractCall {
    contract_call(gauge, &ICLGauge::stakedValuesCall { depositor })
}

/// `position(id, user)` on the lending singleton
pub fn market_position(morpho: Address, market: B256, user: Address) -> ContractCall {
    contract_call(morpho, &IMorpho::positionCall { id: market, user })
}

/// Pool membership of a position: `(token0, token1, tickSpacing)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKey {
    /// Lower token of the pair
    pub token0: Address,
    /// Upper token of the pair
    pub token1: Address,
    /// Tick spacing of the pool
    pub tick_spacing: TickSpacing,
}

impl PoolKey {
    /// Key of the pool a `positions(tokenId)` entry belongs to
    pub fn from_position(position: &INonfungiblePositionManager::positionsReturn) -> Self {
        Self {
            token0: position.token0,
            token1: position.token1,
            tick_spacing: position.tickSpacing,
        }
    }
}

/// Typed return of a read the caller cannot do without
///
/// A failed call is an invariant violation, malformed data a decode error.
pub fn required<C: SolCall>(
    outcome: &CallOutcome,
    call: &ContractCall,
    block: BlockNumber,
) -> Result<C::Return> {
    let data = outcome.data().ok_or_else(|| {
        Error::invariant(format!(
            "required read {} on {} failed at block {}",
            C::SIGNATURE,
            call.target,
            block
        ))
    })?;
    Ok(decode_returns::<C>(data)?)
}

/// Typed return of a read that may fail, `None` when it did
pub fn optional<C: SolCall>(outcome: &CallOutcome) -> Result<Option<C::Return>> {
    outcome
        .data()
        .map(|data| decode_returns::<C>(data).map_err(Error::from))
        .transpose()
}
