//! Solidity interfaces and the codec glue around them
//!
//! Interfaces are declared with `sol!`; calldata, return data and logs go
//! through the generated `SolCall` / `SolEvent` types. Decoding failures
//! surface as [`Error::Decode`] naming the function or event.

use crate::{
    types::{Address, ContractCall, RawLog, U256},
    Error, Result,
};
use alloy_sol_types::{SolCall, SolEvent};

mod interfaces {
    #![allow(missing_docs)]

    alloy_sol_types::sol! {
        #[derive(Debug)]
        interface IERC20 {
            event Transfer(address indexed from, address indexed to, uint256 value);

            function balanceOf(address account) external view returns (uint256);
            function totalSupply() external view returns (uint256);
        }

        #[derive(Debug)]
        interface IERC721 {
            event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

            function ownerOf(uint256 tokenId) external view returns (address);
        }
    }
}

pub use interfaces::{IERC20, IERC721};

/// Wrap an encoded `call` on `target`
pub fn contract_call<C: SolCall>(target: Address, call: &C) -> ContractCall {
    ContractCall::new(target, call.abi_encode())
}

/// Decode the return data of a `C` call
pub fn decode_returns<C: SolCall>(data: &[u8]) -> Result<C::Return> {
    C::abi_decode_returns(data)
        .map_err(|e| Error::Decode(format!("{} returned malformed data: {}", C::SIGNATURE, e)))
}

/// Decode a raw log as event `E`
///
/// Callers pick logs by topic0 and topic count before decoding.
pub fn decode_event<E: SolEvent>(log: &RawLog) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data).map_err(|e| {
        Error::Decode(format!(
            "{} at block {} index {}: {}",
            E::SIGNATURE,
            log.block_number,
            log.log_index,
            e
        ))
    })
}

/// `balanceOf(holder)` on an ERC-20
pub fn erc20_balance_of(token: Address, holder: Address) -> ContractCall {
    contract_call(token, &IERC20::balanceOfCall { account: holder })
}

/// `totalSupply()` on an ERC-20
pub fn erc20_total_supply(token: Address) -> ContractCall {
    contract_call(token, &IERC20::totalSupplyCall {})
}

/// `ownerOf(tokenId)` on an ERC-721
pub fn erc721_owner_of(collection: Address, token_id: U256) -> ContractCall {
    contract_call(collection, &IERC721::ownerOfCall { tokenId: token_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{B256, TRANSFER_TOPIC};
    use alloy_sol_types::SolValue;

    #[test]
    fn test_known_selectors() {
        assert_eq!(IERC20::balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(IERC20::totalSupplyCall::SELECTOR, [0x18, 0x16, 0x0d, 0xdd]);
        assert_eq!(IERC721::ownerOfCall::SELECTOR, [0x63, 0x52, 0x21, 0x1e]);
    }

    #[test]
    fn test_balance_of_calldata() {
        let holder = Address::repeat_byte(0xab);
        let call = erc20_balance_of(Address::ZERO, holder);

        assert_eq!(call.calldata.len(), 36);
        assert_eq!(&call.calldata[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&call.calldata[4..16], &[0u8; 12]);
        assert_eq!(&call.calldata[16..], holder.as_slice());
    }

    #[test]
    fn test_both_transfers_share_topic0() {
        assert_eq!(IERC20::Transfer::SIGNATURE_HASH, TRANSFER_TOPIC);
        assert_eq!(IERC721::Transfer::SIGNATURE_HASH, TRANSFER_TOPIC);
    }

    #[test]
    fn test_decode_returns() {
        let data = U256::from(42).abi_encode();
        assert_eq!(
            decode_returns::<IERC20::balanceOfCall>(&data).unwrap(),
            U256::from(42)
        );

        let err = decode_returns::<IERC20::balanceOfCall>(&data[..16]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("balanceOf(address)"));
    }

    #[test]
    fn test_truncated_transfer_payload_rejected() {
        let log = RawLog {
            address: Address::repeat_byte(0xee),
            topics: vec![
                TRANSFER_TOPIC,
                Address::repeat_byte(1).into_word(),
                Address::repeat_byte(2).into_word(),
            ],
            data: vec![0u8; 31].into(),
            block_number: 4,
            log_index: 2,
        };

        let err = decode_event::<IERC20::Transfer>(&log).unwrap_err();
        assert!(err.to_string().contains("block 4 index 2"));
    }

    #[test]
    fn test_decode_nft_transfer() {
        let log = RawLog {
            address: Address::repeat_byte(0xee),
            topics: vec![
                TRANSFER_TOPIC,
                Address::repeat_byte(1).into_word(),
                Address::repeat_byte(2).into_word(),
                B256::with_last_byte(9),
            ],
            data: Default::default(),
            block_number: 3,
            log_index: 0,
        };

        let transfer: IERC721::Transfer = decode_event(&log).unwrap();
        assert_eq!(transfer.from, Address::repeat_byte(1));
        assert_eq!(transfer.to, Address::repeat_byte(2));
        assert_eq!(transfer.tokenId, U256::from(9));
    }
}
