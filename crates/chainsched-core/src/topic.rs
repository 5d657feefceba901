//! Event topic hashing and address parsing.
//!
//! An EVM event is identified on-chain by `topics[0]`, the keccak-256 hash of
//! its canonical signature (`Transfer(address,address,uint256)`).

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use tiny_keccak::{Hasher, Keccak};

/// Compute the `topics[0]` hash of a canonical event signature.
pub fn event_topic(signature: &str) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(signature.as_bytes());
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Parse a 20-byte hex contract address. Returns `None` if malformed.
pub fn parse_address(s: &str) -> Option<Address> {
    Address::from_str(s.trim()).ok()
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_topic() {
        let topic = event_topic("Transfer(address,address,uint256)");
        assert_eq!(
            to_hex(topic),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn approval_topic() {
        let topic = event_topic("Approval(address,address,uint256)");
        assert_eq!(
            to_hex(topic),
            "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925"
        );
    }

    #[test]
    fn valid_address_parses() {
        let addr = parse_address("0x1234567890123456789012345678901234567890").unwrap();
        assert_eq!(to_hex(addr), "0x1234567890123456789012345678901234567890");
    }

    #[test]
    fn invalid_addresses_rejected() {
        assert!(parse_address("invalid-address").is_none());
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("").is_none());
        assert!(parse_address("0xZZ34567890123456789012345678901234567890").is_none());
    }
}
