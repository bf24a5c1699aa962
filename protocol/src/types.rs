//! # Core Value Types
//!
//! Addresses, amounts, and block numbers shared by every component of the
//! vault. Amounts are raw `u128` base units (wei for an 18-decimal token).
//! Nothing in the protocol ever touches floating point; the helpers at the
//! bottom of this file exist only for the CLI and for readable tests.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A token amount in base units.
pub type Amount = u128;

/// A block height on the host chain.
pub type BlockNumber = u64;

/// Number of base units in one whole 18-decimal token.
pub const WAD: Amount = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Errors produced when parsing an [`Address`] or a decimal amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The string was not valid hex.
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),

    /// The decoded address was not exactly 20 bytes.
    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),

    /// The decimal amount string could not be parsed.
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
}

/// A 20-byte account identity, rendered as `0x`-prefixed lowercase hex.
///
/// The all-zero address is the "null principal": every constructor and
/// operation that accepts an address rejects it with a `ZeroAddress` error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The null address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Deterministic test/dev address derived from a label, e.g.
    /// `Address::labeled("alice")`. Uses the first 20 bytes of BLAKE3.
    pub fn labeled(label: &str) -> Self {
        let digest = blake3::hash(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns `true` for the null address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Returns the `0x`-prefixed hex form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(ParseError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; 20]>::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

// ---------------------------------------------------------------------------
// Unit helpers
// ---------------------------------------------------------------------------

/// Parses a decimal token amount ("0.1", "25", "1.000000000000000001")
/// into base units with 18 decimals.
pub fn parse_ether(s: &str) -> Result<Amount, ParseError> {
    parse_units(s, 18)
}

/// Parses a decimal amount with the given number of decimals.
pub fn parse_units(s: &str, decimals: u8) -> Result<Amount, ParseError> {
    let invalid = || ParseError::InvalidAmount(s.to_string());
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > decimals as usize
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
        || (whole.is_empty() && frac.is_empty())
    {
        return Err(invalid());
    }

    let scale = 10u128.checked_pow(decimals as u32).ok_or_else(invalid)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid())?
    };
    let padded = format!("{:0<width$}", frac, width = decimals as usize);
    let frac_units = if padded.is_empty() {
        0
    } else {
        padded.parse::<u128>().map_err(|_| invalid())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(invalid)
}

/// Formats base units as an 18-decimal string, trimming trailing zeros.
pub fn format_ether(amount: Amount) -> String {
    let whole = amount / WAD;
    let frac = amount % WAD;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:018}", frac);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_address_is_zero() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::labeled("alice").is_zero());
    }

    #[test]
    fn address_hex_round_trip() {
        let addr: Address = "0x5A32b5E4e1C1144f2A796827866C1CF88fa73236".parse().unwrap();
        assert_eq!(addr.to_hex(), "0x5a32b5e4e1c1144f2a796827866c1cf88fa73236");
        assert_eq!(addr.to_string().parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert_eq!(
            "0x1234".parse::<Address>(),
            Err(ParseError::InvalidLength(2))
        );
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn address_serializes_as_hex_in_json() {
        let addr = Address::labeled("operator");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn labeled_addresses_are_deterministic() {
        assert_eq!(Address::labeled("x"), Address::labeled("x"));
        assert_ne!(Address::labeled("x"), Address::labeled("y"));
    }

    #[test]
    fn parse_ether_handles_fractions() {
        assert_eq!(parse_ether("0.1").unwrap(), WAD / 10);
        assert_eq!(parse_ether("25").unwrap(), 25 * WAD);
        assert_eq!(parse_ether(".5").unwrap(), WAD / 2);
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), 1);
    }

    #[test]
    fn parse_ether_rejects_garbage() {
        assert!(parse_ether("").is_err());
        assert!(parse_ether("abc").is_err());
        assert!(parse_ether("1.2.3").is_err());
        assert!(parse_ether("0.0000000000000000001").is_err());
        assert!(parse_ether("-1").is_err());
    }

    #[test]
    fn format_ether_trims_zeros() {
        assert_eq!(format_ether(WAD), "1");
        assert_eq!(format_ether(WAD / 10), "0.1");
        assert_eq!(format_ether(99_891_191_804_517_298), "0.099891191804517298");
        assert_eq!(format_ether(0), "0");
    }
}
