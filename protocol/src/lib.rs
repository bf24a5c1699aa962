// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # mLRT Protocol: Core Library
//!
//! Shared building blocks for the mLRT liquid-restaking vault: value types,
//! share-price arithmetic, the chain clock, and the two external systems the
//! vault drives (the staked base asset and the restaking protocol).
//!
//! ## Architecture
//!
//! - **types**: Addresses, amounts, block numbers, decimal parsing.
//! - **math**: 256-bit `mul_div` and the deposit/redeem conversions.
//! - **chain**: Current block height and the in-process dev chain.
//! - **asset**: The base-asset transfer interface and an ERC-20 ledger.
//! - **restaking**: Delegation, strategy shares and the withdrawal queue
//!   of the restaking protocol, plus an in-process implementation.
//! - **config**: Constants, network profiles and deployment files.
//!
//! The vault itself lives in `lrt-contracts`; nothing here knows about it.

pub mod asset;
pub mod chain;
pub mod config;
pub mod math;
pub mod restaking;
pub mod types;

pub use types::{Address, Amount, BlockNumber, WAD};
