//! # Restaking Protocol Interface
//!
//! The vault never touches operator delegation or strategy share accounting
//! directly. It drives an external restaking protocol (delegation manager +
//! strategy manager + strategy, EigenLayer-shaped) through the
//! [`RestakingProtocol`] trait and treats it as the authority on:
//!
//! - which operator a staker is delegated to,
//! - how many strategy shares a staker holds,
//! - the per-staker withdrawal nonce ledger,
//! - the minimum number of blocks a queued withdrawal must wait.
//!
//! A queued withdrawal is identified by its *withdrawal root*, a hash over
//! `(staker, strategy, shares, start_block, nonce)`. Completing a withdrawal
//! with any field wrong produces a different root and the protocol will not
//! find it, which is why the vault reconciles its own nonce ledger against
//! the protocol's before every queue and completion.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::AssetError;
use crate::math::MathError;
use crate::types::{Address, Amount, BlockNumber};

pub use simulated::SimulatedRestaking;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by the restaking protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RestakingError {
    #[error("operator {0} is not registered")]
    OperatorNotRegistered(Address),

    #[error("staker {staker} is already delegated to {current}")]
    AlreadyDelegated { staker: Address, current: Address },

    #[error("staker {0} is not delegated")]
    NotDelegated(Address),

    #[error("unknown strategy {0}")]
    UnknownStrategy(Address),

    #[error("share amount must be non-zero")]
    ZeroShares,

    #[error("insufficient strategy shares: requested {requested}, available {available}")]
    InsufficientShares { requested: Amount, available: Amount },

    #[error("no queued withdrawal with root {root}")]
    WithdrawalNotFound { root: String },

    #[error("withdrawal delay not elapsed: queued at {start_block}, completable at {ready_at}, current {current}")]
    DelayNotElapsed {
        start_block: BlockNumber,
        ready_at: BlockNumber,
        current: BlockNumber,
    },

    #[error("asset transfer failed: {0}")]
    Asset(#[from] AssetError),

    #[error("share math failed: {0}")]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Withdrawal descriptors
// ---------------------------------------------------------------------------

/// Everything needed to identify a queued withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalKey {
    pub staker: Address,
    pub strategy: Address,
    pub shares: Amount,
    pub start_block: BlockNumber,
    pub nonce: u64,
}

impl WithdrawalKey {
    /// Hash identifying this withdrawal inside the protocol.
    pub fn root(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.staker.as_bytes());
        hasher.update(self.strategy.as_bytes());
        hasher.update(&self.shares.to_be_bytes());
        hasher.update(&self.start_block.to_be_bytes());
        hasher.update(&self.nonce.to_be_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Hex form of [`root`](Self::root).
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }
}

/// Receipt returned when the protocol accepts a withdrawal into its queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedWithdrawal {
    /// The key the withdrawal must later be completed with.
    pub key: WithdrawalKey,
    /// Hex-encoded withdrawal root.
    pub root: String,
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// The restaking protocol as seen by the vault.
#[async_trait]
pub trait RestakingProtocol: Send + Sync {
    /// Address of the delegation manager contract.
    fn delegation_manager(&self) -> Address;

    /// Address of the strategy manager contract.
    fn strategy_manager(&self) -> Address;

    /// Minimum number of blocks between queueing and completing a withdrawal.
    async fn min_withdrawal_delay_blocks(&self) -> BlockNumber;

    /// Operator `staker` is delegated to, if any.
    async fn delegated_to(&self, staker: Address) -> Option<Address>;

    /// Delegates `staker` to `operator`. Re-delegating to the current
    /// operator is a no-op; switching operators requires undelegating first.
    async fn delegate_to(&self, staker: Address, operator: Address) -> Result<(), RestakingError>;

    /// Removes `staker`'s delegation.
    async fn undelegate(&self, staker: Address) -> Result<(), RestakingError>;

    /// Moves `amount` of the base asset from `staker` into `strategy` and
    /// returns the strategy shares credited.
    async fn deposit_into_strategy(
        &self,
        staker: Address,
        strategy: Address,
        amount: Amount,
    ) -> Result<Amount, RestakingError>;

    /// Strategy shares held by `staker` that are not queued for withdrawal.
    async fn staker_shares(&self, staker: Address, strategy: Address) -> Amount;

    /// Underlying base-asset value of `shares` at the current exchange rate.
    async fn shares_to_underlying(
        &self,
        strategy: Address,
        shares: Amount,
    ) -> Result<Amount, RestakingError>;

    /// Number of withdrawals `staker` has ever queued; the nonce the next
    /// queued withdrawal will receive.
    async fn withdrawal_nonce(&self, staker: Address) -> u64;

    /// Removes `shares` from `staker`'s balance and queues them for
    /// withdrawal, anchored at the current block.
    async fn queue_withdrawal(
        &self,
        staker: Address,
        strategy: Address,
        shares: Amount,
    ) -> Result<QueuedWithdrawal, RestakingError>;

    /// Completes a queued withdrawal. With `receive_as_tokens` the underlying
    /// is transferred to the staker and its amount returned; otherwise the
    /// shares are credited back and `0` is returned.
    async fn complete_withdrawal(
        &self,
        key: &WithdrawalKey,
        receive_as_tokens: bool,
    ) -> Result<Amount, RestakingError>;
}
