//! Vault error taxonomy.
//!
//! Every variant carries the argument values that caused it so the caller
//! can correct the call and retry. Collaborator failures are wrapped
//! verbatim in [`VaultError::CollaboratorFailure`].

use thiserror::Error;

use lrt_protocol::asset::AssetError;
use lrt_protocol::math::MathError;
use lrt_protocol::restaking::RestakingError;
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::{AccessError, Role};
use crate::receipt_token::TokenError;

/// A failure reported by one of the systems the vault drives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("base asset: {0}")]
    Asset(#[from] AssetError),

    #[error("restaking protocol: {0}")]
    Restaking(#[from] RestakingError),

    #[error("receipt token: {0}")]
    Token(#[from] TokenError),
}

/// Errors returned by vault operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    /// A required address argument or configuration slot was zero.
    #[error("zero address supplied for {field}")]
    ZeroAddress { field: &'static str },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("deposits are paused")]
    Paused,

    #[error("account {account} is missing role {role}")]
    Unauthorized { account: Address, role: Role },

    /// Role administration rejected for a reason other than a missing role.
    #[error("role administration failed: {0}")]
    Access(AccessError),

    #[error("requested {requested} shares but only {available} are available to withdraw")]
    InsufficientAvailableShares { requested: Amount, available: Amount },

    #[error("no queued withdrawal of {shares} shares started at block {start_block}")]
    WithdrawalNotFound { shares: Amount, start_block: BlockNumber },

    #[error("withdrawal started at block {start_block} is completable at {ready_at}, current block {current}")]
    WithdrawalDelayNotElapsed {
        start_block: BlockNumber,
        ready_at: BlockNumber,
        current: BlockNumber,
    },

    #[error("withdrawal with nonce {nonce} was already completed")]
    WithdrawalAlreadyCompleted { nonce: u64 },

    /// The supplied external nonce offset does not identify the request.
    #[error("nonce offset mismatch: request expects {expected}, caller supplied {supplied}")]
    NonceMismatch { expected: u64, supplied: u64 },

    /// The vault's withdrawal counter and the protocol's nonce ledger have
    /// diverged. Queueing is refused until an operator reconciles them.
    #[error("withdrawal nonce out of sync: vault expects {local}, protocol reports {external}")]
    NonceDesync { local: u64, external: u64 },

    /// A collaborator's address does not match the vault configuration.
    #[error("{field} mismatch: configured {configured}, collaborator reports {actual}")]
    ConfigMismatch {
        field: &'static str,
        configured: Address,
        actual: Address,
    },

    #[error("redemption needs {requested} idle assets but only {available} are held")]
    InsufficientIdleAssets { requested: Amount, available: Amount },

    #[error("arithmetic overflow in share accounting")]
    ArithmeticOverflow,

    #[error(transparent)]
    CollaboratorFailure(#[from] CollaboratorError),

    /// A collaborator call failed and reversing an earlier effect failed
    /// too. Funds may be held by the vault on the caller's behalf.
    #[error("{primary}; reversal also failed: {compensation}")]
    CompensationFailed {
        primary: CollaboratorError,
        compensation: CollaboratorError,
    },
}

impl From<AccessError> for VaultError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthorized { account, role } => VaultError::Unauthorized { account, role },
            AccessError::ZeroAddress => VaultError::ZeroAddress { field: "account" },
            other => VaultError::Access(other),
        }
    }
}

impl From<MathError> for VaultError {
    fn from(_: MathError) -> Self {
        VaultError::ArithmeticOverflow
    }
}

impl From<AssetError> for VaultError {
    fn from(err: AssetError) -> Self {
        VaultError::CollaboratorFailure(err.into())
    }
}

impl From<RestakingError> for VaultError {
    fn from(err: RestakingError) -> Self {
        VaultError::CollaboratorFailure(err.into())
    }
}

impl From<TokenError> for VaultError {
    fn from(err: TokenError) -> Self {
        VaultError::CollaboratorFailure(err.into())
    }
}
