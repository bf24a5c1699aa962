//! # mLRT Vault Contracts
//!
//! The stateful half of the liquid-restaking system:
//!
//! - **Access Control**: root-administered roles shared by the token and
//!   the vault.
//! - **Receipt Token**: mLRT, an 18-decimal fungible token whose supply is
//!   changed only by holders of the minter and burner roles.
//! - **Vault**: takes deposits of the base asset, prices and mints mLRT,
//!   delegates to a restaking operator and runs the delayed withdrawal
//!   queue.
//! - **Store**: versioned vault snapshots on disk, with layout migration.
//! - **Deploy**: wires a complete local deployment.
//!
//! ## Design Principles
//!
//! 1. Amounts are integer base units; every addition is checked and every
//!    price conversion rounds down.
//! 2. A failed operation leaves committed vault state exactly as it was.
//! 3. Privileged operations check the caller's role before anything else.
//! 4. Persisted types are serde-serializable and versioned.

pub mod access_control;
pub mod deploy;
pub mod error;
pub mod receipt_token;
pub mod store;
pub mod vault;

pub use access_control::{AccessControl, AccessError, Role};
pub use deploy::{DeployError, LocalDeployment};
pub use error::{CollaboratorError, VaultError};
pub use receipt_token::{MlrtToken, ReceiptToken, TokenError};
pub use store::{StoreError, VaultStore};
pub use vault::{Vault, VaultConfig, VaultEvent, VaultEventKind, VaultSnapshot, VaultStatus, WithdrawalRequest};
