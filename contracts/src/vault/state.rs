//! Vault configuration and the state the vault commits after each operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use lrt_protocol::config::{VaultParams, SNAPSHOT_VERSION};
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::{AccessControl, Role};
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Collaborator addresses fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub base_asset: Address,
    pub receipt_token: Address,
    pub admin: Address,
    pub delegation_manager: Address,
    pub strategy_manager: Address,
    pub strategy: Address,
}

impl VaultConfig {
    /// Rejects the first zero address, in declaration order.
    pub fn validate(&self) -> Result<(), VaultError> {
        let slots = [
            ("base_asset", self.base_asset),
            ("receipt_token", self.receipt_token),
            ("admin", self.admin),
            ("delegation_manager", self.delegation_manager),
            ("strategy_manager", self.strategy_manager),
            ("strategy", self.strategy),
        ];
        for (field, address) in slots {
            if address.is_zero() {
                return Err(VaultError::ZeroAddress { field });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Withdrawal Requests
// ---------------------------------------------------------------------------

/// One queued withdrawal. Created by `queue_withdrawal`, flipped to
/// completed once, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub shares: Amount,
    /// Block the protocol anchored the withdrawal at; completion must
    /// supply this value exactly.
    pub requested_at_block: BlockNumber,
    pub completed: bool,
    /// Nonce the restaking protocol assigned.
    pub external_nonce: u64,
    /// Hex withdrawal root the protocol knows the request by.
    pub withdrawal_root: String,
}

// ---------------------------------------------------------------------------
// Committed State
// ---------------------------------------------------------------------------

/// Everything the vault mutates. Operations clone it, work on the copy,
/// and swap it in only after all collaborator calls succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub access: AccessControl,
    pub deposits_paused: bool,
    pub delegated_operator: Option<Address>,
    pub pending_withdrawals: BTreeMap<u64, WithdrawalRequest>,
    pub next_withdrawal_nonce: u64,
}

impl VaultState {
    /// Fresh state with `admin` as root and administrator.
    pub fn new(admin: Address) -> Result<Self, VaultError> {
        let mut access = AccessControl::new(admin)?;
        access.grant_role(admin, Role::Admin, admin)?;
        Ok(Self {
            access,
            deposits_paused: false,
            delegated_operator: None,
            pending_withdrawals: BTreeMap::new(),
            next_withdrawal_nonce: 0,
        })
    }

    /// Shares locked in requests that have not completed.
    pub fn locked_shares(&self) -> Amount {
        self.pending_withdrawals
            .values()
            .filter(|r| !r.completed)
            .map(|r| r.shares)
            .sum()
    }

    /// Requests still waiting for completion, by nonce.
    pub fn outstanding(&self) -> impl Iterator<Item = (&u64, &WithdrawalRequest)> {
        self.pending_withdrawals.iter().filter(|(_, r)| !r.completed)
    }

    /// Finds the request `(shares, start_block)` refers to, using
    /// `nonce_offset` to pick between identical requests.
    ///
    /// The request whose external nonce equals the offset wins. Otherwise an
    /// outstanding match means the caller supplied the wrong offset, and a
    /// completed match means the withdrawal was already finished.
    pub fn resolve_withdrawal(
        &self,
        shares: Amount,
        start_block: BlockNumber,
        nonce_offset: u64,
    ) -> Result<u64, VaultError> {
        let matches: Vec<(u64, &WithdrawalRequest)> = self
            .pending_withdrawals
            .iter()
            .filter(|(_, r)| r.shares == shares && r.requested_at_block == start_block)
            .map(|(nonce, r)| (*nonce, r))
            .collect();

        if let Some((nonce, request)) = matches.iter().find(|(_, r)| r.external_nonce == nonce_offset) {
            if request.completed {
                return Err(VaultError::WithdrawalAlreadyCompleted { nonce: *nonce });
            }
            return Ok(*nonce);
        }

        if let Some((_, request)) = matches.iter().find(|(_, r)| !r.completed) {
            return Err(VaultError::NonceMismatch {
                expected: request.external_nonce,
                supplied: nonce_offset,
            });
        }

        match matches.first() {
            Some((nonce, _)) => Err(VaultError::WithdrawalAlreadyCompleted { nonce: *nonce }),
            None => Err(VaultError::WithdrawalNotFound { shares, start_block }),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A complete, versioned picture of a vault, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub version: u32,
    pub vault: Address,
    pub config: VaultConfig,
    pub params: VaultParams,
    pub state: VaultState,
}

impl VaultSnapshot {
    pub fn new(vault: Address, config: VaultConfig, params: VaultParams, state: VaultState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            vault,
            config,
            params,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(shares: Amount, block: BlockNumber, nonce: u64, completed: bool) -> WithdrawalRequest {
        WithdrawalRequest {
            shares,
            requested_at_block: block,
            completed,
            external_nonce: nonce,
            withdrawal_root: String::new(),
        }
    }

    fn state_with(requests: Vec<WithdrawalRequest>) -> VaultState {
        let mut state = VaultState::new(Address::labeled("owner")).unwrap();
        for (nonce, r) in requests.into_iter().enumerate() {
            state.pending_withdrawals.insert(nonce as u64, r);
            state.next_withdrawal_nonce += 1;
        }
        state
    }

    #[test]
    fn admin_is_root_and_administrator() {
        let admin = Address::labeled("owner");
        let state = VaultState::new(admin).unwrap();
        assert!(state.access.has_role(Role::DefaultAdmin, admin));
        assert!(state.access.has_role(Role::Admin, admin));
        assert!(!state.deposits_paused);
        assert_eq!(state.next_withdrawal_nonce, 0);
    }

    #[test]
    fn config_reports_first_zero_slot() {
        let a = Address::labeled("a");
        let config = VaultConfig {
            base_asset: a,
            receipt_token: a,
            admin: Address::ZERO,
            delegation_manager: a,
            strategy_manager: Address::ZERO,
            strategy: a,
        };
        assert_eq!(config.validate(), Err(VaultError::ZeroAddress { field: "admin" }));
    }

    #[test]
    fn resolve_prefers_request_at_offset() {
        let state = state_with(vec![request(100, 5, 0, false), request(100, 5, 1, false)]);
        assert_eq!(state.resolve_withdrawal(100, 5, 1), Ok(1));
        assert_eq!(state.resolve_withdrawal(100, 5, 0), Ok(0));
    }

    #[test]
    fn resolve_rejects_wrong_offset() {
        let state = state_with(vec![request(100, 5, 0, false)]);
        assert_eq!(
            state.resolve_withdrawal(100, 5, 3),
            Err(VaultError::NonceMismatch {
                expected: 0,
                supplied: 3
            })
        );
    }

    #[test]
    fn resolve_reports_completed_and_missing() {
        let state = state_with(vec![request(100, 5, 0, true)]);
        assert_eq!(
            state.resolve_withdrawal(100, 5, 0),
            Err(VaultError::WithdrawalAlreadyCompleted { nonce: 0 })
        );
        assert_eq!(
            state.resolve_withdrawal(100, 5, 7),
            Err(VaultError::WithdrawalAlreadyCompleted { nonce: 0 })
        );
        assert_eq!(
            state.resolve_withdrawal(100, 6, 0),
            Err(VaultError::WithdrawalNotFound {
                shares: 100,
                start_block: 6
            })
        );
    }

    #[test]
    fn locked_shares_skip_completed() {
        let state = state_with(vec![
            request(100, 5, 0, true),
            request(40, 6, 1, false),
            request(2, 7, 2, false),
        ]);
        assert_eq!(state.locked_shares(), 42);
        assert_eq!(state.outstanding().count(), 2);
    }
}
