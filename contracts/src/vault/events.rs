//! Events the vault broadcasts after each committed operation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEventKind {
    Deposit {
        caller: Address,
        receiver: Address,
        amount: Amount,
        minted: Amount,
    },
    Redeemed {
        holder: Address,
        receiver: Address,
        burned: Amount,
        assets: Amount,
    },
    DepositsPausedUpdated {
        paused: bool,
    },
    Delegated {
        operator: Address,
        staked: Amount,
        shares: Amount,
    },
    Undelegated {
        operator: Option<Address>,
    },
    WithdrawalQueued {
        nonce: u64,
        shares: Amount,
        start_block: BlockNumber,
        root: String,
    },
    WithdrawalCompleted {
        nonce: u64,
        shares: Amount,
        released: Amount,
        receive_as_tokens: bool,
    },
    RoleGranted {
        role: Role,
        account: Address,
        sender: Address,
    },
    RoleRevoked {
        role: Role,
        account: Address,
        sender: Address,
    },
}

/// A vault event stamped with the block and wall-clock time it was
/// committed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultEvent {
    pub block: BlockNumber,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: VaultEventKind,
}

impl VaultEvent {
    pub fn new(block: BlockNumber, kind: VaultEventKind) -> Self {
        Self {
            block,
            at: Utc::now(),
            kind,
        }
    }

    /// Short name used for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self.kind {
            VaultEventKind::Deposit { .. } => "deposit",
            VaultEventKind::Redeemed { .. } => "redeemed",
            VaultEventKind::DepositsPausedUpdated { .. } => "deposits_paused_updated",
            VaultEventKind::Delegated { .. } => "delegated",
            VaultEventKind::Undelegated { .. } => "undelegated",
            VaultEventKind::WithdrawalQueued { .. } => "withdrawal_queued",
            VaultEventKind::WithdrawalCompleted { .. } => "withdrawal_completed",
            VaultEventKind::RoleGranted { .. } => "role_granted",
            VaultEventKind::RoleRevoked { .. } => "role_revoked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = VaultEvent::new(12, VaultEventKind::DepositsPausedUpdated { paused: true });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deposits_paused_updated");
        assert_eq!(json["paused"], true);
        assert_eq!(json["block"], 12);
        assert_eq!(event.name(), "deposits_paused_updated");
    }
}
