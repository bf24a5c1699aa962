//! # Vault Store
//!
//! Persists vault snapshots in sled, bincode-encoded, next to the schema
//! version they were written with. Upgrading the vault means upgrading the
//! stored layout: [`VaultStore::migrate`] rewrites older snapshots in the
//! current layout, and [`VaultStore::load`] migrates in memory when the file
//! has not been rewritten yet.
//!
//! ## Layout history
//!
//! - **v1**: withdrawal requests carry shares, start block and completion.
//! - **v2**: requests also carry the protocol-assigned nonce and the
//!   withdrawal root. Migration derives both: v1 vaults never queued outside
//!   their own counter, so the external nonce equals the vault nonce.
//!
//! Committed vault events are appended to a separate tree as JSON for
//! auditing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use lrt_protocol::config::{VaultParams, SNAPSHOT_VERSION};
use lrt_protocol::restaking::WithdrawalKey;
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::AccessControl;
use crate::vault::{VaultConfig, VaultEvent, VaultSnapshot, VaultState, WithdrawalRequest};

const VERSION_KEY: &[u8] = b"meta/version";
const SNAPSHOT_KEY: &[u8] = b"vault/snapshot";
const EVENTS_TREE: &str = "events";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("snapshot encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("event encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found}, this build reads up to {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("corrupt store: {0}")]
    Corrupt(&'static str),
}

// ---------------------------------------------------------------------------
// Legacy layouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WithdrawalRequestV1 {
    pub shares: Amount,
    pub requested_at_block: BlockNumber,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VaultStateV1 {
    pub access: AccessControl,
    pub deposits_paused: bool,
    pub delegated_operator: Option<Address>,
    pub pending_withdrawals: BTreeMap<u64, WithdrawalRequestV1>,
    pub next_withdrawal_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VaultSnapshotV1 {
    pub version: u32,
    pub vault: Address,
    pub config: VaultConfig,
    pub params: VaultParams,
    pub state: VaultStateV1,
}

/// Upgrades a v1 snapshot to the current layout.
pub(crate) fn migrate_v1(old: VaultSnapshotV1) -> VaultSnapshot {
    let pending_withdrawals = old
        .state
        .pending_withdrawals
        .into_iter()
        .map(|(nonce, request)| {
            let key = WithdrawalKey {
                staker: old.vault,
                strategy: old.config.strategy,
                shares: request.shares,
                start_block: request.requested_at_block,
                nonce,
            };
            let upgraded = WithdrawalRequest {
                shares: request.shares,
                requested_at_block: request.requested_at_block,
                completed: request.completed,
                external_nonce: nonce,
                withdrawal_root: key.root_hex(),
            };
            (nonce, upgraded)
        })
        .collect();

    let state = VaultState {
        access: old.state.access,
        deposits_paused: old.state.deposits_paused,
        delegated_operator: old.state.delegated_operator,
        pending_withdrawals,
        next_withdrawal_nonce: old.state.next_withdrawal_nonce,
    };
    VaultSnapshot::new(old.vault, old.config, old.params, state)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct VaultStore {
    db: sled::Db,
    events: sled::Tree,
}

impl VaultStore {
    /// Opens or creates a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let events = db.open_tree(EVENTS_TREE)?;
        debug!(path = %path.display(), "vault store opened");
        Ok(Self { db, events })
    }

    /// Version of the stored snapshot, if any.
    pub fn stored_version(&self) -> Result<Option<u32>, StoreError> {
        match self.db.get(VERSION_KEY)? {
            None => Ok(None),
            Some(raw) => {
                let bytes: [u8; 4] = raw[..]
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("version key is not 4 bytes"))?;
                Ok(Some(u32::from_be_bytes(bytes)))
            }
        }
    }

    /// Writes `snapshot` in the current layout, replacing any previous one.
    pub fn save(&self, snapshot: &VaultSnapshot) -> Result<(), StoreError> {
        let payload = bincode::serialize(snapshot)?;
        self.write_raw(SNAPSHOT_VERSION, payload)?;
        debug!(
            vault = %snapshot.vault,
            next_nonce = snapshot.state.next_withdrawal_nonce,
            "snapshot saved"
        );
        Ok(())
    }

    /// Reads the stored snapshot, upgrading older layouts in memory.
    pub fn load(&self) -> Result<Option<VaultSnapshot>, StoreError> {
        let version = match self.stored_version()? {
            None => return Ok(None),
            Some(v) => v,
        };
        let payload = self
            .db
            .get(SNAPSHOT_KEY)?
            .ok_or(StoreError::Corrupt("version present without snapshot"))?;

        let snapshot = match version {
            1 => migrate_v1(bincode::deserialize::<VaultSnapshotV1>(&payload)?),
            SNAPSHOT_VERSION => bincode::deserialize::<VaultSnapshot>(&payload)?,
            found => {
                return Err(StoreError::UnsupportedVersion {
                    found,
                    supported: SNAPSHOT_VERSION,
                })
            }
        };
        Ok(Some(snapshot))
    }

    /// Rewrites an older snapshot in the current layout. Returns the version
    /// migrated from, or `None` when nothing needed upgrading.
    pub fn migrate(&self) -> Result<Option<u32>, StoreError> {
        let from = match self.stored_version()? {
            Some(v) if v < SNAPSHOT_VERSION => v,
            _ => return Ok(None),
        };
        let snapshot = self
            .load()?
            .ok_or(StoreError::Corrupt("version present without snapshot"))?;
        self.save(&snapshot)?;
        info!(from, to = SNAPSHOT_VERSION, "vault store migrated");
        Ok(Some(from))
    }

    /// Appends a committed event to the audit log.
    pub fn record_event(&self, event: &VaultEvent) -> Result<(), StoreError> {
        let id = self.db.generate_id()?;
        let json = serde_json::to_vec(event)?;
        self.events.insert(id.to_be_bytes(), json)?;
        Ok(())
    }

    /// The most recent `limit` events as JSON documents, oldest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::with_capacity(limit);
        for entry in self.events.iter().rev().take(limit) {
            let (_, value) = entry?;
            out.push(String::from_utf8_lossy(&value).into_owned());
        }
        out.reverse();
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn write_raw(&self, version: u32, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        batch.insert(VERSION_KEY, &version.to_be_bytes()[..]);
        batch.insert(SNAPSHOT_KEY, payload);
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::Role;
    use crate::vault::VaultEventKind;

    fn config() -> VaultConfig {
        VaultConfig {
            base_asset: Address::labeled("stETH"),
            receipt_token: Address::labeled("mLRT"),
            admin: Address::labeled("owner"),
            delegation_manager: Address::labeled("dm"),
            strategy_manager: Address::labeled("sm"),
            strategy: Address::labeled("strategy"),
        }
    }

    fn v1_snapshot() -> VaultSnapshotV1 {
        let admin = Address::labeled("owner");
        let mut access = AccessControl::new(admin).unwrap();
        access.grant_role(admin, Role::Admin, admin).unwrap();
        let mut pending = BTreeMap::new();
        pending.insert(
            0,
            WithdrawalRequestV1 {
                shares: 500,
                requested_at_block: 10,
                completed: true,
            },
        );
        pending.insert(
            1,
            WithdrawalRequestV1 {
                shares: 700,
                requested_at_block: 42,
                completed: false,
            },
        );
        VaultSnapshotV1 {
            version: 1,
            vault: Address::labeled("vault"),
            config: config(),
            params: VaultParams::default(),
            state: VaultStateV1 {
                access,
                deposits_paused: true,
                delegated_operator: Some(Address::labeled("operator")),
                pending_withdrawals: pending,
                next_withdrawal_nonce: 2,
            },
        }
    }

    fn store() -> (tempfile::TempDir, VaultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(&dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let (_dir, store) = store();
        assert_eq!(store.stored_version().unwrap(), None);
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.migrate().unwrap(), None);
    }

    #[test]
    fn save_and_load_current_layout() {
        let (_dir, store) = store();
        let state = VaultState::new(Address::labeled("owner")).unwrap();
        let snapshot = VaultSnapshot::new(Address::labeled("vault"), config(), VaultParams::default(), state);
        store.save(&snapshot).unwrap();
        assert_eq!(store.stored_version().unwrap(), Some(SNAPSHOT_VERSION));
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn v1_snapshot_migrates() {
        let (_dir, store) = store();
        let old = v1_snapshot();
        store
            .write_raw(1, bincode::serialize(&old).unwrap())
            .unwrap();

        // Loading upgrades in memory without touching the file.
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(store.stored_version().unwrap(), Some(1));
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert!(loaded.state.deposits_paused);
        assert_eq!(loaded.state.next_withdrawal_nonce, 2);

        let second = &loaded.state.pending_withdrawals[&1];
        assert_eq!(second.external_nonce, 1);
        assert!(!second.completed);
        let expected_root = WithdrawalKey {
            staker: old.vault,
            strategy: old.config.strategy,
            shares: 700,
            start_block: 42,
            nonce: 1,
        }
        .root_hex();
        assert_eq!(second.withdrawal_root, expected_root);

        assert_eq!(store.migrate().unwrap(), Some(1));
        assert_eq!(store.stored_version().unwrap(), Some(SNAPSHOT_VERSION));
        assert_eq!(store.load().unwrap(), Some(loaded));
        assert_eq!(store.migrate().unwrap(), None);
    }

    #[test]
    fn future_version_rejected() {
        let (_dir, store) = store();
        store.write_raw(SNAPSHOT_VERSION + 1, vec![0u8; 8]).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::UnsupportedVersion { found, .. }) if found == SNAPSHOT_VERSION + 1
        ));
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let state = VaultState::new(Address::labeled("owner")).unwrap();
        let snapshot = VaultSnapshot::new(Address::labeled("vault"), config(), VaultParams::default(), state);
        {
            let store = VaultStore::open(&path).unwrap();
            store.save(&snapshot).unwrap();
        }
        let store = VaultStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn events_are_kept_in_order() {
        let (_dir, store) = store();
        for paused in [true, false, true] {
            let event = VaultEvent::new(1, VaultEventKind::DepositsPausedUpdated { paused });
            store.record_event(&event).unwrap();
        }
        let recent = store.recent_events(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].contains("\"paused\":false"));
        assert!(recent[1].contains("\"paused\":true"));
    }
}
