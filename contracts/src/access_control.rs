//! # Access Control
//!
//! Role registry shared by the receipt token and the vault. Every gated
//! operation asks [`AccessControl::check`] before it touches state or calls
//! out to a collaborator.
//!
//! ## Roles
//!
//! - **DefaultAdmin** (root) administers every other role. Exactly one
//!   account holds it at a time; it moves only through
//!   [`AccessControl::transfer_root`], never through grant/revoke/renounce,
//!   so the registry can never end up without a root.
//! - **Admin** gates the vault's pause toggle, delegation and withdrawal
//!   queue.
//! - **Minter** / **Burner** gate receipt-token supply changes and are held
//!   by the vault.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use lrt_protocol::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by role checks and role administration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    /// `account` lacks `role`.
    #[error("account {account} is missing role {role}")]
    Unauthorized { account: Address, role: Role },

    /// Roles cannot be assigned to the zero address.
    #[error("role account is the zero address")]
    ZeroAddress,

    /// The root role only changes hands through `transfer_root`.
    #[error("the root role can only be moved with transfer_root")]
    RootTransferRequired,
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// A capability an account may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    DefaultAdmin,
    Admin,
    Minter,
    Burner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::DefaultAdmin, Role::Admin, Role::Minter, Role::Burner];

    /// Canonical identifier, e.g. `ADMIN_ROLE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DefaultAdmin => "DEFAULT_ADMIN_ROLE",
            Role::Admin => "ADMIN_ROLE",
            Role::Minter => "MINTER_ROLE",
            Role::Burner => "BURNER_ROLE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase().replace('-', "_");
        let trimmed = upper.trim_end_matches("_ROLE");
        match trimmed {
            "DEFAULT_ADMIN" | "ROOT" => Ok(Role::DefaultAdmin),
            "ADMIN" => Ok(Role::Admin),
            "MINTER" => Ok(Role::Minter),
            "BURNER" => Ok(Role::Burner),
            _ => Err(format!("unknown role '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Role membership. Plain data so it can live inside a vault snapshot and be
/// copied into an operation's working state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    root: Address,
    members: BTreeMap<Role, BTreeSet<Address>>,
}

impl AccessControl {
    /// Creates a registry whose root is `root`.
    pub fn new(root: Address) -> Result<Self, AccessError> {
        if root.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        let mut members = BTreeMap::new();
        members.insert(Role::DefaultAdmin, BTreeSet::from([root]));
        Ok(Self { root, members })
    }

    /// The current root account.
    pub fn root(&self) -> Address {
        self.root
    }

    pub fn has_role(&self, role: Role, account: Address) -> bool {
        self.members
            .get(&role)
            .map(|set| set.contains(&account))
            .unwrap_or(false)
    }

    /// Accounts holding `role`, in address order.
    pub fn members(&self, role: Role) -> Vec<Address> {
        self.members
            .get(&role)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fails with `Unauthorized` unless `account` holds `role`.
    pub fn check(&self, role: Role, account: Address) -> Result<(), AccessError> {
        if self.has_role(role, account) {
            return Ok(());
        }
        warn!(%account, %role, "unauthorized call rejected");
        Err(AccessError::Unauthorized { account, role })
    }

    /// Grants `role` to `account`. Returns `false` if it was already held.
    pub fn grant_role(&mut self, caller: Address, role: Role, account: Address) -> Result<bool, AccessError> {
        self.check(Role::DefaultAdmin, caller)?;
        if role == Role::DefaultAdmin {
            return Err(AccessError::RootTransferRequired);
        }
        if account.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        let added = self.members.entry(role).or_default().insert(account);
        if added {
            info!(%role, %account, %caller, "role granted");
        }
        Ok(added)
    }

    /// Revokes `role` from `account`. Returns `false` if it was not held.
    pub fn revoke_role(&mut self, caller: Address, role: Role, account: Address) -> Result<bool, AccessError> {
        self.check(Role::DefaultAdmin, caller)?;
        if role == Role::DefaultAdmin {
            return Err(AccessError::RootTransferRequired);
        }
        let removed = self.remove(role, account);
        if removed {
            info!(%role, %account, %caller, "role revoked");
        }
        Ok(removed)
    }

    /// Drops one of the caller's own roles.
    pub fn renounce_role(&mut self, caller: Address, role: Role) -> Result<bool, AccessError> {
        if role == Role::DefaultAdmin {
            return Err(AccessError::RootTransferRequired);
        }
        let removed = self.remove(role, caller);
        if removed {
            info!(%role, account = %caller, "role renounced");
        }
        Ok(removed)
    }

    /// Hands the root role to `new_root`. Other roles held by the old root
    /// are left in place.
    pub fn transfer_root(&mut self, caller: Address, new_root: Address) -> Result<(), AccessError> {
        self.check(Role::DefaultAdmin, caller)?;
        if new_root.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        self.members
            .insert(Role::DefaultAdmin, BTreeSet::from([new_root]));
        self.root = new_root;
        info!(old = %caller, new = %new_root, "root transferred");
        Ok(())
    }

    fn remove(&mut self, role: Role, account: Address) -> bool {
        self.members
            .get_mut(&role)
            .map(|set| set.remove(&account))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (AccessControl, Address, Address) {
        let root = Address::labeled("owner");
        let other = Address::labeled("other");
        (AccessControl::new(root).unwrap(), root, other)
    }

    #[test]
    fn root_holds_default_admin_only() {
        let (acl, root, other) = setup();
        assert!(acl.has_role(Role::DefaultAdmin, root));
        assert!(!acl.has_role(Role::Admin, root));
        assert!(!acl.has_role(Role::DefaultAdmin, other));
    }

    #[test]
    fn zero_root_rejected() {
        assert_eq!(AccessControl::new(Address::ZERO), Err(AccessError::ZeroAddress));
    }

    #[test]
    fn root_grants_and_revokes() {
        let (mut acl, root, other) = setup();
        assert!(acl.grant_role(root, Role::Admin, other).unwrap());
        assert!(!acl.grant_role(root, Role::Admin, other).unwrap());
        assert!(acl.has_role(Role::Admin, other));
        assert!(acl.revoke_role(root, Role::Admin, other).unwrap());
        assert!(!acl.has_role(Role::Admin, other));
    }

    #[test]
    fn non_root_cannot_grant() {
        let (mut acl, root, other) = setup();
        acl.grant_role(root, Role::Admin, other).unwrap();
        assert_eq!(
            acl.grant_role(other, Role::Minter, other),
            Err(AccessError::Unauthorized {
                account: other,
                role: Role::DefaultAdmin
            })
        );
        assert!(!acl.has_role(Role::Minter, other));
    }

    #[test]
    fn root_cannot_drop_itself() {
        let (mut acl, root, _) = setup();
        assert_eq!(
            acl.revoke_role(root, Role::DefaultAdmin, root),
            Err(AccessError::RootTransferRequired)
        );
        assert_eq!(
            acl.renounce_role(root, Role::DefaultAdmin),
            Err(AccessError::RootTransferRequired)
        );
        assert!(acl.has_role(Role::DefaultAdmin, root));
    }

    #[test]
    fn transfer_root_moves_the_role() {
        let (mut acl, root, other) = setup();
        acl.grant_role(root, Role::Admin, root).unwrap();
        acl.transfer_root(root, other).unwrap();
        assert_eq!(acl.root(), other);
        assert!(acl.has_role(Role::DefaultAdmin, other));
        assert!(!acl.has_role(Role::DefaultAdmin, root));
        // Non-root roles stay with the previous holder.
        assert!(acl.has_role(Role::Admin, root));
        assert!(acl.transfer_root(root, root).is_err());
    }

    #[test]
    fn renounce_own_role() {
        let (mut acl, root, other) = setup();
        acl.grant_role(root, Role::Burner, other).unwrap();
        assert!(acl.renounce_role(other, Role::Burner).unwrap());
        assert!(!acl.renounce_role(other, Role::Burner).unwrap());
    }

    #[test]
    fn role_names_parse() {
        assert_eq!("ADMIN_ROLE".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("minter".parse::<Role>(), Ok(Role::Minter));
        assert_eq!("default-admin".parse::<Role>(), Ok(Role::DefaultAdmin));
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::Burner.to_string(), "BURNER_ROLE");
    }
}
