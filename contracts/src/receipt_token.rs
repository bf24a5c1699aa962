//! # mLRT Receipt Token
//!
//! The proportional claim token minted on deposit and burned on redemption.
//! Supply only changes through [`ReceiptToken::mint`] and
//! [`ReceiptToken::burn`], each gated by a dedicated role that the
//! deployment grants to the vault alone.
//!
//! Balances and total supply are kept in one lock so that supply always
//! equals the sum of balances, and every change is overflow-checked.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use lrt_protocol::config::{RECEIPT_TOKEN_DECIMALS, RECEIPT_TOKEN_NAME, RECEIPT_TOKEN_SYMBOL};
use lrt_protocol::{Address, Amount};

use crate::access_control::{AccessControl, AccessError, Role};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the receipt token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Construction with a zero admin, or mint/burn against the zero address.
    #[error("zero address")]
    ZeroAddress,

    /// Role check or role administration failed.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Burn exceeds the holder's balance.
    #[error("insufficient balance: {account} holds {balance}, tried to burn {amount}")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        amount: Amount,
    },

    /// Mint would overflow the supply.
    #[error("supply overflow minting {amount}")]
    SupplyOverflow { amount: Amount },
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// The receipt token as the vault sees it.
#[async_trait]
pub trait ReceiptToken: Send + Sync {
    fn address(&self) -> Address;

    /// Creates `amount` units for `to`. `caller` must hold `Minter`.
    async fn mint(&self, caller: Address, to: Address, amount: Amount) -> Result<(), TokenError>;

    /// Destroys `amount` units held by `from`. `caller` must hold `Burner`.
    async fn burn(&self, caller: Address, from: Address, amount: Amount) -> Result<(), TokenError>;

    async fn balance_of(&self, account: Address) -> Amount;

    async fn total_supply(&self) -> Amount;
}

// ---------------------------------------------------------------------------
// MlrtToken
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TokenState {
    access: AccessControl,
    balances: HashMap<Address, Amount>,
    total_supply: Amount,
}

/// In-process mLRT token.
#[derive(Debug)]
pub struct MlrtToken {
    address: Address,
    state: RwLock<TokenState>,
}

impl MlrtToken {
    /// Deploys the token at `address` with `admin` as root. The admin holds
    /// no mint or burn rights until it grants them.
    pub fn new(address: Address, admin: Address) -> Result<Self, TokenError> {
        if admin.is_zero() || address.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        let access = AccessControl::new(admin)?;
        info!(%address, %admin, "mLRT deployed");
        Ok(Self {
            address,
            state: RwLock::new(TokenState {
                access,
                balances: HashMap::new(),
                total_supply: 0,
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        RECEIPT_TOKEN_NAME
    }

    pub fn symbol(&self) -> &'static str {
        RECEIPT_TOKEN_SYMBOL
    }

    pub fn decimals(&self) -> u8 {
        RECEIPT_TOKEN_DECIMALS
    }

    pub fn has_role(&self, role: Role, account: Address) -> bool {
        self.state.read().access.has_role(role, account)
    }

    pub fn grant_role(&self, caller: Address, role: Role, account: Address) -> Result<bool, TokenError> {
        Ok(self.state.write().access.grant_role(caller, role, account)?)
    }

    pub fn revoke_role(&self, caller: Address, role: Role, account: Address) -> Result<bool, TokenError> {
        Ok(self.state.write().access.revoke_role(caller, role, account)?)
    }

    /// Synchronous balance lookup.
    pub fn balance(&self, account: Address) -> Amount {
        self.state.read().balances.get(&account).copied().unwrap_or(0)
    }

    /// Synchronous supply lookup.
    pub fn supply(&self) -> Amount {
        self.state.read().total_supply
    }
}

#[async_trait]
impl ReceiptToken for MlrtToken {
    fn address(&self) -> Address {
        self.address
    }

    async fn mint(&self, caller: Address, to: Address, amount: Amount) -> Result<(), TokenError> {
        let mut state = self.state.write();
        state.access.check(Role::Minter, caller)?;
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }

        let supply = state
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow { amount })?;
        let balance = state.balances.get(&to).copied().unwrap_or(0);
        let credited = balance
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow { amount })?;

        state.total_supply = supply;
        state.balances.insert(to, credited);
        debug!(%to, amount, supply, "mLRT minted");
        Ok(())
    }

    async fn burn(&self, caller: Address, from: Address, amount: Amount) -> Result<(), TokenError> {
        let mut state = self.state.write();
        state.access.check(Role::Burner, caller)?;
        if from.is_zero() {
            return Err(TokenError::ZeroAddress);
        }

        let balance = state.balances.get(&from).copied().unwrap_or(0);
        if balance < amount {
            return Err(TokenError::InsufficientBalance {
                account: from,
                balance,
                amount,
            });
        }

        state.balances.insert(from, balance - amount);
        state.total_supply -= amount;
        debug!(%from, amount, supply = state.total_supply, "mLRT burned");
        Ok(())
    }

    async fn balance_of(&self, account: Address) -> Amount {
        self.balance(account)
    }

    async fn total_supply(&self) -> Amount {
        self.supply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_protocol::types::parse_ether;

    fn deploy() -> (MlrtToken, Address, Address) {
        let owner = Address::labeled("owner");
        let other = Address::labeled("other");
        let token = MlrtToken::new(Address::labeled("mLRT"), owner).unwrap();
        token.grant_role(owner, Role::Minter, owner).unwrap();
        token.grant_role(owner, Role::Burner, owner).unwrap();
        (token, owner, other)
    }

    #[tokio::test]
    async fn initial_values() {
        let (token, owner, other) = deploy();
        assert_eq!(token.total_supply().await, 0);
        assert_eq!(token.balance_of(owner).await, 0);
        assert_eq!(token.decimals(), 18);
        assert_eq!(token.name(), "mLRT");
        assert_eq!(token.symbol(), "mLRT");
        assert!(token.has_role(Role::DefaultAdmin, owner));
        assert!(!token.has_role(Role::DefaultAdmin, other));
    }

    #[test]
    fn zero_admin_rejected() {
        assert_eq!(
            MlrtToken::new(Address::labeled("mLRT"), Address::ZERO).unwrap_err(),
            TokenError::ZeroAddress
        );
    }

    #[tokio::test]
    async fn mint_credits_holder_and_supply() {
        let (token, owner, other) = deploy();
        let amount = parse_ether("1").unwrap();
        token.mint(owner, other, amount).await.unwrap();
        assert_eq!(token.total_supply().await, amount);
        assert_eq!(token.balance_of(other).await, amount);
    }

    #[tokio::test]
    async fn non_minter_cannot_mint() {
        let (token, owner, other) = deploy();
        let err = token.mint(other, owner, 100_000).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::Access(AccessError::Unauthorized {
                account: other,
                role: Role::Minter
            })
        );
        assert_eq!(token.total_supply().await, 0);
    }

    #[tokio::test]
    async fn burn_debits_holder_and_supply() {
        let (token, owner, other) = deploy();
        token.mint(owner, other, parse_ether("100").unwrap()).await.unwrap();
        token.burn(owner, other, parse_ether("25").unwrap()).await.unwrap();
        assert_eq!(token.total_supply().await, parse_ether("75").unwrap());
        assert_eq!(token.balance_of(other).await, parse_ether("75").unwrap());
    }

    #[tokio::test]
    async fn non_burner_cannot_burn() {
        let (token, owner, other) = deploy();
        token.mint(owner, owner, 100_000).await.unwrap();
        assert!(matches!(
            token.burn(other, owner, 100_000).await,
            Err(TokenError::Access(AccessError::Unauthorized { role: Role::Burner, .. }))
        ));
        assert_eq!(token.balance_of(owner).await, 100_000);
    }

    #[tokio::test]
    async fn burn_beyond_balance_rejected() {
        let (token, owner, other) = deploy();
        token.mint(owner, other, 10).await.unwrap();
        assert_eq!(
            token.burn(owner, other, 11).await,
            Err(TokenError::InsufficientBalance {
                account: other,
                balance: 10,
                amount: 11
            })
        );
    }

    #[tokio::test]
    async fn mint_overflow_rejected() {
        let (token, owner, other) = deploy();
        token.mint(owner, other, Amount::MAX).await.unwrap();
        assert_eq!(
            token.mint(owner, owner, 1).await,
            Err(TokenError::SupplyOverflow { amount: 1 })
        );
        assert_eq!(token.balance_of(owner).await, 0);
    }
}
