//! # Base Asset
//!
//! The staked token the vault custodies (stETH on the reference
//! deployment). The vault only ever needs the atomic transfer primitives
//! from it, so that is all [`BaseAsset`] exposes. [`Erc20Ledger`] is an
//! in-process ERC-20 style ledger with allowances used by the restaking
//! simulator, the dev node, and the test suite.
//!
//! Every transfer is all-or-nothing: balances and allowances are checked and
//! moved under a single write lock, so a failed transfer leaves no trace.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Address, Amount};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by base-asset transfers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    /// The source account does not hold enough tokens.
    #[error("insufficient balance: {account} has {balance}, needs {required}")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        required: Amount,
    },

    /// The spender has not been approved for enough tokens.
    #[error("insufficient allowance: {spender} may spend {allowance} of {owner}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: Amount,
        required: Amount,
    },

    /// Transfers to or from the null address are rejected.
    #[error("transfer involving the zero address")]
    ZeroAddress,

    /// A credit would overflow the recipient's balance.
    #[error("balance overflow crediting {0}")]
    Overflow(Address),
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// The transfer primitives the vault relies on.
#[async_trait]
pub trait BaseAsset: Send + Sync {
    /// The token's own address, checked against the vault configuration.
    fn address(&self) -> Address;

    /// Current balance of `account`.
    async fn balance_of(&self, account: Address) -> Amount;

    /// Moves `amount` from `from` to `to`. `from` is the caller.
    async fn transfer(&self, from: Address, to: Address, amount: Amount)
        -> Result<(), AssetError>;

    /// Moves `amount` from `owner` to `to` on behalf of `spender`, consuming
    /// allowance.
    async fn transfer_from(
        &self,
        spender: Address,
        owner: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), AssetError>;
}

// ---------------------------------------------------------------------------
// Erc20Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerInner {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    total_supply: Amount,
}

impl LedgerInner {
    fn move_balance(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), AssetError> {
        if from.is_zero() || to.is_zero() {
            return Err(AssetError::ZeroAddress);
        }
        let balance = self.balances.get(&from).copied().unwrap_or(0);
        if balance < amount {
            return Err(AssetError::InsufficientBalance {
                account: from,
                balance,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_balance = self.balances.get(&to).copied().unwrap_or(0);
        let credited = to_balance
            .checked_add(amount)
            .ok_or(AssetError::Overflow(to))?;

        self.balances.insert(from, balance - amount);
        self.balances.insert(to, credited);
        Ok(())
    }
}

/// In-memory ERC-20 ledger.
#[derive(Debug)]
pub struct Erc20Ledger {
    address: Address,
    symbol: String,
    inner: RwLock<LedgerInner>,
}

impl Erc20Ledger {
    /// Creates an empty ledger living at `address`.
    pub fn new(address: Address, symbol: impl Into<String>) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// The token symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Credits freshly created tokens to `to`. Dev/test faucet only.
    pub fn mint(&self, to: Address, amount: Amount) -> Result<(), AssetError> {
        if to.is_zero() {
            return Err(AssetError::ZeroAddress);
        }
        let mut inner = self.inner.write();
        let balance = inner.balances.get(&to).copied().unwrap_or(0);
        let credited = balance.checked_add(amount).ok_or(AssetError::Overflow(to))?;
        let supply = inner
            .total_supply
            .checked_add(amount)
            .ok_or(AssetError::Overflow(to))?;
        inner.balances.insert(to, credited);
        inner.total_supply = supply;
        Ok(())
    }

    /// Sets the allowance `spender` may pull from `owner`. `u128::MAX` is
    /// treated as unlimited and never decremented.
    pub fn approve(&self, owner: Address, spender: Address, amount: Amount) -> Result<(), AssetError> {
        if owner.is_zero() || spender.is_zero() {
            return Err(AssetError::ZeroAddress);
        }
        self.inner.write().allowances.insert((owner, spender), amount);
        Ok(())
    }

    /// Remaining allowance of `spender` over `owner`'s tokens.
    pub fn allowance(&self, owner: Address, spender: Address) -> Amount {
        self.inner
            .read()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> Amount {
        self.inner.read().total_supply
    }

    /// Synchronous balance lookup for callers outside an async context.
    pub fn balance(&self, account: Address) -> Amount {
        self.inner.read().balances.get(&account).copied().unwrap_or(0)
    }

    /// Synchronous transfer, used by in-process contracts that custody
    /// tokens on their own account.
    pub fn move_tokens(&self, from: Address, to: Address, amount: Amount) -> Result<(), AssetError> {
        self.inner.write().move_balance(from, to, amount)
    }
}

#[async_trait]
impl BaseAsset for Erc20Ledger {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance_of(&self, account: Address) -> Amount {
        self.balance(account)
    }

    async fn transfer(&self, from: Address, to: Address, amount: Amount) -> Result<(), AssetError> {
        self.move_tokens(from, to, amount)
    }

    async fn transfer_from(
        &self,
        spender: Address,
        owner: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let mut inner = self.inner.write();
        let allowance = inner.allowances.get(&(owner, spender)).copied().unwrap_or(0);
        if allowance < amount {
            return Err(AssetError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                required: amount,
            });
        }

        inner.move_balance(owner, to, amount)?;

        if allowance != Amount::MAX {
            inner.allowances.insert((owner, spender), allowance - amount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (Erc20Ledger, Address, Address, Address) {
        let ledger = Erc20Ledger::new(Address::labeled("stETH"), "stETH");
        let alice = Address::labeled("alice");
        let vault = Address::labeled("vault");
        let bob = Address::labeled("bob");
        ledger.mint(alice, 1_000).unwrap();
        (ledger, alice, vault, bob)
    }

    #[tokio::test]
    async fn transfer_moves_balance() {
        let (ledger, alice, _, bob) = ledger();
        ledger.transfer(alice, bob, 400).await.unwrap();
        assert_eq!(ledger.balance_of(alice).await, 600);
        assert_eq!(ledger.balance_of(bob).await, 400);
        assert_eq!(ledger.total_supply(), 1_000);
    }

    #[tokio::test]
    async fn transfer_from_consumes_allowance() {
        let (ledger, alice, vault, _) = ledger();
        ledger.approve(alice, vault, 500).unwrap();
        ledger.transfer_from(vault, alice, vault, 300).await.unwrap();
        assert_eq!(ledger.allowance(alice, vault), 200);
        assert_eq!(ledger.balance_of(vault).await, 300);
    }

    #[tokio::test]
    async fn unlimited_allowance_is_not_decremented() {
        let (ledger, alice, vault, _) = ledger();
        ledger.approve(alice, vault, Amount::MAX).unwrap();
        ledger.transfer_from(vault, alice, vault, 300).await.unwrap();
        assert_eq!(ledger.allowance(alice, vault), Amount::MAX);
    }

    #[tokio::test]
    async fn transfer_from_without_allowance_fails_cleanly() {
        let (ledger, alice, vault, _) = ledger();
        ledger.approve(alice, vault, 10).unwrap();
        let err = ledger.transfer_from(vault, alice, vault, 11).await.unwrap_err();
        assert!(matches!(err, AssetError::InsufficientAllowance { allowance: 10, .. }));
        assert_eq!(ledger.balance_of(alice).await, 1_000);
        assert_eq!(ledger.allowance(alice, vault), 10);
    }

    #[tokio::test]
    async fn transfer_from_without_balance_keeps_allowance() {
        let (ledger, alice, vault, _) = ledger();
        ledger.approve(alice, vault, 5_000).unwrap();
        let err = ledger
            .transfer_from(vault, alice, vault, 2_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::InsufficientBalance { balance: 1_000, .. }));
        assert_eq!(ledger.allowance(alice, vault), 5_000);
    }

    #[tokio::test]
    async fn zero_address_rejected() {
        let (ledger, alice, _, _) = ledger();
        assert_eq!(
            ledger.transfer(alice, Address::ZERO, 1).await,
            Err(AssetError::ZeroAddress)
        );
        assert_eq!(ledger.mint(Address::ZERO, 1), Err(AssetError::ZeroAddress));
    }
}
