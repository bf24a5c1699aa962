//! # Liquid-Restaking Vault
//!
//! Accepts deposits of the base asset, mints mLRT in proportion to the
//! vault's managed assets, delegates the pooled balance to a restaking
//! operator and runs the delayed withdrawal queue.
//!
//! ## Execution model
//!
//! Mutating operations run one at a time under the write side of `op_lock`,
//! which is held across every collaborator call. Each operation clones the committed
//! [`VaultState`], works on the copy and swaps it in only after all
//! collaborator calls have succeeded. When a later call fails after an
//! earlier one already took effect, the earlier effect is reversed (refund
//! on a failed mint, undelegate on a failed strategy deposit) and the
//! committed state is left untouched. If the reversal fails as well the
//! caller gets [`VaultError::CompensationFailed`] naming both failures.
//!
//! Reads that consult the collaborators (balances, shares, supply) take the
//! read side of `op_lock`, so they wait out an operation in flight and never
//! observe one half applied. Reads of the vault's own fields serve the
//! committed state directly.
//!
//! ## Nonce reconciliation
//!
//! The restaking protocol keeps its own per-staker withdrawal nonce and
//! identifies a queued withdrawal by a root over
//! `(staker, strategy, shares, start_block, nonce)`. Before queueing, the
//! vault checks that the protocol's nonce equals its own
//! `next_withdrawal_nonce`. On completion it resolves the request from its
//! own queue and refuses an offset that names a different request.

mod events;
mod state;

pub use events::{VaultEvent, VaultEventKind};
pub use state::{VaultConfig, VaultSnapshot, VaultState, WithdrawalRequest};

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock as OpLock};
use tracing::{debug, error, info, warn};

use lrt_protocol::asset::BaseAsset;
use lrt_protocol::chain::BlockSource;
use lrt_protocol::config::{VaultParams, EVENT_CHANNEL_CAPACITY};
use lrt_protocol::math;
use lrt_protocol::restaking::{RestakingProtocol, WithdrawalKey};
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::Role;
use crate::error::VaultError;
use crate::receipt_token::ReceiptToken;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Handles to the systems the vault drives.
#[derive(Clone)]
pub struct Collaborators {
    pub asset: Arc<dyn BaseAsset>,
    pub receipt: Arc<dyn ReceiptToken>,
    pub restaking: Arc<dyn RestakingProtocol>,
    pub chain: Arc<dyn BlockSource>,
}

/// Point-in-time summary for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultStatus {
    pub vault: Address,
    pub deposits_paused: bool,
    pub delegated_operator: Option<Address>,
    pub available_shares: Amount,
    pub locked_shares: Amount,
    pub idle_assets: Amount,
    pub total_managed_assets: Amount,
    pub receipt_supply: Amount,
    pub next_withdrawal_nonce: u64,
    pub pending_withdrawals: usize,
    pub withdrawal_delay_blocks: BlockNumber,
    pub current_block: BlockNumber,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

pub struct Vault {
    address: Address,
    config: VaultConfig,
    params: VaultParams,
    asset: Arc<dyn BaseAsset>,
    receipt: Arc<dyn ReceiptToken>,
    restaking: Arc<dyn RestakingProtocol>,
    chain: Arc<dyn BlockSource>,
    op_lock: OpLock<()>,
    state: RwLock<VaultState>,
    events: broadcast::Sender<VaultEvent>,
}

impl Vault {
    /// Initializes a vault living at `address`.
    ///
    /// Fails `ZeroAddress` for the first zero slot of `config` (in field
    /// order), and `ConfigMismatch` when a collaborator handle does not
    /// belong to the configured address. The admin receives both the root
    /// and the administrative role.
    pub fn initialize(
        address: Address,
        config: VaultConfig,
        params: VaultParams,
        collaborators: Collaborators,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        if address.is_zero() {
            return Err(VaultError::ZeroAddress { field: "vault" });
        }
        check_collaborators(&config, &collaborators)?;

        let state = VaultState::new(config.admin)?;
        info!(
            vault = %address,
            admin = %config.admin,
            strategy = %config.strategy,
            delay = params.withdrawal_delay_blocks,
            "vault initialized"
        );
        Ok(Self::assemble(address, config, params, state, collaborators))
    }

    /// Rebuilds a vault from a persisted snapshot.
    pub fn restore(snapshot: VaultSnapshot, collaborators: Collaborators) -> Result<Self, VaultError> {
        snapshot.config.validate()?;
        check_collaborators(&snapshot.config, &collaborators)?;
        info!(
            vault = %snapshot.vault,
            next_nonce = snapshot.state.next_withdrawal_nonce,
            "vault restored from snapshot"
        );
        Ok(Self::assemble(
            snapshot.vault,
            snapshot.config,
            snapshot.params,
            snapshot.state,
            collaborators,
        ))
    }

    fn assemble(
        address: Address,
        config: VaultConfig,
        params: VaultParams,
        state: VaultState,
        collaborators: Collaborators,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            address,
            config,
            params,
            asset: collaborators.asset,
            receipt: collaborators.receipt,
            restaking: collaborators.restaking,
            chain: collaborators.chain,
            op_lock: OpLock::new(()),
            state: RwLock::new(state),
            events,
        }
    }

    // ---- Deposits ----

    /// Pulls `amount` of the base asset from `caller` and mints receipt units
    /// to `receiver`. Returns the amount minted.
    ///
    /// The mint is priced on the totals before the deposit: 1:1 while either
    /// the managed assets or the receipt supply is zero, otherwise
    /// `floor(amount * supply / managed)`.
    pub async fn deposit(&self, caller: Address, receiver: Address, amount: Amount) -> Result<Amount, VaultError> {
        if receiver.is_zero() {
            return Err(VaultError::ZeroAddress { field: "receiver" });
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let _op = self.op_lock.write().await;
        let state = self.current();
        if state.deposits_paused {
            return Err(VaultError::Paused);
        }

        let managed = self.managed_assets(&state).await?;
        let supply = self.receipt.total_supply().await;
        let minted = math::assets_to_shares(amount, managed, supply)?;
        if minted == 0 {
            // Dust that would buy nothing at the current price.
            return Err(VaultError::ZeroAmount);
        }

        self.asset
            .transfer_from(self.address, caller, self.address, amount)
            .await?;

        if let Err(err) = self.receipt.mint(self.address, receiver, minted).await {
            warn!(%caller, amount, error = %err, "mint failed, refunding deposit");
            if let Err(refund) = self.asset.transfer(self.address, caller, amount).await {
                error!(%caller, amount, error = %refund, "deposit refund failed");
                return Err(VaultError::CompensationFailed {
                    primary: err.into(),
                    compensation: refund.into(),
                });
            }
            return Err(err.into());
        }

        info!(%caller, %receiver, amount, minted, managed, supply, "deposit");
        self.emit(VaultEventKind::Deposit {
            caller,
            receiver,
            amount,
            minted,
        });
        Ok(minted)
    }

    /// Burns `receipt_amount` of the caller's mLRT and pays its share of
    /// managed assets to `receiver` out of the vault's idle balance. Returns
    /// the assets paid.
    pub async fn redeem(
        &self,
        caller: Address,
        receiver: Address,
        receipt_amount: Amount,
    ) -> Result<Amount, VaultError> {
        if receiver.is_zero() {
            return Err(VaultError::ZeroAddress { field: "receiver" });
        }
        if receipt_amount == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let _op = self.op_lock.write().await;
        let state = self.current();

        let managed = self.managed_assets(&state).await?;
        let supply = self.receipt.total_supply().await;
        let assets = math::shares_to_assets(receipt_amount, managed, supply)?;
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let idle = self.asset.balance_of(self.address).await;
        if assets > idle {
            return Err(VaultError::InsufficientIdleAssets {
                requested: assets,
                available: idle,
            });
        }

        self.receipt.burn(self.address, caller, receipt_amount).await?;

        if let Err(err) = self.asset.transfer(self.address, receiver, assets).await {
            warn!(%caller, receipt_amount, error = %err, "payout failed, re-minting burned receipt");
            if let Err(remint) = self.receipt.mint(self.address, caller, receipt_amount).await {
                error!(%caller, receipt_amount, error = %remint, "receipt re-mint failed");
                return Err(VaultError::CompensationFailed {
                    primary: err.into(),
                    compensation: remint.into(),
                });
            }
            return Err(err.into());
        }

        info!(%caller, %receiver, burned = receipt_amount, assets, "redeemed");
        self.emit(VaultEventKind::Redeemed {
            holder: caller,
            receiver,
            burned: receipt_amount,
            assets,
        });
        Ok(assets)
    }

    /// Sets the deposit pause flag. Idempotent.
    pub async fn update_deposits_paused(&self, caller: Address, paused: bool) -> Result<(), VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.check(Role::Admin, caller)?;

        working.deposits_paused = paused;
        self.commit(working);
        info!(paused, %caller, "deposit pause updated");
        self.emit(VaultEventKind::DepositsPausedUpdated { paused });
        Ok(())
    }

    // ---- Delegation ----

    /// Delegates the vault to `operator` and stakes the whole idle balance
    /// into the strategy. Returns the strategy shares received.
    ///
    /// Delegating again to the current operator only stakes new idle funds.
    /// If staking fails right after a fresh delegation, the delegation is
    /// undone.
    pub async fn delegate(&self, caller: Address, operator: Address) -> Result<Amount, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.check(Role::Admin, caller)?;
        if operator.is_zero() {
            return Err(VaultError::ZeroAddress { field: "operator" });
        }

        let previous = self.restaking.delegated_to(self.address).await;
        self.restaking.delegate_to(self.address, operator).await?;

        let idle = self.asset.balance_of(self.address).await;
        let mut shares = 0;
        if idle > 0 {
            match self
                .restaking
                .deposit_into_strategy(self.address, self.config.strategy, idle)
                .await
            {
                Ok(received) => shares = received,
                Err(err) => {
                    if previous.is_none() {
                        warn!(%operator, error = %err, "strategy deposit failed, undelegating");
                        if let Err(undo) = self.restaking.undelegate(self.address).await {
                            error!(%operator, error = %undo, "undelegate after failed stake failed");
                            return Err(VaultError::CompensationFailed {
                                primary: err.into(),
                                compensation: undo.into(),
                            });
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        working.delegated_operator = Some(operator);
        self.commit(working);
        info!(%operator, staked = idle, shares, "delegated");
        self.emit(VaultEventKind::Delegated {
            operator,
            staked: idle,
            shares,
        });
        Ok(shares)
    }

    /// Releases the vault's delegation. Protocol rejections are surfaced.
    pub async fn undelegate(&self, caller: Address) -> Result<(), VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.check(Role::Admin, caller)?;

        self.restaking.undelegate(self.address).await?;

        let operator = working.delegated_operator.take();
        self.commit(working);
        info!(operator = ?operator, "undelegated");
        self.emit(VaultEventKind::Undelegated { operator });
        Ok(())
    }

    // ---- Withdrawal queue ----

    /// Strategy shares the vault holds in the protocol that are not locked
    /// in a queued withdrawal. The protocol removes shares from the staker's
    /// balance when they are queued, so its balance is exactly this amount.
    pub async fn available_share_to_withdraw(&self) -> Amount {
        let _read = self.op_lock.read().await;
        self.staked_shares().await
    }

    /// Queues `shares` for withdrawal and returns the vault nonce the
    /// request was recorded under.
    pub async fn queue_withdrawal(&self, caller: Address, shares: Amount) -> Result<u64, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.check(Role::Admin, caller)?;

        let available = self.staked_shares().await;
        if shares == 0 || shares > available {
            return Err(VaultError::InsufficientAvailableShares {
                requested: shares,
                available,
            });
        }

        let local = working.next_withdrawal_nonce;
        let external = self.restaking.withdrawal_nonce(self.address).await;
        if external != local {
            error!(local, external, "withdrawal nonce ledgers diverged");
            return Err(VaultError::NonceDesync { local, external });
        }

        let queued = self
            .restaking
            .queue_withdrawal(self.address, self.config.strategy, shares)
            .await?;
        if queued.key.nonce != local {
            // Already queued in the protocol; record it under the nonce it
            // really got so it stays completable.
            error!(local, assigned = queued.key.nonce, "protocol assigned an unexpected nonce");
        }

        working.pending_withdrawals.insert(
            local,
            WithdrawalRequest {
                shares,
                requested_at_block: queued.key.start_block,
                completed: false,
                external_nonce: queued.key.nonce,
                withdrawal_root: queued.root.clone(),
            },
        );
        working.next_withdrawal_nonce = local + 1;
        self.commit(working);

        info!(
            nonce = local,
            shares,
            start_block = queued.key.start_block,
            root = %queued.root,
            "withdrawal queued"
        );
        self.emit(VaultEventKind::WithdrawalQueued {
            nonce: local,
            shares,
            start_block: queued.key.start_block,
            root: queued.root,
        });
        Ok(local)
    }

    /// Completes the queued withdrawal of `shares` anchored at `start_block`.
    /// `nonce_offset` is the protocol nonce of the request being completed.
    /// Returns the base asset released into vault custody (`0` when the
    /// shares are re-credited instead).
    pub async fn complete_withdrawal(
        &self,
        caller: Address,
        shares: Amount,
        start_block: BlockNumber,
        receive_as_tokens: bool,
        nonce_offset: u64,
    ) -> Result<Amount, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.check(Role::Admin, caller)?;

        let nonce = working.resolve_withdrawal(shares, start_block, nonce_offset)?;

        let delay = self.effective_withdrawal_delay().await;
        let current = self.chain.current_block();
        let ready_at = start_block.saturating_add(delay);
        if current < ready_at {
            debug!(nonce, start_block, ready_at, current, "withdrawal not ready");
            return Err(VaultError::WithdrawalDelayNotElapsed {
                start_block,
                ready_at,
                current,
            });
        }

        let request = working
            .pending_withdrawals
            .get_mut(&nonce)
            .ok_or(VaultError::WithdrawalNotFound { shares, start_block })?;
        let key = WithdrawalKey {
            staker: self.address,
            strategy: self.config.strategy,
            shares,
            start_block,
            nonce: request.external_nonce,
        };

        let released = self.restaking.complete_withdrawal(&key, receive_as_tokens).await?;

        request.completed = true;
        self.commit(working);

        info!(nonce, shares, released, receive_as_tokens, "withdrawal completed");
        self.emit(VaultEventKind::WithdrawalCompleted {
            nonce,
            shares,
            released,
            receive_as_tokens,
        });
        Ok(released)
    }

    /// Blocks a withdrawal must wait: the configured delay or the
    /// protocol's minimum, whichever is longer.
    pub async fn effective_withdrawal_delay(&self) -> BlockNumber {
        let protocol_min = self.restaking.min_withdrawal_delay_blocks().await;
        self.params.withdrawal_delay_blocks.max(protocol_min)
    }

    // ---- Role administration ----

    pub async fn grant_role(&self, caller: Address, role: Role, account: Address) -> Result<bool, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        let added = working.access.grant_role(caller, role, account)?;
        self.commit(working);
        if added {
            self.emit(VaultEventKind::RoleGranted {
                role,
                account,
                sender: caller,
            });
        }
        Ok(added)
    }

    pub async fn revoke_role(&self, caller: Address, role: Role, account: Address) -> Result<bool, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        let removed = working.access.revoke_role(caller, role, account)?;
        self.commit(working);
        if removed {
            self.emit(VaultEventKind::RoleRevoked {
                role,
                account,
                sender: caller,
            });
        }
        Ok(removed)
    }

    pub async fn renounce_role(&self, caller: Address, role: Role) -> Result<bool, VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        let removed = working.access.renounce_role(caller, role)?;
        self.commit(working);
        if removed {
            self.emit(VaultEventKind::RoleRevoked {
                role,
                account: caller,
                sender: caller,
            });
        }
        Ok(removed)
    }

    /// Moves the root role from `caller` to `new_root`.
    pub async fn transfer_root(&self, caller: Address, new_root: Address) -> Result<(), VaultError> {
        let _op = self.op_lock.write().await;
        let mut working = self.current();
        working.access.transfer_root(caller, new_root)?;
        self.commit(working);
        self.emit(VaultEventKind::RoleGranted {
            role: Role::DefaultAdmin,
            account: new_root,
            sender: caller,
        });
        self.emit(VaultEventKind::RoleRevoked {
            role: Role::DefaultAdmin,
            account: caller,
            sender: caller,
        });
        Ok(())
    }

    // ---- Queries ----

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn params(&self) -> VaultParams {
        self.params
    }

    pub fn has_role(&self, role: Role, account: Address) -> bool {
        self.state.read().access.has_role(role, account)
    }

    /// Accounts holding `role` on the vault, in address order.
    pub fn role_members(&self, role: Role) -> Vec<Address> {
        self.state.read().access.members(role)
    }

    pub fn deposits_paused(&self) -> bool {
        self.state.read().deposits_paused
    }

    pub fn delegated_operator(&self) -> Option<Address> {
        self.state.read().delegated_operator
    }

    pub fn next_withdrawal_nonce(&self) -> u64 {
        self.state.read().next_withdrawal_nonce
    }

    /// A single request by vault nonce, completed or not.
    pub fn withdrawal_request(&self, nonce: u64) -> Option<WithdrawalRequest> {
        self.state.read().pending_withdrawals.get(&nonce).cloned()
    }

    /// Every request ever queued, by nonce.
    pub fn withdrawal_requests(&self) -> Vec<(u64, WithdrawalRequest)> {
        self.state
            .read()
            .pending_withdrawals
            .iter()
            .map(|(nonce, r)| (*nonce, r.clone()))
            .collect()
    }

    /// Requests still waiting for completion, by nonce.
    pub fn pending_withdrawals(&self) -> Vec<(u64, WithdrawalRequest)> {
        self.state
            .read()
            .outstanding()
            .map(|(nonce, r)| (*nonce, r.clone()))
            .collect()
    }

    /// Idle balance plus the underlying value of staked and queued shares.
    pub async fn total_managed_assets(&self) -> Result<Amount, VaultError> {
        let _read = self.op_lock.read().await;
        let state = self.current();
        self.managed_assets(&state).await
    }

    pub async fn idle_assets(&self) -> Amount {
        let _read = self.op_lock.read().await;
        self.asset.balance_of(self.address).await
    }

    pub async fn receipt_supply(&self) -> Amount {
        let _read = self.op_lock.read().await;
        self.receipt.total_supply().await
    }

    pub async fn receipt_balance(&self, account: Address) -> Amount {
        let _read = self.op_lock.read().await;
        self.receipt.balance_of(account).await
    }

    pub fn current_block(&self) -> BlockNumber {
        self.chain.current_block()
    }

    pub async fn status(&self) -> Result<VaultStatus, VaultError> {
        let _read = self.op_lock.read().await;
        let state = self.current();
        let available_shares = self.staked_shares().await;
        let idle_assets = self.asset.balance_of(self.address).await;
        let total_managed_assets = self.managed_assets(&state).await?;
        Ok(VaultStatus {
            vault: self.address,
            deposits_paused: state.deposits_paused,
            delegated_operator: state.delegated_operator,
            available_shares,
            locked_shares: state.locked_shares(),
            idle_assets,
            total_managed_assets,
            receipt_supply: self.receipt.total_supply().await,
            next_withdrawal_nonce: state.next_withdrawal_nonce,
            pending_withdrawals: state.outstanding().count(),
            withdrawal_delay_blocks: self.effective_withdrawal_delay().await,
            current_block: self.chain.current_block(),
        })
    }

    /// The committed state as a persistable snapshot.
    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot::new(self.address, self.config, self.params, self.current())
    }

    /// Subscribes to committed vault events.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    // ---- Internals ----

    fn current(&self) -> VaultState {
        self.state.read().clone()
    }

    fn commit(&self, state: VaultState) {
        *self.state.write() = state;
    }

    fn emit(&self, kind: VaultEventKind) {
        let event = VaultEvent::new(self.chain.current_block(), kind);
        debug!(event = event.name(), block = event.block, "vault event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn staked_shares(&self) -> Amount {
        self.restaking
            .staker_shares(self.address, self.config.strategy)
            .await
    }

    async fn managed_assets(&self, state: &VaultState) -> Result<Amount, VaultError> {
        let idle = self.asset.balance_of(self.address).await;
        let staked = self.staked_shares().await;
        let shares = staked
            .checked_add(state.locked_shares())
            .ok_or(VaultError::ArithmeticOverflow)?;
        let underlying = if shares == 0 {
            0
        } else {
            self.restaking
                .shares_to_underlying(self.config.strategy, shares)
                .await?
        };
        idle.checked_add(underlying).ok_or(VaultError::ArithmeticOverflow)
    }
}

fn check_collaborators(config: &VaultConfig, collaborators: &Collaborators) -> Result<(), VaultError> {
    let pairs = [
        ("base_asset", config.base_asset, collaborators.asset.address()),
        ("receipt_token", config.receipt_token, collaborators.receipt.address()),
        (
            "delegation_manager",
            config.delegation_manager,
            collaborators.restaking.delegation_manager(),
        ),
        (
            "strategy_manager",
            config.strategy_manager,
            collaborators.restaking.strategy_manager(),
        ),
    ];
    for (field, configured, actual) in pairs {
        if configured != actual {
            return Err(VaultError::ConfigMismatch {
                field,
                configured,
                actual,
            });
        }
    }
    Ok(())
}
