//! In-process restaking protocol.
//!
//! Implements the [`RestakingProtocol`] contract against an [`Erc20Ledger`]
//! for a single strategy. Shares are priced against the strategy's token
//! balance, so minting base asset into the strategy address with
//! [`SimulatedRestaking::accrue_rewards`] raises the value of every share.
//! Queued shares stay in the strategy's share supply until completed, the
//! same way a real strategy only burns shares on withdrawal completion.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::{QueuedWithdrawal, RestakingError, RestakingProtocol, WithdrawalKey};
use crate::asset::Erc20Ledger;
use crate::chain::BlockSource;
use crate::math::mul_div;
use crate::types::{Address, Amount, BlockNumber};

#[derive(Debug, Default)]
struct SimState {
    operators: HashSet<Address>,
    delegations: HashMap<Address, Address>,
    operator_shares: HashMap<Address, Amount>,
    shares: HashMap<Address, Amount>,
    total_shares: Amount,
    nonces: HashMap<Address, u64>,
    queued: HashMap<[u8; 32], WithdrawalKey>,
}

/// Delegation manager, strategy manager and one strategy, all in memory.
pub struct SimulatedRestaking {
    delegation_manager: Address,
    strategy_manager: Address,
    strategy: Address,
    asset: Arc<Erc20Ledger>,
    chain: Arc<dyn BlockSource>,
    min_delay: BlockNumber,
    state: Mutex<SimState>,
}

impl SimulatedRestaking {
    /// Creates the protocol. `strategy` is also the account that custodies
    /// the strategy's base asset.
    pub fn new(
        delegation_manager: Address,
        strategy_manager: Address,
        strategy: Address,
        asset: Arc<Erc20Ledger>,
        chain: Arc<dyn BlockSource>,
        min_delay: BlockNumber,
    ) -> Self {
        Self {
            delegation_manager,
            strategy_manager,
            strategy,
            asset,
            chain,
            min_delay,
            state: Mutex::new(SimState::default()),
        }
    }

    /// The single strategy this protocol runs.
    pub fn strategy(&self) -> Address {
        self.strategy
    }

    /// Registers `operator` so stakers may delegate to it.
    pub fn register_operator(&self, operator: Address) {
        self.state.lock().operators.insert(operator);
        info!(%operator, "operator registered");
    }

    /// Shares currently delegated to `operator`.
    pub fn operator_shares(&self, operator: Address) -> Amount {
        self.state
            .lock()
            .operator_shares
            .get(&operator)
            .copied()
            .unwrap_or(0)
    }

    /// Number of withdrawals still waiting for completion across all stakers.
    pub fn queued_count(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Simulates restaking yield by minting base asset into the strategy.
    pub fn accrue_rewards(&self, amount: Amount) -> Result<(), RestakingError> {
        self.asset.mint(self.strategy, amount)?;
        debug!(amount, "strategy rewards accrued");
        Ok(())
    }

    fn check_strategy(&self, strategy: Address) -> Result<(), RestakingError> {
        if strategy != self.strategy {
            return Err(RestakingError::UnknownStrategy(strategy));
        }
        Ok(())
    }

    fn underlying(&self, total_shares: Amount, shares: Amount) -> Result<Amount, RestakingError> {
        let balance = self.asset.balance(self.strategy);
        if total_shares == 0 {
            return Ok(shares);
        }
        Ok(mul_div(shares, balance, total_shares)?)
    }
}

fn add_operator_shares(state: &mut SimState, staker: Address, delta: Amount) {
    if let Some(operator) = state.delegations.get(&staker).copied() {
        *state.operator_shares.entry(operator).or_insert(0) += delta;
    }
}

fn remove_operator_shares(state: &mut SimState, staker: Address, delta: Amount) {
    if let Some(operator) = state.delegations.get(&staker).copied() {
        let entry = state.operator_shares.entry(operator).or_insert(0);
        *entry = entry.saturating_sub(delta);
    }
}

#[async_trait]
impl RestakingProtocol for SimulatedRestaking {
    fn delegation_manager(&self) -> Address {
        self.delegation_manager
    }

    fn strategy_manager(&self) -> Address {
        self.strategy_manager
    }

    async fn min_withdrawal_delay_blocks(&self) -> BlockNumber {
        self.min_delay
    }

    async fn delegated_to(&self, staker: Address) -> Option<Address> {
        self.state.lock().delegations.get(&staker).copied()
    }

    async fn delegate_to(&self, staker: Address, operator: Address) -> Result<(), RestakingError> {
        let mut state = self.state.lock();
        if !state.operators.contains(&operator) {
            return Err(RestakingError::OperatorNotRegistered(operator));
        }
        match state.delegations.get(&staker).copied() {
            Some(current) if current == operator => return Ok(()),
            Some(current) => {
                return Err(RestakingError::AlreadyDelegated { staker, current });
            }
            None => {}
        }

        state.delegations.insert(staker, operator);
        let shares = state.shares.get(&staker).copied().unwrap_or(0);
        *state.operator_shares.entry(operator).or_insert(0) += shares;
        info!(%staker, %operator, shares, "staker delegated");
        Ok(())
    }

    async fn undelegate(&self, staker: Address) -> Result<(), RestakingError> {
        let mut state = self.state.lock();
        let shares = state.shares.get(&staker).copied().unwrap_or(0);
        remove_operator_shares(&mut state, staker, shares);
        let operator = state
            .delegations
            .remove(&staker)
            .ok_or(RestakingError::NotDelegated(staker))?;
        info!(%staker, %operator, "staker undelegated");
        Ok(())
    }

    async fn deposit_into_strategy(
        &self,
        staker: Address,
        strategy: Address,
        amount: Amount,
    ) -> Result<Amount, RestakingError> {
        self.check_strategy(strategy)?;
        let mut state = self.state.lock();

        let balance = self.asset.balance(self.strategy);
        let shares = if state.total_shares == 0 || balance == 0 {
            amount
        } else {
            mul_div(amount, state.total_shares, balance)?
        };
        if shares == 0 {
            return Err(RestakingError::ZeroShares);
        }

        self.asset.move_tokens(staker, self.strategy, amount)?;

        *state.shares.entry(staker).or_insert(0) += shares;
        state.total_shares += shares;
        add_operator_shares(&mut state, staker, shares);
        debug!(%staker, amount, shares, "deposited into strategy");
        Ok(shares)
    }

    async fn staker_shares(&self, staker: Address, strategy: Address) -> Amount {
        if strategy != self.strategy {
            return 0;
        }
        self.state.lock().shares.get(&staker).copied().unwrap_or(0)
    }

    async fn shares_to_underlying(
        &self,
        strategy: Address,
        shares: Amount,
    ) -> Result<Amount, RestakingError> {
        self.check_strategy(strategy)?;
        let total = self.state.lock().total_shares;
        self.underlying(total, shares)
    }

    async fn withdrawal_nonce(&self, staker: Address) -> u64 {
        self.state.lock().nonces.get(&staker).copied().unwrap_or(0)
    }

    async fn queue_withdrawal(
        &self,
        staker: Address,
        strategy: Address,
        shares: Amount,
    ) -> Result<QueuedWithdrawal, RestakingError> {
        self.check_strategy(strategy)?;
        if shares == 0 {
            return Err(RestakingError::ZeroShares);
        }

        let mut state = self.state.lock();
        let available = state.shares.get(&staker).copied().unwrap_or(0);
        if shares > available {
            return Err(RestakingError::InsufficientShares {
                requested: shares,
                available,
            });
        }

        let nonce = state.nonces.get(&staker).copied().unwrap_or(0);
        let key = WithdrawalKey {
            staker,
            strategy,
            shares,
            start_block: self.chain.current_block(),
            nonce,
        };
        let root = key.root();

        state.shares.insert(staker, available - shares);
        remove_operator_shares(&mut state, staker, shares);
        state.nonces.insert(staker, nonce + 1);
        state.queued.insert(root, key);

        info!(%staker, shares, nonce, start_block = key.start_block, "withdrawal queued");
        Ok(QueuedWithdrawal {
            key,
            root: hex::encode(root),
        })
    }

    async fn complete_withdrawal(
        &self,
        key: &WithdrawalKey,
        receive_as_tokens: bool,
    ) -> Result<Amount, RestakingError> {
        self.check_strategy(key.strategy)?;
        let mut state = self.state.lock();

        let root = key.root();
        if !state.queued.contains_key(&root) {
            return Err(RestakingError::WithdrawalNotFound {
                root: hex::encode(root),
            });
        }

        let current = self.chain.current_block();
        let ready_at = key.start_block.saturating_add(self.min_delay);
        if current < ready_at {
            return Err(RestakingError::DelayNotElapsed {
                start_block: key.start_block,
                ready_at,
                current,
            });
        }

        let released = if receive_as_tokens {
            let amount = self.underlying(state.total_shares, key.shares)?;
            self.asset.move_tokens(self.strategy, key.staker, amount)?;
            state.total_shares -= key.shares;
            amount
        } else {
            *state.shares.entry(key.staker).or_insert(0) += key.shares;
            add_operator_shares(&mut state, key.staker, key.shares);
            0
        };

        state.queued.remove(&root);
        info!(
            staker = %key.staker,
            nonce = key.nonce,
            shares = key.shares,
            released,
            receive_as_tokens,
            "withdrawal completed"
        );
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DevChain;

    struct Fixture {
        protocol: SimulatedRestaking,
        asset: Arc<Erc20Ledger>,
        chain: Arc<DevChain>,
        staker: Address,
        operator: Address,
        strategy: Address,
    }

    fn fixture() -> Fixture {
        let asset = Arc::new(Erc20Ledger::new(Address::labeled("stETH"), "stETH"));
        let chain = Arc::new(DevChain::at(1_000));
        let strategy = Address::labeled("strategy");
        let protocol = SimulatedRestaking::new(
            Address::labeled("delegation-manager"),
            Address::labeled("strategy-manager"),
            strategy,
            Arc::clone(&asset),
            chain.clone(),
            10,
        );
        let staker = Address::labeled("vault");
        let operator = Address::labeled("operator");
        protocol.register_operator(operator);
        asset.mint(staker, 1_000).unwrap();
        Fixture {
            protocol,
            asset,
            chain,
            staker,
            operator,
            strategy,
        }
    }

    #[tokio::test]
    async fn deposit_credits_shares_one_to_one_initially() {
        let f = fixture();
        let shares = f
            .protocol
            .deposit_into_strategy(f.staker, f.strategy, 600)
            .await
            .unwrap();
        assert_eq!(shares, 600);
        assert_eq!(f.protocol.staker_shares(f.staker, f.strategy).await, 600);
        assert_eq!(f.asset.balance(f.strategy), 600);
        assert_eq!(f.asset.balance(f.staker), 400);
    }

    #[tokio::test]
    async fn rewards_raise_share_value() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 500)
            .await
            .unwrap();
        f.protocol.accrue_rewards(500).unwrap();
        assert_eq!(
            f.protocol.shares_to_underlying(f.strategy, 100).await.unwrap(),
            200
        );
        // New deposits buy fewer shares after the price doubled.
        let shares = f
            .protocol
            .deposit_into_strategy(f.staker, f.strategy, 100)
            .await
            .unwrap();
        assert_eq!(shares, 50);
    }

    #[tokio::test]
    async fn delegation_rules() {
        let f = fixture();
        let stranger = Address::labeled("unregistered");
        assert_eq!(
            f.protocol.delegate_to(f.staker, stranger).await,
            Err(RestakingError::OperatorNotRegistered(stranger))
        );

        f.protocol.delegate_to(f.staker, f.operator).await.unwrap();
        // Same operator again is a no-op.
        f.protocol.delegate_to(f.staker, f.operator).await.unwrap();

        let other = Address::labeled("operator-2");
        f.protocol.register_operator(other);
        assert!(matches!(
            f.protocol.delegate_to(f.staker, other).await,
            Err(RestakingError::AlreadyDelegated { .. })
        ));

        f.protocol.undelegate(f.staker).await.unwrap();
        assert_eq!(
            f.protocol.undelegate(f.staker).await,
            Err(RestakingError::NotDelegated(f.staker))
        );
    }

    #[tokio::test]
    async fn operator_shares_follow_delegation() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 300)
            .await
            .unwrap();
        f.protocol.delegate_to(f.staker, f.operator).await.unwrap();
        assert_eq!(f.protocol.operator_shares(f.operator), 300);

        f.protocol
            .queue_withdrawal(f.staker, f.strategy, 100)
            .await
            .unwrap();
        assert_eq!(f.protocol.operator_shares(f.operator), 200);

        f.protocol.undelegate(f.staker).await.unwrap();
        assert_eq!(f.protocol.operator_shares(f.operator), 0);
    }

    #[tokio::test]
    async fn queue_assigns_sequential_nonces() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 1_000)
            .await
            .unwrap();
        let first = f.protocol.queue_withdrawal(f.staker, f.strategy, 100).await.unwrap();
        let second = f.protocol.queue_withdrawal(f.staker, f.strategy, 100).await.unwrap();
        assert_eq!(first.key.nonce, 0);
        assert_eq!(second.key.nonce, 1);
        assert_eq!(f.protocol.withdrawal_nonce(f.staker).await, 2);
        assert_eq!(f.protocol.staker_shares(f.staker, f.strategy).await, 800);
        assert_eq!(f.protocol.queued_count(), 2);
    }

    #[tokio::test]
    async fn queue_rejects_more_than_held() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 100)
            .await
            .unwrap();
        assert_eq!(
            f.protocol.queue_withdrawal(f.staker, f.strategy, 101).await,
            Err(RestakingError::InsufficientShares {
                requested: 101,
                available: 100
            })
        );
        assert_eq!(f.protocol.withdrawal_nonce(f.staker).await, 0);
    }

    #[tokio::test]
    async fn completion_enforces_delay_and_identity() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 500)
            .await
            .unwrap();
        let queued = f.protocol.queue_withdrawal(f.staker, f.strategy, 500).await.unwrap();

        f.chain.mine_blocks(9);
        assert!(matches!(
            f.protocol.complete_withdrawal(&queued.key, true).await,
            Err(RestakingError::DelayNotElapsed { ready_at: 1_010, current: 1_009, .. })
        ));

        f.chain.mine();
        let wrong = WithdrawalKey {
            nonce: 1,
            ..queued.key
        };
        assert!(matches!(
            f.protocol.complete_withdrawal(&wrong, true).await,
            Err(RestakingError::WithdrawalNotFound { .. })
        ));

        let released = f.protocol.complete_withdrawal(&queued.key, true).await.unwrap();
        assert_eq!(released, 500);
        assert_eq!(f.asset.balance(f.staker), 1_000);
        assert_eq!(f.protocol.queued_count(), 0);

        // A root can only be consumed once.
        assert!(matches!(
            f.protocol.complete_withdrawal(&queued.key, true).await,
            Err(RestakingError::WithdrawalNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn completion_as_shares_recredits_staker() {
        let f = fixture();
        f.protocol
            .deposit_into_strategy(f.staker, f.strategy, 400)
            .await
            .unwrap();
        let queued = f.protocol.queue_withdrawal(f.staker, f.strategy, 400).await.unwrap();
        f.chain.mine_blocks(10);
        let released = f.protocol.complete_withdrawal(&queued.key, false).await.unwrap();
        assert_eq!(released, 0);
        assert_eq!(f.protocol.staker_shares(f.staker, f.strategy).await, 400);
        assert_eq!(f.asset.balance(f.staker), 600);
    }

    #[tokio::test]
    async fn unknown_strategy_rejected() {
        let f = fixture();
        let bogus = Address::labeled("bogus");
        assert_eq!(
            f.protocol.deposit_into_strategy(f.staker, bogus, 1).await,
            Err(RestakingError::UnknownStrategy(bogus))
        );
        assert_eq!(f.protocol.staker_shares(f.staker, bogus).await, 0);
    }
}
