//! # Local Deployment
//!
//! Stands up a complete vault on the in-process network: the base-asset
//! ledger, the restaking protocol, the mLRT token and the vault, wired the
//! same way the production deployment is:
//!
//! 1. deploy mLRT with the deployer as root,
//! 2. initialize the vault with the six collaborator addresses,
//! 3. grant `Minter` and `Burner` on mLRT to the vault.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use lrt_protocol::asset::{AssetError, Erc20Ledger};
use lrt_protocol::chain::DevChain;
use lrt_protocol::config::DeploymentConfig;
use lrt_protocol::restaking::SimulatedRestaking;
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::access_control::Role;
use crate::error::VaultError;
use crate::receipt_token::{MlrtToken, TokenError};
use crate::vault::{Collaborators, Vault, VaultConfig, VaultSnapshot};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("receipt token: {0}")]
    Token(#[from] TokenError),

    #[error("vault: {0}")]
    Vault(#[from] VaultError),

    #[error("funding: {0}")]
    Funding(#[from] AssetError),
}

/// Every contract of a local deployment.
#[derive(Clone)]
pub struct LocalDeployment {
    pub config: DeploymentConfig,
    pub chain: Arc<DevChain>,
    pub asset: Arc<Erc20Ledger>,
    pub restaking: Arc<SimulatedRestaking>,
    pub token: Arc<MlrtToken>,
    pub vault: Arc<Vault>,
}

impl LocalDeployment {
    /// Deploys fresh contracts described by `config` on `chain`.
    /// `protocol_min_delay` is the restaking protocol's own withdrawal delay.
    pub fn deploy(
        config: DeploymentConfig,
        chain: Arc<DevChain>,
        protocol_min_delay: BlockNumber,
    ) -> Result<Self, DeployError> {
        let (asset, restaking, token) = Self::collaborators(&config, &chain, protocol_min_delay)?;

        let vault = Vault::initialize(
            config.vault,
            vault_config(&config),
            config.params,
            collaborator_handles(&asset, &token, &restaking, &chain),
        )?;

        token.grant_role(config.admin, Role::Minter, config.vault)?;
        token.grant_role(config.admin, Role::Burner, config.vault)?;
        info!(
            network = %config.network,
            vault = %config.vault,
            token = %config.receipt_token,
            "local deployment complete"
        );

        Ok(Self {
            config,
            chain,
            asset,
            restaking,
            token,
            vault: Arc::new(vault),
        })
    }

    /// Rebuilds a deployment around a persisted vault snapshot. Ledger and
    /// protocol state start empty; only the vault's own state is restored.
    pub fn restore(
        config: DeploymentConfig,
        snapshot: VaultSnapshot,
        chain: Arc<DevChain>,
        protocol_min_delay: BlockNumber,
    ) -> Result<Self, DeployError> {
        let (asset, restaking, token) = Self::collaborators(&config, &chain, protocol_min_delay)?;
        let vault = Vault::restore(snapshot, collaborator_handles(&asset, &token, &restaking, &chain))?;
        token.grant_role(config.admin, Role::Minter, vault.address())?;
        token.grant_role(config.admin, Role::Burner, vault.address())?;
        Ok(Self {
            config,
            chain,
            asset,
            restaking,
            token,
            vault: Arc::new(vault),
        })
    }

    fn collaborators(
        config: &DeploymentConfig,
        chain: &Arc<DevChain>,
        protocol_min_delay: BlockNumber,
    ) -> Result<(Arc<Erc20Ledger>, Arc<SimulatedRestaking>, Arc<MlrtToken>), DeployError> {
        let asset = Arc::new(Erc20Ledger::new(config.base_asset, "stETH"));
        let restaking = Arc::new(SimulatedRestaking::new(
            config.delegation_manager,
            config.strategy_manager,
            config.strategy,
            Arc::clone(&asset),
            chain.clone(),
            protocol_min_delay,
        ));
        if let Some(operator) = config.operator {
            restaking.register_operator(operator);
        }
        let token = Arc::new(MlrtToken::new(config.receipt_token, config.admin)?);
        Ok((asset, restaking, token))
    }

    /// Credits `amount` of the base asset to `account` and approves the vault
    /// to pull it, the local stand-in for acquiring stETH and approving.
    pub fn fund(&self, account: Address, amount: Amount) -> Result<(), DeployError> {
        self.asset.mint(account, amount)?;
        let allowance = self.asset.allowance(account, self.config.vault);
        self.asset
            .approve(account, self.config.vault, allowance.saturating_add(amount))?;
        Ok(())
    }
}

fn vault_config(config: &DeploymentConfig) -> VaultConfig {
    VaultConfig {
        base_asset: config.base_asset,
        receipt_token: config.receipt_token,
        admin: config.admin,
        delegation_manager: config.delegation_manager,
        strategy_manager: config.strategy_manager,
        strategy: config.strategy,
    }
}

fn collaborator_handles(
    asset: &Arc<Erc20Ledger>,
    token: &Arc<MlrtToken>,
    restaking: &Arc<SimulatedRestaking>,
    chain: &Arc<DevChain>,
) -> Collaborators {
    Collaborators {
        asset: asset.clone(),
        receipt: token.clone(),
        restaking: restaking.clone(),
        chain: chain.clone(),
    }
}
