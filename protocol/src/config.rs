//! # Protocol Configuration & Constants
//!
//! Every fixed number the vault relies on lives here, along with the
//! network profiles the node can target and the JSON deployment file that
//! records where each collaborator lives.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Address, Amount, BlockNumber, WAD};

// ---------------------------------------------------------------------------
// Receipt Token
// ---------------------------------------------------------------------------

/// Receipt token name.
pub const RECEIPT_TOKEN_NAME: &str = "mLRT";

/// Receipt token ticker.
pub const RECEIPT_TOKEN_SYMBOL: &str = "mLRT";

/// Receipt token decimals, matching the base asset.
pub const RECEIPT_TOKEN_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Crate version reported by the node and the status endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Current layout of persisted vault snapshots. Version 1 predates the
/// external nonce and withdrawal root stored on each request.
pub const SNAPSHOT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Withdrawal Timing
// ---------------------------------------------------------------------------

/// Blocks a queued withdrawal waits before it can be completed, unless the
/// deployment overrides it. The restaking protocol's own minimum still
/// applies on top.
pub const DEFAULT_WITHDRAWAL_DELAY_BLOCKS: BlockNumber = 20;

/// Interval at which the dev node mines a block.
pub const DEV_BLOCK_TIME: Duration = Duration::from_secs(2);

/// Starting balance of each funded dev account on the local network.
pub const DEV_ACCOUNT_BALANCE: Amount = 1_000 * WAD;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default admin API port.
pub const DEFAULT_API_PORT: u16 = 8645;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9646;

/// Capacity of the vault event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

// ---------------------------------------------------------------------------
// Network Profiles
// ---------------------------------------------------------------------------

/// A chain the deployment scripts know how to reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub chain_id: u64,
    /// JSON-RPC endpoint. `None` for the in-process chain.
    pub rpc_url: Option<String>,
    /// Whether the chain is mined locally on demand.
    pub local: bool,
}

/// Names accepted by [`network_profile`].
pub const KNOWN_NETWORKS: [&str; 4] = ["hardhat", "holesky", "lholesky", "tenderly"];

/// Looks up a built-in network profile. The tenderly devnet URL is private
/// to each account, so it comes from `TENDERLY_RPC_URL` when set.
pub fn network_profile(name: &str) -> Option<NetworkProfile> {
    let profile = match name {
        "hardhat" => NetworkProfile {
            name: "hardhat".into(),
            chain_id: 31_337,
            rpc_url: None,
            local: true,
        },
        "holesky" => NetworkProfile {
            name: "holesky".into(),
            chain_id: 17_000,
            rpc_url: Some("https://1rpc.io/holesky".into()),
            local: false,
        },
        // Local fork of holesky.
        "lholesky" => NetworkProfile {
            name: "lholesky".into(),
            chain_id: 17_000,
            rpc_url: Some("http://127.0.0.1:8545/".into()),
            local: true,
        },
        "tenderly" => NetworkProfile {
            name: "tenderly".into(),
            chain_id: 17_000,
            rpc_url: std::env::var("TENDERLY_RPC_URL").ok(),
            local: false,
        },
        _ => return None,
    };
    Some(profile)
}

// ---------------------------------------------------------------------------
// Vault Parameters
// ---------------------------------------------------------------------------

/// Tunables applied at vault initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParams {
    /// Locally enforced withdrawal delay in blocks.
    pub withdrawal_delay_blocks: BlockNumber,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            withdrawal_delay_blocks: DEFAULT_WITHDRAWAL_DELAY_BLOCKS,
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment File
// ---------------------------------------------------------------------------

/// Errors loading or validating a deployment file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read deployment file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed deployment file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown network '{0}'")]
    UnknownNetwork(String),
}

/// Addresses and parameters of one vault deployment, written by the
/// `deploy` command and read by every other command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub network: String,
    pub base_asset: Address,
    pub receipt_token: Address,
    pub vault: Address,
    pub admin: Address,
    pub delegation_manager: Address,
    pub strategy_manager: Address,
    pub strategy: Address,
    /// Operator the delegate script targets when none is given.
    #[serde(default)]
    pub operator: Option<Address>,
    #[serde(default)]
    pub params: VaultParams,
}

impl DeploymentConfig {
    /// Deterministic addresses for a fresh local deployment.
    pub fn local(network: &str, admin: Address) -> Self {
        Self {
            network: network.to_string(),
            base_asset: Address::labeled("stETH"),
            receipt_token: Address::labeled("mLRT"),
            vault: Address::labeled("LRTMaster"),
            admin,
            delegation_manager: Address::labeled("DelegationManager"),
            strategy_manager: Address::labeled("StrategyManager"),
            strategy: Address::labeled("stETHStrategy"),
            operator: Some(Address::labeled("operator")),
            params: VaultParams::default(),
        }
    }

    /// Parses a deployment file and checks its network name.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.profile()?;
        Ok(config)
    }

    /// Reads a deployment file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Writes the deployment file as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The profile of the network this deployment targets.
    pub fn profile(&self) -> Result<NetworkProfile, ConfigError> {
        network_profile(&self.network).ok_or_else(|| ConfigError::UnknownNetwork(self.network.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_networks_resolve() {
        for name in KNOWN_NETWORKS {
            let profile = network_profile(name).unwrap();
            assert_eq!(profile.name, name);
        }
        assert_eq!(network_profile("hardhat").unwrap().chain_id, 31_337);
        assert_eq!(
            network_profile("holesky").unwrap().rpc_url.as_deref(),
            Some("https://1rpc.io/holesky")
        );
        assert!(network_profile("mainnet").is_none());
    }

    #[test]
    fn default_delay_is_twenty_blocks() {
        assert_eq!(VaultParams::default().withdrawal_delay_blocks, 20);
    }

    #[test]
    fn deployment_round_trips_through_json() {
        let config = DeploymentConfig::local("hardhat", Address::labeled("deployer"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"0x"));
        assert_eq!(DeploymentConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn params_default_when_missing() {
        let mut value = serde_json::to_value(DeploymentConfig::local("holesky", Address::labeled("a"))).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("params");
        obj.remove("operator");
        let config = DeploymentConfig::from_json(&value.to_string()).unwrap();
        assert_eq!(config.params, VaultParams::default());
        assert_eq!(config.operator, None);
    }

    #[test]
    fn unknown_network_rejected() {
        let config = DeploymentConfig::local("ropsten", Address::labeled("a"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(matches!(
            DeploymentConfig::from_json(&json),
            Err(ConfigError::UnknownNetwork(name)) if name == "ropsten"
        ));
    }

    #[test]
    fn receipt_token_metadata() {
        assert_eq!(RECEIPT_TOKEN_NAME, "mLRT");
        assert_eq!(RECEIPT_TOKEN_SYMBOL, "mLRT");
        assert_eq!(RECEIPT_TOKEN_DECIMALS, 18);
    }
}
