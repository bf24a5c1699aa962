//! # CLI Interface
//!
//! Defines the command-line argument structure for `lrt-node` using `clap`
//! derive. `run` hosts a local network with a deployed vault; the
//! operational subcommands talk to a running node over JSON-RPC; `snapshot`
//! and `migrate` work on a stopped node's data directory.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use lrt_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_WITHDRAWAL_DELAY_BLOCKS};
use lrt_protocol::types::parse_ether;
use lrt_protocol::{Address, Amount};

/// mLRT liquid-restaking vault node.
///
/// Runs the vault on an in-process development network, serves the admin
/// API and Prometheus metrics, and drives the operator workflows: deposit,
/// delegate, queue and complete withdrawals.
#[derive(Parser, Debug)]
#[command(
    name = "lrt-node",
    about = "mLRT liquid-restaking vault node",
    version,
    propagate_version = true
)]
pub struct LrtNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a local network with a deployed vault.
    Run(RunArgs),
    /// Write a deployment file for a network.
    Deploy(DeployArgs),
    /// Deposit the base asset and receive mLRT.
    Deposit(DepositArgs),
    /// Burn mLRT for the base asset held idle by the vault.
    Redeem(RedeemArgs),
    /// Delegate the vault to an operator and stake its idle balance.
    Delegate(DelegateArgs),
    /// Release the vault's delegation.
    Undelegate(CallerArgs),
    /// Queue staked shares for withdrawal.
    QueueWithdrawal(QueueArgs),
    /// Complete a queued withdrawal once its delay has passed.
    CompleteWithdrawal(CompleteArgs),
    /// Pause or resume deposits.
    Pause(PauseArgs),
    /// Mine blocks on the local network.
    Mine(MineArgs),
    /// Credit base asset to an account on the local network.
    Fund(FundArgs),
    /// Print a running node's vault status.
    Status(ConnectArgs),
    /// Print the vault snapshot stored in a data directory.
    Snapshot(DataDirArgs),
    /// Upgrade a data directory's snapshot to the current layout.
    Migrate(DataDirArgs),
    /// Run the full deposit, delegate, withdraw flow in-process.
    Demo(DemoArgs),
    /// Print version information and exit.
    Version,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Deployment file. A fresh local deployment is used when omitted.
    #[arg(long, short = 'c', env = "LRT_DEPLOYMENT")]
    pub deployment: Option<PathBuf>,

    /// Network profile for a fresh deployment.
    #[arg(long, env = "LRT_NETWORK", default_value = "hardhat")]
    pub network: String,

    /// Directory holding the vault store.
    #[arg(long, short = 'd', env = "LRT_DATA_DIR", default_value = ".lrt")]
    pub data_dir: PathBuf,

    /// Resume from the vault snapshot in the data directory instead of
    /// deploying fresh contracts.
    #[arg(long)]
    pub resume: bool,

    /// Interface the API and metrics servers bind to. JSON-RPC callers name
    /// their own sending account, so expose the node beyond loopback only on
    /// a trusted network.
    #[arg(long, env = "LRT_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Port for the admin API and JSON-RPC.
    #[arg(long, env = "LRT_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LRT_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Milliseconds between mined blocks. 0 disables auto-mining.
    #[arg(long, env = "LRT_BLOCK_TIME_MS", default_value_t = 2_000)]
    pub block_time_ms: u64,

    /// The restaking protocol's own minimum withdrawal delay, in blocks.
    #[arg(long, env = "LRT_PROTOCOL_MIN_DELAY", default_value_t = 0)]
    pub protocol_min_delay: u64,

    /// Accounts credited with dev funds at startup, in addition to the admin.
    #[arg(long = "fund", value_parser = parse_account)]
    pub funded: Vec<Address>,

    #[arg(long, env = "LRT_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

/// Arguments for the `deploy` subcommand.
#[derive(Args, Debug)]
pub struct DeployArgs {
    #[arg(long, env = "LRT_NETWORK", default_value = "hardhat")]
    pub network: String,

    /// Deployer, who becomes root and administrator.
    #[arg(long, value_parser = parse_account, default_value = "deployer")]
    pub admin: Address,

    /// Where to write the deployment file.
    #[arg(long, short = 'o', default_value = "deployment.json")]
    pub out: PathBuf,

    #[arg(long, default_value_t = DEFAULT_WITHDRAWAL_DELAY_BLOCKS)]
    pub withdrawal_delay_blocks: u64,

    /// Base asset (stETH) address.
    #[arg(long, value_parser = parse_account)]
    pub base_asset: Option<Address>,

    #[arg(long, value_parser = parse_account)]
    pub delegation_manager: Option<Address>,

    #[arg(long, value_parser = parse_account)]
    pub strategy_manager: Option<Address>,

    #[arg(long, value_parser = parse_account)]
    pub strategy: Option<Address>,

    /// Default operator for `delegate`.
    #[arg(long, value_parser = parse_account)]
    pub operator: Option<Address>,
}

/// Where to reach a running node.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    #[arg(long, env = "LRT_RPC_URL", default_value = "http://127.0.0.1:8645")]
    pub rpc_url: String,
}

/// A node connection plus the account sending the call.
#[derive(Args, Debug)]
pub struct CallerArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Sending account, as hex or a dev label such as `deployer`.
    #[arg(long, value_parser = parse_account, default_value = "deployer")]
    pub from: Address,
}

#[derive(Args, Debug)]
pub struct DepositArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Amount of base asset, in whole tokens (e.g. `0.1`).
    #[arg(value_parser = parse_amount)]
    pub amount: Amount,

    /// Receiver of the minted mLRT. Defaults to the sender.
    #[arg(long, value_parser = parse_account)]
    pub receiver: Option<Address>,
}

#[derive(Args, Debug)]
pub struct RedeemArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Amount of mLRT to burn, in whole tokens.
    #[arg(value_parser = parse_amount)]
    pub amount: Amount,

    #[arg(long, value_parser = parse_account)]
    pub receiver: Option<Address>,
}

#[derive(Args, Debug)]
pub struct DelegateArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Operator to delegate to. Defaults to the deployment's operator.
    #[arg(value_parser = parse_account)]
    pub operator: Option<Address>,
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Shares to queue, in whole units. Defaults to everything available.
    #[arg(value_parser = parse_amount)]
    pub shares: Option<Amount>,
}

#[derive(Args, Debug)]
pub struct CompleteArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Vault nonce of the request, as printed by `queue-withdrawal`.
    pub nonce: u64,

    /// Re-credit the shares instead of receiving the base asset.
    #[arg(long)]
    pub as_shares: bool,
}

#[derive(Args, Debug)]
pub struct PauseArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// Resume deposits instead of pausing them.
    #[arg(long)]
    pub resume: bool,
}

#[derive(Args, Debug)]
pub struct MineArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[arg(default_value_t = 1)]
    pub blocks: u64,
}

#[derive(Args, Debug)]
pub struct FundArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[arg(value_parser = parse_account)]
    pub account: Address,

    #[arg(value_parser = parse_amount)]
    pub amount: Amount,
}

#[derive(Args, Debug)]
pub struct DataDirArgs {
    #[arg(long, short = 'd', env = "LRT_DATA_DIR", default_value = ".lrt")]
    pub data_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Amount deposited by the demo account, in whole tokens.
    #[arg(long, value_parser = parse_amount, default_value = "0.1")]
    pub amount: Amount,

    /// Rewards accrued to the strategy while the withdrawal waits.
    #[arg(long, value_parser = parse_amount, default_value = "0")]
    pub rewards: Amount,
}

/// Accepts a `0x` hex address or a dev label resolved with
/// [`Address::labeled`].
pub fn parse_account(s: &str) -> Result<Address, String> {
    if s.starts_with("0x") || s.starts_with("0X") {
        s.parse::<Address>().map_err(|e| e.to_string())
    } else if s.is_empty() {
        Err("empty account".into())
    } else {
        Ok(Address::labeled(s))
    }
}

fn parse_amount(s: &str) -> Result<Amount, String> {
    parse_ether(s).map_err(|e| e.to_string())
}
