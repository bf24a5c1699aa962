// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # mLRT Vault Node
//!
//! Entry point for the `lrt-node` binary. Parses CLI arguments, initializes
//! logging and metrics, hosts the vault on a local network and serves the
//! admin API.
//!
//! - `run`                  - host a local network with a deployed vault
//! - `deploy`               - write a deployment file
//! - `deposit` … `fund`     - operator calls against a running node
//! - `status`               - query a running node's status endpoint
//! - `snapshot` / `migrate` - inspect or upgrade a stopped node's store
//! - `demo`                 - the full flow in-process
//! - `version`              - print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use lrt_contracts::{LocalDeployment, Vault, VaultStore};
use lrt_protocol::chain::DevChain;
use lrt_protocol::config::{DeploymentConfig, VaultParams, DEV_ACCOUNT_BALANCE, PROTOCOL_VERSION};
use lrt_protocol::types::format_ether;
use lrt_protocol::Address;

use cli::{Commands, LrtNodeCli};
use logging::LogFormat;
use metrics::VaultMetrics;

/// Directory inside the data dir that holds the sled store.
const STORE_DIR: &str = "vault";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LrtNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Deploy(args) => deploy(args),
        Commands::Deposit(args) => {
            let receiver = args.receiver.unwrap_or(args.caller.from);
            let params = serde_json::json!({
                "caller": args.caller.from.to_hex(),
                "receiver": receiver.to_hex(),
                "amount": args.amount.to_string(),
            });
            call(&args.caller.connect.rpc_url, "lrt_deposit", params).await
        }
        Commands::Redeem(args) => {
            let receiver = args.receiver.unwrap_or(args.caller.from);
            let params = serde_json::json!({
                "caller": args.caller.from.to_hex(),
                "receiver": receiver.to_hex(),
                "amount": args.amount.to_string(),
            });
            call(&args.caller.connect.rpc_url, "lrt_redeem", params).await
        }
        Commands::Delegate(args) => {
            let mut params = serde_json::json!({ "caller": args.caller.from.to_hex() });
            if let Some(operator) = args.operator {
                params["operator"] = serde_json::json!(operator.to_hex());
            }
            call(&args.caller.connect.rpc_url, "lrt_delegate", params).await
        }
        Commands::Undelegate(args) => {
            let params = serde_json::json!({ "caller": args.from.to_hex() });
            call(&args.connect.rpc_url, "lrt_undelegate", params).await
        }
        Commands::QueueWithdrawal(args) => {
            let mut params = serde_json::json!({ "caller": args.caller.from.to_hex() });
            if let Some(shares) = args.shares {
                params["shares"] = serde_json::json!(shares.to_string());
            }
            call(&args.caller.connect.rpc_url, "lrt_queueWithdrawal", params).await
        }
        Commands::CompleteWithdrawal(args) => {
            let params = serde_json::json!({
                "caller": args.caller.from.to_hex(),
                "nonce": args.nonce,
                "receive_as_tokens": !args.as_shares,
            });
            call(&args.caller.connect.rpc_url, "lrt_completeWithdrawal", params).await
        }
        Commands::Pause(args) => {
            let params = serde_json::json!({
                "caller": args.caller.from.to_hex(),
                "paused": !args.resume,
            });
            call(&args.caller.connect.rpc_url, "lrt_updateDepositsPaused", params).await
        }
        Commands::Mine(args) => {
            let params = serde_json::json!({ "blocks": args.blocks });
            call(&args.connect.rpc_url, "lrt_mine", params).await
        }
        Commands::Fund(args) => {
            let params = serde_json::json!({
                "account": args.account.to_hex(),
                "amount": args.amount.to_string(),
            });
            call(&args.connect.rpc_url, "lrt_fund", params).await
        }
        Commands::Status(args) => query_status(args).await,
        Commands::Snapshot(args) => print_snapshot(&args.data_dir),
        Commands::Migrate(args) => migrate_store(&args.data_dir),
        Commands::Demo(args) => run_demo(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Hosts a local network: the deployed contracts, the auto-miner, the
/// admin API and the metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::from(args.log_format));

    let config = match &args.deployment {
        Some(path) => DeploymentConfig::load(path)
            .with_context(|| format!("failed to load deployment file {}", path.display()))?,
        None => DeploymentConfig::local(&args.network, Address::labeled("deployer")),
    };
    let profile = config.profile()?;
    if !profile.local {
        bail!(
            "network '{}' (chain {}) is remote; lrt-node only hosts local networks",
            profile.name,
            profile.chain_id
        );
    }

    tracing::info!(
        network = %config.network,
        chain_id = profile.chain_id,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting lrt-node"
    );

    // --- Persistent storage ---
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data directory: {}", args.data_dir.display()))?;
    let store_path = args.data_dir.join(STORE_DIR);
    let store = Arc::new(
        VaultStore::open(&store_path)
            .with_context(|| format!("failed to open vault store at {}", store_path.display()))?,
    );

    // --- Contracts ---
    let deployment = if args.resume {
        match store.load()? {
            Some(snapshot) => {
                let height = snapshot
                    .state
                    .pending_withdrawals
                    .values()
                    .map(|r| r.requested_at_block)
                    .max()
                    .unwrap_or(0);
                tracing::warn!(
                    next_nonce = snapshot.state.next_withdrawal_nonce,
                    "resuming vault state; base-asset and restaking ledgers start empty"
                );
                LocalDeployment::restore(config, snapshot, Arc::new(DevChain::at(height)), args.protocol_min_delay)?
            }
            None => {
                tracing::info!("no stored snapshot, deploying fresh contracts");
                LocalDeployment::deploy(config, Arc::new(DevChain::default()), args.protocol_min_delay)?
            }
        }
    } else {
        LocalDeployment::deploy(config, Arc::new(DevChain::default()), args.protocol_min_delay)?
    };
    store.save(&deployment.vault.snapshot())?;

    let mut funded = vec![deployment.config.admin];
    funded.extend(args.funded.iter().copied());
    for account in funded {
        deployment.fund(account, DEV_ACCOUNT_BALANCE)?;
        tracing::info!(%account, balance = %format_ether(DEV_ACCOUNT_BALANCE), "dev account funded");
    }

    // --- Metrics ---
    let node_metrics = Arc::new(VaultMetrics::new()?);
    node_metrics.observe_status(&deployment.vault.status().await?);

    // --- Event persistence ---
    let event_loop = tokio::spawn(persist_events(
        Arc::clone(&deployment.vault),
        Arc::clone(&store),
        Arc::clone(&node_metrics),
    ));

    // --- Block production ---
    let block_loop = (args.block_time_ms > 0).then(|| {
        let chain = Arc::clone(&deployment.chain);
        let metrics_ref = Arc::clone(&node_metrics);
        let block_time = std::time::Duration::from_millis(args.block_time_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(block_time);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let height = chain.mine();
                metrics_ref.block_height.set(height as i64);
                tracing::trace!(height, "block mined");
            }
        })
    });

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        network: deployment.config.network.clone(),
        deployment: deployment.clone(),
        metrics: Arc::clone(&node_metrics),
        store: Some(Arc::clone(&store)),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    if !args.host.is_loopback() {
        tracing::warn!(
            host = %args.host,
            "API reachable beyond loopback; any client can act as any account"
        );
    }
    let api_addr = SocketAddr::new(args.host, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("admin API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = SocketAddr::new(args.host, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    tracing::info!(
        vault = %deployment.vault.address(),
        token = %deployment.config.receipt_token,
        admin = %deployment.config.admin,
        "vault ready"
    );

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    if let Some(handle) = block_loop {
        handle.abort();
    }
    event_loop.abort();

    store.save(&deployment.vault.snapshot())?;
    store.flush()?;
    tracing::info!("lrt-node stopped");
    Ok(())
}

/// Records every committed vault event, saves the new snapshot and
/// refreshes the gauges.
async fn persist_events(vault: Arc<Vault>, store: Arc<VaultStore>, metrics: Arc<VaultMetrics>) {
    let mut rx = vault.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                metrics.observe_event(&event);
                if let Err(e) = store.record_event(&event) {
                    tracing::error!(event = event.name(), "failed to record event: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event persistence lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        if let Err(e) = store.save(&vault.snapshot()) {
            tracing::error!("failed to save vault snapshot: {}", e);
        }
        match vault.status().await {
            Ok(status) => metrics.observe_status(&status),
            Err(e) => tracing::warn!("failed to read vault status: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Offline Commands
// ---------------------------------------------------------------------------

/// Writes a deployment file for `args.network`.
fn deploy(args: cli::DeployArgs) -> Result<()> {
    logging::init_logging(logging::CLIENT_FILTER, LogFormat::Pretty);

    let mut config = DeploymentConfig::local(&args.network, args.admin);
    let profile = config.profile()?;
    if !profile.local && (args.base_asset.is_none() || args.strategy.is_none()) {
        bail!(
            "network '{}' is remote; pass --base-asset, --delegation-manager, --strategy-manager and --strategy",
            profile.name
        );
    }
    if let Some(a) = args.base_asset {
        config.base_asset = a;
    }
    if let Some(a) = args.delegation_manager {
        config.delegation_manager = a;
    }
    if let Some(a) = args.strategy_manager {
        config.strategy_manager = a;
    }
    if let Some(a) = args.strategy {
        config.strategy = a;
    }
    if args.operator.is_some() {
        config.operator = args.operator;
    }
    config.params = VaultParams {
        withdrawal_delay_blocks: args.withdrawal_delay_blocks,
    };

    config
        .save(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    println!("Deployment written to {}", args.out.display());
    println!("  Network        : {} (chain {})", config.network, profile.chain_id);
    println!("  mLRT           : {}", config.receipt_token);
    println!("  LRTMaster      : {}", config.vault);
    println!("  Admin          : {}", config.admin);
    println!("  Withdraw delay : {} blocks", config.params.withdrawal_delay_blocks);
    Ok(())
}

fn open_store(data_dir: &Path) -> Result<VaultStore> {
    let path = data_dir.join(STORE_DIR);
    if !path.exists() {
        bail!("no vault store at {}", path.display());
    }
    VaultStore::open(&path).with_context(|| format!("failed to open vault store at {}", path.display()))
}

/// Prints the stored snapshot as JSON.
fn print_snapshot(data_dir: &Path) -> Result<()> {
    logging::init_logging(logging::CLIENT_FILTER, LogFormat::Pretty);
    let store = open_store(data_dir)?;
    let version = store.stored_version()?;
    let snapshot = store.load()?.context("store holds no snapshot")?;
    if version != Some(snapshot.version) {
        eprintln!("note: stored layout is v{}, shown upgraded", version.unwrap_or(0));
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Upgrades the stored snapshot in place.
fn migrate_store(data_dir: &Path) -> Result<()> {
    logging::init_logging("lrt_node=info,lrt_contracts=info", LogFormat::Pretty);
    let store = open_store(data_dir)?;
    match store.migrate()? {
        Some(from) => println!(
            "Migrated vault snapshot from v{} to v{}",
            from,
            lrt_protocol::config::SNAPSHOT_VERSION
        ),
        None => println!("Vault snapshot already current"),
    }
    Ok(())
}

/// Runs deposit, delegate, queue, mine and complete against an in-process
/// deployment, printing each step.
async fn run_demo(args: cli::DemoArgs) -> Result<()> {
    logging::init_logging(logging::CLIENT_FILTER, LogFormat::Pretty);

    let admin = Address::labeled("deployer");
    let user = Address::labeled("alice");
    let d = LocalDeployment::deploy(
        DeploymentConfig::local("hardhat", admin),
        Arc::new(DevChain::at(1)),
        0,
    )?;
    println!("mLRT deployed      : {}", d.config.receipt_token);
    println!("LRTMaster deployed : {}", d.vault.address());

    d.fund(user, DEV_ACCOUNT_BALANCE)?;
    println!("approved LRTMaster to spend stETH");

    let minted = d.vault.deposit(user, user, args.amount).await?;
    println!("{} stETH deposited, {} mLRT minted", format_ether(args.amount), format_ether(minted));

    let operator = d.config.operator.context("deployment has no operator")?;
    let shares = d.vault.delegate(admin, operator).await?;
    println!("LRTMaster delegated to {} ({} strategy shares)", operator, format_ether(shares));

    if args.rewards > 0 {
        d.restaking.accrue_rewards(args.rewards)?;
        println!("{} stETH of rewards accrued", format_ether(args.rewards));
    }

    let available = d.vault.available_share_to_withdraw().await;
    let nonce = d.vault.queue_withdrawal(admin, available).await?;
    let request = d
        .vault
        .withdrawal_request(nonce)
        .context("queued withdrawal missing")?;
    println!(
        "withdrawal #{} queued at block {} for {} shares",
        nonce,
        request.requested_at_block,
        format_ether(available)
    );

    let delay = d.vault.effective_withdrawal_delay().await;
    d.chain.mine_blocks(delay);
    println!("skipped {} blocks for the withdrawal delay", delay);

    let released = d
        .vault
        .complete_withdrawal(admin, available, request.requested_at_block, true, request.external_nonce)
        .await?;
    println!("withdrawal completed, {} stETH back in the vault", format_ether(released));

    let paid = d.vault.redeem(user, user, minted).await?;
    println!("{} mLRT redeemed for {} stETH", format_ether(minted), format_ether(paid));

    let status = d.vault.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends a JSON-RPC call to a running node and prints the result.
async fn call(rpc_url: &str, method: &str, params: serde_json::Value) -> Result<()> {
    let result = rpc_call(rpc_url, method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn rpc_call(rpc_url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = api::JsonRpcRequest {
        jsonrpc: "2.0".into(),
        method: method.into(),
        params: Some(params),
        id: serde_json::json!(1),
    };
    let url = format!("{}/rpc", rpc_url.trim_end_matches('/'));
    let body = http_request("POST", &url, Some(&serde_json::to_string(&request)?)).await?;
    let response: api::JsonRpcResponse =
        serde_json::from_str(&body).with_context(|| format!("unexpected response from {}", url))?;
    match (response.result, response.error) {
        (_, Some(err)) => match err.data {
            Some(data) => bail!("{} ({}, {})", err.message, err.code, data),
            None => bail!("{} ({})", err.message, err.code),
        },
        (Some(result), None) => Ok(result),
        (None, None) => bail!("empty JSON-RPC response from {}", url),
    }
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::ConnectArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = http_request("GET", &url, None).await?;
    let json: serde_json::Value =
        serde_json::from_str(&body).with_context(|| format!("unexpected response from {}", url))?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Minimal HTTP/1.1 client over a raw TCP stream, enough to talk to the
/// node's own API.
async fn http_request(method: &str, url: &str, body: Option<&str>) -> Result<String> {
    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let payload = body.unwrap_or("");
    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        method, path, host,
    );
    if body.is_some() {
        request.push_str("Content-Type: application/json\r\n");
        request.push_str(&format!("Content-Length: {}\r\n", payload.len()));
    }
    request.push_str("\r\n");
    request.push_str(payload);

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("malformed HTTP response from {}", addr))?;
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.contains(" 200 ") {
        bail!("{} returned '{}': {}", url, status_line, body);
    }
    Ok(body.to_string())
}

/// Prints version information to stdout.
fn print_version() {
    println!("lrt-node  {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
    println!("snapshot  v{}", lrt_protocol::config::SNAPSHOT_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Minimal URL parser, just enough to extract host/port/path.
mod url {
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> Option<&str> {
            Some(&self.host)
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if s.starts_with("https://") {
                return Err("https is not supported by the node client".into());
            }
            let rest = s.strip_prefix("http://").unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }

}
