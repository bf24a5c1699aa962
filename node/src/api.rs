//! # Admin API
//!
//! Builds the axum router that exposes the vault node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! Amounts are rendered as decimal strings of base units so that JSON
//! clients never lose precision on 18-decimal values.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/health`              | Liveness probe                       |
//! | GET    | `/status`              | Vault status summary                 |
//! | GET    | `/withdrawals`         | Pending withdrawals (`?all=true`)    |
//! | GET    | `/withdrawals/:nonce`  | One withdrawal request               |
//! | GET    | `/balances/:address`   | Base asset and mLRT balances         |
//! | GET    | `/roles`               | Vault role holders                   |
//! | GET    | `/events`              | Recent committed vault events        |
//! | POST   | `/rpc`                 | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                  | WebSocket stream of vault events     |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lrt_contracts::{LocalDeployment, Role, VaultError, VaultStore, WithdrawalRequest};
use lrt_protocol::{Address, Amount, BlockNumber};

use crate::metrics::SharedMetrics;

/// Events returned by `GET /events` when no limit is given.
const DEFAULT_EVENT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Network profile name (e.g. "hardhat").
    pub network: String,
    /// The contracts this node hosts.
    pub deployment: LocalDeployment,
    pub metrics: SharedMetrics,
    /// Event log and snapshots; absent for in-memory nodes.
    pub store: Option<Arc<VaultStore>>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/withdrawals", get(withdrawals_handler))
        .route("/withdrawals/:nonce", get(withdrawal_handler))
        .route("/balances/:address", get(balances_handler))
        .route("/roles", get(roles_handler))
        .route("/events", get(events_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    /// Named method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Invalid envelope.
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// The vault rejected the call. `data.kind` names the reason.
pub const VAULT_REJECTED: i32 = -32000;
/// A dev-network helper (fund, mine, rewards) failed.
pub const NETWORK_REJECTED: i32 = -32001;

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", message.into()))
    }
}

impl From<VaultError> for JsonRpcError {
    fn from(err: VaultError) -> Self {
        Self {
            code: VAULT_REJECTED,
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": vault_error_kind(&err) })),
        }
    }
}

/// Stable machine-readable name of a vault rejection.
pub fn vault_error_kind(err: &VaultError) -> &'static str {
    match err {
        VaultError::ZeroAddress { .. } => "zero_address",
        VaultError::ZeroAmount => "zero_amount",
        VaultError::Paused => "paused",
        VaultError::Unauthorized { .. } => "unauthorized",
        VaultError::Access(_) => "access",
        VaultError::InsufficientAvailableShares { .. } => "insufficient_available_shares",
        VaultError::WithdrawalNotFound { .. } => "withdrawal_not_found",
        VaultError::WithdrawalDelayNotElapsed { .. } => "withdrawal_delay_not_elapsed",
        VaultError::WithdrawalAlreadyCompleted { .. } => "withdrawal_already_completed",
        VaultError::NonceMismatch { .. } => "nonce_mismatch",
        VaultError::NonceDesync { .. } => "nonce_desync",
        VaultError::ConfigMismatch { .. } => "config_mismatch",
        VaultError::InsufficientIdleAssets { .. } => "insufficient_idle_assets",
        VaultError::ArithmeticOverflow => "arithmetic_overflow",
        VaultError::CollaboratorFailure(_) => "collaborator_failure",
        VaultError::CompensationFailed { .. } => "compensation_failed",
    }
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub vault: String,
    pub deposits_paused: bool,
    pub delegated_operator: Option<String>,
    pub available_shares: String,
    pub locked_shares: String,
    pub idle_assets: String,
    pub total_managed_assets: String,
    pub receipt_supply: String,
    pub next_withdrawal_nonce: u64,
    pub pending_withdrawals: usize,
    /// Withdrawals the restaking protocol still holds for any staker.
    pub protocol_queued_withdrawals: usize,
    pub withdrawal_delay_blocks: BlockNumber,
    pub current_block: BlockNumber,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// One withdrawal request, as served by `/withdrawals`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub nonce: u64,
    pub shares: String,
    pub start_block: BlockNumber,
    /// First block at which completion is accepted.
    pub ready_at: BlockNumber,
    pub completed: bool,
    pub external_nonce: u64,
    pub withdrawal_root: String,
}

/// Response payload for `GET /balances/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub base_asset: String,
    pub receipt: String,
    /// Base asset the vault may pull from this account.
    pub vault_allowance: String,
}

/// Response payload for `GET /roles`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RolesResponse {
    pub default_admin: Vec<String>,
    pub admin: Vec<String>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalQuery {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub limit: Option<usize>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

fn withdrawal_response(nonce: u64, request: WithdrawalRequest, delay: BlockNumber) -> WithdrawalResponse {
    WithdrawalResponse {
        nonce,
        shares: request.shares.to_string(),
        start_block: request.requested_at_block,
        ready_at: request.requested_at_block.saturating_add(delay),
        completed: request.completed,
        external_nonce: request.external_nonce,
        withdrawal_root: request.withdrawal_root,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: returns the vault status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.deployment.vault.status().await {
        Ok(status) => status,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    state.metrics.observe_status(&status);

    let resp = StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        vault: status.vault.to_hex(),
        deposits_paused: status.deposits_paused,
        delegated_operator: status.delegated_operator.map(|a| a.to_hex()),
        available_shares: status.available_shares.to_string(),
        locked_shares: status.locked_shares.to_string(),
        idle_assets: status.idle_assets.to_string(),
        total_managed_assets: status.total_managed_assets.to_string(),
        receipt_supply: status.receipt_supply.to_string(),
        next_withdrawal_nonce: status.next_withdrawal_nonce,
        pending_withdrawals: status.pending_withdrawals,
        protocol_queued_withdrawals: state.deployment.restaking.queued_count(),
        withdrawal_delay_blocks: status.withdrawal_delay_blocks,
        current_block: status.current_block,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(resp)).into_response()
}

/// `GET /withdrawals`: outstanding requests by nonce, or every request
/// with `?all=true`.
async fn withdrawals_handler(
    State(state): State<AppState>,
    Query(query): Query<WithdrawalQuery>,
) -> impl IntoResponse {
    let vault = &state.deployment.vault;
    let delay = vault.effective_withdrawal_delay().await;
    let requests = if query.all {
        vault.withdrawal_requests()
    } else {
        vault.pending_withdrawals()
    };
    let body: Vec<WithdrawalResponse> = requests
        .into_iter()
        .map(|(nonce, r)| withdrawal_response(nonce, r, delay))
        .collect();
    Json(body)
}

/// `GET /withdrawals/:nonce`: one request, completed or not.
async fn withdrawal_handler(
    Path(nonce): Path<u64>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let vault = &state.deployment.vault;
    match vault.withdrawal_request(nonce) {
        Some(request) => {
            let delay = vault.effective_withdrawal_delay().await;
            (StatusCode::OK, Json(withdrawal_response(nonce, request, delay))).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Withdrawal not found for nonce {}", nonce),
        ),
    }
}

/// `GET /balances/:address`: base asset, mLRT and vault allowance.
async fn balances_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let account: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid address: {}", e)),
    };
    let d = &state.deployment;
    let resp = BalanceResponse {
        address: account.to_hex(),
        base_asset: d.asset.balance(account).to_string(),
        receipt: d.vault.receipt_balance(account).await.to_string(),
        vault_allowance: d.asset.allowance(account, d.vault.address()).to_string(),
    };
    (StatusCode::OK, Json(resp)).into_response()
}

/// `GET /roles`: holders of the vault's root and administrative roles.
async fn roles_handler(State(state): State<AppState>) -> impl IntoResponse {
    let vault = &state.deployment.vault;
    let hex = |role: Role| -> Vec<String> {
        vault.role_members(role).iter().map(Address::to_hex).collect()
    };
    Json(RolesResponse {
        default_admin: hex(Role::DefaultAdmin),
        admin: hex(Role::Admin),
    })
}

/// `GET /events?limit=N`: the most recent committed events, oldest first.
async fn events_handler(State(state): State<AppState>, Query(query): Query<EventQuery>) -> impl IntoResponse {
    let Some(store) = state.store.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "Event log is not enabled on this node");
    };
    match store.recent_events(query.limit.unwrap_or(DEFAULT_EVENT_LIMIT)) {
        // Stored events are already JSON; splice them without re-parsing so
        // large amounts keep full precision.
        Ok(events) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            format!("[{}]", events.join(",")),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Store error: {}", e)),
    }
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Routes method calls to the vault and the dev network. Unknown methods
/// return error code -32601 (Method not found).
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let started = Instant::now();
    let outcome = dispatch(&state, &req.method, req.params).await;
    state
        .metrics
        .rpc_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(err) => {
            tracing::debug!(method = %req.method, code = err.code, message = %err.message, "rpc call rejected");
            (None, Some(err))
        }
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

// ---------------------------------------------------------------------------
// JSON-RPC Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TransferParams {
    caller: Address,
    #[serde(default)]
    receiver: Option<Address>,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct CallerParams {
    caller: Address,
}

#[derive(Debug, Deserialize)]
struct DelegateParams {
    caller: Address,
    #[serde(default)]
    operator: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct QueueParams {
    caller: Address,
    /// Everything available when absent.
    #[serde(default)]
    shares: Option<String>,
}

/// Either `nonce` (the vault's request id) or the raw
/// `shares`/`start_block`/`nonce_offset` triple.
#[derive(Debug, Deserialize)]
struct CompleteParams {
    caller: Address,
    #[serde(default)]
    nonce: Option<u64>,
    #[serde(default)]
    shares: Option<String>,
    #[serde(default)]
    start_block: Option<BlockNumber>,
    #[serde(default)]
    nonce_offset: Option<u64>,
    #[serde(default = "default_receive_as_tokens")]
    receive_as_tokens: bool,
}

fn default_receive_as_tokens() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct PauseParams {
    caller: Address,
    paused: bool,
}

#[derive(Debug, Deserialize)]
struct RoleParams {
    caller: Address,
    role: String,
    account: Address,
}

#[derive(Debug, Deserialize)]
struct FundParams {
    account: Address,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct MineParams {
    #[serde(default = "one_block")]
    blocks: u64,
}

fn one_block() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct RewardParams {
    amount: String,
}

fn params<T: DeserializeOwned>(raw: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    let value = raw.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn amount(raw: &str) -> Result<Amount, JsonRpcError> {
    raw.parse::<Amount>()
        .map_err(|_| JsonRpcError::invalid_params(format!("'{}' is not an integer amount in base units", raw)))
}

fn network_error(err: impl std::fmt::Display) -> JsonRpcError {
    JsonRpcError::new(NETWORK_REJECTED, err.to_string())
}

async fn dispatch(
    state: &AppState,
    method: &str,
    raw: Option<serde_json::Value>,
) -> Result<serde_json::Value, JsonRpcError> {
    let d = &state.deployment;
    let vault = &d.vault;

    match method {
        "lrt_version" => Ok(serde_json::json!(state.version)),
        "lrt_networkId" => Ok(serde_json::json!(state.network)),
        "lrt_blockNumber" => Ok(serde_json::json!(vault.current_block())),
        "lrt_deposit" => {
            let p: TransferParams = params(raw)?;
            let receiver = p.receiver.unwrap_or(p.caller);
            let minted = vault.deposit(p.caller, receiver, amount(&p.amount)?).await?;
            Ok(serde_json::json!({ "minted": minted.to_string() }))
        }
        "lrt_redeem" => {
            let p: TransferParams = params(raw)?;
            let receiver = p.receiver.unwrap_or(p.caller);
            let assets = vault.redeem(p.caller, receiver, amount(&p.amount)?).await?;
            Ok(serde_json::json!({ "assets": assets.to_string() }))
        }
        "lrt_delegate" => {
            let p: DelegateParams = params(raw)?;
            let operator = p
                .operator
                .or(d.config.operator)
                .ok_or_else(|| JsonRpcError::invalid_params("no operator given and none configured"))?;
            let shares = vault.delegate(p.caller, operator).await?;
            Ok(serde_json::json!({ "operator": operator.to_hex(), "shares": shares.to_string() }))
        }
        "lrt_undelegate" => {
            let p: CallerParams = params(raw)?;
            vault.undelegate(p.caller).await?;
            Ok(serde_json::json!(true))
        }
        "lrt_availableShareToWithdraw" => {
            let shares = vault.available_share_to_withdraw().await;
            Ok(serde_json::json!(shares.to_string()))
        }
        "lrt_queueWithdrawal" => {
            let p: QueueParams = params(raw)?;
            let shares = match p.shares {
                Some(raw) => amount(&raw)?,
                None => vault.available_share_to_withdraw().await,
            };
            let nonce = vault.queue_withdrawal(p.caller, shares).await?;
            let request = vault
                .withdrawal_request(nonce)
                .ok_or_else(|| JsonRpcError::new(INTERNAL_ERROR, "queued request missing"))?;
            let delay = vault.effective_withdrawal_delay().await;
            Ok(serde_json::to_value(withdrawal_response(nonce, request, delay))
                .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))?)
        }
        "lrt_completeWithdrawal" => {
            let p: CompleteParams = params(raw)?;
            let (shares, start_block, offset) = match p.nonce {
                Some(nonce) => {
                    let request = vault.withdrawal_request(nonce).ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("no withdrawal with nonce {}", nonce))
                    })?;
                    (request.shares, request.requested_at_block, request.external_nonce)
                }
                None => {
                    let shares = p
                        .shares
                        .as_deref()
                        .ok_or_else(|| JsonRpcError::invalid_params("expected nonce or shares"))
                        .and_then(amount)?;
                    let start_block = p
                        .start_block
                        .ok_or_else(|| JsonRpcError::invalid_params("expected start_block"))?;
                    (shares, start_block, p.nonce_offset.unwrap_or(0))
                }
            };
            let released = vault
                .complete_withdrawal(p.caller, shares, start_block, p.receive_as_tokens, offset)
                .await?;
            Ok(serde_json::json!({ "released": released.to_string() }))
        }
        "lrt_updateDepositsPaused" => {
            let p: PauseParams = params(raw)?;
            vault.update_deposits_paused(p.caller, p.paused).await?;
            Ok(serde_json::json!(p.paused))
        }
        "lrt_grantRole" | "lrt_revokeRole" => {
            let p: RoleParams = params(raw)?;
            let role: Role = p.role.parse().map_err(JsonRpcError::invalid_params)?;
            let changed = if method == "lrt_grantRole" {
                vault.grant_role(p.caller, role, p.account).await?
            } else {
                vault.revoke_role(p.caller, role, p.account).await?
            };
            Ok(serde_json::json!(changed))
        }
        "lrt_fund" => {
            let p: FundParams = params(raw)?;
            d.fund(p.account, amount(&p.amount)?).map_err(network_error)?;
            Ok(serde_json::json!(d.asset.balance(p.account).to_string()))
        }
        "lrt_mine" => {
            let p: MineParams = params(raw)?;
            let block = d.chain.mine_blocks(p.blocks);
            state.metrics.block_height.set(block as i64);
            Ok(serde_json::json!(block))
        }
        "lrt_accrueRewards" => {
            let p: RewardParams = params(raw)?;
            d.restaking.accrue_rewards(amount(&p.amount)?).map_err(network_error)?;
            Ok(serde_json::json!(true))
        }
        _ => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )),
    }
}

/// `GET /ws`: WebSocket upgrade for live vault events.
///
/// Clients receive each committed [`lrt_contracts::VaultEvent`] as a JSON
/// text message. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards vault events until the client disconnects or the vault's
/// channel closes.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let mut rx = state.deployment.vault.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
