//! # Prometheus Metrics
//!
//! Exposes vault metrics scraped by Prometheus at `/metrics` on the metrics
//! port. Counters follow committed vault events; gauges are refreshed from
//! the vault status after every event and every mined block.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `lrt` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

use lrt_contracts::{VaultEvent, VaultEventKind, VaultStatus};
use lrt_protocol::{Amount, WAD};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct VaultMetrics {
    registry: Registry,
    pub deposits_total: IntCounter,
    pub redemptions_total: IntCounter,
    pub withdrawals_queued_total: IntCounter,
    pub withdrawals_completed_total: IntCounter,
    /// Idle plus staked plus queued, in whole tokens.
    pub total_managed_assets: Gauge,
    /// mLRT outstanding, in whole tokens.
    pub receipt_supply: Gauge,
    pub pending_withdrawals: IntGauge,
    pub deposits_paused: IntGauge,
    pub block_height: IntGauge,
    /// Latency of JSON-RPC calls, in seconds.
    pub rpc_latency_seconds: Histogram,
}

impl VaultMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("lrt".into()), None)?;

        let deposits_total = IntCounter::new("deposits_total", "Deposits accepted by the vault")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let redemptions_total = IntCounter::new("redemptions_total", "mLRT redemptions paid out")?;
        registry.register(Box::new(redemptions_total.clone()))?;

        let withdrawals_queued_total =
            IntCounter::new("withdrawals_queued_total", "Withdrawals queued with the restaking protocol")?;
        registry.register(Box::new(withdrawals_queued_total.clone()))?;

        let withdrawals_completed_total =
            IntCounter::new("withdrawals_completed_total", "Queued withdrawals completed")?;
        registry.register(Box::new(withdrawals_completed_total.clone()))?;

        let total_managed_assets = Gauge::new(
            "total_managed_assets",
            "Base asset managed by the vault, in whole tokens",
        )?;
        registry.register(Box::new(total_managed_assets.clone()))?;

        let receipt_supply = Gauge::new("receipt_supply", "mLRT total supply, in whole tokens")?;
        registry.register(Box::new(receipt_supply.clone()))?;

        let pending_withdrawals =
            IntGauge::new("pending_withdrawals", "Queued withdrawals awaiting completion")?;
        registry.register(Box::new(pending_withdrawals.clone()))?;

        let deposits_paused = IntGauge::new("deposits_paused", "1 while deposits are paused")?;
        registry.register(Box::new(deposits_paused.clone()))?;

        let block_height = IntGauge::new("block_height", "Current block of the local network")?;
        registry.register(Box::new(block_height.clone()))?;

        let rpc_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "JSON-RPC call latency in seconds")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(rpc_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            deposits_total,
            redemptions_total,
            withdrawals_queued_total,
            withdrawals_completed_total,
            total_managed_assets,
            receipt_supply,
            pending_withdrawals,
            deposits_paused,
            block_height,
            rpc_latency_seconds,
        })
    }

    /// Counts a committed vault event.
    pub fn observe_event(&self, event: &VaultEvent) {
        match event.kind {
            VaultEventKind::Deposit { .. } => self.deposits_total.inc(),
            VaultEventKind::Redeemed { .. } => self.redemptions_total.inc(),
            VaultEventKind::WithdrawalQueued { .. } => self.withdrawals_queued_total.inc(),
            VaultEventKind::WithdrawalCompleted { .. } => self.withdrawals_completed_total.inc(),
            _ => {}
        }
    }

    /// Refreshes every gauge from a status snapshot.
    pub fn observe_status(&self, status: &VaultStatus) {
        self.total_managed_assets.set(whole_tokens(status.total_managed_assets));
        self.receipt_supply.set(whole_tokens(status.receipt_supply));
        self.pending_withdrawals.set(status.pending_withdrawals as i64);
        self.deposits_paused.set(i64::from(status.deposits_paused));
        self.block_height.set(status.current_block as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

// Display only; the vault never reads these back.
fn whole_tokens(amount: Amount) -> f64 {
    amount as f64 / WAD as f64
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<VaultMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_protocol::Address;

    #[test]
    fn events_drive_counters() {
        let metrics = VaultMetrics::new().unwrap();
        let alice = Address::labeled("alice");
        metrics.observe_event(&VaultEvent::new(
            1,
            VaultEventKind::Deposit {
                caller: alice,
                receiver: alice,
                amount: WAD,
                minted: WAD,
            },
        ));
        metrics.observe_event(&VaultEvent::new(2, VaultEventKind::DepositsPausedUpdated { paused: true }));
        assert_eq!(metrics.deposits_total.get(), 1);
        assert_eq!(metrics.withdrawals_queued_total.get(), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("lrt_deposits_total 1"));
    }

    #[test]
    fn whole_token_conversion() {
        assert_eq!(whole_tokens(WAD / 2), 0.5);
        assert_eq!(whole_tokens(0), 0.0);
    }
}
