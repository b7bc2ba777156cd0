//! Gateway Session Binary
//!
//! Drives the full session flow against the in-process sim gateway:
//! connect, await service-ready, open order/route subscriptions, run the
//! buy/sell/group-route chained workflow, and stream fill updates until
//! completion or Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin gateway-session
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_HOST`: gateway host (default: localhost)
//! - `GATEWAY_PORT`: gateway port (default: 8194)
//! - `GATEWAY_SERVICE`: service name (default: //gateway/order-api)
//! - `RUST_LOG`: log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gateway_session::infrastructure::telemetry;
use gateway_session::{
    CorrelationToken, FieldMap, FieldSnapshot, GatewayConfig, GatewaySession, RequestBuilder,
    SimGateway, SimGatewayConfig, SubscribeSpec, SubscriptionListener, WorkflowOrchestrator,
    WorkflowSpec, WorkflowStatus,
};

/// How long to keep streaming fill updates after the workflow settles.
const DRAIN_WINDOW: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        endpoint = %config.endpoint,
        service = %config.service,
        "starting gateway session"
    );

    let cancel = CancellationToken::new();
    let connector = SimGateway::new(SimGatewayConfig {
        service: config.service.clone(),
        fill_delay: Duration::from_millis(250),
        heartbeat_interval: Some(Duration::from_secs(1)),
    });

    let session = GatewaySession::connect(
        &connector,
        &config.endpoint,
        &config.service,
        cancel.clone(),
    )
    .await?;
    session.wait_ready().await?;
    tracing::info!("service ready");

    // Order and route blotter feeds, one wire-level subscribe call.
    let listener = Arc::new(BlotterListener);
    let feed_tokens = session.subscriptions().subscribe_many(vec![
        SubscribeSpec::new(
            "orders",
            &[
                "ORDER_ID",
                "TICKER",
                "SIDE",
                "AMOUNT",
                "STATUS",
                "FILLED",
                "AVG_PRICE",
            ],
            Arc::clone(&listener) as Arc<dyn SubscriptionListener>,
        ),
        SubscribeSpec::new(
            "routes",
            &["ROUTE_ID", "ORDER_ID", "BROKER", "STATUS", "FILLED", "AVG_PRICE"],
            listener,
        ),
    ])?;

    // Two sibling orders, then a dependent group-route once both exist.
    let workflow = WorkflowOrchestrator::new(Arc::clone(session.requests()), spread_workflow()?);
    workflow.start()?;

    tokio::select! {
        status = workflow.wait() => match status {
            WorkflowStatus::Completed => tracing::info!("workflow completed"),
            WorkflowStatus::Failed { step, error } => {
                tracing::error!(step = %step, error = %error, "workflow failed");
            }
            WorkflowStatus::Running => tracing::warn!("workflow signal lost"),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    // Let the fill stream settle before reporting final snapshots.
    tokio::time::sleep(DRAIN_WINDOW).await;
    for token in feed_tokens {
        if let Some(snapshot) = session.subscriptions().snapshot(token) {
            tracing::info!(token = %token, fields = ?snapshot.fields(), "final snapshot");
        }
    }

    cancel.cancel();
    session.shutdown().await;
    tracing::info!("gateway session stopped");
    Ok(())
}

/// Buy one contract month, sell another, route both as a spread.
fn spread_workflow() -> anyhow::Result<WorkflowSpec> {
    let spec = WorkflowSpec::builder()
        .step("buy", &[], |_| {
            RequestBuilder::new("CreateOrder")
                .set("TICKER", "CLN7 Comdty")
                .set("AMOUNT", 100)
                .set("ORDER_TYPE", "MKT")
                .set("TIF", "DAY")
                .set("HAND_INSTRUCTION", "ANY")
                .set("SIDE", "BUY")
                .build()
        })
        .step("sell", &[], |_| {
            RequestBuilder::new("CreateOrder")
                .set("TICKER", "CLQ7 Comdty")
                .set("AMOUNT", 100)
                .set("ORDER_TYPE", "MKT")
                .set("TIF", "DAY")
                .set("HAND_INSTRUCTION", "ANY")
                .set("SIDE", "SELL")
                .build()
        })
        .step("route", &["buy", "sell"], |results| {
            let mut request = RequestBuilder::new("GroupRoute")
                .set("AMOUNT_PERCENT", 100)
                .set("BROKER", "SIMX")
                .set("HAND_INSTRUCTION", "ANY")
                .set("ORDER_TYPE", "MKT")
                .set("TIF", "DAY")
                .choice("REQUEST_TYPE", "Spread");
            for step in ["buy", "sell"] {
                if let Some(id) = results.get(step).and_then(|fields| fields.get("ORDER_ID")) {
                    request = request.append("ORDER_ID", id.clone());
                }
            }
            request.build()
        })
        .build()?;
    Ok(spec)
}

/// Logs blotter activity; the console-facing edge of the demo.
struct BlotterListener;

impl SubscriptionListener for BlotterListener {
    fn on_started(&self, token: CorrelationToken) {
        tracing::info!(token = %token, "subscription started");
    }

    fn on_failed(&self, token: CorrelationToken, code: i32, message: &str) {
        tracing::error!(token = %token, code, message = %message, "subscription failed");
    }

    fn on_terminated(&self, token: CorrelationToken, reason: &str) {
        tracing::warn!(token = %token, reason = %reason, "subscription terminated");
    }

    fn on_initial_paint_complete(&self, token: CorrelationToken) {
        tracing::info!(token = %token, "end of initial paint");
    }

    fn on_update(&self, token: CorrelationToken, delta: &FieldMap, snapshot: &FieldSnapshot) {
        let mut changed: Vec<String> = delta
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        changed.sort();
        tracing::info!(
            token = %token,
            changed = %changed.join(" "),
            known_fields = snapshot.len(),
            "blotter update"
        );
    }
}
