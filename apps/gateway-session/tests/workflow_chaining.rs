//! Workflow Chaining Integration Tests
//!
//! The multi-step flow end to end: create a buy order and a sell order,
//! then group-route both once the sibling responses have arrived, while
//! a blotter subscription streams the resulting fills.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use gateway_session::{
    CorrelationToken, Endpoint, FieldMap, FieldSnapshot, FieldValue, GatewaySession,
    RequestBuilder, SimGateway, SimGatewayConfig, SubscribeSpec, SubscriptionListener,
    WorkflowOrchestrator, WorkflowSpec, WorkflowStatus,
};

const SERVICE: &str = "//gateway/order-api";

async fn ready_session() -> (GatewaySession, CancellationToken) {
    let connector = SimGateway::new(SimGatewayConfig {
        service: SERVICE.to_string(),
        fill_delay: Duration::ZERO,
        heartbeat_interval: None,
    });

    let cancel = CancellationToken::new();
    let session = GatewaySession::connect(
        &connector,
        &Endpoint::new("localhost", 8194),
        SERVICE,
        cancel.clone(),
    )
    .await
    .unwrap();

    timeout(Duration::from_secs(2), session.wait_ready())
        .await
        .expect("service-ready timed out")
        .unwrap();
    (session, cancel)
}

fn spread_workflow() -> WorkflowSpec {
    WorkflowSpec::builder()
        .step("buy", &[], |_| {
            RequestBuilder::new("CreateOrder")
                .set("TICKER", "CLN7 Comdty")
                .set("AMOUNT", 100)
                .set("SIDE", "BUY")
                .build()
        })
        .step("sell", &[], |_| {
            RequestBuilder::new("CreateOrder")
                .set("TICKER", "CLQ7 Comdty")
                .set("AMOUNT", 100)
                .set("SIDE", "SELL")
                .build()
        })
        .step("route", &["buy", "sell"], |results| {
            let mut request = RequestBuilder::new("GroupRoute")
                .set("BROKER", "SIMX")
                .choice("REQUEST_TYPE", "Spread");
            for step in ["buy", "sell"] {
                if let Some(id) = results.get(step).and_then(|fields| fields.get("ORDER_ID")) {
                    request = request.append("ORDER_ID", id.clone());
                }
            }
            request.build()
        })
        .build()
        .unwrap()
}

struct UpdateListener {
    tx: mpsc::UnboundedSender<FieldMap>,
}

impl SubscriptionListener for UpdateListener {
    fn on_update(&self, _token: CorrelationToken, delta: &FieldMap, _snapshot: &FieldSnapshot) {
        let _ = self.tx.send(delta.clone());
    }
}

#[tokio::test]
async fn spread_workflow_completes_and_orders_fill() {
    let (session, cancel) = ready_session().await;

    let (tx, mut updates) = mpsc::unbounded_channel();
    let feed_token = session
        .subscriptions()
        .subscribe(SubscribeSpec::new(
            "orders",
            &["ORDER_ID", "STATUS", "FILLED"],
            Arc::new(UpdateListener { tx }),
        ))
        .unwrap();

    let workflow = WorkflowOrchestrator::new(Arc::clone(session.requests()), spread_workflow());
    workflow.start().unwrap();

    let status = timeout(Duration::from_secs(5), workflow.wait())
        .await
        .expect("workflow timed out");
    assert_eq!(status, WorkflowStatus::Completed);

    // All three requests resolved.
    assert_eq!(session.requests().pending_count(), 0);

    // The blotter eventually shows a completed fill.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let delta = timeout(remaining, updates.recv())
            .await
            .expect("fill updates timed out")
            .expect("listener channel closed");
        if delta.get("STATUS") == Some(&FieldValue::from("FILLED")) {
            assert_eq!(delta.get("FILLED"), Some(&FieldValue::Int(100)));
            break;
        }
    }

    let snapshot = session.subscriptions().snapshot(feed_token).unwrap();
    assert_eq!(snapshot.get("STATUS"), Some(&FieldValue::from("FILLED")));

    cancel.cancel();
    session.shutdown().await;
}

#[tokio::test]
async fn failing_step_halts_the_workflow() {
    let (session, cancel) = ready_session().await;

    // The sell step asks for an operation the gateway does not know, so
    // its terminal response is an error.
    let spec = WorkflowSpec::builder()
        .step("buy", &[], |_| {
            RequestBuilder::new("CreateOrder")
                .set("TICKER", "CLN7 Comdty")
                .set("AMOUNT", 100)
                .build()
        })
        .step("sell", &[], |_| RequestBuilder::new("MysteryOrder").build())
        .step("route", &["buy", "sell"], |_| {
            RequestBuilder::new("GroupRoute").build()
        })
        .build()
        .unwrap();

    let workflow = WorkflowOrchestrator::new(Arc::clone(session.requests()), spec);
    workflow.start().unwrap();

    let status = timeout(Duration::from_secs(5), workflow.wait())
        .await
        .expect("workflow timed out");
    let WorkflowStatus::Failed { step, .. } = status else {
        panic!("expected a failed workflow, got {status:?}");
    };
    assert_eq!(step, "sell");

    cancel.cancel();
    session.shutdown().await;
}
