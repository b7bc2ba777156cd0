//! Event Dispatch
//!
//! One task owns the dispatch loop: it drains the session's inbound
//! event stream strictly in arrival order, classifies each event, and
//! routes it to the lifecycle, the correlator, or the subscription
//! service. Nothing here blocks: continuations and listener callbacks
//! must return promptly so subsequent events are not starved.
//!
//! A fault anywhere on the dispatch path would silently stop event
//! delivery for every in-flight operation, so the loop converts any
//! unexpected panic during classification into a logged, non-fatal
//! routing error and keeps going.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::application::ports::GatewayTransport;
use crate::application::services::correlator::RequestCorrelator;
use crate::application::services::subscriptions::SubscriptionService;
use crate::domain::event::{AdminNotice, GatewayEvent};
use crate::domain::session::{LifecycleAction, SessionLifecycle, SessionState};

/// Routes inbound events to the components that own their state.
pub struct EventDispatcher {
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    transport: Arc<dyn GatewayTransport>,
    lifecycle: SessionLifecycle,
    state_tx: watch::Sender<SessionState>,
    correlator: Arc<RequestCorrelator>,
    subscriptions: Arc<SubscriptionService>,
    cancel: CancellationToken,
}

impl EventDispatcher {
    /// Assemble a dispatcher over an established connection.
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedReceiver<GatewayEvent>,
        transport: Arc<dyn GatewayTransport>,
        lifecycle: SessionLifecycle,
        state_tx: watch::Sender<SessionState>,
        correlator: Arc<RequestCorrelator>,
        subscriptions: Arc<SubscriptionService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            transport,
            lifecycle,
            state_tx,
            correlator,
            subscriptions,
            cancel,
        }
    }

    /// Run the dispatch loop until cancellation or the event stream
    /// ends. Consumes the dispatcher; spawn it as its own task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("event dispatch cancelled");
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.dispatch_guarded(event),
                        None => {
                            tracing::info!("event stream ended");
                            self.lifecycle.terminate("event stream closed".to_string());
                            self.publish_state();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn dispatch_guarded(&mut self, event: GatewayEvent) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(event)));
        if outcome.is_err() {
            tracing::error!("fault on dispatch path converted to routing error; event dropped");
        }
    }

    fn dispatch(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::SessionStatus(status) => {
                tracing::debug!(status = ?status, "session status");
                if let Some(LifecycleAction::OpenService(service)) =
                    self.lifecycle.on_session_status(&status)
                {
                    match self.transport.open_service(&service) {
                        Ok(()) => {
                            tracing::info!(service = %service, "service open requested");
                            self.lifecycle.note_service_opening();
                        }
                        Err(error) => {
                            self.lifecycle
                                .terminate(format!("failed to request service open: {error}"));
                        }
                    }
                }
                self.publish_state();
            }
            GatewayEvent::ServiceStatus(status) => {
                tracing::debug!(status = ?status, "service status");
                self.lifecycle.on_service_status(&status);
                self.publish_state();
            }
            GatewayEvent::Response {
                token,
                partial,
                body,
            } => {
                self.correlator.on_response(token, partial, body);
            }
            GatewayEvent::SubscriptionStatus { token, status } => {
                self.subscriptions.on_status(token, &status);
            }
            GatewayEvent::SubscriptionData {
                token,
                status_code,
                fields,
            } => {
                self.subscriptions.on_data(token, status_code, &fields);
            }
            GatewayEvent::Administrative(notice) => match notice {
                AdminNotice::SlowConsumerWarning => {
                    tracing::warn!("slow consumer warning from gateway");
                }
                AdminNotice::SlowConsumerWarningCleared => {
                    tracing::info!("slow consumer warning cleared");
                }
                AdminNotice::Other(text) => {
                    tracing::debug!(notice = %text, "administrative event");
                }
            },
            GatewayEvent::Unknown { kind } => {
                tracing::warn!(kind = %kind, "unrecognized event kind dropped");
            }
        }
    }

    fn publish_state(&self) {
        let current = self.lifecycle.state();
        if *self.state_tx.borrow() != *current {
            let _ = self.state_tx.send(current.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::application::services::test_support::{RecordingTransport, session_state};
    use crate::domain::correlation::TokenGenerator;
    use crate::domain::event::{ServiceStatus, SessionStatus};

    use super::*;

    struct Fixture {
        events: mpsc::UnboundedSender<GatewayEvent>,
        transport: Arc<RecordingTransport>,
        state_rx: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    }

    fn spawn_dispatcher() -> Fixture {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport::new());
        let (_unused_tx, unused_rx) = session_state(SessionState::Connecting);

        let mut lifecycle = SessionLifecycle::new("//gateway/order-api".to_string());
        lifecycle.begin_connect();
        let (state_tx, state_rx) = watch::channel(lifecycle.state().clone());

        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&transport) as Arc<dyn GatewayTransport>,
            Arc::new(TokenGenerator::new()),
            unused_rx.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&transport) as Arc<dyn GatewayTransport>,
            Arc::new(TokenGenerator::new()),
            unused_rx,
            "//gateway/order-api",
        ));

        let cancel = CancellationToken::new();
        let dispatcher = EventDispatcher::new(
            event_rx,
            Arc::clone(&transport) as Arc<dyn GatewayTransport>,
            lifecycle,
            state_tx,
            correlator,
            subscriptions,
            cancel.clone(),
        );
        tokio::spawn(dispatcher.run());

        Fixture {
            events: event_tx,
            transport,
            state_rx,
            cancel,
        }
    }

    async fn await_state(rx: &mut watch::Receiver<SessionState>, want: &SessionState) {
        timeout(Duration::from_secs(2), rx.wait_for(|state| state == want))
            .await
            .expect("state change timed out")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn session_started_triggers_service_open() {
        let mut fixture = spawn_dispatcher();

        fixture
            .events
            .send(GatewayEvent::SessionStatus(SessionStatus::Started))
            .unwrap();

        await_state(&mut fixture.state_rx, &SessionState::ServiceOpening).await;
        assert_eq!(
            fixture.transport.opened.lock().as_slice(),
            &["//gateway/order-api".to_string()]
        );

        fixture
            .events
            .send(GatewayEvent::ServiceStatus(ServiceStatus::Opened {
                service: "//gateway/order-api".to_string(),
            }))
            .unwrap();
        await_state(&mut fixture.state_rx, &SessionState::ServiceReady).await;

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_events_do_not_stop_the_loop() {
        let mut fixture = spawn_dispatcher();

        fixture
            .events
            .send(GatewayEvent::Unknown {
                kind: "MysteryEvent".to_string(),
            })
            .unwrap();
        fixture
            .events
            .send(GatewayEvent::Administrative(
                AdminNotice::SlowConsumerWarning,
            ))
            .unwrap();

        // The loop is still alive and processes subsequent events.
        fixture
            .events
            .send(GatewayEvent::SessionStatus(SessionStatus::Started))
            .unwrap();
        await_state(&mut fixture.state_rx, &SessionState::ServiceOpening).await;

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn closed_event_stream_terminates_the_session() {
        let fixture = spawn_dispatcher();
        let mut state_rx = fixture.state_rx.clone();

        drop(fixture.events);

        timeout(
            Duration::from_secs(2),
            state_rx.wait_for(SessionState::is_terminated),
        )
        .await
        .expect("termination timed out")
        .expect("state channel closed");
    }

    #[tokio::test]
    async fn startup_failure_terminates_with_reason() {
        let fixture = spawn_dispatcher();
        let mut state_rx = fixture.state_rx.clone();

        fixture
            .events
            .send(GatewayEvent::SessionStatus(SessionStatus::StartupFailure {
                reason: "no route to host".to_string(),
            }))
            .unwrap();

        let state = timeout(
            Duration::from_secs(2),
            state_rx.wait_for(SessionState::is_terminated),
        )
        .await
        .expect("termination timed out")
        .expect("state channel closed")
        .clone();

        let SessionState::Terminated { reason } = state else {
            panic!("expected terminated state");
        };
        assert!(reason.contains("no route to host"));
    }
}
