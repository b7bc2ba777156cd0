//! Gateway Session Facade
//!
//! Assembles the dispatch loop, request correlator, and subscription
//! service over an established connection, and exposes the readiness
//! signal callers block on instead of polling.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectionError, Endpoint, GatewayConnector};
use crate::application::services::correlator::RequestCorrelator;
use crate::application::services::dispatcher::EventDispatcher;
use crate::application::services::subscriptions::SubscriptionService;
use crate::domain::correlation::TokenGenerator;
use crate::domain::session::{SessionLifecycle, SessionState};

/// Failures establishing or awaiting a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The endpoint was unreachable.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The session reached the absorbing terminal state.
    #[error("session terminated: {0}")]
    Terminated(String),
    /// The event stream closed before the session became ready.
    #[error("event stream closed before the session became ready")]
    StreamClosed,
}

/// One live session with the gateway.
///
/// Owns the dispatch task and hands out the request and subscription
/// services. Dropping the session without calling [`shutdown`] leaves
/// the dispatch task running until the event stream closes.
///
/// [`shutdown`]: GatewaySession::shutdown
pub struct GatewaySession {
    correlator: Arc<RequestCorrelator>,
    subscriptions: Arc<SubscriptionService>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl GatewaySession {
    /// Connect to the gateway and start the dispatch loop. The returned
    /// session is not yet request-capable; await [`wait_ready`] first.
    ///
    /// [`wait_ready`]: GatewaySession::wait_ready
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the endpoint is
    /// unreachable.
    pub async fn connect(
        connector: &dyn GatewayConnector,
        endpoint: &Endpoint,
        service: &str,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        tracing::info!(endpoint = %endpoint, service = %service, "connecting to gateway");
        let connection = connector.connect(endpoint).await?;

        let tokens = Arc::new(TokenGenerator::new());
        let mut lifecycle = SessionLifecycle::new(service.to_string());
        lifecycle.begin_connect();
        let (state_tx, state_rx) = watch::channel(lifecycle.state().clone());

        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&connection.transport),
            Arc::clone(&tokens),
            state_rx.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&connection.transport),
            tokens,
            state_rx.clone(),
            service,
        ));

        let dispatcher = EventDispatcher::new(
            connection.events,
            connection.transport,
            lifecycle,
            state_tx,
            Arc::clone(&correlator),
            Arc::clone(&subscriptions),
            cancel.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());

        Ok(Self {
            correlator,
            subscriptions,
            state_rx,
            cancel,
            dispatcher,
        })
    }

    /// Block until the session reaches service-ready.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the session dies first,
    /// or [`SessionError::StreamClosed`] if the state channel closes.
    pub async fn wait_ready(&self) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        loop {
            {
                let state = state_rx.borrow_and_update();
                match &*state {
                    SessionState::ServiceReady => return Ok(()),
                    SessionState::Terminated { reason } => {
                        return Err(SessionError::Terminated(reason.clone()));
                    }
                    _ => {}
                }
            }
            if state_rx.changed().await.is_err() {
                return Err(SessionError::StreamClosed);
            }
        }
    }

    /// The request correlation service.
    #[must_use]
    pub const fn requests(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    /// The subscription service.
    #[must_use]
    pub const fn subscriptions(&self) -> &Arc<SubscriptionService> {
        &self.subscriptions
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch session state changes.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Cancel the dispatch loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if self.dispatcher.await.is_err() {
            tracing::warn!("dispatch task ended abnormally");
        }
    }
}
