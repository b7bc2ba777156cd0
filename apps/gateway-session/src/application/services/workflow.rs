//! Workflow Orchestration
//!
//! Composes multiple correlated requests into a multi-step sequence
//! with its own completion condition. Steps with no dependencies are
//! issued at start; every terminal response stores its result and
//! re-evaluates the remaining steps, issuing any whose prerequisites
//! are now satisfied. The terminal state is published through a watch
//! channel, the completion signal the top level blocks on.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::services::correlator::{RequestCorrelator, RequestUpdate, SendError};
use crate::domain::workflow::{StepResults, WorkflowSpec};

// =============================================================================
// Status
// =============================================================================

/// Why a workflow stopped making progress.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The gateway reported a business-level failure for a step.
    #[error("gateway reported error {code}: {message}")]
    Application {
        /// Vendor-supplied error code.
        code: i32,
        /// Vendor-supplied error message.
        message: String,
    },
    /// A step's request could not be issued.
    #[error("failed to issue step request: {0}")]
    Issue(String),
}

/// Terminal-state signal of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// Steps are still in flight or waiting on prerequisites.
    Running,
    /// Every step's terminal response arrived successfully.
    Completed,
    /// A step failed; no further steps were issued. Completed sibling
    /// steps are not rolled back; that is an application-level concern,
    /// not masked here.
    Failed {
        /// Name of the failing step.
        step: String,
        /// What went wrong.
        error: WorkflowError,
    },
}

impl WorkflowStatus {
    /// Whether the workflow has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct WorkflowState {
    results: StepResults,
    issued: HashSet<String>,
    finished: bool,
}

/// Drives one workflow to completion over a [`RequestCorrelator`].
pub struct WorkflowOrchestrator {
    correlator: Arc<RequestCorrelator>,
    spec: WorkflowSpec,
    state: Mutex<WorkflowState>,
    status_tx: watch::Sender<WorkflowStatus>,
    status_rx: watch::Receiver<WorkflowStatus>,
    weak: Weak<Self>,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator for the given workflow.
    #[must_use]
    pub fn new(correlator: Arc<RequestCorrelator>, spec: WorkflowSpec) -> Arc<Self> {
        let (status_tx, status_rx) = watch::channel(WorkflowStatus::Running);
        Arc::new_cyclic(|weak| Self {
            correlator,
            spec,
            state: Mutex::new(WorkflowState {
                results: StepResults::new(),
                issued: HashSet::new(),
                finished: false,
            }),
            status_tx,
            status_rx,
            weak: weak.clone(),
        })
    }

    /// Issue every step whose prerequisites are already satisfied
    /// (initially, the steps with no dependencies).
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if a step request cannot be issued; the
    /// workflow is marked `Failed` as well.
    pub fn start(&self) -> Result<(), SendError> {
        if self.spec.is_empty() {
            self.finish(WorkflowStatus::Completed);
            return Ok(());
        }
        self.issue_ready()
    }

    /// Watch the workflow's status. The receiver sees `Running` until
    /// the terminal state is published.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<WorkflowStatus> {
        self.status_rx.clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(&self) -> WorkflowStatus {
        let mut status = self.status_rx.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                return current;
            }
        }
    }

    fn issue_ready(&self) -> Result<(), SendError> {
        // Collect requests under the lock, issue them outside it: `send`
        // may fail and a continuation may fire before this loop ends.
        let to_issue: Vec<(String, crate::domain::request::GatewayRequest)> = {
            let mut state = self.state.lock();
            if state.finished {
                return Ok(());
            }
            let ready: Vec<_> = self
                .spec
                .ready_steps(&state.results, &state.issued)
                .map(|step| (step.name().to_string(), step.build_request(&state.results)))
                .collect();
            for (name, _) in &ready {
                state.issued.insert(name.clone());
            }
            ready
        };

        for (name, request) in to_issue {
            // The continuation holds only a weak handle: a dropped
            // orchestrator turns late responses into no-ops.
            let weak = self.weak.clone();
            let step = name.clone();
            let issued = self.correlator.send(request, move |update| {
                if let Some(this) = weak.upgrade() {
                    this.on_step_update(&step, update);
                }
            });

            if let Err(error) = issued {
                tracing::error!(step = %name, error = %error, "workflow step could not be issued");
                self.finish(WorkflowStatus::Failed {
                    step: name,
                    error: WorkflowError::Issue(error.to_string()),
                });
                return Err(error);
            }
            tracing::info!(step = %name, "workflow step issued");
        }
        Ok(())
    }

    fn on_step_update(&self, step: &str, update: RequestUpdate) {
        match update {
            RequestUpdate::Partial { operation, .. } => {
                tracing::debug!(step = %step, operation = %operation, "partial step response");
            }
            RequestUpdate::Complete { fields, .. } => {
                let all_complete = {
                    let mut state = self.state.lock();
                    if state.finished {
                        return;
                    }
                    state.results.insert(step.to_string(), fields);
                    state.results.len() == self.spec.len()
                };

                tracing::info!(step = %step, "workflow step completed");
                if all_complete {
                    self.finish(WorkflowStatus::Completed);
                } else {
                    // A send failure inside re-evaluation already marks
                    // the workflow failed.
                    let _ = self.issue_ready();
                }
            }
            RequestUpdate::Failed { code, message } => {
                tracing::error!(step = %step, code, message = %message, "workflow step failed");
                self.finish(WorkflowStatus::Failed {
                    step: step.to_string(),
                    error: WorkflowError::Application { code, message },
                });
            }
        }
    }

    fn finish(&self, status: WorkflowStatus) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
        }
        tracing::info!(status = ?status, "workflow reached terminal state");
        let _ = self.status_tx.send(status);
    }
}

// =============================================================================
// Tests
// =============================================================================
