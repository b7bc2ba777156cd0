//! Chained-Workflow Definitions
//!
//! A workflow is an ordered set of named steps, each one gateway request.
//! A step may declare dependencies on other steps; its request is built
//! from their results once they are all present, so independent
//! prerequisites may complete in any order. The pure dependency
//! evaluation lives here; issuing requests and tracking completion is
//! the orchestrator's job.

use std::collections::{HashMap, HashSet};

use crate::domain::event::FieldMap;
use crate::domain::request::GatewayRequest;

/// Results of completed steps, keyed by step name.
pub type StepResults = HashMap<String, FieldMap>;

/// Builds a step's request from the results of its dependencies.
pub type StepRequestFn = Box<dyn Fn(&StepResults) -> GatewayRequest + Send + Sync>;

/// One step of a workflow.
pub struct WorkflowStep {
    name: String,
    depends_on: Vec<String>,
    build: StepRequestFn,
}

impl WorkflowStep {
    /// The step's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the steps whose results this step requires.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Whether every declared dependency is present in the results map.
    #[must_use]
    pub fn prerequisites_met(&self, results: &StepResults) -> bool {
        self.depends_on
            .iter()
            .all(|dependency| results.contains_key(dependency))
    }

    /// Build the step's request from its dependencies' results.
    #[must_use]
    pub fn build_request(&self, results: &StepResults) -> GatewayRequest {
        (self.build)(results)
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// A validated set of workflow steps.
#[derive(Debug, Default)]
pub struct WorkflowSpec {
    steps: Vec<WorkflowStep>,
}

impl WorkflowSpec {
    /// Start building a workflow.
    #[must_use]
    pub fn builder() -> WorkflowSpecBuilder {
        WorkflowSpecBuilder { steps: Vec::new() }
    }

    /// All steps, in declaration order.
    #[must_use]
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the workflow has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that can be issued now: not yet issued, with all declared
    /// dependencies present in the results map.
    pub fn ready_steps<'a>(
        &'a self,
        results: &'a StepResults,
        issued: &'a HashSet<String>,
    ) -> impl Iterator<Item = &'a WorkflowStep> {
        self.steps
            .iter()
            .filter(move |step| !issued.contains(step.name()) && step.prerequisites_met(results))
    }
}

/// Errors detected while declaring a workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowSpecError {
    /// Two steps share a name.
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),
    /// A step depends on a name no step declares.
    #[error("step {step} depends on undeclared step {dependency}")]
    UnknownDependency {
        /// The declaring step.
        step: String,
        /// The missing dependency name.
        dependency: String,
    },
}

/// Builder for [`WorkflowSpec`].
pub struct WorkflowSpecBuilder {
    steps: Vec<WorkflowStep>,
}

impl WorkflowSpecBuilder {
    /// Declare a step.
    #[must_use]
    pub fn step(
        mut self,
        name: &str,
        depends_on: &[&str],
        build: impl Fn(&StepResults) -> GatewayRequest + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(WorkflowStep {
            name: name.to_string(),
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
            build: Box::new(build),
        });
        self
    }

    /// Validate and finish the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowSpecError`] on duplicate step names or
    /// dependencies on undeclared steps.
    pub fn build(self) -> Result<WorkflowSpec, WorkflowSpecError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name().to_string()) {
                return Err(WorkflowSpecError::DuplicateStep(step.name().to_string()));
            }
        }

        for step in &self.steps {
            for dependency in step.depends_on() {
                if !names.contains(dependency) {
                    return Err(WorkflowSpecError::UnknownDependency {
                        step: step.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        Ok(WorkflowSpec { steps: self.steps })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::domain::event::FieldValue;
    use crate::domain::request::RequestBuilder;

    use super::*;

    fn order_request(_: &StepResults) -> GatewayRequest {
        RequestBuilder::new("CreateOrder").build()
    }

    fn spec() -> WorkflowSpec {
        WorkflowSpec::builder()
            .step("buy", &[], order_request)
            .step("sell", &[], order_request)
            .step("route", &["buy", "sell"], |results| {
                let mut request = RequestBuilder::new("GroupRoute");
                for step in ["buy", "sell"] {
                    if let Some(id) = results.get(step).and_then(|r| r.get("ORDER_ID")) {
                        request = request.append("ORDER_ID", id.clone());
                    }
                }
                request.build()
            })
            .build()
            .unwrap()
    }

    fn result_with_order_id(id: i64) -> FieldMap {
        FieldMap::from([("ORDER_ID".to_string(), FieldValue::Int(id))])
    }

    #[test]
    fn independent_steps_are_ready_immediately() {
        let spec = spec();
        let results = StepResults::new();
        let issued = HashSet::new();

        let ready: Vec<&str> = spec
            .ready_steps(&results, &issued)
            .map(WorkflowStep::name)
            .collect();
        assert_eq!(ready, vec!["buy", "sell"]);
    }

    #[test]
    fn dependent_step_waits_for_all_prerequisites() {
        let spec = spec();
        let mut results = StepResults::new();
        let issued: HashSet<String> = ["buy".to_string(), "sell".to_string()].into();

        results.insert("sell".to_string(), result_with_order_id(2));
        assert_eq!(spec.ready_steps(&results, &issued).count(), 0);

        // Order of completion does not matter: buy arriving second still
        // unblocks the route step.
        results.insert("buy".to_string(), result_with_order_id(1));
        let ready: Vec<&str> = spec
            .ready_steps(&results, &issued)
            .map(WorkflowStep::name)
            .collect();
        assert_eq!(ready, vec!["route"]);
    }

    #[test]
    fn dependent_request_is_built_from_results() {
        let spec = spec();
        let mut results = StepResults::new();
        results.insert("buy".to_string(), result_with_order_id(3_952_712));
        results.insert("sell".to_string(), result_with_order_id(3_952_713));

        let route = &spec.steps()[2];
        let request = route.build_request(&results);
        let ids = request.root().get_repeated("ORDER_ID").unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let error = WorkflowSpec::builder()
            .step("buy", &[], order_request)
            .step("buy", &[], order_request)
            .build()
            .unwrap_err();
        assert_eq!(error, WorkflowSpecError::DuplicateStep("buy".to_string()));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let error = WorkflowSpec::builder()
            .step("route", &["buy"], order_request)
            .build()
            .unwrap_err();
        assert_eq!(
            error,
            WorkflowSpecError::UnknownDependency {
                step: "route".to_string(),
                dependency: "buy".to_string(),
            }
        );
    }
}
