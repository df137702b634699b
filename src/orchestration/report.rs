//! Per-component results of a batch lifecycle call

use std::fmt;

use crate::core::{
    error::{BatchOperation, OrchestratorError, OrchestratorResult},
    metadata::ComponentId,
};

/// What happened to one component during a batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The lifecycle step ran to completion
    Completed,
    /// The component was already in the target state
    AlreadyDone,
    /// Another call is currently moving this component
    InProgress,
    /// Skipped until the listed components change state
    Deferred(Vec<String>),
    /// `initialize` declined to start the component
    Aborted,
    /// The step failed; the error is in [`BatchReport::failures`]
    Failed,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Completed => f.write_str("completed"),
            StepOutcome::AlreadyDone => f.write_str("already done"),
            StepOutcome::InProgress => f.write_str("in progress"),
            StepOutcome::Deferred(blocking) => write!(f, "deferred by {}", blocking.join(", ")),
            StepOutcome::Aborted => f.write_str("aborted"),
            StepOutcome::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentOutcome {
    pub id: ComponentId,
    pub identity: String,
    pub outcome: StepOutcome,
}

/// Outcomes of a batch, in batch order, plus the collected failures
#[derive(Debug)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub outcomes: Vec<ComponentOutcome>,
    pub failures: Vec<(ComponentId, OrchestratorError)>,
}

impl BatchReport {
    pub fn new(operation: BatchOperation) -> Self {
        Self {
            operation,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        id: ComponentId,
        identity: String,
        result: OrchestratorResult<StepOutcome>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.failures.push((id, err));
                StepOutcome::Failed
            }
        };
        self.outcomes.push(ComponentOutcome {
            id,
            identity,
            outcome,
        });
    }

    /// Append another report of the same operation
    pub fn merge(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
        self.failures.extend(other.failures);
    }

    pub fn outcome(&self, id: ComponentId) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.id == id)
            .map(|outcome| &outcome.outcome)
    }

    /// Handles whose step ran to completion
    pub fn completed(&self) -> Vec<ComponentId> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.outcome == StepOutcome::Completed)
            .map(|outcome| outcome.id)
            .collect()
    }

    pub fn deferred(&self) -> Vec<&ComponentOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.outcome, StepOutcome::Deferred(_)))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Raise the aggregated failures unless partial failure is allowed
    pub fn finish(self, allow_partial_failure: bool) -> OrchestratorResult<Self> {
        if allow_partial_failure || self.failures.is_empty() {
            return Ok(self);
        }
        Err(self.into_error())
    }

    /// Consume the report into a single `Batch` error
    pub fn into_error(self) -> OrchestratorError {
        OrchestratorError::Batch {
            operation: self.operation,
            failures: self.failures.into_iter().map(|(_, err)| err).collect(),
        }
    }
}
