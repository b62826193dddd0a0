// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run many steps in order.
//!
//! A batch feeds each planned step through the [`Gate`] or the
//! [`ManualPrompter`] and collects one result per step. What happens after a
//! step fails is decided by [`FailurePolicy`]. Some failures always stop the
//! batch no matter the policy:
//!
//! - A declined manual step.
//! - A prompt that cannot obtain an answer.
//! - A state document that cannot be stored or is corrupt.

use crate::{
    error::{Error, Result},
    gate::{ActionFailure, Gate, RunOutcome},
    manual::{Confirmer, ManualOutcome, ManualPrompter},
    state::{Params, StepSpec},
    store::Store,
};

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// What to do after a step fails.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failed step.
    #[default]
    Abort,

    /// Skip past steps whose action failed or whose definition is invalid.
    Continue,
}

/// Boxed action of an automated step.
pub type BoxedAction<'a> = Box<dyn FnMut() -> Result<(), ActionFailure> + 'a>;

/// Work a planned step performs.
pub enum Work<'a> {
    /// Run action through the gate.
    Automated(BoxedAction<'a>),

    /// Ask a human to do the work.
    Manual { instructions: Vec<String> },
}

impl std::fmt::Debug for Work<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automated(_) => fmt.write_str("Automated(..)"),
            Self::Manual { instructions } => fmt
                .debug_struct("Manual")
                .field("instructions", instructions)
                .finish(),
        }
    }
}

/// Step waiting to be run by a batch.
///
/// Kind and subtype stay untyped until the step is run, so that one bad
/// definition only fails its own step.
#[derive(Debug)]
pub struct PlannedStep<'a> {
    pub id: String,
    pub description: String,
    pub kind: String,
    pub subtype: String,
    pub params: Params,
    pub work: Work<'a>,
}

impl<'a> PlannedStep<'a> {
    /// Plan automated step.
    pub fn automated(
        id: impl Into<String>,
        description: impl Into<String>,
        subtype: impl Into<String>,
        action: impl FnMut() -> Result<(), ActionFailure> + 'a,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: "automated".into(),
            subtype: subtype.into(),
            params: Params::new(),
            work: Work::Automated(Box::new(action)),
        }
    }

    /// Plan manual step.
    pub fn manual(
        id: impl Into<String>,
        description: impl Into<String>,
        instructions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: "manual".into(),
            subtype: "other".into(),
            params: Params::new(),
            work: Work::Manual {
                instructions: instructions.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Successful outcome of one planned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Run(RunOutcome),
    Manual(ManualOutcome),
}

impl StepOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Run(outcome) => outcome.id(),
            Self::Manual(outcome) => outcome.id(),
        }
    }
}

/// Result of one planned step.
#[derive(Debug)]
pub struct StepResult {
    pub id: String,
    pub result: Result<StepOutcome>,
}

/// Results of a whole batch, in plan order.
///
/// Steps after an abort have no result at all.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<StepResult>,
    pub aborted: bool,
}

impl BatchReport {
    /// Iterate over failed steps.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.results.iter().filter_map(|step| match &step.result {
            Ok(_) => None,
            Err(err) => Some((step.id.as_str(), err)),
        })
    }

    /// Every step ran, and none failed.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failures().next().is_none()
    }
}

/// Run planned steps in order under a failure policy.
#[derive(Debug)]
pub struct BatchRunner<C>
where
    C: Confirmer,
{
    gate: Gate,
    prompter: ManualPrompter,
    confirmer: C,
    policy: FailurePolicy,
    reapply_undone: bool,
}

impl<C> BatchRunner<C>
where
    C: Confirmer,
{
    pub fn new(store: Store, confirmer: C) -> Self {
        Self {
            gate: Gate::new(store.clone()),
            prompter: ManualPrompter::new(store),
            confirmer,
            policy: FailurePolicy::default(),
            reapply_undone: false,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Re-apply steps that were undone instead of skipping them.
    pub fn with_reapply_undone(mut self, reapply_undone: bool) -> Self {
        self.reapply_undone = reapply_undone;
        self
    }

    /// Run all planned steps.
    ///
    /// Never fails as a whole. Failures are reported per step in the
    /// returned [`BatchReport`].
    #[instrument(skip(self, steps), fields(policy = ?self.policy), level = "debug")]
    pub fn run<'a>(&mut self, steps: impl IntoIterator<Item = PlannedStep<'a>>) -> BatchReport {
        let mut report = BatchReport::default();

        for mut step in steps {
            let result = self.run_one(&mut step);
            let stop = match &result {
                Ok(_) => false,
                Err(err) if self.policy == FailurePolicy::Continue && err.kind().is_step_local() => {
                    warn!("step {:?} failed, continuing: {err}", step.id);
                    false
                }
                Err(err) => {
                    error!("step {:?} failed, aborting batch: {err}", step.id);
                    true
                }
            };

            report.results.push(StepResult {
                id: step.id,
                result,
            });

            if stop {
                report.aborted = true;
                break;
            }
        }

        info!(
            "batch finished with {} step(s), {} failed",
            report.results.len(),
            report.failures().count()
        );
        report
    }

    fn run_one(&mut self, step: &mut PlannedStep<'_>) -> Result<StepOutcome> {
        let spec = StepSpec::parse(
            step.id.as_str(),
            step.description.as_str(),
            &step.kind,
            &step.subtype,
        )?
        .with_params(step.params.clone());

        match &mut step.work {
            Work::Automated(action) if self.reapply_undone => {
                Ok(StepOutcome::Run(self.gate.reapply_step(&spec, action)?))
            }
            Work::Automated(action) => Ok(StepOutcome::Run(self.gate.run_step(&spec, action)?)),
            Work::Manual { instructions } => Ok(StepOutcome::Manual(
                self.prompter.run_manual_step(
                    &spec.id,
                    &spec.description,
                    instructions,
                    &mut self.confirmer,
                )?,
            )),
        }
    }
}
