// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step execution gate.
//!
//! The gate decides whether a step's action needs to run at all. Complete
//! steps are skipped, undone steps are reported as undone, and only pending
//! steps get their action invoked. A successful action completes the step;
//! a failed one leaves the step pending so that a later run retries it from
//! scratch.
//!
//! # Actions
//!
//! The gate never looks inside an [`Action`]. Whatever the action does must
//! be safe to repeat after a partial run, since an interrupted action leaves
//! its step pending.

use crate::{
    error::{Error, Result},
    registry::Registry,
    state::{now, Status, StatusKind, StepRecord, StepSpec},
    store::Store,
    system::{syscall_non_interactive, SystemError},
};

use std::ffi::OsString;
use tracing::{debug, info, instrument, warn};

/// Opaque unit of work performed by a step.
pub trait Action {
    /// Perform the work.
    ///
    /// # Errors
    ///
    /// - Return [`ActionFailure`] if the work did not succeed.
    fn execute(&mut self) -> Result<(), ActionFailure>;
}

impl<F> Action for F
where
    F: FnMut() -> Result<(), ActionFailure>,
{
    fn execute(&mut self) -> Result<(), ActionFailure> {
        self()
    }
}

/// Action that runs an external command to completion.
///
/// Output of the command is captured rather than streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAction {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandAction {
    pub fn new(
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Construct command action from full argument vector.
    ///
    /// Returns nothing if argument vector is empty.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<OsString>>) -> Option<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl Action for CommandAction {
    #[instrument(skip(self), fields(program = ?self.program), level = "debug")]
    fn execute(&mut self) -> Result<(), ActionFailure> {
        let output = syscall_non_interactive(&self.program, &self.args).map_err(|err| match err {
            SystemError::Launch { source, command } => ActionFailure::Launch { source, command },
            SystemError::Failed { message, .. } => ActionFailure::Message(message),
        })?;

        let message = output.message();
        if !output.status.success() {
            return Err(match output.status.code() {
                Some(code) => ActionFailure::Exit { code, message },
                None => ActionFailure::Terminated { message },
            });
        }

        if !message.is_empty() {
            debug!("{message}");
        }

        Ok(())
    }
}

/// Outcome of a step action that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ActionFailure {
    /// Command exited with non-zero exit code.
    #[error("exited with code {code}{}", detail(.message))]
    Exit { code: i32, message: String },

    /// Command was terminated before it could exit.
    #[error("terminated by signal{}", detail(.message))]
    Terminated { message: String },

    /// Command could not be started.
    #[error("failed to launch {command:?}")]
    Launch {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Step was planned without a command.
    #[error("no command to run")]
    NoCommand,

    /// Free-form failure reported by an in-process action.
    #[error("{0}")]
    Message(String),
}

impl ActionFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Exit code of failed command, if there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(":\n{message}")
    }
}

/// Observable outcome of running a step through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Action ran and step is now complete.
    Completed { id: String, description: String },

    /// Step was already complete, action did not run.
    Skipped { id: String, description: String },

    /// Step was undone earlier, action did not run. Re-apply is available.
    Undone { id: String, description: String },
}

impl RunOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Completed { id, .. } | Self::Skipped { id, .. } | Self::Undone { id, .. } => id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Completed { description, .. }
            | Self::Skipped { description, .. }
            | Self::Undone { description, .. } => description,
        }
    }

    /// Whether the action was invoked.
    pub fn ran(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Decide whether to run step actions, and record their outcome.
#[derive(Debug, Clone)]
pub struct Gate {
    registry: Registry,
}

impl Gate {
    pub fn new(store: Store) -> Self {
        Self {
            registry: Registry::new(store),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run step action unless step already ran.
    ///
    /// Complete steps are skipped. Undone steps are reported as
    /// [`RunOutcome::Undone`] without running their action. The lifecycle
    /// edge from reversible-pending back to complete is taken by
    /// [`Gate::reapply_step`] instead. Unknown steps are registered first.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if step id is malformed.
    /// - Return [`Error::ActionFailed`] if action fails. Step stays pending.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self, spec, action), fields(id = %spec.id), level = "debug")]
    pub fn run_step(&self, spec: &StepSpec, action: impl Action) -> Result<RunOutcome> {
        self.execute(spec, action, false)
    }

    /// Run step action unless step is complete, re-applying undone steps.
    ///
    /// Behaves like [`Gate::run_step`], except that a step in the
    /// reversible-pending state gets its action invoked again and becomes
    /// complete on success.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if step id is malformed.
    /// - Return [`Error::ActionFailed`] if action fails. Step status is kept.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self, spec, action), fields(id = %spec.id), level = "debug")]
    pub fn reapply_step(&self, spec: &StepSpec, action: impl Action) -> Result<RunOutcome> {
        self.execute(spec, action, true)
    }

    fn execute(&self, spec: &StepSpec, mut action: impl Action, reapply: bool) -> Result<RunOutcome> {
        spec.validate()?;
        self.registry.store().initialize()?;

        let record = match self.registry.find(&spec.id)? {
            Some(record) => record,
            None => self.registry.register_spec(spec)?,
        };

        match record.status.kind() {
            StatusKind::Complete => {
                info!("skip {:?}, already complete", spec.id);
                return Ok(RunOutcome::Skipped {
                    id: spec.id.clone(),
                    description: spec.description.clone(),
                });
            }
            StatusKind::ReversiblePending if !reapply => {
                info!("skip {:?}, undone earlier and can be re-applied", spec.id);
                return Ok(RunOutcome::Undone {
                    id: spec.id.clone(),
                    description: spec.description.clone(),
                });
            }
            StatusKind::ReversiblePending => info!("re-apply {:?}", spec.id),
            StatusKind::Pending => info!("run {:?}", spec.id),
        }

        if let Err(err) = action.execute() {
            warn!("action of {:?} failed, leaving status as is", spec.id);
            return Err(Error::ActionFailed {
                id: spec.id.clone(),
                source: err,
            });
        }

        self.registry.store().edit(|document| {
            let params = match document.get(&spec.id) {
                Some(existing) if spec.params.is_empty() => existing.params.clone(),
                _ => spec.params.clone(),
            };

            document.insert(StepRecord {
                id: spec.id.clone(),
                description: spec.description.clone(),
                kind: spec.kind,
                subtype: spec.subtype,
                status: Status::pending().complete(now()),
                params,
            });

            Ok::<_, Error>(())
        })?;
        info!("step {:?} complete", spec.id);

        Ok(RunOutcome::Completed {
            id: spec.id.clone(),
            description: spec.description.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        state::{Kind, Params, Subtype},
    };
    use pretty_assertions::assert_eq;

    fn gate() -> anyhow::Result<(tempfile::TempDir, Gate)> {
        let dir = tempfile::tempdir()?;
        let gate = Gate::new(Store::new(dir.path()));
        Ok((dir, gate))
    }

    fn git() -> StepSpec {
        StepSpec::new("brew-install-git", "Install git", Kind::Automated, Subtype::Brew)
    }

    #[test]
    fn complete_step_never_reruns() -> anyhow::Result<()> {
        let (_dir, gate) = gate()?;
        let mut calls = 0;

        let result = gate.run_step(&git(), || {
            calls += 1;
            Ok(())
        })?;
        assert!(result.ran());

        let result = gate.run_step(&git(), || {
            calls += 1;
            Ok(())
        })?;
        assert_eq!(
            result,
            RunOutcome::Skipped {
                id: "brew-install-git".into(),
                description: "Install git".into()
            }
        );
        assert_eq!(calls, 1);

        Ok(())
    }

    #[test]
    fn failed_action_keeps_step_pending() -> anyhow::Result<()> {
        let (_dir, gate) = gate()?;

        let result = gate
            .run_step(&git(), || Err(ActionFailure::message("no network")))
            .unwrap_err();
        assert_eq!(result.kind(), ErrorKind::ActionFailed);
        assert_eq!(
            gate.registry().status("brew-install-git")?.kind(),
            StatusKind::Pending
        );

        gate.run_step(&git(), || Ok(()))?;
        assert!(gate.registry().is_complete("brew-install-git")?);

        Ok(())
    }

    #[test]
    fn completion_keeps_recorded_params_without_new_ones() -> anyhow::Result<()> {
        let (_dir, gate) = gate()?;
        let params: Params = [("package", "git")].into_iter().collect();
        gate.registry().register_spec(&git())?;
        gate.registry()
            .record_params("brew-install-git", params.clone())?;

        gate.run_step(&git(), || Ok(()))?;
        assert_eq!(gate.registry().get("brew-install-git")?.params, params);

        Ok(())
    }

    #[test]
    fn command_action_reports_exit_code() {
        let mut action = CommandAction::new("sh", ["-c", "exit 3"]);
        let result = action.execute().unwrap_err();
        assert_eq!(result.exit_code(), Some(3));

        let mut action = CommandAction::new("sh", ["-c", "true"]);
        assert!(action.execute().is_ok());
    }

    #[test]
    fn command_action_from_empty_argv() {
        assert_eq!(CommandAction::from_argv(Vec::<String>::new()), None);
        assert_eq!(
            CommandAction::from_argv(["brew", "install", "git"]),
            Some(CommandAction::new("brew", ["install", "git"]))
        );
    }
}
