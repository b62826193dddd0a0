// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manual steps.
//!
//! Some setup work cannot be automated, e.g., granting an application
//! accessibility permissions. Manual steps present instructions to a human
//! and wait for one of three answers:
//!
//! - __confirm__: the work is done, record the step as complete.
//! - __decline__: the work will not be done, abort the surrounding batch.
//! - __defer__: decide later, keep the step pending and ask again next run.
//!
//! Anything else is rejected and asked again. There is no default answer.

use crate::{
    error::{Error, Result},
    registry::Registry,
    state::{Kind, StepSpec, Subtype},
    store::Store,
};

use inquire::{validator::Validation, CustomUserError, Text};
use std::{
    io::{BufRead, Write},
    str::FromStr,
};
use tracing::{info, instrument, warn};

/// Answer to a manual step prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualResponse {
    Confirm,
    Decline,
    Defer,
}

impl FromStr for ManualResponse {
    type Err = InvalidResponse;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "confirm" | "done" => Ok(Self::Confirm),
            "n" | "no" | "decline" | "abort" => Ok(Self::Decline),
            "s" | "skip" | "defer" | "later" => Ok(Self::Defer),
            _ => Err(InvalidResponse(input.trim().into())),
        }
    }
}

/// Answer is not one of the accepted responses.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized answer {0:?}, answer yes, no, or skip")]
pub struct InvalidResponse(pub String);

/// Manual step presented to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualStep<'a> {
    pub id: &'a str,
    pub description: &'a str,
    pub instructions: &'a [String],
}

/// Obtain answer to a manual step from a human.
pub trait Confirmer {
    /// Present manual step and block until a valid answer is given.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if no answer can be obtained at all.
    fn confirm(&mut self, step: &ManualStep<'_>) -> Result<ManualResponse, PromptError>;
}

impl<C> Confirmer for &mut C
where
    C: Confirmer + ?Sized,
{
    fn confirm(&mut self, step: &ManualStep<'_>) -> Result<ManualResponse, PromptError> {
        (**self).confirm(step)
    }
}

/// Terminal prompt through inquire.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquireConfirmer;

impl InquireConfirmer {
    pub fn new() -> Self {
        Self
    }
}

impl Confirmer for InquireConfirmer {
    fn confirm(&mut self, step: &ManualStep<'_>) -> Result<ManualResponse, PromptError> {
        let mut stderr = std::io::stderr().lock();
        write_instructions(&mut stderr, step)?;
        drop(stderr);

        let message = format!("Done with {:?}?", step.description);
        let answer = Text::new(message.as_str())
            .with_help_message("yes to confirm, no to abort, skip to decide later")
            .with_validator(validate_response)
            .prompt()?;

        Ok(answer.parse()?)
    }
}

fn validate_response(input: &str) -> Result<Validation, CustomUserError> {
    Ok(match input.parse::<ManualResponse>() {
        Ok(_) => Validation::Valid,
        Err(err) => Validation::Invalid(err.to_string().into()),
    })
}

/// Line-oriented prompt over arbitrary reader and writer.
///
/// Useful when standard input is not a terminal.
#[derive(Debug)]
pub struct LineConfirmer<R, W> {
    input: R,
    output: W,
}

impl<R, W> LineConfirmer<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R, W> Confirmer for LineConfirmer<R, W>
where
    R: BufRead,
    W: Write,
{
    fn confirm(&mut self, step: &ManualStep<'_>) -> Result<ManualResponse, PromptError> {
        write_instructions(&mut self.output, step)?;

        loop {
            write!(self.output, "Done with {:?}? [yes/no/skip] ", step.description)?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(PromptError::Closed);
            }

            match line.parse() {
                Ok(response) => return Ok(response),
                Err(err) => writeln!(self.output, "{err}")?,
            }
        }
    }
}

fn write_instructions(output: &mut impl Write, step: &ManualStep<'_>) -> std::io::Result<()> {
    writeln!(output, "Manual step: {}", step.description)?;
    for (number, instruction) in step.instructions.iter().enumerate() {
        writeln!(output, "  {}. {instruction}", number + 1)?;
    }

    Ok(())
}

/// Observable outcome of a manual step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    /// Step was already complete, nobody was asked.
    Skipped { id: String, description: String },

    /// Human confirmed the work, step is now complete.
    Confirmed { id: String, description: String },

    /// Human deferred the decision, step stays pending.
    Deferred { id: String, description: String },
}

impl ManualOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Skipped { id, .. } | Self::Confirmed { id, .. } | Self::Deferred { id, .. } => id,
        }
    }
}

/// Run manual steps by asking a human.
#[derive(Debug, Clone)]
pub struct ManualPrompter {
    registry: Registry,
}

impl ManualPrompter {
    pub fn new(store: Store) -> Self {
        Self {
            registry: Registry::new(store),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Ask human to perform manual step unless it is already complete.
    ///
    /// Unknown steps are registered as pending manual steps first.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if id is malformed.
    /// - Return [`Error::Declined`] if human declines. Nothing is recorded.
    /// - Return [`Error::Prompt`] if no answer can be obtained.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self, description, instructions, confirmer), level = "debug")]
    pub fn run_manual_step(
        &self,
        id: &str,
        description: &str,
        instructions: &[String],
        mut confirmer: impl Confirmer,
    ) -> Result<ManualOutcome> {
        let spec = StepSpec::new(id, description, Kind::Manual, Subtype::Other);
        let record = self.registry.register_spec(&spec)?;
        if record.status.is_complete() {
            info!("skip {id:?}, already complete");
            return Ok(ManualOutcome::Skipped {
                id: id.into(),
                description: description.into(),
            });
        }

        let step = ManualStep {
            id,
            description,
            instructions,
        };
        match confirmer.confirm(&step)? {
            ManualResponse::Confirm => {
                self.registry.mark_complete(id)?;
                Ok(ManualOutcome::Confirmed {
                    id: id.into(),
                    description: description.into(),
                })
            }
            ManualResponse::Decline => {
                warn!("manual step {id:?} declined");
                Err(Error::Declined { id: id.into() })
            }
            ManualResponse::Defer => {
                info!("manual step {id:?} deferred");
                Ok(ManualOutcome::Deferred {
                    id: id.into(),
                    description: description.into(),
                })
            }
        }
    }
}

/// All possible error types for obtaining an answer.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Input ended before a valid answer was given.
    #[error("prompt input closed before an answer was given")]
    Closed,

    /// Answer could not be parsed.
    #[error(transparent)]
    Invalid(#[from] InvalidResponse),

    /// Reading or writing the prompt failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Terminal prompt failed or was interrupted.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, state::StatusKind};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::io::Cursor;

    #[test_case("y", ManualResponse::Confirm; "short confirm")]
    #[test_case(" Yes \n", ManualResponse::Confirm; "padded confirm")]
    #[test_case("no", ManualResponse::Decline; "decline")]
    #[test_case("skip", ManualResponse::Defer; "defer")]
    #[test]
    fn parse_response(input: &str, expect: ManualResponse) {
        pretty_assertions::assert_eq!(input.parse::<ManualResponse>(), Ok(expect));
    }

    #[test]
    fn line_confirmer_repeats_on_invalid_input() -> anyhow::Result<()> {
        let instructions = vec!["Open System Settings".to_string()];
        let step = ManualStep {
            id: "manual-filevault",
            description: "Enable FileVault",
            instructions: &instructions,
        };
        let mut confirmer = LineConfirmer::new(Cursor::new("\nmaybe\ny\n"), Vec::new());

        assert_eq!(confirmer.confirm(&step)?, ManualResponse::Confirm);

        let result = String::from_utf8(confirmer.into_output())?;
        let expect = indoc! {r#"
            Manual step: Enable FileVault
              1. Open System Settings
            Done with "Enable FileVault"? [yes/no/skip] unrecognized answer "", answer yes, no, or skip
            Done with "Enable FileVault"? [yes/no/skip] unrecognized answer "maybe", answer yes, no, or skip
            Done with "Enable FileVault"? [yes/no/skip] "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn line_confirmer_fails_on_closed_input() {
        let step = ManualStep {
            id: "foo",
            description: "Foo",
            instructions: &[],
        };
        let mut confirmer = LineConfirmer::new(Cursor::new("what\n"), std::io::sink());

        assert!(matches!(confirmer.confirm(&step), Err(PromptError::Closed)));
    }

    #[test]
    fn manual_step_responses() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let prompter = ManualPrompter::new(Store::new(dir.path()));
        let no_input = || LineConfirmer::new(Cursor::new(""), std::io::sink());

        let result = prompter.run_manual_step(
            "foo",
            "Foo",
            &[],
            LineConfirmer::new(Cursor::new("skip\n"), std::io::sink()),
        )?;
        assert!(matches!(result, ManualOutcome::Deferred { .. }));
        assert_eq!(prompter.registry().status("foo")?.kind(), StatusKind::Pending);

        let result = prompter
            .run_manual_step(
                "foo",
                "Foo",
                &[],
                LineConfirmer::new(Cursor::new("no\n"), std::io::sink()),
            )
            .unwrap_err();
        assert_eq!(result.kind(), ErrorKind::Declined);
        assert_eq!(prompter.registry().status("foo")?.kind(), StatusKind::Pending);

        let result = prompter.run_manual_step(
            "foo",
            "Foo",
            &[],
            LineConfirmer::new(Cursor::new("yes\n"), std::io::sink()),
        )?;
        assert!(matches!(result, ManualOutcome::Confirmed { .. }));
        assert!(prompter.registry().is_complete("foo")?);

        // Nobody gets asked once complete.
        let result = prompter.run_manual_step("foo", "Foo", &[], no_input())?;
        assert!(matches!(result, ManualOutcome::Skipped { .. }));

        Ok(())
    }
}
