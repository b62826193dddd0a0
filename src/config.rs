// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file and of step plan files. Apart from
//! the small `load` helpers, file I/O is left to the caller to figure out.

use crate::{
    batch::{FailurePolicy, PlannedStep, Work},
    gate::{Action, ActionFailure, CommandAction},
    state::Params,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Settings file layout.
///
/// Every setting is optional. A missing settings file is the same as an
/// empty one.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Load settings file, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if prefix cannot be expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                debug!("no settings file at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.into(),
            }),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on state prefix.
        if let Some(prefix) = config.settings.prefix.take() {
            config.settings.prefix = Some(PathBuf::from(
                shellexpand::full(prefix.to_string_lossy().as_ref())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            ));
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Engine settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory to keep engine state under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<PathBuf>,

    /// What a batch does after a step fails.
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Re-apply undone steps in a batch instead of skipping them.
    #[serde(default)]
    pub reapply_undone: bool,
}

/// Step plan layout.
///
/// A plan lists steps to run in order. Automated steps name the command to
/// run, manual steps name the instructions to show.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(rename = "step", default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Load plan file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.into(),
            })?
            .parse()
    }

    /// Turn plan into steps a batch can run.
    ///
    /// Kind, subtype, and command are left for the batch to check per step.
    pub fn into_steps(self) -> Vec<PlannedStep<'static>> {
        self.steps.into_iter().map(PlanStep::into_planned).collect()
    }
}

impl FromStr for Plan {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Single step of a plan.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub id: String,
    pub description: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default = "default_subtype")]
    pub subtype: String,

    /// Program and arguments of an automated step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Undo params recorded with the step.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,

    /// Instructions of a manual step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<String>>,
}

impl PlanStep {
    fn into_planned(self) -> PlannedStep<'static> {
        let work = if self.kind == "manual" {
            Work::Manual {
                instructions: self.instructions.unwrap_or_default(),
            }
        } else {
            match self.command.and_then(CommandAction::from_argv) {
                Some(mut action) => Work::Automated(Box::new(move || action.execute())),
                None => Work::Automated(Box::new(|| Err(ActionFailure::NoCommand))),
            }
        };

        PlannedStep {
            id: self.id,
            description: self.description,
            kind: self.kind,
            subtype: self.subtype,
            params: self.params,
            work,
        }
    }
}

fn default_kind() -> String {
    "automated".into()
}

fn default_subtype() -> String {
    "other".into()
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Failed to read configuration file.
    #[error("failed to read {:?}", .path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
