// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Engine error types.
//!
//! Every failure the engine reports carries an [`ErrorKind`] so that callers
//! can tell failures apart without parsing messages. The command line
//! interface maps each kind to its own exit code.

use crate::{
    gate::ActionFailure,
    manual::PromptError,
    state::{StatusKind, Subtype, ValidationError},
    store::StoreError,
    system::SystemError,
};

use std::fmt::{Display, Formatter, Result as FmtResult};

/// All possible error types of the step engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller supplied out-of-vocabulary or malformed arguments.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Referenced step id is not present in the state document.
    #[error("step {id:?} not found")]
    NotFound { id: String },

    /// Undo attempted on a step that cannot be undone right now.
    #[error("step {id:?} cannot be undone: {reason}")]
    NotReversible {
        id: String,
        reason: NotReversibleReason,
    },

    /// Undo handler does not match the subtype of the step.
    #[error("step {id:?} has subtype {actual}, cannot undo it as {expected}")]
    UnsupportedSubtype {
        id: String,
        expected: Subtype,
        actual: Subtype,
    },

    /// Undo params needed to reverse the step were never recorded.
    #[error("step {id:?} is missing undo params: {}", .missing.join(", "))]
    MissingParams {
        id: String,
        missing: Vec<&'static str>,
    },

    /// Undo param was recorded, but cannot be used.
    #[error("step {id:?} has unusable undo param {key:?}: {reason}")]
    InvalidParam {
        id: String,
        key: &'static str,
        reason: String,
    },

    /// No undo target could be resolved for the step.
    #[error("cannot determine what to undo for step {id:?}")]
    AmbiguousTarget { id: String },

    /// External action of a step failed.
    #[error("action of step {id:?} failed")]
    ActionFailed {
        id: String,
        #[source]
        source: ActionFailure,
    },

    /// Inverse action of a step failed.
    #[error("failed to reverse step {id:?}")]
    ReversalFailed {
        id: String,
        #[source]
        source: SystemError,
    },

    /// Human declined to confirm manual step.
    #[error("manual step {id:?} was declined")]
    Declined { id: String },

    /// Human confirmation could not be obtained.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// State document cannot be stored, or is corrupt.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotReversible { .. } => ErrorKind::NotReversible,
            Self::UnsupportedSubtype { .. } => ErrorKind::UnsupportedSubtype,
            Self::MissingParams { .. } | Self::InvalidParam { .. } => ErrorKind::MissingParams,
            Self::AmbiguousTarget { .. } => ErrorKind::AmbiguousTarget,
            Self::ActionFailed { .. } | Self::ReversalFailed { .. } => ErrorKind::ActionFailed,
            Self::Declined { .. } => ErrorKind::Declined,
            Self::Prompt(_) => ErrorKind::Prompt,
            Self::Store(error) if error.is_corruption() => ErrorKind::Corruption,
            Self::Store(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Reason a step cannot be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReversibleReason {
    /// Step is not complete.
    Status(StatusKind),

    /// Step subtype has no inverse action.
    Subtype(Subtype),
}

impl Display for NotReversibleReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Status(status) => write!(fmt, "status is {status}, not complete"),
            Self::Subtype(subtype) => write!(fmt, "subtype {subtype} has no inverse action"),
        }
    }
}

/// Machine-readable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotReversible,
    UnsupportedSubtype,
    MissingParams,
    AmbiguousTarget,
    ActionFailed,
    Declined,
    Prompt,
    Storage,
    Corruption,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not-found",
            Self::NotReversible => "not-reversible",
            Self::UnsupportedSubtype => "unsupported-subtype",
            Self::MissingParams => "missing-params",
            Self::AmbiguousTarget => "ambiguous-target",
            Self::ActionFailed => "action-failed",
            Self::Declined => "declined",
            Self::Prompt => "prompt",
            Self::Storage => "storage",
            Self::Corruption => "corruption",
        }
    }

    /// Process exit code for this kind. Never zero, never one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation => 2,
            Self::NotFound => 3,
            Self::NotReversible => 4,
            Self::UnsupportedSubtype => 5,
            Self::MissingParams => 6,
            Self::AmbiguousTarget => 7,
            Self::ActionFailed => 8,
            Self::Declined => 9,
            Self::Prompt => 10,
            Self::Storage => 11,
            Self::Corruption => 12,
        }
    }

    /// Failure confined to a single step that a batch may choose to skip past.
    pub fn is_step_local(&self) -> bool {
        matches!(self, Self::Validation | Self::ActionFailed)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.pad(self.as_str())
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
