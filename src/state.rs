// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step state data model.
//!
//! Every unit of setup work oxisetup performs is a __step__. Each step is
//! tracked through a small lifecycle inside a single __state document__ so
//! that repeated runs can skip work that is already done, and so that some
//! work can be undone later.
//!
//! # Step Lifecycle
//!
//! A step starts out as _pending_. Once its action succeeds, it becomes
//! _complete_. A complete step of a reversible subtype can be undone, which
//! moves it to _reversible-pending_. Re-applying a reversible-pending step
//! makes it complete again.
//!
//! ```text
//! pending ──run──▶ complete ──undo──▶ reversible-pending
//!                     ▲                        │
//!                     └────────re-apply────────┘
//! ```
//!
//! The [`Status`] type only exposes these transitions, so there is no way to
//! build a reversible-pending status that was never complete.
//!
//! # Document Layout
//!
//! The state document is stored as JSON. Status and timestamps are flattened
//! into each step record as `status`, `completedAt`, and `undoneAt`. Any
//! document that fails to deserialize into this model, or that violates the
//! checks in [`StateDocument::validate`], is considered corrupt.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Schema version written into new state documents.
pub const SCHEMA_VERSION: &str = "1.0.0";

const SUPPORTED_MAJOR: u64 = 1;

/// UTC timestamp with second precision.
pub type Timestamp = DateTime<Utc>;

/// Current time truncated to whole seconds.
pub fn now() -> Timestamp {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(
    id: &str,
    field: &'static str,
    value: &str,
) -> Result<Timestamp, SchemaError> {
    // Only the canonical form round-trips.
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .filter(|timestamp| format_timestamp(timestamp) == value)
        .ok_or_else(|| SchemaError::Timestamp {
            id: id.into(),
            field,
            value: value.into(),
        })
}

/// Whether a step runs a command or needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Automated,
    Manual,
}

impl Kind {
    /// Every accepted spelling of a kind.
    pub const ALLOWED: &'static [&'static str] = &["automated", "manual"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automated => "automated",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for Kind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "automated" => Ok(Self::Automated),
            "manual" => Ok(Self::Manual),
            _ => Err(ValidationError::Vocabulary {
                field: "kind",
                value: value.into(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.pad(self.as_str())
    }
}

/// Classification of a step that decides how it can be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subtype {
    /// Homebrew formula install.
    Brew,

    /// Homebrew cask (GUI application bundle) install.
    BrewCask,

    /// Preference key written through `defaults`.
    MacDefaults,

    /// Anything else. Cannot be undone.
    Other,
}

impl Subtype {
    /// Every accepted spelling of a subtype.
    pub const ALLOWED: &'static [&'static str] = &["brew", "brew-cask", "mac-defaults", "other"];

    /// Subtypes with a known inverse action.
    pub const REVERSIBLE: [Subtype; 3] = [Self::Brew, Self::BrewCask, Self::MacDefaults];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brew => "brew",
            Self::BrewCask => "brew-cask",
            Self::MacDefaults => "mac-defaults",
            Self::Other => "other",
        }
    }

    pub fn is_reversible(&self) -> bool {
        Self::REVERSIBLE.contains(self)
    }
}

impl FromStr for Subtype {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "brew" => Ok(Self::Brew),
            "brew-cask" => Ok(Self::BrewCask),
            "mac-defaults" => Ok(Self::MacDefaults),
            "other" => Ok(Self::Other),
            _ => Err(ValidationError::Vocabulary {
                field: "subtype",
                value: value.into(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

impl Display for Subtype {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.pad(self.as_str())
    }
}

/// Plain tag of a [`Status`], without timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    Pending,
    Complete,
    ReversiblePending,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::ReversiblePending => "reversible-pending",
        }
    }
}

impl Display for StatusKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Complete {
        completed_at: Timestamp,
    },
    ReversiblePending {
        completed_at: Timestamp,
        undone_at: Timestamp,
    },
}

/// Lifecycle status of a step.
///
/// # Invariant
///
/// - A complete status always carries its completion time.
/// - A reversible-pending status can only be produced by undoing a complete
///   status, and keeps the completion time it was undone from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(Phase);

impl Status {
    /// Initial status of every freshly registered step.
    pub fn pending() -> Self {
        Self(Phase::Pending)
    }

    pub fn kind(&self) -> StatusKind {
        match self.0 {
            Phase::Pending => StatusKind::Pending,
            Phase::Complete { .. } => StatusKind::Complete,
            Phase::ReversiblePending { .. } => StatusKind::ReversiblePending,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.0, Phase::Complete { .. })
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        match self.0 {
            Phase::Pending => None,
            Phase::Complete { completed_at } | Phase::ReversiblePending { completed_at, .. } => {
                Some(completed_at)
            }
        }
    }

    pub fn undone_at(&self) -> Option<Timestamp> {
        match self.0 {
            Phase::ReversiblePending { undone_at, .. } => Some(undone_at),
            _ => None,
        }
    }

    /// Transition to complete.
    ///
    /// Allowed from any status. Completing an already complete step simply
    /// refreshes its completion time.
    pub fn complete(self, at: Timestamp) -> Self {
        Self(Phase::Complete { completed_at: at })
    }

    /// Transition from complete to reversible-pending.
    ///
    /// # Errors
    ///
    /// - Return [`IllegalTransition`] if current status is not complete.
    pub fn undo(self, at: Timestamp) -> Result<Self, IllegalTransition> {
        match self.0 {
            Phase::Complete { completed_at } => Ok(Self(Phase::ReversiblePending {
                completed_at,
                undone_at: at,
            })),
            _ => Err(IllegalTransition { from: self.kind() }),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::pending()
    }
}

/// Attempted to undo a step that was not complete.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot undo a step whose status is {from}")]
pub struct IllegalTransition {
    pub from: StatusKind,
}

/// Opaque subtype-specific data needed to reverse a step.
///
/// Values are kept as raw JSON so that callers can record whatever their
/// action needs. Use [`Params::get_str`] to read scalars in their literal
/// form.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Read scalar parameter in its literal form.
    ///
    /// Strings are returned as-is, booleans and numbers are rendered the way
    /// JSON writes them. Null, arrays, and objects yield nothing.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Bool(value) => Some(value.to_string()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Caller-supplied description of a step to register or run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub id: String,
    pub description: String,
    pub kind: Kind,
    pub subtype: Subtype,
    pub params: Params,
}

impl StepSpec {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        kind: Kind,
        subtype: Subtype,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind,
            subtype,
            params: Params::default(),
        }
    }

    /// Construct step spec from untyped vocabulary.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError`] naming the offending field if the id is
    ///   malformed, or if kind or subtype fall outside their vocabulary.
    pub fn parse(
        id: impl Into<String>,
        description: impl Into<String>,
        kind: &str,
        subtype: &str,
    ) -> Result<Self, ValidationError> {
        let spec = Self::new(id, description, kind.parse()?, subtype.parse()?);
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Check that the step id is usable as a document key.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::Malformed`] if id is empty or contains
    ///   whitespace or control characters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(&self.id)
    }
}

pub(crate) fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::Malformed {
            field: "id",
            value: id.into(),
            reason: "must not be empty",
        });
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::Malformed {
            field: "id",
            value: id.into(),
            reason: "must not contain whitespace or control characters",
        });
    }

    Ok(())
}

/// Tracked state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawStepRecord", into = "RawStepRecord")]
pub struct StepRecord {
    pub id: String,
    pub description: String,
    pub kind: Kind,
    pub subtype: Subtype,
    pub status: Status,
    pub params: Params,
}

impl StepRecord {
    /// Construct pending record from step spec.
    pub fn pending(spec: &StepSpec) -> Self {
        Self {
            id: spec.id.clone(),
            description: spec.description.clone(),
            kind: spec.kind,
            subtype: spec.subtype,
            status: Status::pending(),
            params: spec.params.clone(),
        }
    }
}

/// On-disk layout of a step record.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawStepRecord {
    id: String,
    description: String,
    kind: Kind,
    subtype: Subtype,
    status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    undone_at: Option<String>,
    #[serde(default)]
    params: Params,
}

impl TryFrom<RawStepRecord> for StepRecord {
    type Error = SchemaError;

    fn try_from(raw: RawStepRecord) -> Result<Self, Self::Error> {
        let id = raw.id;
        let completed_at = raw
            .completed_at
            .as_deref()
            .map(|value| parse_timestamp(&id, "completedAt", value))
            .transpose()?;
        let undone_at = raw
            .undone_at
            .as_deref()
            .map(|value| parse_timestamp(&id, "undoneAt", value))
            .transpose()?;

        let phase = match (raw.status, completed_at, undone_at) {
            (StatusKind::Pending, None, None) => Phase::Pending,
            (StatusKind::Complete, Some(completed_at), None) => Phase::Complete { completed_at },
            (StatusKind::ReversiblePending, Some(completed_at), Some(undone_at)) => {
                Phase::ReversiblePending {
                    completed_at,
                    undone_at,
                }
            }
            (status, _, _) => return Err(SchemaError::Timestamps { id, status }),
        };

        Ok(Self {
            id,
            description: raw.description,
            kind: raw.kind,
            subtype: raw.subtype,
            status: Status(phase),
            params: raw.params,
        })
    }
}

impl From<StepRecord> for RawStepRecord {
    fn from(record: StepRecord) -> Self {
        Self {
            id: record.id,
            description: record.description,
            kind: record.kind,
            subtype: record.subtype,
            status: record.status.kind(),
            completed_at: record.status.completed_at().as_ref().map(format_timestamp),
            undone_at: record.status.undone_at().as_ref().map(format_timestamp),
            params: record.params,
        }
    }
}

/// The single persisted record of all steps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateDocument {
    pub version: String,
    pub steps: BTreeMap<String, StepRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.into(),
            steps: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    pub fn get(&self, id: &str) -> Option<&StepRecord> {
        self.steps.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut StepRecord> {
        self.steps.get_mut(id)
    }

    /// Insert record under its own id, replacing any previous record.
    pub fn insert(&mut self, record: StepRecord) -> Option<StepRecord> {
        self.steps.insert(record.id.clone(), record)
    }

    /// Check document against schema rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// - Return [`SchemaError::Version`] if version is not a supported
    ///   `MAJOR.MINOR.PATCH` string.
    /// - Return [`SchemaError::IdMismatch`] if a record's id differs from its
    ///   key.
    /// - Return [`SchemaError::Id`] if a key is not a valid step id.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_supported_version(&self.version) {
            return Err(SchemaError::Version(self.version.clone()));
        }

        for (key, record) in &self.steps {
            validate_id(key).map_err(SchemaError::Id)?;
            if key != &record.id {
                return Err(SchemaError::IdMismatch {
                    key: key.clone(),
                    id: record.id.clone(),
                });
            }
        }

        Ok(())
    }
}

fn is_supported_version(version: &str) -> bool {
    let parts = version
        .split('.')
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>();

    matches!(parts.as_deref(), Ok([major, _, _]) if *major == SUPPORTED_MAJOR)
}

/// Caller supplied arguments outside the accepted vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Value is not part of a closed vocabulary.
    #[error("invalid {field} {value:?}: expected one of {}", .allowed.join(", "))]
    Vocabulary {
        field: &'static str,
        value: String,
        allowed: &'static [&'static str],
    },

    /// Value is structurally malformed.
    #[error("invalid {field} {value:?}: {reason}")]
    Malformed {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Vocabulary { field, .. } | Self::Malformed { field, .. } => *field,
        }
    }
}

/// State document violates its schema.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Version string is malformed or has an unsupported major.
    #[error("unsupported schema version {0:?}")]
    Version(String),

    /// Record stored under a key that is not its own id.
    #[error("step stored under {key:?} claims id {id:?}")]
    IdMismatch { key: String, id: String },

    /// Key is not a valid step id.
    #[error(transparent)]
    Id(ValidationError),

    /// Timestamp field cannot be parsed.
    #[error("step {id:?} has malformed {field} timestamp {value:?}")]
    Timestamp {
        id: String,
        field: &'static str,
        value: String,
    },

    /// Timestamps present do not match the recorded status.
    #[error("step {id:?} has timestamps inconsistent with status {status}")]
    Timestamps { id: String, status: StatusKind },
}
