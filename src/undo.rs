// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Undo of completed steps.
//!
//! Only three subtypes of steps can be undone, because only they have a
//! well-defined inverse action:
//!
//! - __brew__: uninstall the Homebrew formula.
//! - __brew-cask__: uninstall the Homebrew cask. Files the application
//!   created outside of its bundle may remain.
//! - __mac-defaults__: restore the preference key to its recorded original
//!   value, or delete it if no original value was recorded. Services that
//!   cache the affected domain are restarted afterwards.
//!
//! An undo is only recorded once its inverse action succeeded, or once it is
//! proven unnecessary because the target is already gone. In both cases the
//! step moves to reversible-pending. A failed inverse action leaves the step
//! complete.
//!
//! # Undo Targets
//!
//! What to reverse is read from the step's recorded params first. Package
//! steps without a `package` param fall back to stripping a well-known prefix
//! from the step id, e.g., `brew-install-git` resolves to `git`. That fallback
//! exists for steps recorded before params were tracked.

use crate::{
    error::{Error, NotReversibleReason, Result},
    state::{now, StatusKind, StepRecord, Subtype},
    store::Store,
    system::{DefaultsValue, HostSystem, Package, PackageKind, Service, System},
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{info, instrument, warn};

const FORMULA_ID_PREFIXES: &[&str] = &["brew-install-", "brew-"];

const CASK_ID_PREFIXES: &[&str] = &[
    "brew-cask-install-",
    "brew-cask-",
    "cask-install-",
    "cask-",
];

const GLOBAL_DOMAINS: &[&str] = &["NSGlobalDomain", "-g", "-globalDomain", "Apple Global Domain"];

/// Completed step that can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoableStep {
    pub id: String,
    pub description: String,
    pub subtype: Subtype,
}

/// What the inverse action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversal {
    /// Package was uninstalled.
    Removed,

    /// Preference key was written back to its original value.
    Restored,

    /// Preference key was deleted.
    Deleted,

    /// Target was already in its reverted state, nothing was done.
    AlreadyReverted,
}

/// Soft failure noticed while undoing a step.
///
/// None of these prevent the undo from being recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoWarning {
    /// Undo target was already reverted.
    AlreadyReverted { target: String },

    /// Uninstalled cask may have left files outside its bundle.
    ResidualFiles { cask: String },

    /// Service caching the preference domain could not be restarted.
    ServiceRestart { service: Service, message: String },
}

impl Display for UndoWarning {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AlreadyReverted { target } => write!(fmt, "{target} was already reverted"),
            Self::ResidualFiles { cask } => write!(
                fmt,
                "cask {cask} may have left files behind, e.g., in ~/Library"
            ),
            Self::ServiceRestart { service, message } => {
                write!(fmt, "failed to restart {service}: {message}")
            }
        }
    }
}

/// Structured outcome of a successful undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoReport {
    pub id: String,
    pub description: String,
    pub subtype: Subtype,
    /// Human-readable name of what was reversed.
    pub target: String,
    pub reversal: Reversal,
    pub warnings: Vec<UndoWarning>,
}

/// Reverse completed steps of reversible subtypes.
#[derive(Debug, Clone)]
pub struct UndoEngine<S = HostSystem>
where
    S: System,
{
    store: Store,
    system: S,
}

impl<S> UndoEngine<S>
where
    S: System,
{
    /// Construct new undo engine over host system capabilities.
    pub fn new(store: Store, system: S) -> Self {
        Self { store, system }
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// Undo step with handler matching its recorded subtype.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::NotReversible`] if step is not complete, or if its
    ///   subtype has no inverse action.
    /// - Return any error of the subtype handler.
    #[instrument(skip(self), level = "debug")]
    pub fn undo(&self, id: &str) -> Result<UndoReport> {
        let record = self.complete_record(id)?;
        if !record.subtype.is_reversible() {
            return Err(Error::NotReversible {
                id: id.into(),
                reason: NotReversibleReason::Subtype(record.subtype),
            });
        }

        self.reverse(record)
    }

    /// Undo step with the handler of an expected subtype.
    ///
    /// The expected subtype must match the recorded one. Asking the brew
    /// handler to undo a mac-defaults step is an error, not a no-op.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::NotReversible`] if step is not complete.
    /// - Return [`Error::UnsupportedSubtype`] if expected subtype is not
    ///   reversible, or does not match recorded subtype.
    /// - Return any error of the subtype handler.
    #[instrument(skip(self), level = "debug")]
    pub fn undo_as(&self, id: &str, expected: Subtype) -> Result<UndoReport> {
        let record = self.complete_record(id)?;
        if !expected.is_reversible() || record.subtype != expected {
            return Err(Error::UnsupportedSubtype {
                id: id.into(),
                expected,
                actual: record.subtype,
            });
        }

        self.reverse(record)
    }

    /// Undo Homebrew formula step.
    ///
    /// # Errors
    ///
    /// - Same as [`UndoEngine::undo_as`].
    pub fn undo_brew(&self, id: &str) -> Result<UndoReport> {
        self.undo_as(id, Subtype::Brew)
    }

    /// Undo Homebrew cask step.
    ///
    /// # Errors
    ///
    /// - Same as [`UndoEngine::undo_as`].
    pub fn undo_cask(&self, id: &str) -> Result<UndoReport> {
        self.undo_as(id, Subtype::BrewCask)
    }

    /// Undo preference key step.
    ///
    /// # Errors
    ///
    /// - Same as [`UndoEngine::undo_as`].
    pub fn undo_defaults(&self, id: &str) -> Result<UndoReport> {
        self.undo_as(id, Subtype::MacDefaults)
    }

    /// List completed steps of reversible subtypes, ordered by id.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn list_undoable(&self) -> Result<Vec<UndoableStep>> {
        let document = self.store.read()?;
        Ok(document
            .steps
            .into_values()
            .filter(|record| record.status.is_complete() && record.subtype.is_reversible())
            .map(|record| UndoableStep {
                id: record.id,
                description: record.description,
                subtype: record.subtype,
            })
            .collect())
    }

    fn complete_record(&self, id: &str) -> Result<StepRecord> {
        let record = self
            .store
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))?;

        let status = record.status.kind();
        if status != StatusKind::Complete {
            return Err(Error::NotReversible {
                id: id.into(),
                reason: NotReversibleReason::Status(status),
            });
        }

        Ok(record)
    }

    fn reverse(&self, record: StepRecord) -> Result<UndoReport> {
        let report = match record.subtype {
            Subtype::Brew => self.reverse_package(&record, PackageKind::Formula)?,
            Subtype::BrewCask => self.reverse_package(&record, PackageKind::Cask)?,
            Subtype::MacDefaults => self.reverse_defaults(&record)?,
            Subtype::Other => {
                return Err(Error::NotReversible {
                    id: record.id,
                    reason: NotReversibleReason::Subtype(Subtype::Other),
                })
            }
        };

        self.store.edit(|document| {
            let current = document
                .get_mut(&record.id)
                .ok_or_else(|| Error::not_found(&record.id))?;
            current.status = current
                .status
                .undo(now())
                .map_err(|err| Error::NotReversible {
                    id: record.id.clone(),
                    reason: NotReversibleReason::Status(err.from),
                })?;
            Ok::<_, Error>(())
        })?;
        info!("step {:?} undone", record.id);

        Ok(report)
    }

    fn reverse_package(&self, record: &StepRecord, kind: PackageKind) -> Result<UndoReport> {
        let package = resolve_package(record, kind)?;
        let failed = |err| Error::ReversalFailed {
            id: record.id.clone(),
            source: err,
        };

        let mut warnings = Vec::new();
        let reversal = if self.system.is_installed(&package).map_err(failed)? {
            info!("uninstall {package}");
            self.system.uninstall(&package).map_err(failed)?;
            Reversal::Removed
        } else {
            let warning = UndoWarning::AlreadyReverted {
                target: package.to_string(),
            };
            warn!("{warning}");
            warnings.push(warning);
            Reversal::AlreadyReverted
        };

        if kind == PackageKind::Cask {
            let warning = UndoWarning::ResidualFiles {
                cask: package.name.clone(),
            };
            warn!("{warning}");
            warnings.push(warning);
        }

        Ok(UndoReport {
            id: record.id.clone(),
            description: record.description.clone(),
            subtype: record.subtype,
            target: package.to_string(),
            reversal,
            warnings,
        })
    }

    fn reverse_defaults(&self, record: &StepRecord) -> Result<UndoReport> {
        let target = DefaultsTarget::resolve(record)?;
        let failed = |err| Error::ReversalFailed {
            id: record.id.clone(),
            source: err,
        };
        let name = format!("{} {}", target.domain, target.key);
        let current = self
            .system
            .read_default(&target.domain, &target.key)
            .map_err(failed)?;

        let mut warnings = Vec::new();
        let reversal = match (&target.original, current) {
            (Some(original), Some(current)) if original.matches(&current) => {
                Reversal::AlreadyReverted
            }
            (Some(original), _) => {
                info!("restore {name} to {original}");
                self.system
                    .write_default(&target.domain, &target.key, original)
                    .map_err(failed)?;
                Reversal::Restored
            }
            (None, Some(_)) => {
                info!("delete {name}");
                self.system
                    .delete_default(&target.domain, &target.key)
                    .map_err(failed)?;
                Reversal::Deleted
            }
            (None, None) => Reversal::AlreadyReverted,
        };

        if reversal == Reversal::AlreadyReverted {
            let warning = UndoWarning::AlreadyReverted {
                target: name.clone(),
            };
            warn!("{warning}");
            warnings.push(warning);
        } else {
            for service in services_for_domain(&target.domain) {
                if let Err(err) = self.system.restart_service(service) {
                    let warning = UndoWarning::ServiceRestart {
                        service,
                        message: err.to_string(),
                    };
                    warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }

        Ok(UndoReport {
            id: record.id.clone(),
            description: record.description.clone(),
            subtype: record.subtype,
            target: name,
            reversal,
            warnings,
        })
    }
}

/// Resolve Homebrew package a step installed.
///
/// Uses the `package` param if recorded (casks also accept `cask`).
/// Otherwise strips the first matching well-known prefix from the step id.
///
/// # Errors
///
/// - Return [`Error::AmbiguousTarget`] if no usable package name can be
///   determined.
pub fn resolve_package(record: &StepRecord, kind: PackageKind) -> Result<Package> {
    let from_params = match kind {
        PackageKind::Formula => record.params.get_str("package"),
        PackageKind::Cask => record
            .params
            .get_str("package")
            .or_else(|| record.params.get_str("cask")),
    };

    let name = from_params.or_else(|| {
        let prefixes = match kind {
            PackageKind::Formula => FORMULA_ID_PREFIXES,
            PackageKind::Cask => CASK_ID_PREFIXES,
        };
        prefixes
            .iter()
            .find_map(|prefix| record.id.strip_prefix(prefix))
            .map(str::to_owned)
    });

    match name {
        Some(name) if is_package_name(&name) => Ok(Package::new(name, kind)),
        _ => Err(Error::AmbiguousTarget {
            id: record.id.clone(),
        }),
    }
}

fn is_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Services whose running state caches a preference domain.
pub fn services_for_domain(domain: &str) -> Vec<Service> {
    let lowered = domain.to_ascii_lowercase();
    let mut services = Vec::new();

    if lowered.contains("dock") {
        services.push(Service::Dock);
    }

    if GLOBAL_DOMAINS.contains(&domain)
        || lowered.contains("finder")
        || lowered.contains("screencapture")
    {
        services.push(Service::Finder);
        services.push(Service::SystemUiServer);
    }

    services
}

#[derive(Debug, Clone, PartialEq)]
struct DefaultsTarget {
    domain: String,
    key: String,
    original: Option<DefaultsValue>,
}

impl DefaultsTarget {
    fn resolve(record: &StepRecord) -> Result<Self> {
        let domain = record.params.get_str("domain").filter(|s| !s.is_empty());
        let key = record.params.get_str("key").filter(|s| !s.is_empty());

        let (domain, key) = match (domain, key) {
            (Some(domain), Some(key)) => (domain, key),
            (domain, key) => {
                let mut missing = Vec::new();
                if domain.is_none() {
                    missing.push("domain");
                }
                if key.is_none() {
                    missing.push("key");
                }
                return Err(Error::MissingParams {
                    id: record.id.clone(),
                    missing,
                });
            }
        };

        let original = match (
            record.params.get_str("originalValue"),
            record.params.get_str("type"),
        ) {
            (Some(literal), Some(tag)) => Some(DefaultsValue::with_type(&tag, &literal).map_err(
                |err| Error::InvalidParam {
                    id: record.id.clone(),
                    key: "type",
                    reason: err.to_string(),
                },
            )?),
            (Some(literal), None) => Some(DefaultsValue::infer(&literal)),
            (None, _) => None,
        };

        Ok(Self {
            domain,
            key,
            original,
        })
    }
}
