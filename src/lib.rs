// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent machine setup.
//!
//! Setup work is broken into __steps__. Every step has a stable id, and its
//! lifecycle is recorded in a single JSON state document so that re-running
//! a setup never repeats work that already completed. Steps of a few well
//! known subtypes (Homebrew formulae, Homebrew casks, macOS preference keys)
//! can also be undone.
//!
//! # Step Lifecycle
//!
//! ```text
//! (unregistered) -> pending -> complete -> reversible-pending -> complete
//! ```
//!
//! - [`Registry`] creates and queries step records.
//! - [`Gate`] runs automated steps only when they have not completed yet.
//! - [`ManualPrompter`] asks a human to perform manual steps.
//! - [`UndoEngine`] reverses completed steps of reversible subtypes.
//! - [`BatchRunner`] runs many steps in order under a failure policy.
//!
//! All of them share one [`Store`] that owns the state document.

pub mod batch;
pub mod config;
pub mod error;
pub mod gate;
pub mod manual;
pub mod path;
pub mod registry;
pub mod state;
pub mod store;
pub mod system;
pub mod undo;

#[doc(inline)]
pub use batch::{BatchReport, BatchRunner, FailurePolicy, PlannedStep, StepOutcome, Work};

#[doc(inline)]
pub use error::{Error, ErrorKind, Result};

#[doc(inline)]
pub use gate::{Action, ActionFailure, CommandAction, Gate, RunOutcome};

#[doc(inline)]
pub use manual::{Confirmer, InquireConfirmer, LineConfirmer, ManualOutcome, ManualPrompter};

#[doc(inline)]
pub use registry::Registry;

#[doc(inline)]
pub use state::{Kind, Params, Status, StatusKind, StepRecord, StepSpec, Subtype};

#[doc(inline)]
pub use store::Store;

#[doc(inline)]
pub use system::{HostSystem, System};

#[doc(inline)]
pub use undo::{UndoEngine, UndoReport};
