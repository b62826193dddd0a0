// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step registration and status queries.

use crate::{
    error::{Error, Result},
    state::{now, validate_id, Params, Status, StepRecord, StepSpec},
    store::Store,
};

use tracing::{debug, info, instrument};

/// Create, query, and complete step records.
#[derive(Debug, Clone)]
pub struct Registry {
    store: Store,
}

impl Registry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register step from untyped vocabulary.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if kind or subtype is out of vocabulary,
    ///   or if id is malformed. State document is not touched.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    pub fn register(
        &self,
        id: impl Into<String>,
        description: impl Into<String>,
        kind: &str,
        subtype: &str,
    ) -> Result<StepRecord> {
        let spec = StepSpec::parse(id, description, kind, subtype)?;
        self.register_spec(&spec)
    }

    /// Register step as pending.
    ///
    /// If the step id is already registered, its existing record is returned
    /// untouched. Registration never downgrades a completed step.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if id is malformed.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self, spec), fields(id = %spec.id), level = "debug")]
    pub fn register_spec(&self, spec: &StepSpec) -> Result<StepRecord> {
        spec.validate()?;
        self.store.edit(|document| {
            if let Some(existing) = document.get(&spec.id) {
                debug!("step {:?} already registered", spec.id);
                return Ok(existing.clone());
            }

            info!("register step {:?} ({}, {})", spec.id, spec.kind, spec.subtype);
            let record = StepRecord::pending(spec);
            document.insert(record.clone());
            Ok(record)
        })
    }

    /// Find step record.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn find(&self, id: &str) -> Result<Option<StepRecord>> {
        Ok(self.store.read()?.get(id).cloned())
    }

    /// Get step record.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn get(&self, id: &str) -> Result<StepRecord> {
        self.find(id)?.ok_or_else(|| Error::not_found(id))
    }

    /// Get current status of step.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn status(&self, id: &str) -> Result<Status> {
        Ok(self.get(id)?.status)
    }

    /// Check if step is complete.
    ///
    /// Unknown step ids are simply not complete.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn is_complete(&self, id: &str) -> Result<bool> {
        Ok(self
            .find(id)?
            .is_some_and(|record| record.status.is_complete()))
    }

    /// Mark step as complete right now.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self), level = "debug")]
    pub fn mark_complete(&self, id: &str) -> Result<StepRecord> {
        self.store.edit(|document| {
            let record = document.get_mut(id).ok_or_else(|| Error::not_found(id))?;
            record.status = record.status.complete(now());
            info!("mark step {id:?} complete");
            Ok(record.clone())
        })
    }

    /// Attach undo params to registered step, replacing previous ones.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self, params), level = "debug")]
    pub fn record_params(&self, id: &str, params: Params) -> Result<StepRecord> {
        self.store.edit(|document| {
            let record = document.get_mut(id).ok_or_else(|| Error::not_found(id))?;
            record.params = params;
            Ok(record.clone())
        })
    }

    /// List all registered steps ordered by id.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Store`] if state document cannot be read.
    pub fn steps(&self) -> Result<Vec<StepRecord>> {
        Ok(self.store.read()?.steps.into_values().collect())
    }

    /// Remove step record entirely.
    ///
    /// Does not reverse anything the step did.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Validation`] if id is malformed.
    /// - Return [`Error::NotFound`] if step is not registered.
    /// - Return [`Error::Store`] if state document cannot be read or written.
    #[instrument(skip(self), level = "debug")]
    pub fn forget(&self, id: &str) -> Result<StepRecord> {
        validate_id(id)?;
        self.store.edit(|document| {
            let record = document
                .steps
                .remove(id)
                .ok_or_else(|| Error::not_found(id))?;
            info!("forget step {id:?}");
            Ok(record)
        })
    }
}
