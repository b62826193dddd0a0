// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! State document storage.
//!
//! Oxisetup keeps the state of every step inside one JSON document called
//! the __state document__. The [`Store`] exclusively owns that document on
//! disk. Everything else reads a full copy, edits the copy, and hands the
//! whole copy back to be written.
//!
//! # Atomic Replacement
//!
//! Writes never touch the target file directly. A complete document is first
//! written and synced to a temporary sibling file, which is then renamed over
//! the target. Readers therefore observe either the old document or the new
//! one in full, even if the process dies mid-write.
//!
//! # Single Writer
//!
//! The store does not lock the document. Two processes running against the
//! same document can silently drop each other's changes, because each write
//! replaces the entire document with a copy read at the start of that
//! operation. Only run one oxisetup process against a state directory at a
//! time.
//!
//! # Corruption
//!
//! A document that fails to parse or validate is reported as corrupt and is
//! never repaired or removed automatically. Resetting it would mark already
//! installed packages as never installed.

use crate::state::{SchemaError, StateDocument};

use std::{
    fs::read_to_string,
    io::{ErrorKind as IoErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Fixed file name of the state document inside its state directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Handle to state document inside a state directory.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
    path: PathBuf,
}

impl Store {
    /// Construct new store handle for target state directory.
    ///
    /// Does not touch the file system.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(STATE_FILE_NAME);
        Self { dir, path }
    }

    /// Path to state document.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Create empty state document if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if state directory cannot be
    ///   created.
    /// - Return [`StoreError::Stage`] or [`StoreError::Replace`] if empty
    ///   document cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn initialize(&self) -> Result<()> {
        mkdirp::mkdirp(&self.dir).map_err(|err| StoreError::CreateDir {
            source: err,
            path: self.dir.clone(),
        })?;

        match self.path.try_exists() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => {
                return Err(StoreError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        }

        info!("initialize state document at {:?}", self.path.display());
        self.write(&StateDocument::default())
    }

    /// Read current state document.
    ///
    /// Initializes the document first if it is missing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Corrupt`] if document fails schema validation.
    /// - Return [`StoreError::Read`] if document cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self) -> Result<StateDocument> {
        self.initialize()?;
        debug!("read state document {:?}", self.path.display());
        let content = read_to_string(&self.path).map_err(|err| StoreError::Read {
            source: err,
            path: self.path.clone(),
        })?;

        parse_document(&content).map_err(|err| StoreError::Corrupt {
            source: err,
            path: self.path.clone(),
        })
    }

    /// Validate and atomically replace state document.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Corrupt`] if document fails validation. On-disk
    ///   document is left untouched.
    /// - Return [`StoreError::Stage`] if replacement cannot be staged.
    /// - Return [`StoreError::Replace`] if replacement cannot be renamed over
    ///   current document.
    #[instrument(skip(self, document), level = "debug")]
    pub fn write(&self, document: &StateDocument) -> Result<()> {
        self.stage(document)?.commit()
    }

    /// Write replacement document next to current one without committing it.
    ///
    /// Dropping the returned [`StagedWrite`] discards the replacement, and
    /// leaves the current document as it was.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Corrupt`] if document fails validation.
    /// - Return [`StoreError::Stage`] if temporary file cannot be written.
    pub fn stage(&self, document: &StateDocument) -> Result<StagedWrite> {
        document.validate().map_err(|err| StoreError::Corrupt {
            source: Corruption::Schema(err),
            path: self.path.clone(),
        })?;

        let mut content = serde_json::to_string_pretty(document).map_err(StoreError::Serialize)?;
        content.push('\n');

        let stage_err = |err: std::io::Error| StoreError::Stage {
            source: err,
            path: self.dir.clone(),
        };
        let mut file = NamedTempFile::new_in(&self.dir).map_err(stage_err)?;
        file.write_all(content.as_bytes()).map_err(stage_err)?;
        file.flush().map_err(stage_err)?;
        file.as_file().sync_all().map_err(stage_err)?;
        debug!("staged state document at {:?}", file.path().display());

        Ok(StagedWrite {
            file,
            target: self.path.clone(),
        })
    }

    /// Edit state document.
    ///
    /// Reads a fresh copy of the document, hands it to the editor, and
    /// writes it back if the editor changed anything. Nothing is written if
    /// the editor fails.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Store::read`] or [`Store::write`].
    /// - Return whatever error the editor returns.
    pub fn edit<T, E, F>(&self, editor: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut StateDocument) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let original = self.read()?;
        let mut document = original.clone();
        let output = editor(&mut document)?;

        if document != original {
            self.write(&document)?;
        }

        Ok(output)
    }
}

fn parse_document(content: &str) -> std::result::Result<StateDocument, Corruption> {
    let document: StateDocument = serde_json::from_str(content)?;
    document.validate()?;
    Ok(document)
}

/// Replacement document waiting to be renamed over the current one.
#[derive(Debug)]
pub struct StagedWrite {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Rename staged document over current document.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Replace`] if rename fails.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.file
            .persist(&target)
            .map_err(|err| StoreError::Replace {
                source: err.error,
                path: target.clone(),
            })?;
        debug!("replaced state document {:?}", target.display());

        Ok(())
    }
}

/// Reason a state document is considered corrupt.
#[derive(Debug, thiserror::Error)]
pub enum Corruption {
    /// Content is not a well-formed state document.
    #[error(transparent)]
    Syntax(#[from] serde_json::Error),

    /// Content parses, but violates schema rules.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// All possible error types for state document storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// State directory cannot be created.
    #[error("failed to create state directory {:?}", .path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State document cannot be read.
    #[error("failed to read state document {:?}", .path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Replacement document cannot be written into state directory.
    #[error("failed to stage state document in {:?}", .path.display())]
    Stage {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Replacement document cannot be renamed over current document.
    #[error("failed to replace state document {:?}", .path.display())]
    Replace {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State document cannot be serialized.
    #[error("failed to serialize state document")]
    Serialize(#[source] serde_json::Error),

    /// State document is corrupt.
    #[error("state document {:?} is corrupt, fix or move it by hand", .path.display())]
    Corrupt {
        #[source]
        source: Corruption,
        path: PathBuf,
    },
}

impl StoreError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// Whether failure stems from missing permissions.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::CreateDir { source, .. }
            | Self::Read { source, .. }
            | Self::Stage { source, .. }
            | Self::Replace { source, .. } => source.kind() == IoErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
