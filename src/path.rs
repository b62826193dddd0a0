// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Determine default absolute path to the state prefix.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/oxisetup` as the default
/// absolute path. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_state_prefix() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("oxisetup"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the settings file.
///
/// Uses `$XDG_CONFIG_HOME/oxisetup/config.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("oxisetup").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Directory holding the state document under a prefix.
pub fn state_dir(prefix: impl AsRef<Path>) -> PathBuf {
    prefix.as_ref().join("state")
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
