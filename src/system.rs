// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host system capabilities.
//!
//! Undoing a step means calling out to the host: Homebrew removes packages,
//! `defaults` edits preference keys, and `killall` restarts services that
//! cache those preferences. Undo handlers only ever talk to the host through
//! the [`System`] trait, so tests can substitute a scripted fake for the real
//! thing.

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument};

/// Namespace a Homebrew package lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// Command line formula.
    Formula,

    /// GUI application bundle.
    Cask,
}

impl PackageKind {
    fn list_flag(&self) -> &'static str {
        match self {
            Self::Formula => "--formula",
            Self::Cask => "--cask",
        }
    }
}

/// Homebrew package to inspect or remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Package {
    pub name: String,
    pub kind: PackageKind,
}

impl Package {
    pub fn new(name: impl Into<String>, kind: PackageKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl Display for Package {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            PackageKind::Formula => write!(fmt, "formula {}", self.name),
            PackageKind::Cask => write!(fmt, "cask {}", self.name),
        }
    }
}

/// Typed value of a preference key.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultsValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl DefaultsValue {
    /// Infer value type from its literal form.
    ///
    /// Tries boolean, then integer, then floating point, and settles on
    /// string if nothing else fits.
    pub fn infer(literal: &str) -> Self {
        if let Some(value) = parse_bool(literal) {
            return Self::Bool(value);
        }

        if let Ok(value) = literal.parse::<i64>() {
            return Self::Int(value);
        }

        match literal.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Float(value),
            _ => Self::String(literal.into()),
        }
    }

    /// Parse literal as explicitly tagged type.
    ///
    /// # Errors
    ///
    /// - Return [`ValueTypeError::UnknownTag`] if tag is not a known type.
    /// - Return [`ValueTypeError::Literal`] if literal does not fit tag.
    pub fn with_type(tag: &str, literal: &str) -> Result<Self, ValueTypeError> {
        let mismatch = || ValueTypeError::Literal {
            tag: tag.into(),
            literal: literal.into(),
        };

        match tag.trim_start_matches('-') {
            "bool" | "boolean" => parse_bool(literal).map(Self::Bool).ok_or_else(mismatch),
            "int" | "integer" => literal.parse().map(Self::Int).map_err(|_| mismatch()),
            "float" | "real" => literal.parse().map(Self::Float).map_err(|_| mismatch()),
            "string" => Ok(Self::String(literal.into())),
            _ => Err(ValueTypeError::UnknownTag(tag.into())),
        }
    }

    /// Type flag understood by `defaults write`.
    pub fn type_flag(&self) -> &'static str {
        match self {
            Self::Bool(_) => "-bool",
            Self::Int(_) => "-int",
            Self::Float(_) => "-float",
            Self::String(_) => "-string",
        }
    }

    /// Check if value printed by `defaults read` equals this value.
    pub fn matches(&self, current: &str) -> bool {
        let current = current.trim();
        match self {
            Self::Bool(value) => match current {
                "1" => *value,
                "0" => !*value,
                _ => parse_bool(current) == Some(*value),
            },
            Self::Int(value) => current.parse::<i64>().ok() == Some(*value),
            Self::Float(value) => current.parse::<f64>().ok() == Some(*value),
            Self::String(value) => current == value,
        }
    }
}

impl Display for DefaultsValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bool(value) => write!(fmt, "{value}"),
            Self::Int(value) => write!(fmt, "{value}"),
            Self::Float(value) => write!(fmt, "{value}"),
            Self::String(value) => fmt.write_str(value),
        }
    }
}

fn parse_bool(literal: &str) -> Option<bool> {
    if literal.eq_ignore_ascii_case("true") {
        Some(true)
    } else if literal.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Long-running service that caches preference domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Dock,
    Finder,
    SystemUiServer,
}

impl Service {
    /// Process name to signal for a restart.
    pub fn process_name(&self) -> &'static str {
        match self {
            Self::Dock => "Dock",
            Self::Finder => "Finder",
            Self::SystemUiServer => "SystemUIServer",
        }
    }
}

impl Display for Service {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.process_name())
    }
}

/// Capabilities undo handlers need from the host.
pub trait System {
    /// Check if package is currently installed.
    fn is_installed(&self, package: &Package) -> Result<bool>;

    /// Remove installed package.
    fn uninstall(&self, package: &Package) -> Result<()>;

    /// Read current value of preference key, if the key exists.
    fn read_default(&self, domain: &str, key: &str) -> Result<Option<String>>;

    /// Write preference key.
    fn write_default(&self, domain: &str, key: &str, value: &DefaultsValue) -> Result<()>;

    /// Delete preference key.
    fn delete_default(&self, domain: &str, key: &str) -> Result<()>;

    /// Restart service so it picks up changed preferences.
    fn restart_service(&self, service: Service) -> Result<()>;
}

impl<S> System for &S
where
    S: System + ?Sized,
{
    fn is_installed(&self, package: &Package) -> Result<bool> {
        (**self).is_installed(package)
    }

    fn uninstall(&self, package: &Package) -> Result<()> {
        (**self).uninstall(package)
    }

    fn read_default(&self, domain: &str, key: &str) -> Result<Option<String>> {
        (**self).read_default(domain, key)
    }

    fn write_default(&self, domain: &str, key: &str, value: &DefaultsValue) -> Result<()> {
        (**self).write_default(domain, key, value)
    }

    fn delete_default(&self, domain: &str, key: &str) -> Result<()> {
        (**self).delete_default(domain, key)
    }

    fn restart_service(&self, service: Service) -> Result<()> {
        (**self).restart_service(service)
    }
}

/// Host system reached through `brew`, `defaults`, and `killall`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }
}

impl System for HostSystem {
    #[instrument(skip(self), level = "debug")]
    fn is_installed(&self, package: &Package) -> Result<bool> {
        let output = syscall_non_interactive(
            "brew",
            ["list", package.kind.list_flag(), package.name.as_str()],
        )?;
        Ok(output.status.success())
    }

    #[instrument(skip(self), level = "debug")]
    fn uninstall(&self, package: &Package) -> Result<()> {
        let mut args = vec!["uninstall"];
        if package.kind == PackageKind::Cask {
            args.push("--cask");
        }
        args.push(package.name.as_str());

        syscall_non_interactive("brew", args)?.into_success("brew")?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn read_default(&self, domain: &str, key: &str) -> Result<Option<String>> {
        let output = syscall_non_interactive("defaults", ["read", domain, key])?;
        if !output.status.success() {
            return Ok(None);
        }

        Ok(Some(chomp(output.stdout)))
    }

    #[instrument(skip(self), level = "debug")]
    fn write_default(&self, domain: &str, key: &str, value: &DefaultsValue) -> Result<()> {
        let literal = value.to_string();
        syscall_non_interactive(
            "defaults",
            ["write", domain, key, value.type_flag(), literal.as_str()],
        )?
        .into_success("defaults")?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_default(&self, domain: &str, key: &str) -> Result<()> {
        syscall_non_interactive("defaults", ["delete", domain, key])?.into_success("defaults")?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn restart_service(&self, service: Service) -> Result<()> {
        syscall_non_interactive("killall", [service.process_name()])?.into_success("killall")?;
        Ok(())
    }
}

/// Captured result of an external command.
#[derive(Debug)]
pub(crate) struct Captured {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl Captured {
    /// Combined stdout and stderr without trailing newline.
    pub(crate) fn message(&self) -> String {
        let mut message = String::new();

        if !self.stdout.is_empty() {
            message.push_str(format!("stdout: {}", self.stdout).as_str());
        }

        if !self.stderr.is_empty() {
            message.push_str(format!("stderr: {}", self.stderr).as_str());
        }

        chomp(message)
    }

    fn into_success(self, command: &str) -> Result<Self> {
        if !self.status.success() {
            return Err(SystemError::Failed {
                command: command.into(),
                message: self.message(),
            });
        }

        Ok(self)
    }
}

pub(crate) fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Captured> {
    let cmd = cmd.as_ref();
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|err| SystemError::Launch {
            source: err,
            command: cmd.to_string_lossy().into_owned(),
        })?;

    let captured = Captured {
        status: output.status,
        stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
        stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
    };
    debug!("{cmd:?} exited with {}", captured.status);

    Ok(captured)
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

/// Literal cannot be turned into a typed preference value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueTypeError {
    /// Type tag is not one `defaults` understands.
    #[error("unknown value type {0:?}")]
    UnknownTag(String),

    /// Literal does not parse as its tagged type.
    #[error("{literal:?} is not a valid {tag} value")]
    Literal { tag: String, literal: String },
}

/// All possible error types for host system interaction.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Command cannot be started at all.
    #[error("failed to launch {command:?}")]
    Launch {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Command ran, but reported failure.
    #[error("command {command:?} failed:\n{message}")]
    Failed { command: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = SystemError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("true", DefaultsValue::Bool(true); "boolean true")]
    #[test_case("FALSE", DefaultsValue::Bool(false); "boolean false uppercase")]
    #[test_case("36", DefaultsValue::Int(36); "integer")]
    #[test_case("-4", DefaultsValue::Int(-4); "negative integer")]
    #[test_case("0.5", DefaultsValue::Float(0.5); "floating point")]
    #[test_case("bottom", DefaultsValue::String("bottom".into()); "string")]
    #[test_case("inf", DefaultsValue::String("inf".into()); "non finite stays string")]
    #[test]
    fn infer_value_type(literal: &str, expect: DefaultsValue) {
        pretty_assertions::assert_eq!(DefaultsValue::infer(literal), expect);
    }

    #[test]
    fn explicit_value_type() {
        assert_eq!(
            DefaultsValue::with_type("string", "36"),
            Ok(DefaultsValue::String("36".into()))
        );
        assert_eq!(
            DefaultsValue::with_type("-float", "2"),
            Ok(DefaultsValue::Float(2.0))
        );
        assert_eq!(
            DefaultsValue::with_type("int", "abc"),
            Err(ValueTypeError::Literal {
                tag: "int".into(),
                literal: "abc".into()
            })
        );
        assert_eq!(
            DefaultsValue::with_type("data", "abc"),
            Err(ValueTypeError::UnknownTag("data".into()))
        );
    }

    #[test]
    fn match_printed_values() {
        assert!(DefaultsValue::Bool(true).matches("1\n"));
        assert!(!DefaultsValue::Bool(true).matches("0"));
        assert!(DefaultsValue::Int(36).matches("36"));
        assert!(DefaultsValue::String("bottom".into()).matches("bottom"));
        assert!(!DefaultsValue::String("bottom".into()).matches("left"));
    }

    #[test]
    fn chomp_trailing_newline() {
        assert_eq!(chomp("left\n".into()), "left");
        assert_eq!(chomp("left\r\n".into()), "left");
        assert_eq!(chomp("left".into()), "left");
    }
}
