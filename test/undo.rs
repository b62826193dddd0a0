// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{FakeSystem, StoreFixture};

use oxisetup::{
    error::{Error, ErrorKind},
    registry::Registry,
    state::{Params, StatusKind, Subtype},
    system::{PackageKind, Service},
    undo::{Reversal, UndoEngine, UndoWarning, UndoableStep},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::Value;
use simple_test_case::test_case;

fn complete_step(
    registry: &Registry,
    id: &str,
    subtype: &str,
    params: &[(&str, Value)],
) -> Result<()> {
    registry.register(id, "blah", "automated", subtype)?;
    if !params.is_empty() {
        registry.record_params(id, params.iter().cloned().collect::<Params>())?;
    }
    registry.mark_complete(id)?;
    Ok(())
}

fn dock_orientation() -> Vec<(&'static str, Value)> {
    vec![
        ("domain", "com.apple.dock".into()),
        ("key", "orientation".into()),
        ("originalValue", "bottom".into()),
    ]
}

#[test]
fn restore_dock_orientation() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new().with_default("com.apple.dock", "orientation", "left");
    let engine = UndoEngine::new(fixture.store(), &system);

    registry.register(
        "mac-defaults-dock-orientation",
        "Set dock orientation",
        "automated",
        "mac-defaults",
    )?;
    registry.record_params(
        "mac-defaults-dock-orientation",
        dock_orientation().into_iter().collect(),
    )?;
    registry.mark_complete("mac-defaults-dock-orientation")?;

    let report = engine.undo("mac-defaults-dock-orientation")?;
    assert_eq!(report.reversal, Reversal::Restored);
    assert!(report.warnings.is_empty());
    assert_eq!(
        system.default_value("com.apple.dock", "orientation").as_deref(),
        Some("bottom")
    );
    assert_eq!(
        system.calls(),
        vec![
            "write com.apple.dock orientation -string bottom".to_string(),
            "restart Dock".to_string(),
        ]
    );

    let status = registry.status("mac-defaults-dock-orientation")?;
    assert_eq!(status.kind(), StatusKind::ReversiblePending);
    assert!(status.undone_at().is_some());

    Ok(())
}

#[test]
fn uninstall_git() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new().with_package("git", PackageKind::Formula);
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "brew-install-git", "brew", &[])?;
    let completed_at = registry.status("brew-install-git")?.completed_at();

    let report = engine.undo_brew("brew-install-git")?;
    assert_eq!(report.reversal, Reversal::Removed);
    assert_eq!(report.target, "formula git");
    assert!(!system.has_package("git", PackageKind::Formula));

    let status = registry.status("brew-install-git")?;
    assert_eq!(status.kind(), StatusKind::ReversiblePending);
    assert_eq!(status.completed_at(), completed_at);
    assert!(status.undone_at() >= completed_at);

    Ok(())
}

#[test]
fn undo_absent_package_twice() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "brew-install-git", "brew", &[("package", "git".into())])?;

    let report = engine.undo_brew("brew-install-git")?;
    assert_eq!(report.reversal, Reversal::AlreadyReverted);
    assert_eq!(
        report.warnings,
        vec![UndoWarning::AlreadyReverted {
            target: "formula git".into()
        }]
    );
    assert_eq!(system.calls(), Vec::<String>::new());
    assert_eq!(
        registry.status("brew-install-git")?.kind(),
        StatusKind::ReversiblePending
    );

    let result = engine.undo_brew("brew-install-git").unwrap_err();
    assert!(matches!(result, Error::NotReversible { .. }));

    Ok(())
}

#[test]
fn cask_may_leave_files_behind() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new().with_package("firefox", PackageKind::Cask);
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "brew-cask-install-firefox", "brew-cask", &[])?;

    let report = engine.undo_cask("brew-cask-install-firefox")?;
    assert_eq!(report.reversal, Reversal::Removed);
    assert_eq!(
        report.warnings,
        vec![UndoWarning::ResidualFiles {
            cask: "firefox".into()
        }]
    );
    assert_eq!(system.calls(), vec!["uninstall cask firefox".to_string()]);

    Ok(())
}

#[test_case("pending"; "pending step")]
#[test_case("reversible-pending"; "undone step")]
#[test_case("other"; "irreversible subtype")]
#[test]
fn undo_precondition(case: &str) -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new().with_package("git", PackageKind::Formula);
    let engine = UndoEngine::new(fixture.store(), &system);

    match case {
        "pending" => {
            registry.register("brew-install-git", "Install git", "automated", "brew")?;
        }
        "reversible-pending" => {
            complete_step(&registry, "brew-install-git", "brew", &[])?;
            engine.undo("brew-install-git")?;
        }
        _ => complete_step(&registry, "brew-install-git", "other", &[])?,
    }
    let calls = system.calls();
    let before = fixture.bytes()?;

    let result = engine.undo("brew-install-git").unwrap_err();
    pretty_assertions::assert_eq!(result.kind(), ErrorKind::NotReversible);
    pretty_assertions::assert_eq!(system.calls(), calls);
    pretty_assertions::assert_eq!(fixture.bytes()?, before);

    Ok(())
}

#[test]
fn undo_unknown_step() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    let before = fixture.bytes()?;

    let result = engine.undo("brew-install-nothing").unwrap_err();
    assert_eq!(result.kind(), ErrorKind::NotFound);
    assert_eq!(fixture.bytes()?, before);

    Ok(())
}

#[test]
fn undo_with_mismatched_handler() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(
        &registry,
        "mac-defaults-dock-orientation",
        "mac-defaults",
        &dock_orientation(),
    )?;

    let result = engine
        .undo_brew("mac-defaults-dock-orientation")
        .unwrap_err();
    assert!(matches!(
        result,
        Error::UnsupportedSubtype {
            expected: Subtype::Brew,
            actual: Subtype::MacDefaults,
            ..
        }
    ));
    assert!(registry.is_complete("mac-defaults-dock-orientation")?);

    Ok(())
}

#[test]
fn failed_uninstall_keeps_step_complete() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new()
        .with_package("git", PackageKind::Formula)
        .failing_uninstall();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "brew-install-git", "brew", &[])?;

    let result = engine.undo("brew-install-git").unwrap_err();
    assert_eq!(result.kind(), ErrorKind::ActionFailed);
    assert!(registry.is_complete("brew-install-git")?);

    Ok(())
}

#[test]
fn unresolvable_package_is_ambiguous() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "install-developer-tools", "brew", &[])?;

    let result = engine.undo("install-developer-tools").unwrap_err();
    assert_eq!(result.kind(), ErrorKind::AmbiguousTarget);
    assert!(registry.is_complete("install-developer-tools")?);

    Ok(())
}

#[test]
fn defaults_without_domain_and_key() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(&registry, "mac-defaults-dock-orientation", "mac-defaults", &[])?;

    match engine.undo("mac-defaults-dock-orientation").unwrap_err() {
        Error::MissingParams { missing, .. } => assert_eq!(missing, vec!["domain", "key"]),
        err => panic!("unexpected error {err:?}"),
    }
    assert!(registry.is_complete("mac-defaults-dock-orientation")?);

    Ok(())
}

#[test]
fn defaults_without_original_value_deletes_key() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new()
        .with_default("NSGlobalDomain", "AppleShowAllExtensions", "1")
        .failing_restart();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(
        &registry,
        "mac-defaults-show-extensions",
        "mac-defaults",
        &[
            ("domain", "NSGlobalDomain".into()),
            ("key", "AppleShowAllExtensions".into()),
        ],
    )?;

    let report = engine.undo_defaults("mac-defaults-show-extensions")?;
    assert_eq!(report.reversal, Reversal::Deleted);
    assert_eq!(system.default_value("NSGlobalDomain", "AppleShowAllExtensions"), None);
    assert_eq!(
        system.calls(),
        vec![
            "delete NSGlobalDomain AppleShowAllExtensions".to_string(),
            "restart Finder".to_string(),
            "restart SystemUIServer".to_string(),
        ]
    );

    // Services failing to restart does not stop the undo.
    assert_eq!(report.warnings.len(), 2);
    assert!(matches!(
        report.warnings[0],
        UndoWarning::ServiceRestart {
            service: Service::Finder,
            ..
        }
    ));
    assert_eq!(
        registry.status("mac-defaults-show-extensions")?.kind(),
        StatusKind::ReversiblePending
    );

    Ok(())
}

#[test]
fn defaults_key_already_absent() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(
        &registry,
        "mac-defaults-dock-autohide",
        "mac-defaults",
        &[
            ("domain", "com.apple.dock".into()),
            ("key", "autohide".into()),
        ],
    )?;

    let report = engine.undo_defaults("mac-defaults-dock-autohide")?;
    assert_eq!(report.reversal, Reversal::AlreadyReverted);
    assert_eq!(
        report.warnings,
        vec![UndoWarning::AlreadyReverted {
            target: "com.apple.dock autohide".into()
        }]
    );
    assert_eq!(system.calls(), Vec::<String>::new());
    assert_eq!(
        registry.status("mac-defaults-dock-autohide")?.kind(),
        StatusKind::ReversiblePending
    );

    Ok(())
}

#[test]
fn restore_missing_key_to_original_value() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(
        &registry,
        "mac-defaults-dock-orientation",
        "mac-defaults",
        &dock_orientation(),
    )?;

    let report = engine.undo_defaults("mac-defaults-dock-orientation")?;
    assert_eq!(report.reversal, Reversal::Restored);
    assert!(report.warnings.is_empty());
    assert_eq!(
        system.default_value("com.apple.dock", "orientation").as_deref(),
        Some("bottom")
    );
    assert_eq!(
        system.calls(),
        vec![
            "write com.apple.dock orientation -string bottom".to_string(),
            "restart Dock".to_string(),
        ]
    );
    assert_eq!(
        registry.status("mac-defaults-dock-orientation")?.kind(),
        StatusKind::ReversiblePending
    );

    Ok(())
}

#[test]
fn defaults_already_at_original_value() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new().with_default("com.apple.dock", "orientation", "bottom");
    let engine = UndoEngine::new(fixture.store(), &system);
    complete_step(
        &registry,
        "mac-defaults-dock-orientation",
        "mac-defaults",
        &dock_orientation(),
    )?;

    let report = engine.undo("mac-defaults-dock-orientation")?;
    assert_eq!(report.reversal, Reversal::AlreadyReverted);
    assert_eq!(system.calls(), Vec::<String>::new());

    Ok(())
}

#[test]
fn list_undoable_steps() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let system = FakeSystem::new();
    let engine = UndoEngine::new(fixture.store(), &system);

    complete_step(&registry, "brew-install-git", "brew", &[])?;
    complete_step(&registry, "manual-filevault", "other", &[])?;
    registry.register("cask-firefox", "blah", "automated", "brew-cask")?;
    complete_step(&registry, "cask-iterm2", "brew-cask", &[])?;

    let result = engine.list_undoable()?;
    let expect = vec![
        UndoableStep {
            id: "brew-install-git".into(),
            description: "blah".into(),
            subtype: Subtype::Brew,
        },
        UndoableStep {
            id: "cask-iterm2".into(),
            description: "blah".into(),
            subtype: Subtype::BrewCask,
        },
    ];
    assert_eq!(result, expect);

    Ok(())
}
