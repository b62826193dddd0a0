// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{forbidden_action, CountingAction, FakeSystem, StoreFixture};

use oxisetup::{
    error::ErrorKind,
    gate::{Gate, RunOutcome},
    registry::Registry,
    state::{Kind, StatusKind, StepRecord, StepSpec, Subtype},
    store::Store,
    system::PackageKind,
    undo::UndoEngine,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use simple_test_case::test_case;
use std::fs::{read, read_dir, write};

fn git() -> StepSpec {
    StepSpec::new("brew-install-git", "Install git", Kind::Automated, Subtype::Brew)
}

#[test]
fn install_git_then_skip() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let gate = Gate::new(fixture.store());
    let registry = gate.registry();

    let record = registry.register("brew-install-git", "Install git", "automated", "brew")?;
    assert_eq!(record.status.kind(), StatusKind::Pending);

    let action = CountingAction::new();
    let result = gate.run_step(&git(), action.action())?;
    assert!(result.ran());
    assert_eq!(action.calls(), 1);

    let status = registry.status("brew-install-git")?;
    assert_eq!(status.kind(), StatusKind::Complete);
    assert!(status.completed_at().is_some());

    let result = gate.run_step(&git(), forbidden_action)?;
    assert_eq!(
        result,
        RunOutcome::Skipped {
            id: "brew-install-git".into(),
            description: "Install git".into(),
        }
    );

    Ok(())
}

#[test]
fn registration_is_idempotent() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());

    registry.register("foo", "Foo", "automated", "other")?;
    let pending = fixture.bytes()?;
    registry.register("foo", "Foo", "automated", "other")?;
    assert_eq!(fixture.bytes()?, pending);

    let complete = registry.mark_complete("foo")?;
    let before = fixture.bytes()?;
    let again = registry.register("foo", "Foo again", "manual", "brew")?;
    assert_eq!(again, complete);
    assert_eq!(fixture.bytes()?, before);

    Ok(())
}

#[test_case("brew-install-git", "brew"; "brew step")]
#[test_case("manual-filevault", "other"; "other step")]
#[test_case("mac-defaults-dock-tilesize", "mac-defaults"; "defaults step")]
#[test]
fn complete_steps_never_rerun(id: &str, subtype: &str) -> Result<()> {
    let fixture = StoreFixture::new()?;
    let gate = Gate::new(fixture.store());
    gate.registry().register(id, "blah", "automated", subtype)?;
    gate.registry().mark_complete(id)?;

    let action = CountingAction::new();
    let spec = StepSpec::parse(id, "blah", "automated", subtype)?;
    for _ in 0..3 {
        let result = gate.run_step(&spec, action.action())?;
        assert!(!result.ran());
    }
    pretty_assertions::assert_eq!(action.calls(), 0);

    Ok(())
}

#[test]
fn failed_action_can_be_retried() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let gate = Gate::new(fixture.store());
    let action = CountingAction::failing();

    let result = gate.run_step(&git(), action.action()).unwrap_err();
    assert_eq!(result.kind(), ErrorKind::ActionFailed);
    assert_eq!(
        gate.registry().status("brew-install-git")?.kind(),
        StatusKind::Pending
    );

    action.set_failing(false);
    gate.run_step(&git(), action.action())?;
    assert_eq!(action.calls(), 2);
    assert!(gate.registry().is_complete("brew-install-git")?);

    Ok(())
}

#[test]
fn undone_step_round_trip() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let gate = Gate::new(fixture.store());
    let system = FakeSystem::new().with_package("git", PackageKind::Formula);
    let engine = UndoEngine::new(fixture.store(), &system);
    let action = CountingAction::new();

    gate.run_step(&git(), action.action())?;
    let completed_at = gate.registry().status("brew-install-git")?.completed_at();
    engine.undo("brew-install-git")?;

    let status = gate.registry().status("brew-install-git")?;
    assert_eq!(status.kind(), StatusKind::ReversiblePending);
    assert_eq!(status.completed_at(), completed_at);

    let result = gate.run_step(&git(), action.action())?;
    assert!(matches!(result, RunOutcome::Undone { .. }));
    assert_eq!(action.calls(), 1);

    let result = gate.reapply_step(&git(), action.action())?;
    assert!(result.ran());
    assert_eq!(action.calls(), 2);

    let status = gate.registry().status("brew-install-git")?;
    assert_eq!(status.kind(), StatusKind::Complete);
    assert_eq!(status.undone_at(), None);

    Ok(())
}

#[test]
fn bogus_vocabulary_leaves_document_alone() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let registry = Registry::new(fixture.store());
    let before = fixture.bytes()?;

    let result = registry.register("x", "d", "bogus-kind", "brew").unwrap_err();
    assert_eq!(result.kind(), ErrorKind::Validation);

    let result = registry.register("x", "d", "automated", "apt").unwrap_err();
    assert_eq!(result.kind(), ErrorKind::Validation);

    assert_eq!(fixture.bytes()?, before);
    assert!(registry.find("x")?.is_none());

    Ok(())
}

#[test]
fn interrupted_write_leaves_previous_document() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let store = fixture.store();
    Registry::new(store.clone()).register("foo", "Foo", "automated", "other")?;
    let before = fixture.bytes()?;

    let mut document = store.read()?;
    document.insert(StepRecord::pending(&git()));
    document.steps.remove("foo");

    // Staged but never renamed into place.
    let staged = store.stage(&document)?;
    drop(staged);

    assert_eq!(fixture.bytes()?, before);
    let dir = store.path().parent().map(ToOwned::to_owned).unwrap_or_default();
    assert_eq!(read_dir(dir)?.count(), 1);

    Ok(())
}

#[test]
fn corrupt_document_is_reported_not_repaired() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let store = fixture.store();
    write(store.path(), "{\"version\": \"1.0.0\", \"steps\": {")?;
    let before = read(store.path())?;

    let result = Registry::new(store.clone())
        .register("foo", "Foo", "automated", "other")
        .unwrap_err();
    assert_eq!(result.kind(), ErrorKind::Corruption);
    assert_eq!(read(store.path())?, before);

    Ok(())
}

#[test]
fn unsupported_major_version_is_corruption() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let store: Store = fixture.store();
    write(store.path(), "{\"version\": \"2.0.0\", \"steps\": {}}")?;

    let result = Registry::new(store).steps().unwrap_err();
    assert_eq!(result.kind(), ErrorKind::Corruption);

    Ok(())
}
