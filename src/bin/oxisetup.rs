// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxisetup::{
    batch::{FailurePolicy, StepOutcome, Work},
    config::{Config, Plan},
    gate::{Action, CommandAction, Gate, RunOutcome},
    manual::{InquireConfirmer, ManualOutcome, ManualPrompter},
    path::{default_config_path, default_state_prefix, state_dir},
    registry::Registry,
    state::{format_timestamp, Params, StepRecord, StepSpec, Subtype},
    store::Store,
    system::HostSystem,
    undo::{Reversal, UndoEngine, UndoReport},
    BatchRunner, Error,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{ffi::OsString, path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxisetup [options] <oxisetup-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Directory to keep engine state under.
    #[arg(short, long, global = true, env = "OXISETUP_PREFIX", value_name = "path")]
    pub prefix: Option<PathBuf>,

    /// Settings file to use instead of the default one.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = match self.config {
            Some(path) => Config::load(path)?,
            None => Config::load(default_config_path()?)?,
        };
        let prefix = match self.prefix.or_else(|| config.settings.prefix.clone()) {
            Some(prefix) => prefix,
            None => default_state_prefix()?,
        };
        let store = Store::new(state_dir(prefix));

        match self.command {
            Command::Init => run_init(store),
            Command::Status(opts) => run_status(store, opts),
            Command::List(opts) => run_list(store, opts),
            Command::Undoable => run_undoable(store),
            Command::Run(opts) => run_step(store, opts),
            Command::Manual(opts) => run_manual(store, opts),
            Command::Complete(opts) => run_complete(store, opts),
            Command::Forget(opts) => run_forget(store, opts),
            Command::Undo(opts) => run_undo(store, opts),
            Command::Apply(opts) => run_apply(store, config, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create empty state document if there is none.
    #[command(override_usage = "oxisetup init [options]")]
    Init,

    /// Show status of a step.
    #[command(override_usage = "oxisetup status [options] <step_id>")]
    Status(StatusOptions),

    /// List registered steps.
    #[command(override_usage = "oxisetup list [options] [<pattern>]")]
    List(ListOptions),

    /// List completed steps that can be undone.
    #[command(override_usage = "oxisetup undoable [options]")]
    Undoable,

    /// Run command as a step unless the step already completed.
    #[command(override_usage = "oxisetup run [options] <step_id> -- <command>...")]
    Run(RunOptions),

    /// Ask for manual step to be performed unless it already completed.
    #[command(override_usage = "oxisetup manual [options] <step_id>")]
    Manual(ManualOptions),

    /// Mark registered step as complete without running anything.
    #[command(override_usage = "oxisetup complete [options] <step_id>")]
    Complete(CompleteOptions),

    /// Remove step record without reversing anything.
    #[command(override_usage = "oxisetup forget [options] <step_id>")]
    Forget(ForgetOptions),

    /// Undo completed step.
    #[command(override_usage = "oxisetup undo [options] <step_id>")]
    Undo(UndoOptions),

    /// Run every step of a plan file in order.
    #[command(override_usage = "oxisetup apply [options] <plan>")]
    Apply(ApplyOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Id of step to show.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Only list steps whose id matches glob pattern.
    #[arg(value_name = "pattern")]
    pub pattern: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Stable id of the step.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,

    /// Brief description of the step.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,

    /// Kind of step.
    #[arg(short, long, default_value = "automated", value_name = "kind")]
    pub kind: String,

    /// Subtype of step, decides how it can be undone.
    #[arg(short, long, default_value = "other", value_name = "subtype")]
    pub subtype: String,

    /// Undo param to record with the step.
    #[arg(long = "param", value_name = "key=value", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Run the step again if it was undone earlier.
    #[arg(short, long)]
    pub reapply: bool,

    /// Program and arguments to run.
    #[arg(last = true, required = true, value_name = "command")]
    pub command: Vec<OsString>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ManualOptions {
    /// Stable id of the step.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,

    /// Brief description of the step.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,

    /// Instruction to show, in order.
    #[arg(short, long = "instruction", value_name = "text")]
    pub instructions: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CompleteOptions {
    /// Id of registered step.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,

    /// Undo param to record with the step.
    #[arg(long = "param", value_name = "key=value", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ForgetOptions {
    /// Id of registered step.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UndoOptions {
    /// Id of completed step.
    #[arg(required = true, value_name = "step_id")]
    pub id: String,

    /// Only undo the step if it has this subtype.
    #[arg(long = "as", value_name = "subtype")]
    pub expected: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Path to plan file.
    #[arg(required = true, value_name = "plan")]
    pub plan: PathBuf,

    /// What to do after a step fails.
    #[arg(long, value_enum, value_name = "policy")]
    pub on_failure: Option<FailurePolicy>,

    /// Run steps again that were undone earlier.
    #[arg(short, long)]
    pub reapply_undone: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        match error.downcast_ref::<Error>() {
            Some(err) => {
                let kind = err.kind();
                error!("error[{kind}]: {error:#}");
                if let Error::Store(store) = err {
                    if store.is_permission_denied() {
                        warn!("check permissions of the state directory, or pick another with --prefix");
                    }
                }
                exit(kind.exit_code());
            }
            None => {
                error!("{error:?}");
                exit(1);
            }
        }
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_init(store: Store) -> Result<()> {
    store.initialize().map_err(Error::from)?;
    info!("state document at {:?}", store.path().display());

    Ok(())
}

fn run_status(store: Store, opts: StatusOptions) -> Result<()> {
    let record = Registry::new(store).get(&opts.id)?;
    println!("{}", describe_record(&record));

    if let Some(at) = record.status.completed_at() {
        println!("  completed at {}", format_timestamp(&at));
    }

    if let Some(at) = record.status.undone_at() {
        println!("  undone at    {}", format_timestamp(&at));
    }

    for (key, value) in record.params.iter() {
        println!("  {key} = {value}");
    }

    Ok(())
}

fn run_list(store: Store, opts: ListOptions) -> Result<()> {
    let pattern = opts
        .pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()?;

    for record in Registry::new(store).steps()? {
        if pattern.as_ref().is_none_or(|pattern| pattern.matches(&record.id)) {
            println!("{}", describe_record(&record));
        }
    }

    Ok(())
}

fn run_undoable(store: Store) -> Result<()> {
    for step in UndoEngine::new(store, HostSystem::new()).list_undoable()? {
        println!("{:<14} {}  {}", step.subtype, step.id, step.description);
    }

    Ok(())
}

fn run_step(store: Store, opts: RunOptions) -> Result<()> {
    let description = opts.description.unwrap_or_else(|| opts.id.clone());
    let spec = StepSpec::parse(opts.id, description, &opts.kind, &opts.subtype)
        .map_err(Error::from)?
        .with_params(opts.params.into_iter().collect::<Params>());

    let mut command = CommandAction::from_argv(opts.command)
        .ok_or_else(|| anyhow!("no command given for step {:?}", spec.id))?;
    let action = || with_spinner(&spec.description, || command.execute());

    let gate = Gate::new(store);
    let outcome = if opts.reapply {
        gate.reapply_step(&spec, action)?
    } else {
        gate.run_step(&spec, action)?
    };
    report_run(&outcome);

    Ok(())
}

fn run_manual(store: Store, opts: ManualOptions) -> Result<()> {
    let description = opts.description.unwrap_or_else(|| opts.id.clone());
    let outcome = ManualPrompter::new(store).run_manual_step(
        &opts.id,
        &description,
        &opts.instructions,
        InquireConfirmer::new(),
    )?;
    report_manual(&outcome);

    Ok(())
}

fn run_complete(store: Store, opts: CompleteOptions) -> Result<()> {
    let registry = Registry::new(store);
    if !opts.params.is_empty() {
        registry.record_params(&opts.id, opts.params.into_iter().collect())?;
    }
    registry.mark_complete(&opts.id)?;

    Ok(())
}

fn run_forget(store: Store, opts: ForgetOptions) -> Result<()> {
    Registry::new(store).forget(&opts.id)?;
    Ok(())
}

fn run_undo(store: Store, opts: UndoOptions) -> Result<()> {
    let engine = UndoEngine::new(store, HostSystem::new());
    let report = match opts.expected {
        Some(expected) => {
            let expected: Subtype = expected.parse().map_err(Error::from)?;
            engine.undo_as(&opts.id, expected)?
        }
        None => engine.undo(&opts.id)?,
    };
    report_undo(&report);

    Ok(())
}

fn run_apply(store: Store, config: Config, opts: ApplyOptions) -> Result<()> {
    let steps = Plan::load(&opts.plan)?
        .into_steps()
        .into_iter()
        .map(|mut step| {
            if let Work::Automated(mut action) = step.work {
                let description = step.description.clone();
                step.work = Work::Automated(Box::new(move || with_spinner(&description, &mut action)));
            }
            step
        });

    let mut runner = BatchRunner::new(store, InquireConfirmer::new())
        .with_policy(opts.on_failure.unwrap_or(config.settings.on_failure))
        .with_reapply_undone(opts.reapply_undone || config.settings.reapply_undone);
    let report = runner.run(steps);

    for step in &report.results {
        match &step.result {
            Ok(StepOutcome::Run(outcome)) => report_run(outcome),
            Ok(StepOutcome::Manual(outcome)) => report_manual(outcome),
            Err(err) => warn!("{}: {err}", step.id),
        }
    }

    if report.aborted {
        warn!("batch aborted, remaining steps were not run");
    }

    match report.results.into_iter().find_map(|step| step.result.err()) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn with_spinner<T>(message: &str, work: impl FnOnce() -> T) -> T {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let output = work();
    bar.finish_and_clear();
    output
}

fn parse_param(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.into(), value.into())),
        _ => Err(format!("expected key=value, got {input:?}")),
    }
}

fn describe_record(record: &StepRecord) -> String {
    format!(
        "{:<18} {}  {} ({}, {})",
        record.status.kind(),
        record.id,
        record.description,
        record.kind,
        record.subtype
    )
}

fn report_run(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed { description, .. } => info!("done: {description}"),
        RunOutcome::Skipped { description, .. } => info!("skipped: {description} (already complete)"),
        RunOutcome::Undone { id, description } => info!(
            "skipped: {description} (undone earlier, re-apply with `oxisetup run --reapply {id}`)"
        ),
    }
}

fn report_manual(outcome: &ManualOutcome) {
    match outcome {
        ManualOutcome::Skipped { description, .. } => info!("skipped: {description} (already complete)"),
        ManualOutcome::Confirmed { description, .. } => info!("done: {description}"),
        ManualOutcome::Deferred { description, .. } => info!("deferred: {description}"),
    }
}

fn report_undo(report: &UndoReport) {
    match report.reversal {
        Reversal::Removed => info!("undone: {} (removed {})", report.description, report.target),
        Reversal::Restored => info!("undone: {} (restored {})", report.description, report.target),
        Reversal::Deleted => info!("undone: {} (deleted {})", report.description, report.target),
        Reversal::AlreadyReverted => {
            info!("undone: {} ({} was already reverted)", report.description, report.target)
        }
    }
}
