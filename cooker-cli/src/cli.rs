// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{path::PathBuf, sync::Arc};

use camino::Utf8PathBuf;
use clap::{CommandFactory, Parser};
use clap_complete::{
    generate_to,
    shells::{Bash, Fish, Zsh},
};
use clap_mangen::Man;
use cooker::{
    event::{CookerEvent, EventSink},
    session::Session,
    state::{CookerStateMachine, PollResult},
};
use cooker_config::{MapStore, VariableStore};
use fs_err::{self as fs, File};
use thiserror::Error;
use tracing_common::{LogConfig, OutputDestination, OutputFormat};

#[derive(Debug, Parser)]
#[command(name = "cooker", about = "Recipe-based build orchestration core")]
pub struct Command {
    /// Directory of `*.yaml` configuration overlays (spec.md §6 variables)
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,

    /// Log level[:format[:destination]], e.g. "debug:json:stderr"
    #[arg(long, default_value = "info")]
    pub log: String,

    #[arg(long, hide = true)]
    pub generate_manpages: Option<PathBuf>,
    #[arg(long, hide = true)]
    pub generate_completions: Option<PathBuf>,

    /// Continue past an unresolvable target or a recipe parse failure
    /// instead of aborting the build on the first one
    #[arg(short = 'k', long)]
    pub keep_going: bool,

    /// Build targets; "world"/"universe" are recognised meta-targets
    pub targets: Vec<String>,
}

pub fn process() -> Result<(), Error> {
    let args = Command::parse();

    if let Some(dir) = args.generate_manpages {
        fs::create_dir_all(&dir)?;
        let cmd = Command::command();
        let man = Man::new(cmd);
        let mut buffer = File::create(dir.join("cooker.1"))?;
        man.render(&mut buffer)?;
        return Ok(());
    }

    if let Some(dir) = args.generate_completions {
        fs::create_dir_all(&dir)?;
        let mut cmd = Command::command();
        generate_to(Bash, &mut cmd, "cooker", &dir)?;
        generate_to(Fish, &mut cmd, "cooker", &dir)?;
        generate_to(Zsh, &mut cmd, "cooker", &dir)?;
        return Ok(());
    }

    let log_config: LogConfig = args.log.parse().map_err(Error::LogConfig)?;
    tracing_common::init_with_config(log_config);

    let store = MapStore::load_dir(&args.config_dir)?;
    run(store, args.targets, !args.keep_going)
}

fn run(store: MapStore, targets: Vec<String>, abort_on_unresolved: bool) -> Result<(), Error> {
    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store) as Arc<dyn VariableStore + Send + Sync>, EventSink::new(tx));

    let mut cooker = CookerStateMachine::new(session, placeholder_parse_fn(), Arc::new(|_| None))?;
    cooker.build_targets(targets, abort_on_unresolved)?;

    loop {
        let result = cooker.poll();
        while let Ok(event) = rx.try_recv() {
            print_event(&event);
        }
        match result {
            PollResult::Pending | PollResult::Yielded => continue,
            PollResult::Done(outcome) => {
                outcome?;
                break;
            }
        }
    }

    Ok(())
}

fn print_event(event: &CookerEvent) {
    match event {
        CookerEvent::ParseProgress { current, total } => println!("parsing: {current}/{total}"),
        CookerEvent::NoProvider(info) => println!("no provider for '{}': {}", info.item, info.reasons.join("; ")),
        CookerEvent::MultipleProviders { item, candidates } => {
            println!("multiple providers for '{item}': {}", candidates.join(", "));
        }
        CookerEvent::BuildCompleted { failures } => println!("build complete, {failures} failure(s)"),
        other => tracing::debug!(?other, "event"),
    }
}

/// A recipe-file parser is an external collaborator (spec.md §1
/// "Out of scope"); this is the minimal stand-in the CLI shell uses so
/// the pipeline is runnable end to end, deriving `pn` from the file stem
/// and nothing else.
fn placeholder_parse_fn() -> cooker::parse::ParseFn {
    Arc::new(|path: &Utf8PathBuf| {
        let pn = path.file_stem().unwrap_or("unknown").to_string();
        let virt = cooker::recipe::realfn_to_virtual(path, None);
        Ok(vec![(virt, cooker::recipe::RecipeInfo::new(pn))])
    })
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid --log value")]
    LogConfig(String),
    #[error(transparent)]
    Config(#[from] cooker_config::Error),
    #[error(transparent)]
    Cooker(#[from] cooker::state::CookerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
