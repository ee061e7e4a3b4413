// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C8 — CookerStateMachine: sequences C1 (layers) → C2 (collect) → C4
//! (parse) → C6 (expand) → C7 (graph) and hands the result to the
//! external execution queue (spec.md §4.8). The `runCommands` idle
//! callback is re-modeled as [`CookerStateMachine::poll`] per the
//! redesign note in spec.md §9/DESIGN NOTES: callers step the machine
//! instead of the machine driving its own loop.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};

use camino::Utf8Path;
use nix::sys::signal::{signal, SigHandler, Signal};
use strum::Display;
use thiserror::Error;

use crate::{
    cache::RecipeCache,
    collect::{self, CollectError, CollectResult},
    event::CookerEvent,
    graph::DependencyGraph,
    layer::{self, LayerError},
    lock::{BuildDirLock, LockError},
    parse::{CacheCheckFn, ParseFn, ParseOutcome, ParserPool},
    recipe::VirtualFn,
    session::Session,
    taskdata::{self, Expansion, TaskDataError, TaskId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CookerState {
    Initial,
    Parsing,
    Running,
    Shutdown,
    ForceShutdown,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CookerFeature {
    ExtraCacheFields,
    SendDependsTree,
}

#[derive(Debug, Error)]
pub enum CookerError {
    #[error("empty target list")]
    NothingToBuild,
    #[error("feature set can only change in the Initial state")]
    FeaturesLockedOutsideInitial,
    #[error("buildTargets called outside Initial (currently {0})")]
    NotInitial(CookerState),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error("failed to install signal handler")]
    SignalInstall(#[source] nix::Error),
    #[error("failed to parse {path}: {message}")]
    ParseFailed { path: String, message: String },
    #[error(transparent)]
    TaskData(#[from] TaskDataError),
}

/// Outcome of one [`CookerStateMachine::poll`] tick, replacing the
/// original's `{continue, done, next}` idle-callback return value.
#[derive(Debug)]
pub enum PollResult {
    Pending,
    Yielded,
    Done(Result<(), CookerError>),
}

static FORCE_SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_force_shutdown(_signal: i32) {
    FORCE_SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub struct CookerStateMachine {
    session: Session,
    state: CookerState,
    features: HashSet<CookerFeature>,
    _lock: BuildDirLock,
    targets: Vec<String>,

    layers: Vec<layer::LayerPriority>,
    collected: Option<CollectResult>,
    cache: RecipeCache,
    pool: Option<ParserPool>,
    expansion: Option<Expansion>,

    parse_fn: ParseFn,
    cache_check: CacheCheckFn,

    clean_shutdown_requested: bool,
    /// `BUILDSTART` (spec.md §6): when the current build began, for the
    /// elapsed-time log on completion.
    build_start: Option<chrono::DateTime<chrono::Local>>,

    /// Whether an unresolvable target or a recipe parse failure should be
    /// fatal for the current build (spec.md §4.6 `abort: bool`, §7 "the
    /// first failure aborts parsing unless the caller chooses to
    /// continue"). Set anew by each [`Self::build_targets`] call.
    abort_on_unresolved: bool,
    /// The error that forced a transition out of `Parsing`/`Running`, if
    /// any — surfaced as the final [`PollResult::Done`] once the shutdown
    /// it triggered has drained (spec.md §7).
    pending_error: Option<CookerError>,
}

impl CookerStateMachine {
    /// Acquires the build directory lock and installs `SIGTERM`/`SIGHUP`
    /// handlers (spec.md §5 "no operation may swallow these signals").
    pub fn new(session: Session, parse_fn: ParseFn, cache_check: CacheCheckFn) -> Result<Self, CookerError> {
        let topdir = session.topdir();
        let lock = BuildDirLock::acquire(Utf8Path::new(&topdir))?;

        // Safety: the handler only stores to a static atomic; it performs
        // no allocation or non-async-signal-safe call.
        unsafe {
            signal(Signal::SIGTERM, SigHandler::Handler(request_force_shutdown)).map_err(CookerError::SignalInstall)?;
            signal(Signal::SIGHUP, SigHandler::Handler(request_force_shutdown)).map_err(CookerError::SignalInstall)?;
        }

        let cache = RecipeCache::new(session.assume_provided());

        Ok(Self {
            session,
            state: CookerState::Initial,
            features: HashSet::new(),
            _lock: lock,
            targets: vec![],
            layers: vec![],
            collected: None,
            cache,
            pool: None,
            expansion: None,
            parse_fn,
            cache_check,
            clean_shutdown_requested: false,
            build_start: None,
            abort_on_unresolved: true,
            pending_error: None,
        })
    }

    pub fn state(&self) -> CookerState {
        self.state
    }

    /// Rejected outside `Initial`; a genuinely different set triggers
    /// [`Self::reset`] (spec.md §4.8 invariant).
    pub fn set_features(&mut self, features: HashSet<CookerFeature>) -> Result<(), CookerError> {
        if self.state != CookerState::Initial {
            return Err(CookerError::FeaturesLockedOutsideInitial);
        }
        if features != self.features {
            self.features = features;
            self.reset();
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.layers.clear();
        self.collected = None;
        self.cache = RecipeCache::new(self.session.assume_provided());
        self.pool = None;
        self.expansion = None;
        self.build_start = None;
        self.pending_error = None;
        self.state = CookerState::Initial;
    }

    /// `Initial -> Parsing`: resolves layers (C1), collects files (C2),
    /// and spins up the parser pool (C4). `abort_on_unresolved` governs
    /// both an unresolvable target (spec.md §4.6 `abort: bool`) and a
    /// recipe parse failure (spec.md §7): when true, the first one is
    /// fatal; when false, it is recorded and the build continues as far
    /// as it can.
    pub fn build_targets(&mut self, targets: Vec<String>, abort_on_unresolved: bool) -> Result<(), CookerError> {
        if self.state != CookerState::Initial {
            return Err(CookerError::NotInitial(self.state));
        }
        if targets.is_empty() {
            return Err(CookerError::NothingToBuild);
        }

        self.abort_on_unresolved = abort_on_unresolved;

        self.build_start = Some(chrono::Local::now());
        tracing::info!(build = %self.session.build_name(), targets = ?targets, "starting build");

        self.session.events.emit(CookerEvent::TreeDataPreparationStarted);

        self.layers = layer::resolve_layers(&*self.session.store, &self.session.enabled_layers())?;
        let collected = collect::collect(&self.session.bbfiles(), self.session.bbmask().as_deref(), &self.layers)?;

        self.session.events.emit(CookerEvent::TreeDataPreparationCompleted {
            total: collected.recipes.len(),
        });

        for pair in self.session.store.get_list("PREFERRED_PROVIDERS") {
            if let Some((providee, provider)) = pair.split_once(':') {
                self.cache.set_preferred(providee, provider);
            }
        }

        let cache_check = self.cache_check.clone();
        let parse_fn = self.parse_fn.clone();
        self.pool = Some(ParserPool::new(
            collected.recipes.clone(),
            self.session.num_parse_threads(),
            collected.masked,
            cache_check,
            parse_fn,
        ));

        self.targets = targets;
        self.collected = Some(collected);
        self.state = CookerState::Parsing;
        Ok(())
    }

    /// One step of whichever phase is active. Never blocks longer than
    /// one parse result (spec.md §5 "advances at most one parse-result
    /// per tick").
    pub fn poll(&mut self) -> PollResult {
        if FORCE_SHUTDOWN_REQUESTED.load(Ordering::SeqCst) && !matches!(self.state, CookerState::ForceShutdown | CookerState::Stopped) {
            self.state = CookerState::ForceShutdown;
        }

        match self.state {
            CookerState::Initial => PollResult::Pending,
            CookerState::Parsing => self.poll_parsing(),
            CookerState::Running => PollResult::Pending,
            CookerState::Shutdown | CookerState::ForceShutdown => self.poll_shutdown(),
            CookerState::Stopped => PollResult::Done(Ok(())),
            CookerState::Error => PollResult::Done(self.pending_error.take().map_or(Err(CookerError::NothingToBuild), Err)),
        }
    }

    fn poll_parsing(&mut self) -> PollResult {
        let Some(pool) = &mut self.pool else {
            self.state = CookerState::Error;
            return PollResult::Done(Ok(()));
        };

        match pool.parse_next(&self.session.events) {
            Some(ParseOutcome::Cached { path, infos } | ParseOutcome::Parsed { path, infos }) => {
                self.cache.add_from_recipeinfo(path.as_str(), &infos, &self.layers);
                PollResult::Pending
            }
            Some(ParseOutcome::Failed { path, message }) => {
                tracing::error!(%path, %message, "recipe parse failed");
                if self.abort_on_unresolved {
                    self.pending_error = Some(CookerError::ParseFailed {
                        path: path.to_string(),
                        message,
                    });
                    self.shutdown(true);
                    PollResult::Yielded
                } else {
                    PollResult::Pending
                }
            }
            None => {
                self.finish_parsing();
                PollResult::Yielded
            }
        }
    }

    fn finish_parsing(&mut self) {
        if let Some(pool) = &mut self.pool {
            pool.shutdown(false);
        }
        self.pool = None;

        if let Some(collected) = &self.collected {
            self.cache.populate_world_targets(&collected.overlays);

            let warn_only = self.session.store.get_bool("BB_DANGLINGAPPENDS_WARNONLY", false);
            for basename in collected.appends.dangling() {
                if warn_only {
                    tracing::warn!(%basename, "bbappend does not match any recipe");
                } else {
                    tracing::error!(%basename, "bbappend does not match any recipe");
                }
            }
        }

        match taskdata::expand(
            &self.targets,
            &self.cache,
            &self.session.assume_provided(),
            &self.session.events,
            self.abort_on_unresolved,
        ) {
            Ok(expansion) => {
                self.expansion = Some(expansion);
                self.session.events.emit(CookerEvent::BuildStarted);
                self.state = CookerState::Running;
            }
            Err(error) => {
                self.pending_error = Some(CookerError::TaskData(error));
                self.shutdown(true);
            }
        }
    }

    /// A view over the `(pn, task)` task graph for the current run, once
    /// parsing has drained (spec.md §4.7 projection 1).
    pub fn task_graph(&self) -> Option<DependencyGraph<'_, TaskId>> {
        self.expansion.as_ref().map(|expansion| DependencyGraph::new(&expansion.task_graph))
    }

    /// The recipe-level build-time closure (spec.md §4.7 projection 2,
    /// build variant).
    pub fn build_graph(&self) -> Option<DependencyGraph<'_, VirtualFn>> {
        self.expansion.as_ref().map(|expansion| DependencyGraph::new(&expansion.build_graph))
    }

    /// The recipe-level runtime closure (spec.md §4.7 projection 2,
    /// runtime variant).
    pub fn runtime_recipe_graph(&self) -> Option<DependencyGraph<'_, VirtualFn>> {
        self.expansion.as_ref().map(|expansion| DependencyGraph::new(&expansion.runtime_recipe_graph))
    }

    /// The package-level (`pn`-keyed) runtime closure (spec.md §4.7
    /// projection 3).
    pub fn runtime_package_graph(&self) -> Option<DependencyGraph<'_, String>> {
        self.expansion.as_ref().map(|expansion| DependencyGraph::new(&expansion.runtime_package_graph))
    }

    /// `Running -> Initial`: the external execution queue reports back
    /// how many task runs failed.
    pub fn report_build_complete(&mut self, failures: usize) {
        if self.state != CookerState::Running {
            return;
        }
        if let Some(start) = self.build_start.take() {
            let elapsed = chrono::Local::now().signed_duration_since(start);
            tracing::info!(failures, elapsed_ms = elapsed.num_milliseconds(), "build completed");
        }
        self.session.events.emit(CookerEvent::BuildCompleted { failures });
        self.state = CookerState::Initial;
    }

    /// Idempotent (spec.md §8 property 5): a second call while already
    /// shutting down is a no-op.
    pub fn shutdown(&mut self, clean: bool) {
        if matches!(self.state, CookerState::Shutdown | CookerState::ForceShutdown | CookerState::Stopped) {
            return;
        }
        self.clean_shutdown_requested = clean;
        self.state = if clean { CookerState::Shutdown } else { CookerState::ForceShutdown };
    }

    fn poll_shutdown(&mut self) -> PollResult {
        if let Some(pool) = &mut self.pool {
            pool.shutdown(self.state == CookerState::ForceShutdown);
        }
        self.pool = None;
        self.state = CookerState::Stopped;
        self.session.events.emit(CookerEvent::CookerExit);
        PollResult::Done(self.pending_error.take().map_or(Ok(()), Err))
    }
}
