// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The typed event bus (spec.md §6 "Events emitted"), modeled per the
//! spec's own redesign note: a closed tagged union pushed through a
//! `Sender`, not a reflective event class hierarchy.

use std::sync::mpsc::Sender;

use crate::recipe::VirtualFn;

#[derive(Debug, Clone)]
pub struct ParseCompletedCounts {
    pub cached: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub masked: usize,
    pub virtuals: usize,
    pub errors: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub enum CookerEvent {
    ConfigFilePathFound { path: String },
    ConfigFilesFound { paths: Vec<String> },
    CoreBaseFilesFound { paths: Vec<String> },
    FilesMatchingFound { pattern: String, paths: Vec<String> },
    TreeDataPreparationStarted,
    TreeDataPreparationProgress { current: usize, total: usize },
    TreeDataPreparationCompleted { total: usize },
    DepTreeGenerated,
    TargetsTreeGenerated,
    ParseStarted { total: usize },
    ParseProgress { current: usize, total: usize },
    ParseCompleted(ParseCompletedCounts),
    SanityCheck,
    BuildStarted,
    BuildCompleted { failures: usize },
    MultipleProviders { item: String, candidates: Vec<String> },
    NoProvider(NoProviderInfo),
    CookerExit,
}

#[derive(Debug, Clone)]
pub struct NoProviderInfo {
    pub item: String,
    pub runtime: bool,
    pub reasons: Vec<String>,
    pub close_matches: Vec<String>,
    pub dependees: Vec<VirtualFn>,
}

/// Lightweight handle threaded through every component (spec.md §9:
/// "thread a Session value carrying the event sink ... through every
/// component"). Cloning is cheap (an `mpsc::Sender` clone).
#[derive(Clone)]
pub struct EventSink(Sender<CookerEvent>);

impl EventSink {
    pub fn new(sender: Sender<CookerEvent>) -> Self {
        Self(sender)
    }

    /// A sink is "detached" once the receiver end is dropped; sends
    /// become inert rather than panicking, matching the "no further
    /// result events are emitted after ForceShutdown" invariant
    /// (spec.md §8) once the driver has stopped listening.
    pub fn emit(&self, event: CookerEvent) {
        let _ = self.0.send(event);
    }
}
