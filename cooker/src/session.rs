// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The `Session` value threaded through every component (spec.md §9
//! redesign note: an explicit session object carrying the event sink,
//! rather than components reaching for ambient global state).

use std::sync::Arc;

use cooker_config::VariableStore;

use crate::event::EventSink;

/// Cheap to clone: an `Arc<dyn VariableStore>` and an `EventSink`
/// (itself an `mpsc::Sender` clone).
#[derive(Clone)]
pub struct Session {
    pub store: Arc<dyn VariableStore + Send + Sync>,
    pub events: EventSink,
}

impl Session {
    pub fn new(store: Arc<dyn VariableStore + Send + Sync>, events: EventSink) -> Self {
        Self { store, events }
    }

    pub fn num_parse_threads(&self) -> usize {
        self.store
            .get_str("BB_NUMBER_PARSE_THREADS")
            .and_then(|raw| raw.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    pub fn topdir(&self) -> String {
        self.store.get_str("TOPDIR").unwrap_or_else(|| ".".to_string())
    }

    pub fn enabled_layers(&self) -> Vec<String> {
        self.store.get_list("BBFILE_COLLECTIONS")
    }

    pub fn bbfiles(&self) -> Vec<String> {
        self.store.get_list("BBFILES")
    }

    pub fn bbmask(&self) -> Option<String> {
        self.store.get_str("BBMASK")
    }

    pub fn assume_provided(&self) -> std::collections::HashSet<String> {
        self.store.get_list("ASSUME_PROVIDED").into_iter().collect()
    }

    /// `BUILDNAME`, defaulting to a `YYYYMMDDHHMM` timestamp when unset
    /// (spec.md §6).
    pub fn build_name(&self) -> String {
        self.store
            .get_str("BUILDNAME")
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M").to_string())
    }
}
