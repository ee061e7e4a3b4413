// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! A typed view over the configuration variables the orchestration core
//! consumes (spec.md §6). The real variable store, with its `${VAR}`
//! expansion engine, lives outside this crate's scope; here we only need
//! *lookup*, not expansion, so [`VariableStore`] is a narrow read-only
//! surface that a host can implement over whatever backing store it has.
//!
//! [`MapStore`] is the in-memory implementation used by tests and by the
//! CLI shell, loaded by merging a sequence of YAML overlay files the way
//! BitBake merges `local.conf`, `bblayers.conf`, and per-layer `layer.conf`
//! files: later files win on a per-key basis.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use fs_err as fs;
use serde::Deserialize;
use thiserror::Error;

/// A single configuration value: either a scalar or a space-separated list,
/// mirroring the two shapes every variable named in spec.md §6 takes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_scalar(&self) -> String {
        match self {
            Value::Scalar(s) => s.clone(),
            Value::List(items) => items.join(" "),
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) => s.split_whitespace().map(str::to_string).collect(),
            Value::List(items) => items.clone(),
        }
    }
}

/// Read-only lookup over named configuration variables.
///
/// This is the interface boundary to the external `DataStore` collaborator
/// (spec.md §1): implementors may be a flat in-memory map (tests, the CLI
/// shell) or a thin adapter over a richer host-provided store.
pub trait VariableStore {
    fn get(&self, name: &str) -> Option<Value>;

    fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.as_scalar())
    }

    fn get_list(&self, name: &str) -> Vec<String> {
        self.get(name).map(|v| v.as_list()).unwrap_or_default()
    }

    fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get_str(name).as_deref() {
            Some("1" | "yes" | "true" | "Y" | "y") => true,
            Some("0" | "no" | "false" | "N" | "n") => false,
            _ => default,
        }
    }

    /// Every variable name currently carrying the `prefix` (e.g.
    /// `BBFILE_PRIORITY_`), with the suffix stripped — used to discover
    /// the layer-scoped family of variables keyed by layer name.
    fn names_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// An in-memory, insertion-ordered configuration view, built by merging
/// overlay files or populated directly by callers (tests).
#[derive(Debug, Clone, Default)]
pub struct MapStore {
    vars: BTreeMap<String, Value>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Load a directory of `*.yaml` overlay files in sorted filename order,
    /// each a flat map of variable name to [`Value`], merging later files
    /// over earlier ones.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();

        let mut paths = vec![];
        for entry in fs::read_dir(dir).map_err(|source| Error::ReadDir(dir.to_path_buf(), source))? {
            let entry = entry.map_err(|source| Error::ReadDir(dir.to_path_buf(), source))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("yaml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut store = Self::new();
        for path in paths {
            store.merge_file(&path)?;
        }
        Ok(store)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), Error> {
        let bytes = fs::read(path).map_err(|source| Error::Read(path.to_path_buf(), source))?;
        let overlay: BTreeMap<String, Value> =
            serde_yaml::from_slice(&bytes).map_err(|source| Error::Parse(path.to_path_buf(), source))?;
        self.vars.extend(overlay);
        Ok(())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}

impl VariableStore for MapStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.vars
            .keys()
            .filter_map(|key| key.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("read config directory {0:?}")]
    ReadDir(PathBuf, #[source] std::io::Error),
    #[error("read config file {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("parse config file {0:?}")]
    Parse(PathBuf, #[source] serde_yaml::Error),
}
