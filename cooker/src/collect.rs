// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C2 — FileCollector: enumerate recipe files and append-overlays,
//! applying masks and detecting overlay overrides (spec.md §4.2).

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
};

use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use regex::Regex;
use thiserror::Error;

use crate::layer::{priority_for_path, LayerPriority};

const IGNORED_DIRS: &[&str] = &["SCCS", "CVS", ".svn", ".git", ".hg"];

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no recipe files to build, check your BBPATH and BBFILES")]
    NothingCollected,
}

/// `bbappend-basename -> [append-path]`, with `%` as a trailing wildcard,
/// plus the set of basenames that have been matched against a recipe at
/// least once (spec.md §3 `AppendIndex`).
#[derive(Debug, Default)]
pub struct AppendIndex {
    by_basename: BTreeMap<String, Vec<Utf8PathBuf>>,
    applied: RefCell<HashSet<String>>,
}

impl AppendIndex {
    fn insert(&mut self, append_path: &Utf8Path) {
        let basename = append_path
            .file_name()
            .map(|name| name.replace(".bbappend", ".bb"))
            .unwrap_or_default();
        self.by_basename.entry(basename).or_default().push(append_path.to_owned());
    }

    /// Returns the append paths that apply to `recipe_path`, marking the
    /// matching basenames as applied. Calling this is the only way marks
    /// get set — repeated calls on the *same* instance accumulate marks
    /// rather than reset them (see DESIGN.md on the `matchFiles` open
    /// question).
    pub fn get_file_appends(&self, recipe_path: &Utf8Path) -> Vec<Utf8PathBuf> {
        let Some(recipe_basename) = recipe_path.file_name() else {
            return vec![];
        };

        let mut result = vec![];
        for (basename, appends) in &self.by_basename {
            let matches = if let Some(wildcard_index) = basename.find('%') {
                recipe_basename.starts_with(&basename[..wildcard_index])
            } else {
                basename == recipe_basename
            };

            if matches {
                self.applied.borrow_mut().insert(basename.clone());
                result.extend(appends.iter().cloned());
            }
        }
        result
    }

    /// Basenames that were registered but never matched by
    /// [`get_file_appends`] — a dangling `.bbappend` (spec.md §3 invariant,
    /// §4.2 post-parse audit).
    pub fn dangling(&self) -> Vec<String> {
        let applied = self.applied.borrow();
        self.by_basename.keys().filter(|b| !applied.contains(*b)).cloned().collect()
    }

    /// Every registered basename, for dead-pattern bookkeeping against
    /// layer patterns that only ever matched an append (spec.md §4.3
    /// `collection_priorities`).
    pub fn all_basenames(&self) -> Vec<&str> {
        self.by_basename.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Default)]
pub struct CollectResult {
    pub recipes: Vec<Utf8PathBuf>,
    pub appends: AppendIndex,
    pub overlays: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    pub masked: usize,
}

/// Collect recipes and appends from `bbfiles` glob/dir entries, applying
/// `bbmask` and sorting by descending layer priority (spec.md §4.2).
pub fn collect(bbfiles: &[String], bbmask: Option<&str>, layers: &[LayerPriority]) -> Result<CollectResult, CollectError> {
    let expanded = expand_entries(bbfiles);

    if expanded.is_empty() {
        return Err(CollectError::NothingCollected);
    }

    let mask_regex = bbmask.and_then(|pattern| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::warn!(%pattern, %error, "BBMASK is not a valid regular expression, ignoring");
            None
        }
    });

    let mut recipes = vec![];
    let mut append_paths = vec![];
    let mut masked = 0;

    for path in expanded {
        if let Some(regex) = &mask_regex {
            if regex.is_match(path.as_str()) {
                tracing::debug!(%path, "skipping masked file");
                masked += 1;
                continue;
            }
        }

        match path.extension() {
            Some("bb") => recipes.push(path),
            Some("bbappend") => append_paths.push(path),
            _ => tracing::debug!(%path, "skipping: unknown file extension"),
        }
    }

    recipes.sort_by_key(|path| std::cmp::Reverse(priority_for_path(path.as_str(), layers, None)));

    let mut appends = AppendIndex::default();
    for path in &append_paths {
        appends.insert(path);
    }

    let mut overlays: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>> = HashMap::new();
    let mut seen: HashMap<String, Utf8PathBuf> = HashMap::new();
    for recipe in &recipes {
        let Some(basename) = recipe.file_name() else { continue };
        match seen.get(basename) {
            None => {
                seen.insert(basename.to_string(), recipe.clone());
            }
            Some(winner) => {
                overlays.entry(winner.clone()).or_default().push(recipe.clone());
            }
        }
    }

    Ok(CollectResult {
        recipes,
        appends,
        overlays,
        masked,
    })
}

fn expand_entries(bbfiles: &[String]) -> Vec<Utf8PathBuf> {
    let mut seen = HashSet::new();
    let mut result = vec![];

    for entry in bbfiles {
        let path = Utf8Path::new(entry);
        if path.is_dir() {
            for found in walk_recipe_files(path) {
                if seen.insert(found.clone()) {
                    result.push(found);
                }
            }
            continue;
        }

        let mut globbed = vec![];
        if let Ok(paths) = glob::glob(entry) {
            for candidate in paths.flatten() {
                if let Ok(utf8) = Utf8PathBuf::from_path_buf(candidate) {
                    globbed.push(utf8);
                }
            }
        }

        if globbed.is_empty() && path.exists() {
            globbed.push(path.to_owned());
        }

        for found in globbed {
            if seen.insert(found.clone()) {
                result.push(found);
            }
        }
    }

    result
}

fn walk_recipe_files(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut found = vec![];
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };

    for entry in entries.flatten() {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        let Ok(file_type) = entry.file_type() else { continue };

        if file_type.is_dir() {
            if let Some(name) = path.file_name() {
                if IGNORED_DIRS.contains(&name) {
                    continue;
                }
            }
            found.extend(walk_recipe_files(&path));
        } else if matches!(path.extension(), Some("bb") | Some("bbappend")) {
            found.push(path);
        }
    }

    found
}
