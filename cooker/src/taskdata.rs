// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C6 — TaskData: expand a run-list of named targets (including the
//! `world`/`universe` meta-targets) into the full dependency closure,
//! resolving each item through [`crate::provider::ProviderResolver`] as
//! it goes (spec.md §4.6). Grounded on the `while !items.is_empty()`
//! fixed-point loop in `Transaction::add`/`add_step`.
//!
//! spec.md §4.7 asks for three distinct projections rather than one
//! merged graph: a `(pn, task)`-keyed task graph, a recipe-level graph
//! split into build-time and runtime variants, and a package-level
//! runtime graph. [`expand`] builds all four in one BFS pass, tagging
//! each queued dependency with the [`EdgeKind`] it was reached through.

use std::collections::{HashMap, HashSet, VecDeque};

use dag::Dag;
use thiserror::Error;

use crate::{
    cache::RecipeCache,
    event::{CookerEvent, EventSink, NoProviderInfo},
    provider::{ProviderResolver, Resolution},
    recipe::VirtualFn,
};

pub const DEFAULT_TASK: &str = "build";

#[derive(Debug, Error)]
pub enum TaskDataError {
    #[error("no provider for '{item}'", item = .0.item)]
    NoProvider(NoProviderInfo),
}

/// A parsed run-list entry: which recipe, and which task on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub pn: String,
    pub task: String,
}

impl Target {
    /// Split `"pn"` or `"pn:do_task"` (spec.md §4.6 rule 1).
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(":do_") {
            Some((pn, task)) => Target {
                pn: pn.to_string(),
                task: task.to_string(),
            },
            None => Target {
                pn: spec.to_string(),
                task: DEFAULT_TASK.to_string(),
            },
        }
    }
}

/// `(pn, task)` — the granularity spec.md §4.7 names for the task graph,
/// distinct from the recipe-level `VirtualFn` granularity of the other
/// two projections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub pn: String,
    pub task: String,
}

impl TaskId {
    fn new(pn: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            pn: pn.into(),
            task: task.into(),
        }
    }
}

/// Which relation a queued dependency was reached through — routes the
/// edge into the build-time or runtime projection (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Build,
    Runtime,
}

#[derive(Debug, Default)]
pub struct Expansion {
    /// `(pn, task)`-keyed task graph (spec.md §4.7 projection 1).
    pub task_graph: Dag<TaskId>,
    /// Recipe-level build-time closure: an edge `dep -> item` means
    /// `item` DEPENDS on `dep` (spec.md §4.7 projection 2, build
    /// variant).
    pub build_graph: Dag<VirtualFn>,
    /// Recipe-level runtime closure over RDEPENDS/RRECOMMENDS (spec.md
    /// §4.7 projection 2, runtime variant).
    pub runtime_recipe_graph: Dag<VirtualFn>,
    /// Package-level (`pn`-keyed) runtime closure (spec.md §4.7
    /// projection 3).
    pub runtime_package_graph: Dag<String>,
    pub roots: Vec<VirtualFn>,
    pub unresolved: Vec<String>,
}

/// Expand `targets` — literal names, `"world"`, or `"universe"` — into the
/// full transitive closure over DEPENDS (and RDEPENDS/RRECOMMENDS unless
/// `ignored`) reachable from them. When `abort` is true, the first item
/// with no provider aborts the whole expansion (spec.md §4.6 `abort`
/// input, §7 "`NoProvider` is fatal if `abort=true`, else recorded").
pub fn expand(
    targets: &[String],
    cache: &RecipeCache,
    assume_provided: &HashSet<String>,
    sink: &EventSink,
    abort: bool,
) -> Result<Expansion, TaskDataError> {
    let resolver = ProviderResolver::new(cache, assume_provided);

    let mut task_graph: Dag<TaskId> = Dag::new();
    let mut build_graph: Dag<VirtualFn> = Dag::new();
    let mut runtime_recipe_graph: Dag<VirtualFn> = Dag::new();
    let mut runtime_package_graph: Dag<String> = Dag::new();

    // Memoizes item -> resolved file (or `None` for assumed-provided/no-
    // provider items, which never get a node) so a diamond dependency is
    // resolved once but still gets an edge from every dependee that needs
    // it (spec.md §4.6 invariant: the closure is a DAG over every reached
    // item, not just first-reached ones).
    let mut resolved: HashMap<String, Option<VirtualFn>> = HashMap::new();
    let mut queue: VecDeque<(String, Vec<(VirtualFn, EdgeKind)>)> = VecDeque::new();
    let mut roots = vec![];
    let mut unresolved = vec![];

    for spec in targets {
        match spec.as_str() {
            "world" => queue.extend(cache.world_target.iter().cloned().map(|pn| (pn, vec![]))),
            "universe" => queue.extend(cache.universe_target.iter().cloned().map(|pn| (pn, vec![]))),
            other => queue.push_back((Target::parse(other).pn, vec![])),
        }
    }

    while let Some((item, dependees)) = queue.pop_front() {
        let first_visit = !resolved.contains_key(&item);

        let file = if first_visit {
            let runtime = dependees.iter().all(|(_, kind)| *kind == EdgeKind::Runtime) && !dependees.is_empty();
            let dependee_files: Vec<VirtualFn> = dependees.iter().map(|(file, _)| file.clone()).collect();
            let file = match resolver.resolve(&item, runtime, &dependee_files) {
                Resolution::AssumedProvided => None,
                Resolution::NoProvider(info) => {
                    sink.emit(CookerEvent::NoProvider(info.clone()));
                    if abort {
                        return Err(TaskDataError::NoProvider(info));
                    }
                    unresolved.push(item.clone());
                    None
                }
                Resolution::Ambiguous { chosen, candidates } => {
                    sink.emit(CookerEvent::MultipleProviders {
                        item: item.clone(),
                        candidates: candidates.iter().map(ToString::to_string).collect(),
                    });
                    Some(chosen)
                }
                Resolution::Provided(file) => Some(file),
            };
            resolved.insert(item.clone(), file.clone());

            if let Some(file) = &file {
                if dependees.is_empty() {
                    roots.push(file.clone());
                }

                let pn = cache.pkg_fn.get(file).cloned().unwrap_or_else(|| item.clone());
                task_graph.add_node_or_get_index(&TaskId::new(&pn, DEFAULT_TASK));

                for dep in cache.depends.get(file).into_iter().flatten() {
                    if !cache.ignored_dependencies.contains(dep) {
                        queue.push_back((dep.clone(), vec![(file.clone(), EdgeKind::Build)]));
                    }
                }

                for (_pkg, deps) in cache.rundeps.get(file).into_iter().flatten() {
                    for dep in deps {
                        if !cache.ignored_dependencies.contains(dep) {
                            queue.push_back((dep.clone(), vec![(file.clone(), EdgeKind::Runtime)]));
                        }
                    }
                }
                for (_pkg, deps) in cache.runrecs.get(file).into_iter().flatten() {
                    for dep in deps {
                        if !cache.ignored_dependencies.contains(dep) {
                            queue.push_back((dep.clone(), vec![(file.clone(), EdgeKind::Runtime)]));
                        }
                    }
                }
            }

            file
        } else {
            resolved.get(&item).cloned().flatten()
        };

        if let Some(file) = file {
            let item_pn = cache.pkg_fn.get(&file).cloned().unwrap_or_else(|| item.clone());

            for (dependee, kind) in &dependees {
                match kind {
                    EdgeKind::Build => {
                        let node = build_graph.add_node_or_get_index(&file);
                        let dependee_node = build_graph.add_node_or_get_index(dependee);
                        build_graph.add_edge(node, dependee_node);

                        let dependee_pn = cache.pkg_fn.get(dependee).cloned().unwrap_or_else(|| dependee.to_string());
                        let task_node = task_graph.add_node_or_get_index(&TaskId::new(&item_pn, DEFAULT_TASK));
                        let dependee_task_node = task_graph.add_node_or_get_index(&TaskId::new(&dependee_pn, DEFAULT_TASK));
                        task_graph.add_edge(task_node, dependee_task_node);
                    }
                    EdgeKind::Runtime => {
                        let node = runtime_recipe_graph.add_node_or_get_index(&file);
                        let dependee_node = runtime_recipe_graph.add_node_or_get_index(dependee);
                        runtime_recipe_graph.add_edge(node, dependee_node);

                        let dependee_pn = cache.pkg_fn.get(dependee).cloned().unwrap_or_else(|| dependee.to_string());
                        let pkg_node = runtime_package_graph.add_node_or_get_index(&item_pn);
                        let dependee_pkg_node = runtime_package_graph.add_node_or_get_index(&dependee_pn);
                        runtime_package_graph.add_edge(pkg_node, dependee_pkg_node);
                    }
                }
            }
        }
    }

    sink.emit(CookerEvent::DepTreeGenerated);
    sink.emit(CookerEvent::TargetsTreeGenerated);

    Ok(Expansion {
        task_graph,
        build_graph,
        runtime_recipe_graph,
        runtime_package_graph,
        roots,
        unresolved,
    })
}
