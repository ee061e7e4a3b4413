// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C1 — LayerResolver: compute integer priorities over named layers using
//! their declared dependencies (spec.md §4.1).

use std::collections::HashMap;

use dag::Dag;
use petgraph::algo::astar;
use regex::Regex;
use thiserror::Error;

use cooker_config::VariableStore;

/// One enabled layer's resolved metadata: its compiled file-matching
/// pattern and its computed integer priority.
#[derive(Debug, Clone)]
pub struct LayerPriority {
    pub name: String,
    pub pattern: String,
    pub regex: Regex,
    pub priority: i64,
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("invalid value for BBFILE_PRIORITY_{0}: {1:?}")]
    InvalidPriority(String, String),
    #[error("invalid version value in LAYERDEPENDS_{0}: {1:?}")]
    InvalidDependencyVersion(String, String),
    #[error("layer '{0}' depends on layer '{1}', but this layer is not enabled in your configuration")]
    UnknownDependency(String, String),
    #[error(
        "layer '{layer}' depends on version {wanted} of layer '{dependency}', but version {have} is enabled"
    )]
    VersionMismatch {
        layer: String,
        dependency: String,
        wanted: u32,
        have: u32,
    },
    #[error("layer '{layer}' depends on version {wanted} of layer '{dependency}', which does not specify a version")]
    VersionUnspecified { layer: String, dependency: String, wanted: u32 },
    #[error("BBFILE_PATTERN_{0} not defined")]
    MissingPattern(String),
    #[error("BBFILE_PATTERN_{0} {1:?} is not a valid regular expression")]
    InvalidPattern(String, String),
    #[error("layer dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("errors during parsing layer configuration ({0} error(s), see log)")]
    Batch(usize),
}

/// The priority of `path` under the given layer set — the first pattern
/// that matches wins (spec.md §3 invariant ii). When `matched` is
/// supplied, the index of every pattern that matched *something* is
/// recorded into it, letting callers warn about dead patterns (spec.md
/// §4.2 rule 5, §4.3 `collection_priorities`).
pub fn priority_for_path(path: &str, layers: &[LayerPriority], mut matched: Option<&mut std::collections::HashSet<usize>>) -> i64 {
    for (index, layer) in layers.iter().enumerate() {
        if layer.regex.is_match(path) {
            if let Some(matched) = matched.as_deref_mut() {
                matched.insert(index);
            }
            return layer.priority;
        }
    }
    0
}

struct LayerDecl {
    explicit_priority: Option<i64>,
    deps: Vec<(String, Option<u32>)>,
}

/// Resolve priorities for every enabled layer. Mirrors `handleCollections`
/// in the original cooker: errors are collected across the whole batch and
/// raised together once (spec.md §4.1 "collect all errors, raise at the
/// end").
pub fn resolve_layers(store: &dyn VariableStore, enabled: &[String]) -> Result<Vec<LayerPriority>, LayerError> {
    let mut errors = Vec::new();
    let mut decls: HashMap<String, LayerDecl> = HashMap::new();
    let mut min_priority = 0i64;

    for name in enabled {
        let explicit_priority = match store.get_str(&format!("BBFILE_PRIORITY_{name}")) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) => {
                    if min_priority == 0 || value < min_priority {
                        min_priority = value;
                    }
                    Some(value)
                }
                Err(_) => {
                    errors.push(LayerError::InvalidPriority(name.clone(), raw));
                    None
                }
            },
            None => None,
        };

        let mut deps = Vec::new();
        for dep_spec in store.get_list(&format!("LAYERDEPENDS_{name}")) {
            let (dep_name, dep_version) = match dep_spec.split_once(':') {
                Some((dep, ver)) => match ver.parse::<u32>() {
                    Ok(v) => (dep.to_string(), Some(v)),
                    Err(_) => {
                        errors.push(LayerError::InvalidDependencyVersion(name.clone(), dep_spec.clone()));
                        continue;
                    }
                },
                None => (dep_spec.clone(), None),
            };

            if !enabled.contains(&dep_name) {
                errors.push(LayerError::UnknownDependency(name.clone(), dep_name.clone()));
                continue;
            }

            if let Some(wanted) = dep_version {
                match store.get_str(&format!("LAYERVERSION_{dep_name}")) {
                    Some(raw) => match raw.parse::<u32>() {
                        Ok(have) if have != wanted => {
                            errors.push(LayerError::VersionMismatch {
                                layer: name.clone(),
                                dependency: dep_name.clone(),
                                wanted,
                                have,
                            });
                        }
                        Ok(_) => {}
                        Err(_) => {
                            errors.push(LayerError::InvalidDependencyVersion(name.clone(), dep_spec.clone()));
                        }
                    },
                    None => {
                        errors.push(LayerError::VersionUnspecified {
                            layer: name.clone(),
                            dependency: dep_name.clone(),
                            wanted,
                        });
                    }
                }
            }

            deps.push((dep_name, dep_version));
        }

        decls.insert(name.clone(), LayerDecl { explicit_priority, deps });
    }

    if let Some(cycle) = find_cycle(enabled, &decls) {
        return Err(LayerError::Cycle { path: cycle });
    }

    let mut priorities: HashMap<String, i64> = HashMap::new();
    for name in enabled {
        calc_priority(name, &decls, min_priority, &mut priorities);
    }

    let mut results = Vec::with_capacity(enabled.len());
    for name in enabled {
        let Some(pattern) = store.get_str(&format!("BBFILE_PATTERN_{name}")) else {
            errors.push(LayerError::MissingPattern(name.clone()));
            continue;
        };
        let regex = match Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(_) => {
                errors.push(LayerError::InvalidPattern(name.clone(), pattern));
                continue;
            }
        };
        results.push(LayerPriority {
            name: name.clone(),
            pattern,
            regex,
            priority: priorities[name],
        });
    }

    if !errors.is_empty() {
        for error in &errors {
            tracing::error!(%error, "layer configuration error");
        }
        return Err(LayerError::Batch(errors.len()));
    }

    Ok(results)
}

fn calc_priority(name: &str, decls: &HashMap<String, LayerDecl>, min_priority: i64, out: &mut HashMap<String, i64>) {
    if out.contains_key(name) {
        return;
    }
    let Some(decl) = decls.get(name) else { return };
    if let Some(explicit) = decl.explicit_priority {
        out.insert(name.to_string(), explicit);
        return;
    }

    let mut max_dep_priority = min_priority;
    for (dep, _) in &decl.deps {
        calc_priority(dep, decls, min_priority, out);
        if let Some(&dep_priority) = out.get(dep) {
            max_dep_priority = max_dep_priority.max(dep_priority);
        }
    }
    out.insert(name.to_string(), max_dep_priority + 1);
}

fn find_cycle(enabled: &[String], decls: &HashMap<String, LayerDecl>) -> Option<Vec<String>> {
    let mut graph: Dag<String> = Dag::new();
    for name in enabled {
        graph.add_node_or_get_index(name);
    }
    for name in enabled {
        let Some(decl) = decls.get(name) else { continue };
        let from = graph.add_node_or_get_index(name);
        for (dep, _) in &decl.deps {
            let to = graph.add_node_or_get_index(dep);
            if !graph.add_edge(from, to) {
                // `to` can already reach `from`; recover the path for the
                // error message.
                let path = astar(graph.as_ref(), to, |n| n == from, |_| 1, |_| 0)
                    .map(|(_, path)| path.into_iter().map(|i| graph.as_ref()[i].clone()).collect::<Vec<_>>())
                    .unwrap_or_default();
                let mut full = vec![name.clone()];
                full.extend(path);
                return Some(full);
            }
        }
    }
    None
}
