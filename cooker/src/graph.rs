// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C7 — DependencyGraph: a thin view over [`dag::Dag`] for the task/
//! recipe closures built by [`crate::taskdata::expand`], offering the
//! build-order and export operations spec.md §4.7 names. Every edge in
//! the underlying [`dag::Dag`] is added through `add_edge`, which
//! rejects anything that would close a cycle, so every operation here is
//! infallible. Generic over the node type so the same view backs all
//! three projections spec.md §4.7 asks for: the `(pn, task)` task graph,
//! the recipe-level build/runtime graphs, and the package-level runtime
//! graph.

use dag::Dag;

pub struct DependencyGraph<'a, N> {
    dag: &'a Dag<N>,
}

impl<'a, N> DependencyGraph<'a, N>
where
    N: Clone + PartialEq + Ord + std::fmt::Debug,
{
    pub fn new(dag: &'a Dag<N>) -> Self {
        Self { dag }
    }

    /// A valid build order: dependencies before dependents (spec.md §4.7
    /// invariant).
    pub fn build_order(&self) -> Vec<&N> {
        self.dag.topo().collect()
    }

    /// Build order batched by dependency depth — everything in one batch
    /// can run concurrently (spec.md §4.7 "parallelizable batches").
    pub fn batched_build_order(&self) -> Vec<Vec<N>> {
        self.dag.batched_topo()
    }

    /// Render as Graphviz `.dot` for external inspection (spec.md §4.7
    /// `DepTreeGenerated` alternative sink: a file instead of an event;
    /// per spec.md these are mutually exclusive per invocation).
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph depends {\n");
        for node in self.dag.iter_nodes() {
            for dependent in self.depends_on(node) {
                out.push_str(&format!("  {node:?} -> {dependent:?};\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    /// Everything reachable from `node` (its transitive dependents, since
    /// the graph's edges point dependency -> dependent).
    pub fn depends_on(&self, node: &N) -> Vec<&N> {
        let Some(index) = self.dag.get_index(node) else {
            return vec![];
        };
        self.dag.dfs(index).filter(|n| *n != node).collect()
    }
}
