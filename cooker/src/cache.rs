// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C3 — RecipeCache: the in-memory index of every successfully parsed
//! recipe and its provides/depends relationships (spec.md §4.3). A
//! passive aggregate: it has no behaviour beyond merging parsed records
//! and answering lookups, mutated only by the driver (spec.md §5).

use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    collect::AppendIndex,
    layer::{priority_for_path, LayerPriority},
    recipe::{PkgVersion, RecipeInfo, SkippedPackage, VirtualFn},
};

#[cfg(test)]
use crate::recipe::realfn_to_virtual;

#[derive(Debug, Default)]
pub struct RecipeCache {
    pub pkg_fn: HashMap<VirtualFn, String>,
    pub pn_provides: HashMap<String, Vec<String>>,
    pub providers: HashMap<String, Vec<VirtualFn>>,
    pub rproviders: HashMap<String, Vec<VirtualFn>>,
    pub preferred: HashMap<String, String>,
    pub inherits: HashMap<VirtualFn, Vec<String>>,
    pub rundeps: HashMap<VirtualFn, HashMap<String, Vec<String>>>,
    pub runrecs: HashMap<VirtualFn, HashMap<String, Vec<String>>>,
    pub depends: HashMap<VirtualFn, Vec<String>>,
    pub pkg_pepvpr: HashMap<VirtualFn, PkgVersion>,
    pub bbfile_priority: HashMap<VirtualFn, i64>,
    pub ignored_dependencies: HashSet<String>,
    pub world_target: HashSet<String>,
    pub universe_target: HashSet<String>,
    pub possible_world: HashSet<VirtualFn>,
    pub skiplist: HashMap<VirtualFn, SkippedPackage>,
}

impl RecipeCache {
    pub fn new(ignored_dependencies: HashSet<String>) -> Self {
        Self {
            ignored_dependencies,
            ..Self::default()
        }
    }

    /// Merge one file's parsed variants into every index. Idempotent:
    /// calling this twice with identical `infos` leaves the cache in the
    /// same observable state (spec.md §4.3 invariant, §8 property 3).
    pub fn add_from_recipeinfo(&mut self, real_path: &str, infos: &[(VirtualFn, RecipeInfo)], layers: &[LayerPriority]) {
        let priority = priority_for_path(real_path, layers, None);

        for (virt, info) in infos {
            self.pkg_fn.insert(virt.clone(), info.pn.clone());
            self.bbfile_priority.insert(virt.clone(), priority);
            self.pkg_pepvpr.insert(virt.clone(), info.version.clone());
            self.inherits.insert(virt.clone(), info.inherits.clone());
            self.rundeps.insert(virt.clone(), info.rdepends.clone());
            self.runrecs.insert(virt.clone(), info.rrecommends.clone());
            self.depends.insert(virt.clone(), info.depends.clone());

            if info.skipped {
                self.skiplist.insert(virt.clone(), SkippedPackage::from(info));
                continue;
            }

            self.possible_world.insert(virt.clone());

            let entry = self.pn_provides.entry(info.pn.clone()).or_default();
            if !entry.contains(&info.pn) {
                entry.push(info.pn.clone());
            }

            for item in std::iter::once(info.pn.clone()).chain(info.provides.iter().cloned()) {
                let providers = self.providers.entry(item.clone()).or_default();
                if !providers.contains(virt) {
                    providers.push(virt.clone());
                }
                let entry = self.pn_provides.entry(info.pn.clone()).or_default();
                if !entry.contains(&item) {
                    entry.push(item);
                }
            }

            for item in info.rprovides.iter().cloned() {
                let rproviders = self.rproviders.entry(item).or_default();
                if !rproviders.contains(virt) {
                    rproviders.push(virt.clone());
                }
            }
        }
    }

    pub fn set_preferred(&mut self, providee: impl Into<String>, provider_pn: impl Into<String>) {
        self.preferred.insert(providee.into(), provider_pn.into());
    }

    /// Populate `world_target`/`universe_target` from the recipes merged so
    /// far, mirroring `cooker.py`'s `buildWorldTargetList` (spec.md §4.6).
    /// `universe` is every non-skipped `pn`; `world` narrows that to
    /// recipes that are not shadowed by a higher-priority overlay and
    /// provide at least one concrete (non-`virtual/...`) item.
    pub fn populate_world_targets(&mut self, overlays: &HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>) {
        let shadowed: HashSet<&Utf8PathBuf> = overlays.values().flatten().collect();

        self.world_target.clear();
        self.universe_target.clear();

        for virt in &self.possible_world {
            let Some(pn) = self.pkg_fn.get(virt) else { continue };
            self.universe_target.insert(pn.clone());

            if shadowed.contains(&Utf8Path::new(virt.real_path()).to_path_buf()) {
                continue;
            }

            let provides_concrete = self
                .pn_provides
                .get(pn)
                .map(|items| items.iter().any(|item| !item.starts_with("virtual/")))
                .unwrap_or(false);
            if provides_concrete {
                self.world_target.insert(pn.clone());
            }
        }
    }

    /// Providers of `item` ordered by descending layer priority, then
    /// descending version, then lexicographic path — the selection order
    /// spec.md §3/§4.5 describes.
    pub fn sorted_providers(&self, item: &str, runtime: bool) -> Vec<&VirtualFn> {
        let mut candidates: Vec<&VirtualFn> = if runtime {
            self.rproviders.get(item).map(|v| v.iter().collect()).unwrap_or_default()
        } else {
            self.providers.get(item).map(|v| v.iter().collect()).unwrap_or_default()
        };

        candidates.sort_by(|a, b| {
            let pa = self.bbfile_priority.get(*a).copied().unwrap_or(0);
            let pb = self.bbfile_priority.get(*b).copied().unwrap_or(0);
            let va = self.pkg_pepvpr.get(*a);
            let vb = self.pkg_pepvpr.get(*b);
            pb.cmp(&pa).then_with(|| vb.cmp(&va)).then_with(|| a.as_str().cmp(b.as_str()))
        });

        candidates
    }

    /// Priorities for every file in `files`, plus the set of layer
    /// pattern indices that matched nothing among `files` or `appends`
    /// (spec.md §4.2 rule 5, §4.3 `collection_priorities`).
    pub fn collection_priorities(
        &self,
        files: &[String],
        layers: &[LayerPriority],
        appends: &AppendIndex,
    ) -> (HashMap<String, i64>, Vec<usize>) {
        let mut priorities = HashMap::new();
        let mut matched = HashSet::new();

        for file in files {
            let priority = priority_for_path(file, layers, Some(&mut matched));
            priorities.insert(file.clone(), priority);
        }

        let mut unmatched: Vec<usize> = (0..layers.len()).filter(|i| !matched.contains(i)).collect();
        unmatched.retain(|&index| {
            let regex = &layers[index].regex;
            !appends_match_any(appends, regex)
        });

        (priorities, unmatched)
    }
}

fn appends_match_any(appends: &AppendIndex, regex: &regex::Regex) -> bool {
    appends.all_basenames().iter().any(|basename| regex.is_match(basename))
}
