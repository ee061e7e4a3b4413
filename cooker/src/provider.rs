// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C5 — ProviderResolver: pick the single file that satisfies a named
//! item, applying `ASSUME_PROVIDED` and `PREFERRED_PROVIDERS` before
//! falling back to the layer/version tie-break (spec.md §4.5). Grounded
//! on the strategy-function shape of `Transaction::resolve_provider` /
//! `resolve_provider_with_filter`.

use std::collections::HashSet;

use crate::{cache::RecipeCache, event::NoProviderInfo, recipe::VirtualFn};

#[derive(Debug, Clone)]
pub enum Resolution {
    Provided(VirtualFn),
    AssumedProvided,
    NoProvider(NoProviderInfo),
    Ambiguous { chosen: VirtualFn, candidates: Vec<VirtualFn> },
}

pub struct ProviderResolver<'a> {
    cache: &'a RecipeCache,
    assume_provided: &'a HashSet<String>,
}

impl<'a> ProviderResolver<'a> {
    pub fn new(cache: &'a RecipeCache, assume_provided: &'a HashSet<String>) -> Self {
        Self { cache, assume_provided }
    }

    /// Resolve `item`. `runtime` selects RDEPENDS-space (`rproviders`) over
    /// build-time DEPENDS-space (`providers`) lookups (spec.md §4.5).
    pub fn resolve(&self, item: &str, runtime: bool, dependees: &[VirtualFn]) -> Resolution {
        if self.assume_provided.contains(item) {
            return Resolution::AssumedProvided;
        }

        if let Some(preferred_pn) = self.cache.preferred.get(item) {
            let candidates = self.cache.sorted_providers(item, runtime);
            if let Some(winner) = candidates.iter().find(|virt| self.cache.pkg_fn.get(**virt) == Some(preferred_pn)) {
                return Resolution::Provided((*winner).clone());
            }
            // PREFERRED_PROVIDERS named a pn that doesn't actually provide
            // this item; fall through to the default tie-break rather
            // than silently ignoring the preference.
        }

        let candidates = self.cache.sorted_providers(item, runtime);
        match candidates.as_slice() {
            [] => Resolution::NoProvider(self.no_provider(item, runtime, dependees)),
            [only] => Resolution::Provided((*only).clone()),
            [winner, ..] => {
                let all = candidates.iter().map(|v| (*v).clone()).collect();
                Resolution::Ambiguous {
                    chosen: (*winner).clone(),
                    candidates: all,
                }
            }
        }
    }

    fn no_provider(&self, item: &str, runtime: bool, dependees: &[VirtualFn]) -> NoProviderInfo {
        let close_matches = self.close_matches(item, runtime);
        let reasons = if close_matches.is_empty() {
            vec![format!("nothing provides '{item}'")]
        } else {
            vec![format!("nothing provides '{item}'; did you mean one of: {}", close_matches.join(", "))]
        };

        NoProviderInfo {
            item: item.to_string(),
            runtime,
            reasons,
            close_matches,
            dependees: dependees.to_vec(),
        }
    }

    /// Item names within edit-distance 2 of `item` among everything this
    /// cache actually knows how to provide — the "did you mean" hint in
    /// spec.md Scenario S6.
    fn close_matches(&self, item: &str, runtime: bool) -> Vec<String> {
        let pool = if runtime { &self.cache.rproviders } else { &self.cache.providers };
        let mut matches: Vec<(usize, &String)> = pool
            .keys()
            .filter_map(|candidate| {
                let distance = levenshtein(item, candidate);
                (distance <= 2).then_some((distance, candidate))
            })
            .collect();
        matches.sort_by_key(|(distance, name)| (*distance, name.to_string()));
        matches.into_iter().take(3).map(|(_, name)| name.clone()).collect()
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::recipe::{realfn_to_virtual, PkgVersion, RecipeInfo};

    fn make_cache() -> RecipeCache {
        let mut cache = RecipeCache::default();
        let a = realfn_to_virtual(Utf8Path::new("/layers/a/foo_1.0.bb"), None);
        let b = realfn_to_virtual(Utf8Path::new("/layers/b/foo-alt_1.0.bb"), None);

        let mut info_a = RecipeInfo::new("foo");
        info_a.provides.push("virtual/compiler".into());
        info_a.version = PkgVersion {
            epoch: 0,
            version: "1.0".into(),
            revision: 0,
        };

        let mut info_b = RecipeInfo::new("foo-alt");
        info_b.provides.push("virtual/compiler".into());
        info_b.version = PkgVersion {
            epoch: 0,
            version: "1.0".into(),
            revision: 0,
        };

        cache.add_from_recipeinfo("/layers/a/foo_1.0.bb", &[(a, info_a)], &[]);
        cache.add_from_recipeinfo("/layers/b/foo-alt_1.0.bb", &[(b, info_b)], &[]);
        cache
    }

    #[test]
    fn assume_provided_short_circuits() {
        let cache = RecipeCache::default();
        let mut assume = HashSet::new();
        assume.insert("virtual/kernel".to_string());
        let resolver = ProviderResolver::new(&cache, &assume);
        assert!(matches!(resolver.resolve("virtual/kernel", false, &[]), Resolution::AssumedProvided));
    }

    #[test]
    fn s4_preferred_provider_wins_over_newer_candidate() {
        let mut cache = make_cache();
        cache.set_preferred("virtual/compiler", "foo");
        let assume = HashSet::new();
        let resolver = ProviderResolver::new(&cache, &assume);

        match resolver.resolve("virtual/compiler", false, &[]) {
            Resolution::Provided(virt) => assert_eq!(virt.real_path(), "/layers/a/foo_1.0.bb"),
            other => panic!("expected Provided, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_without_preference() {
        let cache = make_cache();
        let assume = HashSet::new();
        let resolver = ProviderResolver::new(&cache, &assume);
        assert!(matches!(
            resolver.resolve("virtual/compiler", false, &[]),
            Resolution::Ambiguous { .. }
        ));
    }

    #[test]
    fn s6_no_provider_offers_close_matches() {
        let cache = make_cache();
        let mut info_extra = RecipeInfo::new("zzz");
        let mut cache = cache;
        info_extra.provides.push("libfoo".into());
        cache.add_from_recipeinfo(
            "/layers/a/zzz_1.0.bb",
            &[(realfn_to_virtual(Utf8Path::new("/layers/a/zzz_1.0.bb"), None), info_extra)],
            &[],
        );
        let assume = HashSet::new();
        let resolver = ProviderResolver::new(&cache, &assume);

        match resolver.resolve("libfo", false, &[]) {
            Resolution::NoProvider(info) => assert!(info.close_matches.contains(&"libfoo".to_string())),
            other => panic!("expected NoProvider, got {other:?}"),
        }
    }
}
