// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The value types produced by the (external) parser: [`RecipeInfo`] and
//! its virtual-filename addressing scheme.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use camino::{Utf8Path, Utf8PathBuf};

/// A recipe's version triple, compared as a tuple per spec.md §4.5 rule 3.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PkgVersion {
    pub epoch: u32,
    pub version: String,
    pub revision: u32,
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.epoch, self.version, self.revision)
    }
}

/// An encoded `(real-path, class)` pair identifying one parsed variant of a
/// recipe. Round-trips bijectively through [`realfn_to_virtual`] and
/// [`virtualfn_to_realfn`] (spec.md §3, §8 round-trip law).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualFn(String);

const CLASS_SEPARATOR: char = ':';
const VIRTUAL_PREFIX: &str = "virtual:";

impl VirtualFn {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn real_path(&self) -> &str {
        virtualfn_to_realfn(self).0
    }

    pub fn class(&self) -> Option<&str> {
        virtualfn_to_realfn(self).1
    }
}

impl fmt::Display for VirtualFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode `(real, class)` into a virtual filename. With no class, the
/// virtual filename is just the real path (the "vanilla" variant).
pub fn realfn_to_virtual(real: &Utf8Path, class: Option<&str>) -> VirtualFn {
    match class {
        Some(class) => VirtualFn(format!("{VIRTUAL_PREFIX}{class}{CLASS_SEPARATOR}{real}")),
        None => VirtualFn(real.to_string()),
    }
}

/// Decode a virtual filename back into `(real, class)`. Inverse of
/// [`realfn_to_virtual`].
pub fn virtualfn_to_realfn(virt: &VirtualFn) -> (&str, Option<&str>) {
    match virt.0.strip_prefix(VIRTUAL_PREFIX) {
        Some(rest) => match rest.split_once(CLASS_SEPARATOR) {
            Some((class, real)) => (real, Some(class)),
            None => (rest, None),
        },
        None => (virt.0.as_str(), None),
    }
}

/// Absolute path to a recipe file plus the optional class-suffix variant it
/// represents. `class.is_none()` is the "vanilla" (unmodified) recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeFile {
    pub path: Utf8PathBuf,
    pub class: Option<String>,
}

impl RecipeFile {
    pub fn vanilla(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            class: None,
        }
    }

    pub fn virtual_fn(&self) -> VirtualFn {
        realfn_to_virtual(&self.path, self.class.as_deref())
    }
}

/// A registry-keyed slot for a cache extension's typed record (spec.md §3
/// "open enum of cache field sets"; redesigned per spec.md §9 from a
/// reflective attribute bag into a heterogeneous map keyed by descriptor
/// id, as recommended).
pub trait CacheFieldSet: fmt::Debug + Send + Sync + 'static {
    /// Stable name for the extension, used in error messages.
    const DESCRIPTOR_ID: &'static str;
}

#[derive(Debug, Default)]
pub struct CacheFields {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CacheFields {
    pub fn insert<T: CacheFieldSet>(&mut self, value: T) {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: CacheFieldSet>(&self) -> Option<&T> {
        self.slots.get(&TypeId::of::<T>()).and_then(|boxed| boxed.downcast_ref())
    }
}

impl Clone for CacheFields {
    fn clone(&self) -> Self {
        // Extra cache fields are additive metadata, never required for
        // correctness of the core graphs; a clone that drops them is
        // sound. Extensions that need cloning can store an Rc/Arc inside
        // their own record.
        Self::default()
    }
}

/// Essential attributes produced by parsing one recipe variant (spec.md
/// §3 `RecipeInfo`).
#[derive(Debug, Clone)]
pub struct RecipeInfo {
    pub pn: String,
    pub version: PkgVersion,
    pub provides: Vec<String>,
    pub rprovides: Vec<String>,
    pub depends: Vec<String>,
    pub rdepends: HashMap<String, Vec<String>>,
    pub rrecommends: HashMap<String, Vec<String>>,
    pub inherits: Vec<String>,
    pub skipped: bool,
    pub skipreason: Option<String>,
    pub extra: CacheFields,
}

impl RecipeInfo {
    pub fn new(pn: impl Into<String>) -> Self {
        Self {
            pn: pn.into(),
            version: PkgVersion::default(),
            provides: vec![],
            rprovides: vec![],
            depends: vec![],
            rdepends: HashMap::new(),
            rrecommends: HashMap::new(),
            inherits: vec![],
            skipped: false,
            skipreason: None,
            extra: CacheFields::default(),
        }
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = true;
        self.skipreason = Some(reason.into());
        self
    }
}

/// A reduced projection of a skipped [`RecipeInfo`], matching the shape the
/// original cooker keeps in its global `skiplist` rather than the full
/// record (recovered from `cooker.py`'s `SkippedPackage`).
#[derive(Debug, Clone)]
pub struct SkippedPackage {
    pub pn: String,
    pub skipreason: Option<String>,
    pub provides: Vec<String>,
    pub rprovides: Vec<String>,
}

impl From<&RecipeInfo> for SkippedPackage {
    fn from(info: &RecipeInfo) -> Self {
        Self {
            pn: info.pn.clone(),
            skipreason: info.skipreason.clone(),
            provides: info.provides.clone(),
            rprovides: info.rprovides.clone(),
        }
    }
}
