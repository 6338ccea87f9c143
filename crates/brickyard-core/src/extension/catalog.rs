//! Catalog of capability-module declarations.
//!
//! The catalog is an owned, injectable registry: construct one per runtime
//! (or per test) and register descriptors into it. `resolve` selects the
//! modules applicable to a classification and orders them so dependencies
//! install before dependents; the resolved order is memoized per
//! `host::kind` pair. `bake` precomputes shared method tables once per
//! module so entities of the same classification reuse them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::descriptor::{ExtensionDescriptor, MethodFn};
use crate::brick::Classification;

/// Registration errors. Declaration problems are never fatal to the catalog;
/// the offending descriptor is simply not stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("extension `{0}` is already registered")]
    Duplicate(String),

    #[error("extension `{0}` declares no applicability rules")]
    NoSelectors(String),
}

/// Shared, entity-independent method tables for one module, built once per
/// module name. Baking is a performance cache only; installation falls back
/// to the descriptor's own tables when a module has not been baked.
#[derive(Clone)]
pub struct BakedModule {
    pub helpers: Arc<HashMap<String, MethodFn>>,
    pub api: Arc<HashMap<String, MethodFn>>,
}

struct CatalogInner {
    entries: RwLock<Vec<Arc<ExtensionDescriptor>>>,
    /// Resolved install order per `host::kind`.
    order_cache: RwLock<HashMap<String, Arc<Vec<Arc<ExtensionDescriptor>>>>>,
    baked: RwLock<HashMap<String, BakedModule>>,
}

/// Owned catalog of module declarations.
#[derive(Clone)]
pub struct ExtensionCatalog {
    inner: Arc<CatalogInner>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                entries: RwLock::new(Vec::new()),
                order_cache: RwLock::new(HashMap::new()),
                baked: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register one declaration.
    ///
    /// Normalizes a missing name to the namespace. Declarations without any
    /// applicability rule are rejected with a logged warning; duplicates are
    /// rejected by name.
    pub fn register(&self, mut descriptor: ExtensionDescriptor) -> Result<(), CatalogError> {
        if descriptor.name.is_empty() {
            descriptor.name = descriptor.namespace.clone();
        }
        if descriptor.selectors.is_empty() {
            warn!(
                extension = %descriptor.name,
                "extension declares no applicability rules; skipped"
            );
            return Err(CatalogError::NoSelectors(descriptor.name));
        }

        let mut entries = self.inner.entries.write();
        if entries.iter().any(|d| d.name == descriptor.name) {
            return Err(CatalogError::Duplicate(descriptor.name));
        }
        entries.push(Arc::new(descriptor));
        drop(entries);

        self.inner.order_cache.write().clear();
        Ok(())
    }

    /// Look up a declaration by name.
    pub fn get(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.inner
            .entries
            .read()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Select and dependency-order the modules applicable to a
    /// classification. Memoized per `host::kind`.
    ///
    /// Modules with missing or cyclic `requires` edges are excluded together
    /// with all of their transitive dependents; each omission is logged.
    pub fn resolve(&self, classification: &Classification) -> Arc<Vec<Arc<ExtensionDescriptor>>> {
        let key = format!("{}::{}", classification.host, classification.kind);
        if let Some(hit) = self.inner.order_cache.read().get(&key) {
            return Arc::clone(hit);
        }

        let candidates: Vec<Arc<ExtensionDescriptor>> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|d| d.selectors.iter().any(|s| s.matches(classification)))
            .cloned()
            .collect();

        let ordered = Arc::new(resolve_order(&candidates));
        self.inner
            .order_cache
            .write()
            .insert(key, Arc::clone(&ordered));
        ordered
    }

    /// Build shared method tables for any module in the list that has not
    /// been baked yet. Idempotent per module name.
    pub fn bake(&self, list: &[Arc<ExtensionDescriptor>]) {
        let mut baked = self.inner.baked.write();
        for descriptor in list {
            baked.entry(descriptor.name.clone()).or_insert_with(|| BakedModule {
                helpers: Arc::new(descriptor.helpers.clone()),
                api: Arc::new(descriptor.methods.clone()),
            });
        }
    }

    /// Fetch a module's baked tables, if it has been baked.
    pub fn baked(&self, name: &str) -> Option<BakedModule> {
        self.inner.baked.read().get(name).cloned()
    }
}

impl Default for ExtensionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Resolved,
    Failed,
}

/// Depth-first topological sort over `requires` edges, dependency-first.
fn resolve_order(candidates: &[Arc<ExtensionDescriptor>]) -> Vec<Arc<ExtensionDescriptor>> {
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut cycle_warned: HashSet<String> = HashSet::new();
    let mut ordered: Vec<Arc<ExtensionDescriptor>> = Vec::new();
    for descriptor in candidates {
        visit(descriptor, candidates, &mut marks, &mut cycle_warned, &mut ordered);
    }
    ordered
}

fn visit(
    descriptor: &Arc<ExtensionDescriptor>,
    candidates: &[Arc<ExtensionDescriptor>],
    marks: &mut HashMap<String, Mark>,
    cycle_warned: &mut HashSet<String>,
    ordered: &mut Vec<Arc<ExtensionDescriptor>>,
) -> bool {
    match marks.get(&descriptor.name) {
        Some(Mark::Resolved) => return true,
        Some(Mark::Failed) => return false,
        Some(Mark::InProgress) => {
            // Warn here once; the node's own failure below stays silent.
            cycle_warned.insert(descriptor.name.clone());
            warn!(extension = %descriptor.name, "dependency cycle detected; extension excluded");
            return false;
        }
        None => {}
    }
    marks.insert(descriptor.name.clone(), Mark::InProgress);

    let mut resolved = true;
    for required in &descriptor.requires {
        match lookup(candidates, required) {
            Some(dependency) => {
                if !visit(dependency, candidates, marks, cycle_warned, ordered) {
                    if !cycle_warned.contains(&descriptor.name) {
                        warn!(
                            extension = %descriptor.name,
                            requires = %required,
                            "dependency unresolved; extension excluded"
                        );
                    }
                    resolved = false;
                    break;
                }
            }
            None => {
                warn!(
                    extension = %descriptor.name,
                    requires = %required,
                    "missing dependency; extension excluded"
                );
                resolved = false;
                break;
            }
        }
    }

    marks.insert(
        descriptor.name.clone(),
        if resolved { Mark::Resolved } else { Mark::Failed },
    );
    if resolved {
        ordered.push(Arc::clone(descriptor));
    }
    resolved
}

/// Dependency lookup: by declaration name first, falling back to namespace.
fn lookup<'a>(
    candidates: &'a [Arc<ExtensionDescriptor>],
    name: &str,
) -> Option<&'a Arc<ExtensionDescriptor>> {
    candidates
        .iter()
        .find(|d| d.name == name)
        .or_else(|| candidates.iter().find(|d| d.namespace == name))
}
