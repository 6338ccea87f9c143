//! Capability-module system: declarations, catalog, and per-entity install.
//!
//! A module is declared once as an [`ExtensionDescriptor`] and registered
//! into an [`ExtensionCatalog`]. When a brick is constructed, the catalog
//! selects the modules whose applicability rules match the brick's
//! classification, orders them so `requires` edges install first, and the
//! installer wires each one onto the entity: configuration defaults, `init`,
//! namespace methods, event handlers, and the teardown hook.

pub mod catalog;
pub mod descriptor;
pub(crate) mod installer;

pub use catalog::{BakedModule, CatalogError, ExtensionCatalog};
pub use descriptor::{
    EventBinding, ExtensionDescriptor, LifecycleFn, MethodFn, MethodFuture, ModuleCtx,
    PhaseHandlerFn, SegmentRule, Selector,
};
pub use installer::ModuleInstance;
