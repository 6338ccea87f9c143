//! Core runtime for Brickyard.
//!
//! Brickyard composes capability modules ("extensions") onto long-lived
//! entities ("bricks"). An extension is declared once in a catalog; at entity
//! construction the catalog resolves which extensions apply, orders them so
//! declared dependencies install first, and the installer wires each one onto
//! the entity: merged configuration defaults, an `init` gate, namespaced
//! public methods, and phased event handlers. All later interaction flows
//! through the entity's event bus and its option store.

pub mod brick;
pub mod bus;
pub mod error;
pub mod event;
pub mod exec;
pub mod extension;
pub mod options;

pub use brick::{Brick, Classification, Status};
pub use bus::{EventBus, Handler, SubscriptionId, DEFAULT_PRIORITY, MAX_PRIORITY};
pub use error::{Error, Result};
pub use event::{EventError, EventName, EventNameError, EventOutcome, EventView, Flow, Phase};
pub use exec::{CallSite, ExecutionError};
pub use extension::{
    EventBinding, ExtensionCatalog, ExtensionDescriptor, ModuleCtx, Selector,
};
pub use options::OptionStore;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::brick::{Brick, Classification, Status};
    pub use crate::bus::{EventBus, SubscriptionId, DEFAULT_PRIORITY, MAX_PRIORITY};
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventOutcome, EventView, Flow, Phase};
    pub use crate::extension::{
        EventBinding, ExtensionCatalog, ExtensionDescriptor, ModuleCtx, Selector,
    };
}

use once_cell::sync::OnceCell;

static TRACING: OnceCell<()> = OnceCell::new();

/// Initialize the global tracing subscriber from `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
