//! Capability-module declarations.
//!
//! A descriptor is a static, process-wide description of one module: where it
//! applies, what it requires, its default configuration, its public and
//! private method tables, its event subscriptions, and its lifecycle
//! callbacks. Descriptors are registered once into an
//! [`ExtensionCatalog`](super::ExtensionCatalog) and read many times.
//!
//! All callbacks take an explicit [`ModuleCtx`] instead of an implicit
//! receiver: the per-entity instance state travels with the context.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::brick::{Brick, Classification};
use crate::event::{EventView, Flow};

/// Boxed future returned by public methods and private helpers.
pub type MethodFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// A namespaced public method or private helper.
pub type MethodFn = Arc<dyn Fn(ModuleCtx, Value) -> MethodFuture + Send + Sync>;

/// `init` / `destroy` lifecycle callback. `init` returning `Ok(false)`
/// aborts the installation without an error.
pub type LifecycleFn = Arc<dyn Fn(ModuleCtx) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// One phase callback of an event binding.
pub type PhaseHandlerFn =
    Arc<dyn Fn(ModuleCtx, EventView) -> BoxFuture<'static, anyhow::Result<Flow>> + Send + Sync>;

/// Matching rule for one classification segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRule {
    /// `*`: matches any value.
    Any,
    Exact(String),
}

impl SegmentRule {
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            SegmentRule::Any
        } else {
            SegmentRule::Exact(raw.to_string())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            SegmentRule::Any => true,
            SegmentRule::Exact(literal) => literal == value,
        }
    }
}

/// One applicability rule: which `{host, kind}` classifications a module
/// installs onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub host: SegmentRule,
    pub kind: SegmentRule,
}

impl Selector {
    pub fn new(host: &str, kind: &str) -> Self {
        Self {
            host: SegmentRule::parse(host),
            kind: SegmentRule::parse(kind),
        }
    }

    pub fn matches(&self, classification: &Classification) -> bool {
        self.host.matches(&classification.host) && self.kind.matches(&classification.kind)
    }
}

/// Explicit context handed to every module callback.
///
/// Carries the owning entity handle, the module identity, the module's
/// private helper table, and the per-entity instance state slot.
#[derive(Clone)]
pub struct ModuleCtx {
    brick: Brick,
    module: String,
    namespace: String,
    helpers: Arc<HashMap<String, MethodFn>>,
    state: Arc<RwLock<Value>>,
}

impl ModuleCtx {
    pub(crate) fn new(
        brick: Brick,
        module: impl Into<String>,
        namespace: impl Into<String>,
        helpers: Arc<HashMap<String, MethodFn>>,
        state: Arc<RwLock<Value>>,
    ) -> Self {
        Self {
            brick,
            module: module.into(),
            namespace: namespace.into(),
            helpers,
            state,
        }
    }

    /// The entity this module instance is installed on.
    pub fn brick(&self) -> &Brick {
        &self.brick
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read the per-entity instance state.
    pub fn state(&self) -> Value {
        self.state.read().clone()
    }

    /// Replace the per-entity instance state.
    pub fn set_state(&self, value: Value) {
        *self.state.write() = value;
    }

    /// Call one of the module's private helpers by name.
    pub async fn call_helper(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let helper = self
            .helpers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("module `{}` has no helper `{name}`", self.module))?
            .clone();
        helper(self.clone(), args).await
    }
}

impl fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module", &self.module)
            .field("namespace", &self.namespace)
            .field("brick", &self.brick.id())
            .finish()
    }
}

/// One event subscription of a module: a pattern plus up to three phase
/// callbacks, all registered at the same priority.
#[derive(Clone, Default)]
pub struct EventBinding {
    pub pattern: String,
    pub priority: u8,
    pub before: Option<PhaseHandlerFn>,
    pub on: Option<PhaseHandlerFn>,
    pub after: Option<PhaseHandlerFn>,
}

impl EventBinding {
    pub fn for_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            priority: crate::bus::DEFAULT_PRIORITY,
            before: None,
            on: None,
            after: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn before<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ModuleCtx, EventView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
    {
        self.before = Some(wrap_phase_handler(handler));
        self
    }

    pub fn on<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ModuleCtx, EventView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
    {
        self.on = Some(wrap_phase_handler(handler));
        self
    }

    pub fn after<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ModuleCtx, EventView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
    {
        self.after = Some(wrap_phase_handler(handler));
        self
    }
}

fn wrap_phase_handler<F, Fut>(handler: F) -> PhaseHandlerFn
where
    F: Fn(ModuleCtx, EventView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
{
    Arc::new(move |ctx, view| Box::pin(handler(ctx, view)))
}

/// A capability-module declaration.
pub struct ExtensionDescriptor {
    /// Unique catalog name. Normalized to the namespace at registration when
    /// left empty.
    pub name: String,
    /// Namespace the public methods are exposed under on the entity.
    pub namespace: String,
    /// Applicability rules; at least one must match an entity's
    /// classification for the module to be selected.
    pub selectors: Vec<Selector>,
    /// Names of modules that must install before this one.
    pub requires: Vec<String>,
    /// Default configuration merged into the entity's store ahead of `init`.
    pub defaults: Value,
    /// Public methods exposed under the namespace.
    pub methods: HashMap<String, MethodFn>,
    /// Private helpers reachable through [`ModuleCtx::call_helper`].
    pub helpers: HashMap<String, MethodFn>,
    /// Event subscriptions.
    pub bindings: Vec<EventBinding>,
    pub init: Option<LifecycleFn>,
    pub destroy: Option<LifecycleFn>,
    pub version: Option<semver::Version>,
    pub description: Option<String>,
}

impl ExtensionDescriptor {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: namespace.clone(),
            namespace,
            selectors: Vec::new(),
            requires: Vec::new(),
            defaults: Value::Object(Map::new()),
            methods: HashMap::new(),
            helpers: HashMap::new(),
            bindings: Vec::new(),
            init: None,
            destroy: None,
            version: None,
            description: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add one applicability rule; `*` is permitted on either segment.
    pub fn applicable_to(mut self, host: &str, kind: &str) -> Self {
        self.selectors.push(Selector::new(host, kind));
        self
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ModuleCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        self
    }

    pub fn helper<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ModuleCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.helpers
            .insert(name.into(), Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        self
    }

    pub fn binding(mut self, binding: EventBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ModuleCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn on_destroy<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ModuleCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.destroy = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("selectors", &self.selectors)
            .field("requires", &self.requires)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings.len())
            .field("version", &self.version)
            .finish()
    }
}
