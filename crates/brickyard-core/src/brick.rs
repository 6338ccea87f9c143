//! The brick: a long-lived entity that owns configuration, an event bus, and
//! a set of installed capability modules.
//!
//! Construction resolves and installs the modules applicable to the brick's
//! classification, then announces readiness through the brick's own bus.
//! All later interaction happens through fired events, option accessors, and
//! namespace method calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::bus::{EventBus, Handler, SubscriptionId};
use crate::error::{Error, Result};
use crate::event::{EventOutcome, EventView, Flow, Phase};
use crate::exec::{self, CallSite};
use crate::extension::installer::{self, ModuleInstance};
use crate::extension::{ExtensionCatalog, MethodFn, ModuleCtx};
use crate::options::OptionStore;

/// Default host classification when the caller supplies none.
pub const DEFAULT_HOST: &str = "widget";

/// The two-part tag deciding which modules apply to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Classification {
    /// What kind of thing the entity is (e.g. `widget`, `service`).
    pub host: String,
    /// Its specific variant (e.g. `grid`, `form`, `relay`).
    pub kind: String,
}

impl Classification {
    pub fn new(host: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            kind: kind.into(),
        }
    }

    /// `host::kind`, the memoization key used by the catalog.
    pub fn key(&self) -> String {
        format!("{}::{}", self.host, self.kind)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.host, self.kind)
    }
}

/// Entity lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Ready,
    Destroyed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Ready => "ready",
            Status::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct NamespaceEntry {
    module: String,
    api: Arc<HashMap<String, MethodFn>>,
}

struct BrickShared {
    id: String,
    classification: Classification,
    status: RwLock<Status>,
    store: Arc<OptionStore>,
    bus: EventBus,
    /// Caller-supplied configuration, kept so the install-time merge can give
    /// it final precedence over module defaults.
    seed: Value,
    /// Installed modules in install order.
    modules: RwLock<Vec<ModuleInstance>>,
    namespaces: RwLock<HashMap<String, NamespaceEntry>>,
    /// Whether the announced-mutation apply listener is registered.
    options_listener: AtomicBool,
    /// Whether the teardown hook is registered.
    teardown: AtomicBool,
}

/// Cheap-to-clone entity handle; clones share all state.
#[derive(Clone)]
pub struct Brick {
    shared: Arc<BrickShared>,
}

impl Brick {
    /// Construct an entity and install every applicable module.
    ///
    /// `options` is a JSON object (or `null`). `id`, `host`, and `kind` are
    /// identity fields; every other key seeds the configuration store, with
    /// dot-path keys expanded. Module selection, default merging, `init`
    /// calls, namespace exposure, and handler subscription all complete
    /// before the brick transitions to `ready` — so the ready event is not
    /// observable by subscriptions made after construction returns.
    pub async fn construct(catalog: &ExtensionCatalog, options: Value) -> Result<Brick> {
        let mut object = match options {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            _ => return Err(Error::InvalidOptions),
        };

        let id = take_string(&mut object, "id")
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let host = take_string(&mut object, "host").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let kind = take_string(&mut object, "kind").unwrap_or_else(|| host.clone());
        let classification = Classification::new(host, kind);

        let brick = Brick {
            shared: Arc::new(BrickShared {
                bus: EventBus::for_owner(id.clone(), classification.key()),
                id,
                classification,
                status: RwLock::new(Status::Created),
                store: Arc::new(OptionStore::new()),
                seed: Value::Object(object),
                modules: RwLock::new(Vec::new()),
                namespaces: RwLock::new(HashMap::new()),
                options_listener: AtomicBool::new(false),
                teardown: AtomicBool::new(false),
            }),
        };

        installer::install_all(&brick, catalog).await;
        installer::ensure_teardown_hook(&brick);
        brick.status().set(Status::Ready).await;

        debug!(brick = %brick.id(), classification = %brick.classification(), "brick ready");
        Ok(brick)
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn classification(&self) -> &Classification {
        &self.shared.classification
    }

    /// Status accessor: `get` / `set` / `is`.
    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            brick: self.clone(),
        }
    }

    /// Configuration accessor: `get` / `has` / `all` / `set` / `set_async` /
    /// `set_silent` / `set_batch`.
    pub fn options(&self) -> OptionsHandle {
        OptionsHandle {
            brick: self.clone(),
        }
    }

    /// Event accessor: `on` / `off` / `fire` / `fire_awaited`.
    pub fn events(&self) -> EventsHandle {
        EventsHandle {
            brick: self.clone(),
        }
    }

    /// The public methods of an installed module, by namespace.
    ///
    /// Returns `None` when no module exposed the namespace on this brick —
    /// including when the module was excluded for a dependency error.
    pub fn namespace(&self, namespace: &str) -> Option<NamespaceHandle> {
        let namespaces = self.shared.namespaces.read();
        let entry = namespaces.get(namespace)?;
        Some(NamespaceHandle {
            brick: self.clone(),
            namespace: namespace.to_string(),
            module: entry.module.clone(),
            api: Arc::clone(&entry.api),
        })
    }

    /// Names of the modules currently installed on this brick.
    pub fn installed(&self) -> Vec<String> {
        self.shared
            .modules
            .read()
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    /// Destroy the entity. Idempotent: the first call announces the
    /// destroyed status (running the teardown hook); later calls are no-ops.
    pub async fn destroy(&self) {
        self.status().set(Status::Destroyed).await;
    }

    // ------------------------------------------------------------------
    // Crate-internal surface used by the installer and accessors.
    // ------------------------------------------------------------------

    pub(crate) fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub(crate) fn store(&self) -> &Arc<OptionStore> {
        &self.shared.store
    }

    pub(crate) fn seed(&self) -> &Value {
        &self.shared.seed
    }

    pub(crate) fn call_site(&self, scope: String) -> CallSite {
        CallSite::new(scope).with_brick(self.id(), self.classification().key())
    }

    pub(crate) fn has_module(&self, name: &str) -> bool {
        self.shared.modules.read().iter().any(|m| m.name == name)
    }

    pub(crate) fn record_module(&self, instance: ModuleInstance) {
        self.shared.modules.write().push(instance);
    }

    pub(crate) fn module_instance(&self, name: &str) -> Option<ModuleInstance> {
        self.shared
            .modules
            .read()
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    pub(crate) fn installed_modules(&self) -> Vec<ModuleInstance> {
        self.shared.modules.read().clone()
    }

    pub(crate) fn clear_modules(&self) {
        self.shared.modules.write().clear();
        self.shared.namespaces.write().clear();
    }

    pub(crate) fn expose_namespace(
        &self,
        namespace: &str,
        module: &str,
        api: Arc<HashMap<String, MethodFn>>,
    ) {
        let mut namespaces = self.shared.namespaces.write();
        if let Some(existing) = namespaces.get(namespace) {
            if existing.module != module {
                warn!(
                    brick = %self.id(),
                    namespace = %namespace,
                    holder = %existing.module,
                    contender = %module,
                    "namespace collision; keeping the existing module's methods"
                );
            }
            return;
        }
        namespaces.insert(
            namespace.to_string(),
            NamespaceEntry {
                module: module.to_string(),
                api,
            },
        );
    }

    pub(crate) fn arm_teardown(&self) -> bool {
        self.shared
            .teardown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Register the announced-mutation apply listener once per entity.
    ///
    /// The listener writes the announced payload into storage during the
    /// `on` phase, after `before` handlers have had their chance to veto.
    fn ensure_options_listener(&self) {
        if self
            .shared
            .options_listener
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let store = Arc::clone(&self.shared.store);
        let handler: Handler = Arc::new(move |view: EventView| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                apply_option_payload(&store, view.payload.as_ref());
                Ok(Flow::CONTINUE)
            })
        });

        if let Err(err) =
            self.shared
                .bus
                .on("options:value:*", Phase::On, 0, "options apply", handler)
        {
            warn!(brick = %self.id(), error = %err, "could not register options apply listener");
        }
    }
}

impl fmt::Debug for Brick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brick")
            .field("id", &self.shared.id)
            .field("classification", &self.shared.classification)
            .field("status", &*self.shared.status.read())
            .field("modules", &self.installed())
            .finish()
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(value)) if !value.is_empty() => Some(value),
        Some(other) => {
            // Non-string identity fields are ignored, not coerced.
            if !other.is_null() {
                warn!(key = %key, "ignoring non-string identity field");
            }
            None
        }
        None => None,
    }
}

fn apply_option_payload(store: &OptionStore, payload: &Value) {
    let is_batch = payload
        .get("batch")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_batch {
        if let Some(values) = payload.get("values").and_then(Value::as_object) {
            store.set_silent_batch(values);
        }
        return;
    }
    if let (Some(key), Some(value)) = (
        payload.get("key").and_then(Value::as_str),
        payload.get("value"),
    ) {
        store.set_silent(key, value.clone());
    }
}

// ----------------------------------------------------------------------
// Accessors
// ----------------------------------------------------------------------

/// `brick.status()` accessor.
pub struct StatusHandle {
    brick: Brick,
}

impl StatusHandle {
    pub fn get(&self) -> Status {
        *self.brick.shared.status.read()
    }

    pub fn is(&self, status: Status) -> bool {
        self.get() == status
    }

    /// Transition the status and announce it.
    ///
    /// Every transition fires `<kind>:status:<value>` and the generic
    /// `<kind>:status:change`, both awaited. `Destroyed` is terminal;
    /// transitions from it (including repeated destroys) are no-ops. Once
    /// both destroy announcements have resolved, every bus subscription is
    /// dropped so handler closures stop holding the entity.
    pub async fn set(&self, next: Status) {
        let previous = {
            let mut status = self.brick.shared.status.write();
            if *status == Status::Destroyed || *status == next {
                return;
            }
            let previous = *status;
            *status = next;
            previous
        };

        let kind = self.brick.classification().kind.clone();
        let payload = json!({
            "status": next.as_str(),
            "previous": previous.as_str(),
        });
        let bus = self.brick.bus();
        bus.fire_awaited(&format!("{kind}:status:{next}"), payload.clone())
            .await;
        bus.fire_awaited(&format!("{kind}:status:change"), payload)
            .await;
        if next == Status::Destroyed {
            bus.clear();
        }
    }
}

/// `brick.options()` accessor.
///
/// `set` / `set_async` / `set_batch` announce the change through the brick's
/// bus before it becomes visible to `get`; `set_silent` bypasses the bus.
pub struct OptionsHandle {
    brick: Brick,
}

impl OptionsHandle {
    pub fn get(&self, path: &str, fallback: Value) -> Value {
        self.brick.shared.store.get(path, fallback)
    }

    pub fn get_opt(&self, path: &str) -> Option<Value> {
        self.brick.shared.store.get_opt(path)
    }

    pub fn has(&self, path: &str) -> bool {
        self.brick.shared.store.has(path)
    }

    pub fn all(&self) -> Value {
        self.brick.shared.store.all()
    }

    pub fn set_silent(&self, path: &str, value: Value) {
        self.brick.shared.store.set_silent(path, value);
    }

    /// Announced mutation; awaits the full fire-and-collect cycle.
    pub async fn set(&self, path: &str, value: Value) {
        self.set_async(path, value).await;
    }

    /// Announced mutation returning the resolved event, so callers can
    /// inspect cancellation (a vetoed change is not applied) and errors.
    pub async fn set_async(&self, path: &str, value: Value) -> EventOutcome {
        self.brick.ensure_options_listener();
        let previous = self.brick.shared.store.get_opt(path);
        let payload = json!({
            "key": path,
            "value": value,
            "previous": previous,
        });
        self.brick
            .bus()
            .fire_awaited(&format!("options:value:{path}"), payload)
            .await
    }

    /// Announced batch mutation; one combined change event for all paths.
    pub async fn set_batch(&self, values: Map<String, Value>) -> EventOutcome {
        self.brick.ensure_options_listener();
        let mut previous = Map::new();
        for path in values.keys() {
            previous.insert(
                path.clone(),
                self.brick
                    .shared
                    .store
                    .get_opt(path)
                    .unwrap_or(Value::Null),
            );
        }
        let payload = json!({
            "batch": true,
            "values": values,
            "previous": previous,
        });
        self.brick
            .bus()
            .fire_awaited("options:value:batch", payload)
            .await
    }
}

/// `brick.events()` accessor.
pub struct EventsHandle {
    brick: Brick,
}

impl EventsHandle {
    /// Subscribe a handler. The pattern may use `*` on any segment.
    pub fn on<F, Fut>(
        &self,
        pattern: &str,
        phase: Phase,
        priority: u8,
        handler: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(EventView) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Flow>> + Send + 'static,
    {
        let scope = format!("listener for `{pattern}`");
        let handler: Handler = Arc::new(move |view| Box::pin(handler(view)));
        Ok(self
            .brick
            .bus()
            .on(pattern, phase, priority, scope, handler)?)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.brick.bus().off(id)
    }

    /// Fire-and-forget dispatch.
    pub fn fire(&self, name: &str, payload: Value) {
        self.brick.bus().fire(name, payload);
    }

    /// Awaited dispatch: returns the fully-resolved event.
    pub async fn fire_awaited(&self, name: &str, payload: Value) -> EventOutcome {
        self.brick.bus().fire_awaited(name, payload).await
    }
}

/// Public methods of one installed module, exposed under its namespace.
pub struct NamespaceHandle {
    brick: Brick,
    namespace: String,
    module: String,
    api: Arc<HashMap<String, MethodFn>>,
}

impl NamespaceHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Names of the callable methods.
    pub fn methods(&self) -> Vec<String> {
        self.api.keys().cloned().collect()
    }

    /// Invoke a public method through the execution wrapper.
    ///
    /// The method receives the calling entity's installed-instance context,
    /// looked up by module name at call time.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let func = self
            .api
            .get(method)
            .ok_or_else(|| Error::UnknownMethod {
                namespace: self.namespace.clone(),
                method: method.to_string(),
            })?
            .clone();
        let instance = self
            .brick
            .module_instance(&self.module)
            .ok_or_else(|| Error::NotInstalled(self.module.clone()))?;
        let ctx: ModuleCtx = instance.ctx(&self.brick);
        let site = self
            .brick
            .call_site(format!("method `{}.{method}`", self.namespace));
        Ok(exec::execute(func(ctx, args), &site).await?)
    }
}
