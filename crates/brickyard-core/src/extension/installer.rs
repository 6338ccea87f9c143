//! Per-entity module installation and teardown.
//!
//! `install_all` resolves the applicable modules for a brick, merges their
//! default configuration (the brick's caller-supplied options always win),
//! and installs each module strictly in dependency order. Installation is
//! idempotent per (entity, module) pair. A single teardown hook per entity,
//! subscribed at maximum priority on the reserved destroyed-status event,
//! runs every module's `destroy` callback and then clears the instance map.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::catalog::ExtensionCatalog;
use super::descriptor::{ExtensionDescriptor, LifecycleFn, MethodFn, ModuleCtx};
use crate::brick::Brick;
use crate::bus::Handler;
use crate::event::{Flow, Phase};
use crate::exec;
use crate::options::{deep_merge, expand_paths};

/// One installed module on one entity. Created at most once per
/// (entity, module) pair; the whole map is cleared at teardown.
#[derive(Clone)]
pub struct ModuleInstance {
    pub name: String,
    pub namespace: String,
    /// Per-entity scratch state, shared with every callback's [`ModuleCtx`].
    pub state: Arc<RwLock<Value>>,
    pub(crate) helpers: Arc<std::collections::HashMap<String, MethodFn>>,
    pub(crate) destroy: Option<LifecycleFn>,
}

impl ModuleInstance {
    pub(crate) fn ctx(&self, brick: &Brick) -> ModuleCtx {
        ModuleCtx::new(
            brick.clone(),
            self.name.clone(),
            self.namespace.clone(),
            Arc::clone(&self.helpers),
            Arc::clone(&self.state),
        )
    }
}

/// Resolve, configure, and install every applicable module on a brick.
pub(crate) async fn install_all(brick: &Brick, catalog: &ExtensionCatalog) {
    let list = catalog.resolve(brick.classification());
    catalog.bake(&list);

    // Configuration merge: module defaults in resolved order, the entity's
    // caller-supplied seed last so it always wins. Nested maps merge
    // key-wise; arrays and primitives replace wholesale.
    let mut merged = Value::Object(Map::new());
    for descriptor in list.iter() {
        deep_merge(&mut merged, &descriptor.defaults);
    }
    if let Value::Object(seed) = brick.seed() {
        deep_merge(&mut merged, &Value::Object(expand_paths(seed)));
    }
    if let Value::Object(object) = merged {
        brick.store().replace(object);
    }

    for descriptor in list.iter() {
        install(brick, descriptor, catalog).await;
    }
}

/// Install one module on one entity. No-op if already installed.
///
/// Failures are contained: a failing or declining `init` skips this module
/// only, and a malformed handler pattern skips that handler only.
pub(crate) async fn install(
    brick: &Brick,
    descriptor: &Arc<ExtensionDescriptor>,
    catalog: &ExtensionCatalog,
) {
    if brick.has_module(&descriptor.name) {
        return;
    }

    let baked = catalog.baked(&descriptor.name);
    let helpers = baked
        .as_ref()
        .map(|b| Arc::clone(&b.helpers))
        .unwrap_or_else(|| Arc::new(descriptor.helpers.clone()));
    let api = baked
        .as_ref()
        .map(|b| Arc::clone(&b.api))
        .unwrap_or_else(|| Arc::new(descriptor.methods.clone()));
    let state = Arc::new(RwLock::new(Value::Null));

    let ctx = ModuleCtx::new(
        brick.clone(),
        descriptor.name.clone(),
        descriptor.namespace.clone(),
        Arc::clone(&helpers),
        Arc::clone(&state),
    );

    if let Some(init) = &descriptor.init {
        let site = brick.call_site(format!("extension `{}` init", descriptor.name));
        match exec::execute(init(ctx.clone()), &site).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(extension = %descriptor.name, brick = %brick.id(), "init declined installation");
                return;
            }
            Err(_) => {
                // Already reported by the execution wrapper.
                warn!(extension = %descriptor.name, brick = %brick.id(), "init failed; extension not installed");
                return;
            }
        }
    }

    brick.expose_namespace(&descriptor.namespace, &descriptor.name, Arc::clone(&api));

    for binding in &descriptor.bindings {
        let callbacks = [
            (Phase::Before, binding.before.clone()),
            (Phase::On, binding.on.clone()),
            (Phase::After, binding.after.clone()),
        ];
        for (phase, callback) in callbacks {
            let Some(callback) = callback else { continue };
            let scope = format!(
                "extension `{}` {} handler for `{}`",
                descriptor.name, phase, binding.pattern
            );
            let handler_ctx = ctx.clone();
            let handler: Handler = Arc::new(move |view| {
                let callback = Arc::clone(&callback);
                let ctx = handler_ctx.clone();
                Box::pin(async move { callback(ctx, view).await })
            });
            if let Err(err) = brick
                .bus()
                .on(&binding.pattern, phase, binding.priority, scope, handler)
            {
                warn!(
                    extension = %descriptor.name,
                    pattern = %binding.pattern,
                    error = %err,
                    "invalid handler pattern; handler skipped"
                );
            }
        }
    }

    brick.record_module(ModuleInstance {
        name: descriptor.name.clone(),
        namespace: descriptor.namespace.clone(),
        state,
        helpers,
        destroy: descriptor.destroy.clone(),
    });
}

/// Register the entity's teardown hook exactly once.
///
/// The hook listens at priority 0 on the reserved destroyed-status event,
/// runs module `destroy` callbacks in reverse install order (dependents
/// before their dependencies), then clears the instance map. Bus
/// subscriptions survive the hook so the generic status-change announcement
/// for the destroy transition still reaches its listeners; the status
/// machine clears them once that announcement completes.
pub(crate) fn ensure_teardown_hook(brick: &Brick) {
    if !brick.arm_teardown() {
        return;
    }

    let pattern = format!("{}:status:destroyed", brick.classification().kind);
    let hook_brick = brick.clone();
    let handler: Handler = Arc::new(move |_view| {
        let brick = hook_brick.clone();
        Box::pin(async move {
            let mut instances = brick.installed_modules();
            instances.reverse();
            for instance in instances {
                let Some(destroy) = instance.destroy.clone() else {
                    continue;
                };
                let site = brick.call_site(format!("extension `{}` destroy", instance.name));
                if exec::execute(destroy(instance.ctx(&brick)), &site)
                    .await
                    .is_err()
                {
                    warn!(
                        extension = %instance.name,
                        brick = %brick.id(),
                        "destroy callback failed; continuing teardown"
                    );
                }
            }
            brick.clear_modules();
            Ok(Flow::CONTINUE)
        })
    });

    if let Err(err) = brick
        .bus()
        .on(&pattern, Phase::On, 0, "entity teardown hook", handler)
    {
        warn!(brick = %brick.id(), error = %err, "could not register teardown hook");
    }
}
