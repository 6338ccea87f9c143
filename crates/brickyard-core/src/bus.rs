//! Phased, pattern-matched event bus.
//!
//! Each brick owns one bus. A fire walks the fixed phase list
//! `before -> on -> after`; within a phase, matching handlers run one at a
//! time in ascending priority order, each awaited through the execution
//! wrapper. A failing handler appends one error record and forces
//! cancellation of the current fire's `on` phase; `after` always runs so
//! cleanup handlers observe the final state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{EventError, EventName, EventNameError, EventOutcome, EventView, Flow, Phase};
use crate::exec::{self, CallSite};

/// Lowest-urgency handler priority. Priority 0 is highest.
pub const MAX_PRIORITY: u8 = 10;

/// Default priority for subscriptions that do not care about ordering.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Boxed future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Flow>>;

/// A subscribed callback. Receives a per-invocation snapshot of the fire and
/// returns the control-flow directive to fold into it.
pub type Handler = Arc<dyn Fn(EventView) -> HandlerFuture + Send + Sync>;

/// Opaque removal handle returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    pattern: crate::event::Pattern,
    phase: Phase,
    priority: u8,
    seq: u64,
    scope: String,
    handler: Handler,
}

struct BusInner {
    /// Kept sorted by (priority, insertion seq) after every insertion.
    registrations: RwLock<Vec<Registration>>,
    /// Per-name handler resolution cache; cleared wholesale on any
    /// subscribe/unsubscribe.
    resolution: RwLock<HashMap<String, Arc<Vec<Registration>>>>,
    next_seq: AtomicU64,
    /// Owning entity, used to label error reports.
    owner: Option<(String, String)>,
}

/// Per-entity event bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A bus labelled with its owning entity's id and classification, so
    /// execution errors carry the entity context.
    pub fn for_owner(id: impl Into<String>, classification: impl Into<String>) -> Self {
        Self::build(Some((id.into(), classification.into())))
    }

    fn build(owner: Option<(String, String)>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: RwLock::new(Vec::new()),
                resolution: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                owner,
            }),
        }
    }

    /// Subscribe a handler to a pattern and phase.
    ///
    /// Priorities are clamped to `0..=10`; ties keep insertion order.
    pub fn on(
        &self,
        pattern: &str,
        phase: Phase,
        priority: u8,
        scope: impl Into<String>,
        handler: Handler,
    ) -> Result<SubscriptionId, EventNameError> {
        let pattern = crate::event::Pattern::compile(pattern)?;
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            id: SubscriptionId(seq),
            pattern,
            phase,
            priority: priority.min(MAX_PRIORITY),
            seq,
            scope: scope.into(),
            handler,
        };

        {
            let mut registrations = self.inner.registrations.write();
            registrations.push(registration);
            registrations.sort_by_key(|r| (r.priority, r.seq));
        }
        self.inner.resolution.write().clear();
        Ok(SubscriptionId(seq))
    }

    /// Remove a subscription. Returns whether anything was removed; remaining
    /// registrations keep their order.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut registrations = self.inner.registrations.write();
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            registrations.len() != before
        };
        if removed {
            self.inner.resolution.write().clear();
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.registrations.read().len()
    }

    /// Drop every subscription and the resolution cache.
    ///
    /// Used at entity teardown so handler closures holding the entity do not
    /// keep it alive through the bus.
    pub fn clear(&self) {
        self.inner.registrations.write().clear();
        self.inner.resolution.write().clear();
    }

    /// Fire-and-forget dispatch. The fire runs to completion on a spawned
    /// task; the caller does not observe its outcome. Must be called from
    /// within a Tokio runtime.
    pub fn fire(&self, name: &str, payload: Value) {
        let bus = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let outcome = bus.run(&name, payload).await;
            if !outcome.errors.is_empty() {
                debug!(event = %outcome.name, errors = outcome.errors.len(), "detached fire finished with errors");
            }
        });
    }

    /// Awaited dispatch: runs the full phase pipeline and returns the
    /// resolved outcome, including error records and the cancellation flag.
    pub async fn fire_awaited(&self, name: &str, payload: Value) -> EventOutcome {
        self.run(name, payload).await
    }

    async fn run(&self, raw: &str, payload: Value) -> EventOutcome {
        let name = match EventName::parse(raw) {
            Ok(name) => name,
            Err(err) => {
                // Protocol error: fail fast before any handler runs.
                warn!(event = %raw, error = %err, "rejected event with invalid name");
                return EventOutcome {
                    name: raw.to_string(),
                    payload,
                    cancelled: true,
                    errors: vec![EventError {
                        phase: Phase::Before,
                        scope: "dispatch".to_string(),
                        message: err.to_string(),
                    }],
                };
            }
        };

        let matched = self.resolve(&name);
        let payload = Arc::new(payload);
        let mut errors: Vec<EventError> = Vec::new();
        let mut cancelled = false;

        for phase in Phase::ALL {
            // Cancellation suppresses the main phase only; `before` already
            // ran and `after` must run for cleanup.
            if phase == Phase::On && cancelled {
                continue;
            }
            let mut stop_phase = false;
            for registration in matched.iter().filter(|r| r.phase == phase) {
                if stop_phase {
                    break;
                }
                let view = EventView {
                    name: name.clone(),
                    phase,
                    payload: Arc::clone(&payload),
                    cancelled,
                    errors: errors.clone(),
                };
                let site = self.call_site(&registration.scope);
                match exec::execute((registration.handler)(view), &site).await {
                    Ok(flow) => {
                        cancelled |= flow.cancel;
                        stop_phase |= flow.stop_phase;
                    }
                    Err(err) => {
                        errors.push(EventError {
                            phase,
                            scope: registration.scope.clone(),
                            message: err.message,
                        });
                        cancelled = true;
                    }
                }
            }
        }

        EventOutcome {
            name: name.key(),
            payload: Arc::try_unwrap(payload).unwrap_or_else(|shared| (*shared).clone()),
            cancelled,
            errors,
        }
    }

    fn resolve(&self, name: &EventName) -> Arc<Vec<Registration>> {
        let key = name.key();
        if let Some(hit) = self.inner.resolution.read().get(&key) {
            return Arc::clone(hit);
        }
        let matched: Arc<Vec<Registration>> = Arc::new(
            self.inner
                .registrations
                .read()
                .iter()
                .filter(|r| r.pattern.matches(name))
                .cloned()
                .collect(),
        );
        self.inner
            .resolution
            .write()
            .insert(key, Arc::clone(&matched));
        matched
    }

    fn call_site(&self, scope: &str) -> CallSite {
        match &self.inner.owner {
            Some((id, classification)) => {
                CallSite::new(scope).with_brick(id.clone(), classification.clone())
            }
            None => CallSite::new(scope),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
