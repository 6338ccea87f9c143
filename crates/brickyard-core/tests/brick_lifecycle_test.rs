//! Integration tests for entity construction, status transitions, and teardown.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use brickyard_core::extension::{ExtensionCatalog, ExtensionDescriptor};
use brickyard_core::{Brick, Flow, Phase, Status};

type Log = Arc<Mutex<Vec<String>>>;

#[tokio::test]
async fn test_identity_fields_from_options() {
    brickyard_core::init_tracing();
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(
        &catalog,
        json!({ "id": "b-7", "host": "service", "kind": "relay" }),
    )
    .await
    .unwrap();

    assert_eq!(brick.id(), "b-7");
    assert_eq!(brick.classification().host, "service");
    assert_eq!(brick.classification().kind, "relay");
    // Identity fields never leak into the option store.
    assert!(!brick.options().has("id"));
    assert!(!brick.options().has("host"));
    assert!(!brick.options().has("kind"));
}

#[tokio::test]
async fn test_identity_defaults() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, serde_json::Value::Null)
        .await
        .unwrap();

    assert!(!brick.id().is_empty());
    assert_eq!(brick.classification().host, "widget");
    // Kind falls back to the host when unspecified.
    assert_eq!(brick.classification().kind, "widget");
}

#[tokio::test]
async fn test_kind_defaults_to_explicit_host() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({ "host": "service" }))
        .await
        .unwrap();
    assert_eq!(brick.classification().kind, "service");
}

#[tokio::test]
async fn test_non_object_options_are_rejected() {
    let catalog = ExtensionCatalog::new();
    assert!(Brick::construct(&catalog, json!([1, 2])).await.is_err());
    assert!(Brick::construct(&catalog, json!("nope")).await.is_err());
}

#[tokio::test]
async fn test_remaining_options_seed_the_store() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({ "grid.rows": 4, "title": "demo" }))
        .await
        .unwrap();

    assert_eq!(brick.options().get("grid.rows", json!(null)), json!(4));
    assert_eq!(brick.options().get("title", json!(null)), json!("demo"));
}

#[tokio::test]
async fn test_status_transition_fires_specific_and_generic_events() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({ "kind": "grid" }))
        .await
        .unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let log_specific = Arc::clone(&log);
    brick
        .events()
        .on("grid:status:created", Phase::On, 5, move |_view| {
            let log = Arc::clone(&log_specific);
            async move {
                log.lock().push("specific".to_string());
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();
    let log_generic = Arc::clone(&log);
    brick
        .events()
        .on("grid:status:change", Phase::On, 5, move |view| {
            let log = Arc::clone(&log_generic);
            async move {
                let payload = (*view.payload).clone();
                log.lock().push(format!(
                    "change {}->{}",
                    payload["previous"].as_str().unwrap_or("?"),
                    payload["status"].as_str().unwrap_or("?")
                ));
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.status().set(Status::Created).await;

    assert_eq!(brick.status().get(), Status::Created);
    assert_eq!(
        *log.lock(),
        vec!["specific".to_string(), "change ready->created".to_string()]
    );
}

#[tokio::test]
async fn test_status_change_fires_for_destroy_transition() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({ "kind": "grid" }))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    brick
        .events()
        .on("grid:status:change", Phase::On, 5, move |view| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.lock().push((*view.payload).clone());
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.destroy().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1, "destroy transition must announce status:change");
    assert_eq!(seen[0]["previous"], json!("ready"));
    assert_eq!(seen[0]["status"], json!("destroyed"));
}

#[tokio::test]
async fn test_destroyed_event_is_observable_by_prior_subscribers() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({ "kind": "grid" }))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(0usize));
    let seen_in = Arc::clone(&seen);
    brick
        .events()
        .on("grid:status:destroyed", Phase::On, 5, move |_view| {
            let seen = Arc::clone(&seen_in);
            async move {
                *seen.lock() += 1;
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.destroy().await;
    assert_eq!(*seen.lock(), 1);
    assert_eq!(brick.status().get(), Status::Destroyed);
}

#[tokio::test]
async fn test_destroy_runs_module_destroys_in_reverse_install_order() {
    let catalog = ExtensionCatalog::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let log_a = Arc::clone(&log);
    catalog
        .register(
            ExtensionDescriptor::new("a")
                .applicable_to("*", "*")
                .on_destroy(move |_ctx| {
                    let log = Arc::clone(&log_a);
                    async move {
                        log.lock().push("a".to_string());
                        Ok(true)
                    }
                }),
        )
        .unwrap();
    let log_b = Arc::clone(&log);
    catalog
        .register(
            ExtensionDescriptor::new("b")
                .applicable_to("*", "*")
                .requires("a")
                .on_destroy(move |_ctx| {
                    let log = Arc::clone(&log_b);
                    async move {
                        log.lock().push("b".to_string());
                        Ok(true)
                    }
                }),
        )
        .unwrap();

    let brick = Brick::construct(&catalog, json!({})).await.unwrap();
    assert_eq!(brick.installed(), vec!["a".to_string(), "b".to_string()]);

    brick.destroy().await;

    // Dependents tear down before their dependencies.
    assert_eq!(*log.lock(), vec!["b".to_string(), "a".to_string()]);
    assert!(brick.installed().is_empty());
    assert!(brick.namespace("a").is_none());
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let catalog = ExtensionCatalog::new();
    let destroyed = Arc::new(Mutex::new(0usize));
    let destroyed_in = Arc::clone(&destroyed);
    catalog
        .register(
            ExtensionDescriptor::new("once")
                .applicable_to("*", "*")
                .on_destroy(move |_ctx| {
                    let destroyed = Arc::clone(&destroyed_in);
                    async move {
                        *destroyed.lock() += 1;
                        Ok(true)
                    }
                }),
        )
        .unwrap();

    let brick = Brick::construct(&catalog, json!({})).await.unwrap();
    brick.destroy().await;
    brick.destroy().await;
    brick.destroy().await;

    assert_eq!(*destroyed.lock(), 1);
    assert_eq!(brick.status().get(), Status::Destroyed);
}

#[tokio::test]
async fn test_failing_destroy_does_not_halt_teardown() {
    let catalog = ExtensionCatalog::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let log_ok = Arc::clone(&log);
    catalog
        .register(
            ExtensionDescriptor::new("survivor")
                .applicable_to("*", "*")
                .on_destroy(move |_ctx| {
                    let log = Arc::clone(&log_ok);
                    async move {
                        log.lock().push("survivor".to_string());
                        Ok(true)
                    }
                }),
        )
        .unwrap();
    catalog
        .register(
            ExtensionDescriptor::new("faulty")
                .applicable_to("*", "*")
                .requires("survivor")
                .on_destroy(|_ctx| async { Err(anyhow::anyhow!("teardown failure")) }),
        )
        .unwrap();

    let brick = Brick::construct(&catalog, json!({})).await.unwrap();
    brick.destroy().await;

    // `faulty` tears down first (reverse order) and fails; `survivor` still runs.
    assert_eq!(*log.lock(), vec!["survivor".to_string()]);
    assert!(brick.installed().is_empty());
}

#[tokio::test]
async fn test_bus_is_cleared_after_teardown() {
    let catalog = ExtensionCatalog::new();
    let brick = Brick::construct(&catalog, json!({})).await.unwrap();

    let fired = Arc::new(Mutex::new(0usize));
    let fired_in = Arc::clone(&fired);
    brick
        .events()
        .on("widget:click:cell", Phase::On, 5, move |_view| {
            let fired = Arc::clone(&fired_in);
            async move {
                *fired.lock() += 1;
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.events().fire_awaited("widget:click:cell", json!({})).await;
    brick.destroy().await;
    brick.events().fire_awaited("widget:click:cell", json!({})).await;

    assert_eq!(*fired.lock(), 1);
}
