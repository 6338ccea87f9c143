//! Integration tests for announced option mutation through the brick's bus.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use brickyard_core::extension::{ExtensionCatalog, ExtensionDescriptor};
use brickyard_core::{Brick, Flow, Phase};

async fn bare_brick() -> Brick {
    let catalog = ExtensionCatalog::new();
    Brick::construct(&catalog, json!({})).await.unwrap()
}

#[tokio::test]
async fn test_announced_set_is_visible_after_await() {
    let brick = bare_brick().await;

    let outcome = brick.options().set_async("grid.rows", json!(4)).await;
    assert!(outcome.ok());
    assert_eq!(brick.options().get("grid.rows", json!(null)), json!(4));
}

#[tokio::test]
async fn test_sibling_paths_are_preserved() {
    let brick = bare_brick().await;

    brick.options().set("a.b", json!(1)).await;
    brick.options().set("a.c", json!(2)).await;

    assert_eq!(
        brick.options().get("a", json!(null)),
        json!({ "b": 1, "c": 2 })
    );
}

#[tokio::test]
async fn test_set_silent_fires_no_event() {
    let brick = bare_brick().await;
    let fired = Arc::new(Mutex::new(0usize));
    let fired_in = Arc::clone(&fired);

    brick
        .events()
        .on("options:value:*", Phase::On, 5, move |_view| {
            let fired = Arc::clone(&fired_in);
            async move {
                *fired.lock() += 1;
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.options().set_silent("quiet", json!(true));
    assert_eq!(brick.options().get("quiet", json!(null)), json!(true));
    assert_eq!(*fired.lock(), 0);
}

#[tokio::test]
async fn test_announced_set_fires_exactly_once_with_payload() {
    let brick = bare_brick().await;
    brick.options().set_silent("volume", json!(3));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    brick
        .events()
        .on("options:value:volume", Phase::On, 5, move |view| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.lock().push((*view.payload).clone());
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.options().set("volume", json!(7)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["key"], json!("volume"));
    assert_eq!(seen[0]["value"], json!(7));
    assert_eq!(seen[0]["previous"], json!(3));
    assert_eq!(brick.options().get("volume", json!(null)), json!(7));
}

#[tokio::test]
async fn test_before_handler_veto_leaves_store_untouched() {
    let brick = bare_brick().await;
    brick.options().set_silent("locked", json!("original"));

    brick
        .events()
        .on("options:value:locked", Phase::Before, 5, |_view| async {
            Ok(Flow::CANCEL)
        })
        .unwrap();

    let outcome = brick.options().set_async("locked", json!("mutated")).await;
    assert!(outcome.cancelled);
    assert_eq!(
        brick.options().get("locked", json!(null)),
        json!("original")
    );
}

#[tokio::test]
async fn test_change_is_not_visible_during_before_phase() {
    let brick = bare_brick().await;
    brick.options().set_silent("staged", json!("old"));

    let observed = Arc::new(Mutex::new(Value::Null));
    let brick_in = brick.clone();
    let observed_in = Arc::clone(&observed);
    brick
        .events()
        .on("options:value:staged", Phase::Before, 5, move |_view| {
            let brick = brick_in.clone();
            let observed = Arc::clone(&observed_in);
            async move {
                *observed.lock() = brick.options().get("staged", json!(null));
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    brick.options().set("staged", json!("new")).await;
    assert_eq!(*observed.lock(), json!("old"));
    assert_eq!(brick.options().get("staged", json!(null)), json!("new"));
}

#[tokio::test]
async fn test_batch_set_applies_all_paths_in_one_event() {
    let brick = bare_brick().await;
    let fired = Arc::new(Mutex::new(0usize));
    let fired_in = Arc::clone(&fired);

    brick
        .events()
        .on("options:value:*", Phase::On, 5, move |_view| {
            let fired = Arc::clone(&fired_in);
            async move {
                *fired.lock() += 1;
                Ok(Flow::CONTINUE)
            }
        })
        .unwrap();

    let mut values = Map::new();
    values.insert("a.b".to_string(), json!(1));
    values.insert("a.c".to_string(), json!(2));
    let outcome = brick.options().set_batch(values).await;

    assert!(outcome.ok());
    assert_eq!(*fired.lock(), 1);
    assert_eq!(
        brick.options().get("a", json!(null)),
        json!({ "b": 1, "c": 2 })
    );
}

#[tokio::test]
async fn test_module_defaults_readable_through_options() {
    let catalog = ExtensionCatalog::new();
    catalog
        .register(
            ExtensionDescriptor::new("theme")
                .applicable_to("*", "*")
                .with_defaults(json!({ "theme": { "dark": true } })),
        )
        .unwrap();

    let brick = Brick::construct(&catalog, json!({})).await.unwrap();
    assert!(brick.options().has("theme.dark"));
    assert_eq!(brick.options().get("theme.dark", json!(null)), json!(true));
    assert_eq!(brick.options().get_opt("theme.missing"), None);
    assert_eq!(
        brick.options().get("theme.missing", json!("fallback")),
        json!("fallback")
    );
}
