use std::sync::Arc;

use tasklane_core::commands::TaskCommands;
use tasklane_core::error::StoreError;
use tasklane_core::gateway::LocalGateway;
use tasklane_core::render::Renderer;
use tasklane_core::storage::{FileStorage, KeyValueStore, TODOS_KEY};
use tasklane_core::store::TaskStore;
use tasklane_core::theme::Theme;
use tasklane_core::view::{StatusFilter, ViewSettings};
use tempfile::tempdir;

fn open_store(storage: Arc<dyn KeyValueStore>) -> Arc<TaskStore> {
    Arc::new(TaskStore::new(
        Arc::new(LocalGateway::new(storage)),
        ViewSettings::default(),
    ))
}

#[tokio::test]
async fn tasks_survive_a_reopen_of_the_data_dir() {
    let temp = tempdir().expect("tempdir");
    let storage: Arc<dyn KeyValueStore> =
        Arc::new(FileStorage::open(temp.path()).expect("open storage"));

    let commands = TaskCommands::new(open_store(storage.clone()));
    commands.load().await.expect("initial load");
    assert!(commands.store().tasks().is_empty());

    let milk = commands.add("  buy milk ").await.expect("add milk");
    let walk = commands.add("walk").await.expect("add walk");
    assert_eq!(milk.text, "buy milk");
    assert_ne!(milk.id, walk.id);

    let toggled = commands
        .toggle(milk.id)
        .await
        .expect("toggle")
        .expect("task exists");
    assert!(toggled.completed);

    let err = commands.add("   ").await.expect_err("blank text");
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(commands.store().tasks().len(), 2);

    let reopened_storage: Arc<dyn KeyValueStore> =
        Arc::new(FileStorage::open(temp.path()).expect("reopen storage"));
    let reopened = open_store(reopened_storage);
    reopened.fetch().await.expect("fetch after reopen");
    assert_eq!(reopened.tasks().len(), 2);

    reopened.set_filter(StatusFilter::Completed);
    let view = reopened.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id, milk.id);
    assert_eq!(reopened.totals().total_items, 1);

    let mut out = Vec::new();
    Renderer::plain(Theme::Light)
        .write_task_table(&mut out, &view, &reopened.snapshot())
        .expect("render");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("buy milk"));
    assert!(text.contains("page 1/1 (1 tasks, completed, newest)"));
}

#[tokio::test]
async fn delete_rewrites_the_stored_array() {
    let temp = tempdir().expect("tempdir");
    let storage: Arc<dyn KeyValueStore> =
        Arc::new(FileStorage::open(temp.path()).expect("open storage"));

    let commands = TaskCommands::new(open_store(storage.clone()));
    commands.load().await.expect("load");
    let doomed = commands.add("doomed").await.expect("add");
    let kept = commands.add("kept").await.expect("add");

    assert!(commands.delete(doomed.id).await.expect("delete"));
    assert!(!commands.delete(doomed.id).await.expect("second delete is a no-op"));

    let raw = storage
        .get_item(TODOS_KEY)
        .expect("read")
        .expect("todos stored");
    let stored: Vec<serde_json::Value> = serde_json::from_str(&raw).expect("json array");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["id"], serde_json::json!(kept.id));
    assert_eq!(stored[0]["text"], "kept");
}

#[tokio::test]
async fn corrupt_storage_starts_empty_and_recovers() {
    let temp = tempdir().expect("tempdir");
    let storage: Arc<dyn KeyValueStore> =
        Arc::new(FileStorage::open(temp.path()).expect("open storage"));
    storage
        .set_item(TODOS_KEY, "{not json")
        .expect("seed garbage");

    let commands = TaskCommands::new(open_store(storage.clone()));
    commands.load().await.expect("corrupt data is not an error");
    assert!(commands.store().tasks().is_empty());

    commands.add("fresh start").await.expect("add");
    let raw = storage.get_item(TODOS_KEY).expect("read").expect("stored");
    assert!(raw.contains("fresh start"));
}
