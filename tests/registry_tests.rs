//! Single-instance guard properties of the process registry.

use std::sync::Arc;

use chrono::{Duration, Utc};

use sprinklerd::registry::{Registry, RegistryEntry};

fn entry(pid: u32) -> RegistryEntry {
    RegistryEntry {
        pid,
        zone: "front".to_string(),
        end: Utc::now() + Duration::seconds(60),
    }
}

#[tokio::test]
async fn concurrent_creates_have_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new(dir.path()));

    let mut handles = Vec::new();
    for pid in 0..32u32 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.create_if_absent("z1", &entry(pid)).await.is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one create_if_absent must win");
    assert!(registry.read("z1").await.unwrap().is_some());
    assert_eq!(registry.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn guard_holds_until_entry_removed() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(dir.path());

    registry.create_if_absent("z1", &entry(1)).await.unwrap();
    assert!(registry.create_if_absent("z1", &entry(2)).await.is_err());

    // Entry still belongs to the first winner.
    assert_eq!(registry.read("z1").await.unwrap().unwrap().pid, 1);

    // Once released, the id is free again.
    registry.remove("z1").await.unwrap();
    registry.create_if_absent("z1", &entry(2)).await.unwrap();
    assert_eq!(registry.read("z1").await.unwrap().unwrap().pid, 2);
}

#[tokio::test]
async fn independent_ids_do_not_contend() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(dir.path());

    registry.create_if_absent("z1", &entry(1)).await.unwrap();
    registry.create_if_absent("z2", &entry(2)).await.unwrap();

    let mut ids: Vec<String> = registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["z1", "z2"]);
}
