#![forbid(unsafe_code)]

use lumen_store::{KeyedStore, ScopedName};

#[tokio::test]
async fn same_name_in_different_scopes_coexists() {
    let store: KeyedStore<ScopedName, String> = KeyedStore::new();
    store.put_with(ScopedName::new("repo-a", "tok"), |_| "a".to_string()).await;
    store.put_with(ScopedName::new("repo-b", "tok"), |_| "b".to_string()).await;

    assert_eq!(store.len().await, 2);
    assert_eq!(store.get(&ScopedName::new("repo-a", "tok")).await.as_deref(), Some("a"));
    assert_eq!(store.get(&ScopedName::new("repo-b", "tok")).await.as_deref(), Some("b"));
    assert_eq!(
        store.keys().await,
        vec![ScopedName::new("repo-a", "tok"), ScopedName::new("repo-b", "tok")]
    );
}

#[tokio::test]
async fn put_sees_previous_value() {
    let store: KeyedStore<ScopedName, (String, u32)> = KeyedStore::new();
    let key = ScopedName::global("repo");
    store.put_with(key.clone(), |_| ("id-1".to_string(), 1)).await;
    let next = store
        .put_with(key.clone(), |prev| (prev.map(|p| p.0.clone()).unwrap_or_default(), 2))
        .await;
    assert_eq!(next, ("id-1".to_string(), 2));
}

#[tokio::test]
async fn failed_put_writes_nothing() {
    let store: KeyedStore<ScopedName, u32> = KeyedStore::new();
    let key = ScopedName::global("x");
    store.put_with(key.clone(), |_| 7).await;
    let res: Result<u32, &str> = store.try_put(key.clone(), |_| Err("nope")).await;
    assert!(res.is_err());
    assert_eq!(store.get(&key).await, Some(7));
}

#[tokio::test]
async fn remove_is_idempotent() {
    let store: KeyedStore<ScopedName, u32> = KeyedStore::new();
    let key = ScopedName::global("x");
    store.put_with(key.clone(), |_| 1).await;
    assert_eq!(store.remove(&key).await, Some(1));
    assert_eq!(store.remove(&key).await, None);
    assert!(store.is_empty().await);
}

#[test]
fn scoped_name_display() {
    assert_eq!(ScopedName::new("view", "alert").to_string(), "view/alert");
    assert_eq!(ScopedName::global("repo").to_string(), "repo");
}
