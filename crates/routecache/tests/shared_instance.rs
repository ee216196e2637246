//! The process-wide manager. Kept in its own test binary so no other test
//! initializes the shared instance first.

use routecache::{
    CacheError, CacheManager, CacheObserver, CacheSettings, EntryOptions, KeyParts, ResetBy,
    RemoteStore, after_save_changes, entity_tag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Order;

#[derive(Default)]
struct CountingObserver {
    resets: AtomicUsize,
}

impl CacheObserver for CountingObserver {
    fn on_key_reset(&self, _key: &str) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_shared_manager_lifecycle() {
    // Saving before initialization is a no-op.
    assert!(CacheManager::shared().is_none());
    assert_eq!(after_save_changes([entity_tag::<Order>()]).await, 0);

    let mut settings = CacheSettings::new("orders");
    settings.store.enabled = false;

    let first = CacheManager::get_or_init(settings.clone(), None).await.unwrap();
    assert_eq!(first.store().backend_name(), "memory");

    // A later caller gets the same instance and may still install an observer.
    let observer = Arc::new(CountingObserver::default());
    let second = CacheManager::get_or_init(CacheSettings::new("ignored"), Some(observer.clone()))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.settings().service_name, "orders");

    let key = KeyParts::new("orders", "GET", "api/orders").build();
    second
        .get_or_add(&key, &ResetBy::new().entity::<Order>(), EntryOptions::default(), || async {
            Ok::<_, CacheError>(Some("[]".to_string()))
        })
        .await
        .unwrap();

    assert_eq!(after_save_changes([entity_tag::<Order>()]).await, 1);
    assert_eq!(observer.resets.load(Ordering::SeqCst), 1);
    assert!(first.index().is_empty());
}
