use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::{MemoryFuture, MemoryPage, MemorySubsystem, MemoryTelemetry};

#[derive(Debug, Default)]
struct StoreState {
    pages: Vec<MemoryPage>,
    telemetry: MemoryTelemetry,
}

/// Bounded in-process page store.
///
/// Recall returns the most recently archived page for a key and refreshes
/// its `last_accessed`. When full, the least important older page is
/// evicted (oldest access first among equals); the page being archived
/// always stays. Nothing survives the process.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    capacity: usize,
}

impl InMemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(StoreState {
                pages: Vec::new(),
                telemetry: MemoryTelemetry {
                    capacity,
                    ..MemoryTelemetry::default()
                },
            }),
            capacity,
        }
    }

    /// Pages currently stored for `key`, oldest first.
    pub fn pages_for(&self, key: &str) -> Vec<MemoryPage> {
        self.lock()
            .pages
            .iter()
            .filter(|p| p.key == key)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recall_sync(&self, key: &str) -> Option<MemoryPage> {
        let mut state = self.lock();
        state.telemetry.recalls += 1;
        let page = state.pages.iter_mut().rev().find(|p| p.key == key)?;
        page.last_accessed = Utc::now();
        let page = page.clone();
        state.telemetry.hits += 1;
        Some(page)
    }

    fn archive_sync(&self, page: MemoryPage) {
        let mut state = self.lock();
        state.pages.push(page);
        state.telemetry.archived += 1;

        // The page just archived is never its own victim.
        while state.pages.len() > self.capacity {
            let newest = state.pages.len() - 1;
            let Some(victim) = state.pages[..newest]
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.importance
                        .cmp(&b.importance)
                        .then(a.last_accessed.cmp(&b.last_accessed))
                })
                .map(|(idx, _)| idx)
            else {
                break;
            };
            let evicted = state.pages.remove(victim);
            state.telemetry.evicted += 1;
            tracing::debug!(page = %evicted.id, importance = evicted.importance, "evicted memory page");
        }
    }
}

impl MemorySubsystem for InMemoryStore {
    fn recall<'a>(&'a self, key: &'a str) -> MemoryFuture<'a, Option<MemoryPage>> {
        let page = self.recall_sync(key);
        Box::pin(async move { Ok(page) })
    }

    fn manage_memory(&self, page: MemoryPage) -> MemoryFuture<'_, ()> {
        self.archive_sync(page);
        Box::pin(async { Ok(()) })
    }

    fn telemetry(&self) -> MemoryTelemetry {
        let state = self.lock();
        MemoryTelemetry {
            pages: state.pages.len(),
            ..state.telemetry.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(key: &str, content: &str, importance: u8) -> MemoryPage {
        MemoryPage::new(key, content, importance, Vec::new())
    }

    #[tokio::test]
    async fn test_recall_miss_then_hit_latest() {
        let store = InMemoryStore::new(8);
        assert_eq!(store.recall("a").await.unwrap(), None);

        store.manage_memory(page("a", "first", 10)).await.unwrap();
        store.manage_memory(page("a", "second", 10)).await.unwrap();
        store.manage_memory(page("b", "other", 10)).await.unwrap();

        let recalled = store.recall("a").await.unwrap().unwrap();
        assert_eq!(recalled.content, "second");

        let telemetry = store.telemetry();
        assert_eq!(telemetry.recalls, 2);
        assert_eq!(telemetry.hits, 1);
        assert_eq!(telemetry.pages, 3);
    }

    #[tokio::test]
    async fn test_evicts_least_important_when_full() {
        let store = InMemoryStore::new(2);
        store.manage_memory(page("a", "keep", 90)).await.unwrap();
        store.manage_memory(page("a", "drop", 5)).await.unwrap();
        store.manage_memory(page("a", "new", 50)).await.unwrap();

        let contents: Vec<_> = store.pages_for("a").into_iter().map(|p| p.content).collect();
        assert_eq!(contents, vec!["keep", "new"]);
        assert_eq!(store.telemetry().evicted, 1);
    }

    #[tokio::test]
    async fn test_new_low_importance_page_survives_eviction() {
        let store = InMemoryStore::new(2);
        store.manage_memory(page("a", "long analysis", 90)).await.unwrap();
        store.manage_memory(page("a", "older summary", 80)).await.unwrap();
        store.manage_memory(page("a", "ok", 1)).await.unwrap();

        let contents: Vec<_> = store.pages_for("a").into_iter().map(|p| p.content).collect();
        assert_eq!(contents, vec!["long analysis", "ok"]);
        assert_eq!(store.recall("a").await.unwrap().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_capacity_one_keeps_latest_page() {
        let store = InMemoryStore::new(1);
        store.manage_memory(page("a", "first", 100)).await.unwrap();
        store.manage_memory(page("a", "second", 0)).await.unwrap();

        assert_eq!(store.recall("a").await.unwrap().unwrap().content, "second");
        assert_eq!(store.telemetry().pages, 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let store = InMemoryStore::new(0);
        assert_eq!(store.telemetry().capacity, 1);
    }
}
