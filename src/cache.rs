//! Time-limited reuse of opened database handles.
//!
//! Every chat turn resolves the form into a [`DatabaseTarget`]; as long as the
//! same target was opened less than `ttl` ago the existing handle is returned
//! instead of opening a fresh pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::database::{Connector, DatabaseError, SqlBackend};
use crate::form::DatabaseTarget;

struct CachedHandle {
    handle: Arc<dyn SqlBackend>,
    opened_at: Instant,
}

/// Filled once the connect for its target succeeds.
type Slot = Arc<OnceCell<CachedHandle>>;

pub struct DatabaseCache {
    connector: Arc<dyn Connector>,
    ttl: Duration,
    entries: Mutex<HashMap<DatabaseTarget, Slot>>,
}

impl DatabaseCache {
    pub fn new(connector: Arc<dyn Connector>, ttl: Duration) -> Self {
        Self {
            connector,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The map lock is only held to find the slot; connecting happens on the
    /// slot, so a slow server only holds up callers asking for that target.
    pub async fn get_or_connect(
        &self,
        target: &DatabaseTarget,
    ) -> Result<Arc<dyn SqlBackend>, DatabaseError> {
        let slot = {
            let mut entries = self.entries.lock().await;
            let ttl = self.ttl;
            entries.retain(|_, slot| {
                slot.get()
                    .map_or(true, |cached| cached.opened_at.elapsed() < ttl)
            });
            entries.entry(target.clone()).or_default().clone()
        };

        if let Some(cached) = slot.get() {
            debug!(target = ?target, "Reusing cached database handle");
            return Ok(cached.handle.clone());
        }

        let cached = slot
            .get_or_try_init(|| async {
                let handle = self.connector.connect(target).await?;
                info!(target = ?target, "Opened database handle");
                Ok::<_, DatabaseError>(CachedHandle {
                    handle,
                    opened_at: Instant::now(),
                })
            })
            .await?;
        Ok(cached.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TableSchema;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct NullBackend;

    #[async_trait]
    impl SqlBackend for NullBackend {
        fn dialect(&self) -> &'static str {
            "sqlite"
        }
        async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn table_info(&self, _tables: &[String]) -> Result<String, DatabaseError> {
            Ok(String::new())
        }
        async fn run(&self, _sql: &str) -> Result<String, DatabaseError> {
            Ok(String::new())
        }
        async fn schema(&self) -> Result<Vec<TableSchema>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            _target: &DatabaseTarget,
        ) -> Result<Arc<dyn SqlBackend>, DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullBackend))
        }
    }

    fn target(name: &str) -> DatabaseTarget {
        DatabaseTarget::Sqlite {
            path: PathBuf::from(name),
        }
    }

    #[tokio::test]
    async fn test_same_target_reuses_handle_within_ttl() {
        let connector = Arc::new(CountingConnector::default());
        let cache = DatabaseCache::new(connector.clone(), Duration::from_secs(60));

        let first = cache.get_or_connect(&target("a.db")).await.unwrap();
        let second = cache.get_or_connect(&target("a.db")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);

        let other = cache.get_or_connect(&target("b.db")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_reconnect() {
        let connector = Arc::new(CountingConnector::default());
        let cache = DatabaseCache::new(connector.clone(), Duration::ZERO);

        cache.get_or_connect(&target("a.db")).await.unwrap();
        cache.get_or_connect(&target("a.db")).await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    /// Blocks on `release` when asked for `slow.db`.
    #[derive(Default)]
    struct GatedConnector {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(
            &self,
            target: &DatabaseTarget,
        ) -> Result<Arc<dyn SqlBackend>, DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if matches!(target, DatabaseTarget::Sqlite { path } if path.ends_with("slow.db")) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(Arc::new(NullBackend))
        }
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_targets() {
        let connector = Arc::new(GatedConnector::default());
        let cache = Arc::new(DatabaseCache::new(connector.clone(), Duration::from_secs(60)));

        let slow = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_connect(&target("slow.db")).await.map(|_| ()) }
        });
        connector.entered.notified().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            cache.get_or_connect(&target("fast.db")),
        )
        .await;
        assert!(fast.is_ok(), "fast target waited on the slow connect");
        assert!(fast.unwrap().is_ok());

        connector.release.notify_one();
        slow.await.unwrap().unwrap();
        cache.get_or_connect(&target("slow.db")).await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }
}
