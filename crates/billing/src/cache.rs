//! In-process subscription status cache
//!
//! Read-repair only: entries are filled on cache-miss reads and dropped on
//! explicit invalidation or TTL expiry. A webhook-driven change on another
//! instance becomes visible here on the next expiring read; that staleness
//! window (up to the TTL) is the accepted trade against a push channel.
//!
//! The cache is an explicitly constructed instance handed to the components
//! that need it, so tests get a fresh cache per case and there is no
//! process-global state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::subscriptions::SubscriptionStatusView;

struct CacheEntry {
    view: SubscriptionStatusView,
    cached_at: Instant,
}

/// Time-bounded map of user id to last-known subscription status.
pub struct StatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached view if present and younger than the TTL.
    /// An expired entry is removed on the way out.
    pub async fn get(&self, user_id: Uuid) -> Option<SubscriptionStatusView> {
        {
            let entries = self.entries.read().await;
            match entries.get(&user_id) {
                Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                    return Some(entry.view.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but is stale; drop it.
        self.entries.write().await.remove(&user_id);
        None
    }

    /// Cache-fronted read: return the fresh entry, or run `loader` and
    /// cache its result. Two calls within the TTL run the loader once.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        user_id: Uuid,
        loader: F,
    ) -> Result<SubscriptionStatusView, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<SubscriptionStatusView, E>>,
    {
        if let Some(view) = self.get(user_id).await {
            return Ok(view);
        }

        let view = loader().await?;
        self.insert(user_id, view.clone()).await;
        Ok(view)
    }

    pub async fn insert(&self, user_id: Uuid, view: SubscriptionStatusView) {
        self.entries.write().await.insert(
            user_id,
            CacheEntry {
                view,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop one user's entry. Called after any write this process performs
    /// (webhook transition, sweeper pass, post-checkout refresh).
    pub async fn invalidate(&self, user_id: Uuid) {
        self.entries.write().await.remove(&user_id);
    }

    /// Drop everything. Called on login so one user's cached view can never
    /// leak into another session on the same client.
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }

    /// Remove entries older than the TTL to bound memory. Invoked on a
    /// fixed interval by a background task owned by the API binary.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - entries.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn view(active: bool) -> SubscriptionStatusView {
        SubscriptionStatusView {
            has_active_subscription: active,
            subscription_type: active.then(|| "yearly".to_string()),
            expires_at: None,
            stripe_subscription_id: None,
        }
    }

    #[tokio::test]
    async fn fresh_entry_is_returned() {
        let cache = StatusCache::new(Duration::from_secs(60));
        let user = Uuid::new_v4();

        cache.insert(user, view(true)).await;
        let hit = cache.get(user).await.unwrap();
        assert!(hit.has_active_subscription);
    }

    #[tokio::test]
    async fn expired_entry_is_dropped() {
        let cache = StatusCache::new(Duration::from_millis(20));
        let user = Uuid::new_v4();

        cache.insert(user, view(true)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get(user).await.is_none());
        // The stale entry was removed, not just skipped.
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn invalidate_removes_single_user() {
        let cache = StatusCache::new(Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache.insert(a, view(true)).await;
        cache.insert(b, view(false)).await;
        cache.invalidate(a).await;

        assert!(cache.get(a).await.is_none());
        assert!(cache.get(b).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_all_clears_every_entry() {
        let cache = StatusCache::new(Duration::from_secs(60));
        for _ in 0..5 {
            cache.insert(Uuid::new_v4(), view(true)).await;
        }

        cache.invalidate_all().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn two_reads_within_ttl_load_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = StatusCache::new(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let loads = AtomicUsize::new(0);

        for _ in 0..2 {
            let result: Result<_, std::convert::Infallible> = cache
                .get_or_load(user, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    async { Ok(view(true)) }
                })
                .await;
            assert!(result.unwrap().has_active_subscription);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_all_forces_a_fresh_load() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = StatusCache::new(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let loads = AtomicUsize::new(0);

        let load = || async {
            Ok::<_, std::convert::Infallible>(view(false))
        };

        let _ = cache
            .get_or_load(user, || {
                loads.fetch_add(1, Ordering::SeqCst);
                load()
            })
            .await;
        cache.invalidate_all().await;
        let _ = cache
            .get_or_load(user, || {
                loads.fetch_add(1, Ordering::SeqCst);
                load()
            })
            .await;

        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sweep_only_removes_stale_entries() {
        let cache = StatusCache::new(Duration::from_millis(30));
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        cache.insert(old, view(true)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.insert(new, view(true)).await;

        let removed = cache.sweep_expired().await;
        assert_eq!(removed, 1);
        assert!(cache.get(new).await.is_some());
    }
}
