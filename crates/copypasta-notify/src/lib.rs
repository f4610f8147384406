//! In-memory per-user change notification.
//!
//! Holds the latest published clipboard version for each user and wakes
//! long-poll waiters when it advances. Everything here is process-local:
//! after a restart the map is empty and clients re-learn state by polling
//! with their last known version against the freshly re-read store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::trace;

/// Outcome of [`ChangeNotifier::wait_for_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The version advanced past the caller's known version.
    Advanced(i64),
    /// The deadline elapsed. Carries the latest known version, which may
    /// equal the caller's.
    Timeout(i64),
}

/// Cloneable fan-out hub: one level-triggered watch channel per user id.
///
/// The watch channel is what makes the check-then-sleep race safe: a
/// waiter subscribes first and re-reads the level afterwards, so a publish
/// landing in between marks the receiver and the next `changed()` returns
/// without sleeping. Waiters detach in O(1) when their receiver drops,
/// which is also the cancellation path for disconnected clients.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<RwLock<HashMap<i64, watch::Sender<i64>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record `version` as the latest for `user_id` and wake every waiter
    /// for that user. Never blocks on waiters. Publishes are monotonic;
    /// a stale version never overwrites a newer one.
    pub async fn publish(&self, user_id: i64, version: i64) {
        trace!("publish user={} version={}", user_id, version);
        {
            let map = self.inner.read().await;
            if let Some(tx) = map.get(&user_id) {
                advance(tx, version);
                return;
            }
        }
        let mut map = self.inner.write().await;
        let tx = map
            .entry(user_id)
            .or_insert_with(|| watch::channel(0).0);
        advance(tx, version);
    }

    /// Latest version published for `user_id` in this process lifetime.
    pub async fn latest(&self, user_id: i64) -> i64 {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|tx| *tx.borrow())
            .unwrap_or(0)
    }

    /// Wait until the version for `user_id` advances strictly past
    /// `known_version` or `deadline` passes. Returns immediately when the
    /// notifier already holds something newer. Dropping the future
    /// detaches the waiter.
    pub async fn wait_for_change(
        &self,
        user_id: i64,
        known_version: i64,
        deadline: Instant,
    ) -> WaitOutcome {
        let mut rx = self.subscribe(user_id).await;
        loop {
            let latest = *rx.borrow_and_update();
            if latest > known_version {
                return WaitOutcome::Advanced(latest);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone; cannot happen while the map owns it.
                        return WaitOutcome::Timeout(known_version.max(latest));
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return WaitOutcome::Timeout(known_version.max(*rx.borrow()));
                }
            }
        }
    }

    /// Get (or lazily create) the channel for a user and subscribe.
    /// Channels are retained for the process lifetime; the map is bounded
    /// by the number of users that touched the notifier since startup.
    async fn subscribe(&self, user_id: i64) -> watch::Receiver<i64> {
        if let Some(tx) = self.inner.read().await.get(&user_id) {
            return tx.subscribe();
        }
        let mut map = self.inner.write().await;
        map.entry(user_id)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(tx: &watch::Sender<i64>, version: i64) {
    tx.send_if_modified(|current| {
        if version > *current {
            *current = version;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn returns_immediately_when_already_advanced() {
        let notifier = ChangeNotifier::new();
        notifier.publish(1, 3).await;

        let start = std::time::Instant::now();
        let outcome = notifier.wait_for_change(1, 2, deadline_in(5_000)).await;
        assert_eq!(outcome, WaitOutcome::Advanced(3));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn times_out_when_nothing_changes() {
        let notifier = ChangeNotifier::new();
        let outcome = notifier.wait_for_change(1, 0, deadline_in(100)).await;
        assert_eq!(outcome, WaitOutcome::Timeout(0));
    }

    #[tokio::test]
    async fn timeout_reports_the_callers_version_when_newer() {
        // A client can know a version from the store that a freshly
        // restarted notifier has never seen; don't tell it to rewind.
        let notifier = ChangeNotifier::new();
        let outcome = notifier.wait_for_change(1, 7, deadline_in(100)).await;
        assert_eq!(outcome, WaitOutcome::Timeout(7));
    }

    #[tokio::test]
    async fn publish_wakes_all_waiters() {
        let notifier = ChangeNotifier::new();

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let n = notifier.clone();
            waiters.push(tokio::spawn(async move {
                n.wait_for_change(7, 0, deadline_in(5_000)).await
            }));
        }
        // Let the waiters register before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        notifier.publish(7, 1).await;

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), WaitOutcome::Advanced(1));
        }
    }

    #[tokio::test]
    async fn publish_for_other_user_does_not_wake() {
        let notifier = ChangeNotifier::new();

        let n = notifier.clone();
        let waiter =
            tokio::spawn(async move { n.wait_for_change(1, 0, deadline_in(200)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        notifier.publish(2, 1).await;

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Timeout(0));
    }

    #[tokio::test]
    async fn publish_before_sleep_is_not_lost() {
        // Publish concurrently with waiter registration; the waiter must
        // never sleep through it.
        let notifier = ChangeNotifier::new();
        for round in 1..=50 {
            let n = notifier.clone();
            let waiter = tokio::spawn(async move {
                n.wait_for_change(9, round - 1, deadline_in(5_000)).await
            });
            notifier.publish(9, round).await;
            assert_eq!(waiter.await.unwrap(), WaitOutcome::Advanced(round));
        }
    }

    #[tokio::test]
    async fn stale_publish_is_ignored() {
        let notifier = ChangeNotifier::new();
        notifier.publish(1, 5).await;
        notifier.publish(1, 3).await;
        assert_eq!(notifier.latest(1).await, 5);
    }

    #[tokio::test]
    async fn waiter_ignores_versions_not_past_its_own() {
        let notifier = ChangeNotifier::new();
        notifier.publish(1, 4).await;

        let n = notifier.clone();
        let waiter =
            tokio::spawn(async move { n.wait_for_change(1, 5, deadline_in(300)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A publish that does not pass the waiter's version is not a wake.
        notifier.publish(1, 5).await;

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Timeout(5));
    }
}
