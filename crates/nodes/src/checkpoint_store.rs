//! Per-caller checkpoint service.
//!
//! Each caller has a single checkpoint slot. The stored record names the
//! content kind it belongs to; loading for any other kind, or after the TTL,
//! discards the record.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    CallerId, Checkpoint, CheckpointValidity, Clock, ContentKind, KeyValueStore, StoreError,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Durable checkpoint slot for one caller.
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
    caller: CallerId,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    lock: Mutex<()>,
}

impl CheckpointStore {
    /// Creates a checkpoint store persisting through `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        caller: CallerId,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            caller,
            clock,
            ttl,
            lock: Mutex::new(()),
        }
    }

    fn key(&self) -> String {
        format!("checkpoint/{}", self.caller)
    }

    async fn read_raw(&self) -> Result<Option<Result<Checkpoint, serde_json::Error>>, StoreError> {
        Ok(self
            .store
            .get(&self.key())
            .await?
            .map(|raw| serde_json::from_str::<Checkpoint>(&raw)))
    }

    /// Returns the checkpoint for `kind` if one exists and is still fresh.
    ///
    /// A record for another kind, an expired record, or an unreadable record is
    /// deleted and `None` is returned.
    pub async fn load(&self, kind: ContentKind) -> Result<Option<Checkpoint>, StoreError> {
        let _guard = self.lock.lock().await;
        let checkpoint = match self.read_raw().await? {
            None => return Ok(None),
            Some(Ok(checkpoint)) => checkpoint,
            Some(Err(e)) => {
                warn!(caller = %self.caller, error = %e, "discarding unreadable checkpoint");
                self.store.delete(&self.key()).await?;
                return Ok(None);
            }
        };

        match checkpoint.validity(kind, self.clock.now(), self.ttl) {
            CheckpointValidity::Valid => {
                debug!(caller = %self.caller, %kind, resume_at = %checkpoint.resume_pass(), "checkpoint loaded");
                Ok(Some(checkpoint))
            }
            CheckpointValidity::KindMismatch { stored } => {
                warn!(caller = %self.caller, requested = %kind, %stored, "discarding checkpoint for another content kind");
                self.store.delete(&self.key()).await?;
                Ok(None)
            }
            CheckpointValidity::Stale { age_secs } => {
                warn!(caller = %self.caller, %kind, age_secs, "discarding stale checkpoint");
                self.store.delete(&self.key()).await?;
                Ok(None)
            }
        }
    }

    /// Writes `checkpoint`, replacing whatever the slot held.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let json = serde_json::to_string(checkpoint).map_err(|e| StoreError::Serialization {
            key: self.key(),
            message: e.to_string(),
        })?;
        self.store.put(&self.key(), &json).await?;
        debug!(
            caller = %self.caller,
            kind = %checkpoint.content_kind,
            has_critique = checkpoint.critique_text.is_some(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Removes the checkpoint for `kind`. A record for another kind is left alone;
    /// an unreadable record is removed.
    pub async fn clear(&self, kind: ContentKind) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        match self.read_raw().await? {
            None => Ok(()),
            Some(Ok(checkpoint)) if checkpoint.content_kind != kind => Ok(()),
            Some(_) => {
                self.store.delete(&self.key()).await?;
                debug!(caller = %self.caller, %kind, "checkpoint cleared");
                Ok(())
            }
        }
    }

    /// The stored record without validation or cleanup, for status reporting.
    pub async fn peek(&self) -> Result<Option<Checkpoint>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_raw().await?.and_then(Result::ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use pipeline::{Pass, TokenCount};
    use storage::MemoryStore;

    const KEY: &str = "checkpoint/alice";

    fn fixture() -> (Arc<MemoryStore>, Arc<ManualClock>, CheckpointStore) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let store = CheckpointStore::new(
            Arc::clone(&kv) as Arc<dyn KeyValueStore>,
            CallerId::new("alice").unwrap(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            pipeline::DEFAULT_CHECKPOINT_TTL,
        );
        (kv, clock, store)
    }

    #[tokio::test]
    async fn saved_draft_loads_back() {
        let (_, clock, store) = fixture();
        let cp = Checkpoint::after_draft(
            ContentKind::WelcomeSequence,
            "the draft",
            TokenCount::new(10),
            clock.now(),
        );
        store.save(&cp).await.unwrap();

        let loaded = store.load(ContentKind::WelcomeSequence).await.unwrap().unwrap();
        assert_eq!(loaded.draft_text, "the draft");
        assert_eq!(loaded.resume_pass(), Pass::Critique);
    }

    #[tokio::test]
    async fn two_hour_old_checkpoint_is_deleted_on_load() {
        let (kv, clock, store) = fixture();
        let saved_at = clock.now().minus(chrono::Duration::hours(2));
        let cp = Checkpoint::after_draft(ContentKind::WelcomeSequence, "d", TokenCount::new(1), saved_at);
        store.save(&cp).await.unwrap();

        assert!(store.load(ContentKind::WelcomeSequence).await.unwrap().is_none());
        assert!(!kv.contains(KEY));
    }

    #[tokio::test]
    async fn other_kind_is_discarded_on_load() {
        let (kv, clock, store) = fixture();
        let cp = Checkpoint::after_draft(ContentKind::LaunchSequence, "d", TokenCount::new(1), clock.now());
        store.save(&cp).await.unwrap();

        assert!(store.load(ContentKind::SalesSequence).await.unwrap().is_none());
        assert!(!kv.contains(KEY));
    }

    #[tokio::test]
    async fn unreadable_record_is_discarded() {
        let (kv, _, store) = fixture();
        kv.put(KEY, "{ broken").await.unwrap();
        assert!(store.load(ContentKind::WelcomeSequence).await.unwrap().is_none());
        assert!(!kv.contains(KEY));
    }

    #[tokio::test]
    async fn clear_only_removes_matching_kind() {
        let (kv, clock, store) = fixture();
        let cp = Checkpoint::after_draft(ContentKind::NurtureSequence, "d", TokenCount::new(1), clock.now());
        store.save(&cp).await.unwrap();

        store.clear(ContentKind::SalesSequence).await.unwrap();
        assert!(kv.contains(KEY));

        store.clear(ContentKind::NurtureSequence).await.unwrap();
        assert!(!kv.contains(KEY));
    }

    #[tokio::test]
    async fn peek_does_not_validate() {
        let (kv, clock, store) = fixture();
        clock.advance(chrono::Duration::hours(-3));
        let cp = Checkpoint::after_draft(ContentKind::NurtureSequence, "d", TokenCount::new(1), clock.now());
        store.save(&cp).await.unwrap();
        clock.advance(chrono::Duration::hours(3));

        assert!(store.peek().await.unwrap().is_some());
        assert!(kv.contains(KEY));
    }
}
