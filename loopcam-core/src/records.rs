//! Typed records persisted in the durable store

use crate::error::StoreResult;
use crate::fingerprint::{self, Fingerprint};
use crate::resume::now_epoch_ms;
use crate::store::{DurableStore, Partition, Transaction, TxMode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key of the current media blob in [`Partition::Media`]
pub const MEDIA_KEY: &str = "current";
/// Key of the current digest in [`Partition::Fingerprint`]
pub const FINGERPRINT_KEY: &str = "current";
/// Key of the enabled flag in [`Partition::State`]
pub const ENABLED_KEY: &str = "enabled";
/// Key of the playback checkpoint in [`Partition::State`]
pub const CHECKPOINT_KEY: &str = "checkpoint";

/// The single stored media blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    /// Raw media bytes
    pub bytes: Bytes,
}

/// Persisted playback position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCheckpoint {
    /// Offset into the media, in seconds (never negative)
    pub offset_seconds: f64,
    /// Wall-clock time of the save
    pub saved_at_epoch_ms: i64,
    /// Fingerprint of the media the offset belongs to
    pub fingerprint_at_save: Option<Fingerprint>,
}

impl PlaybackCheckpoint {
    /// Build a checkpoint, clamping the offset to a non-negative value
    pub fn new(offset_seconds: f64, fingerprint: Option<Fingerprint>, saved_at_epoch_ms: i64) -> Self {
        let offset_seconds = if offset_seconds.is_finite() {
            offset_seconds.max(0.0)
        } else {
            0.0
        };
        Self {
            offset_seconds,
            saved_at_epoch_ms,
            fingerprint_at_save: fingerprint,
        }
    }

    /// Whether this checkpoint may be applied to media with `current` fingerprint
    pub fn applies_to(&self, current: Option<&Fingerprint>) -> bool {
        match (&self.fingerprint_at_save, current) {
            (Some(saved), Some(current)) => saved == current,
            _ => false,
        }
    }

    /// Time elapsed since the save (zero if the clock went backwards)
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.saved_at_epoch_ms).max(0) as u64)
    }
}

/// Media, fingerprint and checkpoint observed in one read transaction
#[derive(Debug, Clone, Default)]
pub struct CurrentSource {
    /// Stored media, if any
    pub media: Option<MediaRecord>,
    /// Stored fingerprint, if any
    pub fingerprint: Option<Fingerprint>,
    /// Stored checkpoint, if any
    pub checkpoint: Option<PlaybackCheckpoint>,
}

/// Typed access to the durable store
///
/// Reads never fail: storage or decoding problems are logged and reported
/// as "absent". Writes return their error and leave prior state intact.
#[derive(Debug, Clone)]
pub struct Repository {
    store: DurableStore,
}

fn read_fingerprint(tx: &Transaction) -> StoreResult<Option<Fingerprint>> {
    match tx.get(Partition::Fingerprint, FINGERPRINT_KEY)? {
        Some(raw) => {
            let text = String::from_utf8_lossy(&raw);
            Ok(Some(Fingerprint::parse(&text)?))
        }
        None => Ok(None),
    }
}

fn read_checkpoint(tx: &Transaction) -> StoreResult<Option<PlaybackCheckpoint>> {
    match tx.get(Partition::State, CHECKPOINT_KEY)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

impl Repository {
    /// Wrap an open store handle
    pub fn new(store: DurableStore) -> Self {
        Self { store }
    }

    /// Underlying store handle
    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    fn absent_on_error<T>(what: &str, result: StoreResult<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {}: {}; treating as absent", what, e);
                None
            }
        }
    }

    async fn try_load_enabled(&self) -> StoreResult<Option<bool>> {
        match self.store.get(Partition::State, ENABLED_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_slice::<bool>(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_load_fingerprint(&self) -> StoreResult<Option<Fingerprint>> {
        let tx = self
            .store
            .transaction(&[Partition::Fingerprint], TxMode::ReadOnly)
            .await?;
        read_fingerprint(&tx)
    }

    async fn try_load_checkpoint(&self) -> StoreResult<Option<PlaybackCheckpoint>> {
        let tx = self
            .store
            .transaction(&[Partition::State], TxMode::ReadOnly)
            .await?;
        read_checkpoint(&tx)
    }

    async fn try_load_current_source(&self) -> StoreResult<Option<CurrentSource>> {
        let tx = self
            .store
            .transaction(&Partition::ALL, TxMode::ReadOnly)
            .await?;
        let media = tx
            .get(Partition::Media, MEDIA_KEY)?
            .map(|bytes| MediaRecord { bytes });
        let fingerprint = read_fingerprint(&tx)?;
        // A corrupt checkpoint must not hide the media itself
        let checkpoint = read_checkpoint(&tx).unwrap_or_else(|e| {
            warn!("Ignoring unreadable checkpoint: {}", e);
            None
        });
        Ok(Some(CurrentSource {
            media,
            fingerprint,
            checkpoint,
        }))
    }

    /// Read the enabled flag (absent or unreadable means disabled)
    pub async fn load_enabled(&self) -> bool {
        let result = self.try_load_enabled().await;
        Self::absent_on_error("enabled flag", result).unwrap_or(false)
    }

    /// Persist the enabled flag
    pub async fn save_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.store
            .put(Partition::State, ENABLED_KEY, serde_json::to_vec(&enabled)?)
            .await?;
        debug!("Enabled flag saved: {}", enabled);
        Ok(())
    }

    /// Read the stored media blob
    pub async fn load_media(&self) -> Option<MediaRecord> {
        let result = self.store.get(Partition::Media, MEDIA_KEY).await;
        Self::absent_on_error("media", result).map(|bytes| MediaRecord { bytes })
    }

    /// Read the stored fingerprint
    pub async fn load_fingerprint(&self) -> Option<Fingerprint> {
        let result = self.try_load_fingerprint().await;
        Self::absent_on_error("fingerprint", result)
    }

    /// Read the stored checkpoint
    pub async fn load_checkpoint(&self) -> Option<PlaybackCheckpoint> {
        let result = self.try_load_checkpoint().await;
        Self::absent_on_error("checkpoint", result)
    }

    /// Read media, fingerprint and checkpoint in a single transaction
    pub async fn load_current_source(&self) -> CurrentSource {
        let result = self.try_load_current_source().await;
        Self::absent_on_error("current source", result).unwrap_or_default()
    }

    /// Replace the media blob and its fingerprint atomically
    pub async fn replace_media(&self, bytes: Bytes) -> StoreResult<Fingerprint> {
        let fingerprint = fingerprint::digest(&bytes);
        let mut tx = self
            .store
            .transaction(&[Partition::Media, Partition::Fingerprint], TxMode::ReadWrite)
            .await?;
        tx.put(Partition::Media, MEDIA_KEY, bytes)?;
        tx.put(
            Partition::Fingerprint,
            FINGERPRINT_KEY,
            fingerprint.as_str().as_bytes().to_vec(),
        )?;
        tx.commit().await?;
        info!("Stored new media ({})", fingerprint.short());
        Ok(fingerprint)
    }

    /// Save an offset measured on the media identified by `expected`
    ///
    /// The stored fingerprint is read in the same transaction as the write.
    /// Returns `None` without writing when no media is stored or when the
    /// stored media is no longer the one the offset belongs to.
    pub async fn save_checkpoint(
        &self,
        offset_seconds: f64,
        expected: &Fingerprint,
    ) -> StoreResult<Option<PlaybackCheckpoint>> {
        let mut tx = self
            .store
            .transaction(&[Partition::State, Partition::Fingerprint], TxMode::ReadWrite)
            .await?;
        let Some(fingerprint) = read_fingerprint(&tx)? else {
            debug!("No media fingerprint stored; checkpoint skipped");
            tx.abort();
            return Ok(None);
        };
        if fingerprint != *expected {
            debug!(
                "Media changed to {} while playing {}; checkpoint skipped",
                fingerprint.short(),
                expected.short()
            );
            tx.abort();
            return Ok(None);
        }
        let checkpoint = PlaybackCheckpoint::new(offset_seconds, Some(fingerprint), now_epoch_ms());
        tx.put(
            Partition::State,
            CHECKPOINT_KEY,
            serde_json::to_vec(&checkpoint)?,
        )?;
        tx.commit().await?;
        debug!("Checkpoint saved at {:.2}s", checkpoint.offset_seconds);
        Ok(Some(checkpoint))
    }

    /// Remove the checkpoint
    pub async fn clear_checkpoint(&self) -> StoreResult<()> {
        self.store.delete(Partition::State, CHECKPOINT_KEY).await
    }

    /// Clear every partition in one transaction
    pub async fn wipe_all(&self) -> StoreResult<()> {
        let mut tx = self
            .store
            .transaction(&Partition::ALL, TxMode::ReadWrite)
            .await?;
        for partition in Partition::ALL {
            tx.clear(partition)?;
        }
        tx.commit().await?;
        info!("All stored data erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEngine, Schema};

    async fn repo() -> Repository {
        let store = DurableStore::open(MemoryEngine::shared(), Schema::default())
            .await
            .unwrap();
        Repository::new(store)
    }

    #[test]
    fn test_checkpoint_clamps_offset() {
        assert_eq!(PlaybackCheckpoint::new(-3.0, None, 0).offset_seconds, 0.0);
        assert_eq!(PlaybackCheckpoint::new(f64::NAN, None, 0).offset_seconds, 0.0);
    }

    #[test]
    fn test_checkpoint_wire_names() {
        let cp = PlaybackCheckpoint::new(1.5, None, 10);
        let json = serde_json::to_string(&cp).unwrap();
        assert!(json.contains("offsetSeconds"));
        assert!(json.contains("savedAtEpochMs"));
        assert!(json.contains("fingerprintAtSave"));
    }

    #[tokio::test]
    async fn test_enabled_defaults_to_false() {
        let repo = repo().await;
        assert!(!repo.load_enabled().await);
        repo.save_enabled(true).await.unwrap();
        assert!(repo.load_enabled().await);
    }

    #[tokio::test]
    async fn test_replace_media_writes_pair() {
        let repo = repo().await;
        let fp = repo.replace_media(Bytes::from_static(b"clip-a")).await.unwrap();
        let current = repo.load_current_source().await;
        assert_eq!(current.fingerprint, Some(fp.clone()));
        assert_eq!(
            current.media.map(|m| m.bytes),
            Some(Bytes::from_static(b"clip-a"))
        );
        assert_eq!(fingerprint::digest(b"clip-a"), fp);
    }

    #[tokio::test]
    async fn test_checkpoint_skipped_without_media() {
        let repo = repo().await;
        let fa = fingerprint::digest(b"A");
        assert!(repo.save_checkpoint(3.0, &fa).await.unwrap().is_none());
        assert!(repo.load_checkpoint().await.is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_tagged_with_current_fingerprint() {
        let repo = repo().await;
        let fa = repo.replace_media(Bytes::from_static(b"A")).await.unwrap();
        let saved = repo.save_checkpoint(12.0, &fa).await.unwrap().unwrap();
        assert_eq!(saved.fingerprint_at_save, Some(fa.clone()));

        let fb = repo.replace_media(Bytes::from_static(b"B")).await.unwrap();
        let cp = repo.load_checkpoint().await.unwrap();
        assert!(cp.applies_to(Some(&fa)));
        assert!(!cp.applies_to(Some(&fb)));
    }

    #[tokio::test]
    async fn test_checkpoint_for_replaced_media_is_skipped() {
        let repo = repo().await;
        let fa = repo.replace_media(Bytes::from_static(b"A")).await.unwrap();
        repo.save_checkpoint(2.0, &fa).await.unwrap();

        // Another context stores B while this one still plays A
        let fb = repo.replace_media(Bytes::from_static(b"B")).await.unwrap();
        assert!(repo.save_checkpoint(12.0, &fa).await.unwrap().is_none());

        let cp = repo.load_checkpoint().await.unwrap();
        assert_eq!(cp.offset_seconds, 2.0);
        assert!(!cp.applies_to(Some(&fb)));
    }

    #[tokio::test]
    async fn test_corrupt_records_read_as_absent() {
        let repo = repo().await;
        repo.store()
            .put(Partition::State, ENABLED_KEY, "not json")
            .await
            .unwrap();
        repo.store()
            .put(Partition::Fingerprint, FINGERPRINT_KEY, "zz")
            .await
            .unwrap();
        assert!(!repo.load_enabled().await);
        assert!(repo.load_fingerprint().await.is_none());
    }

    #[tokio::test]
    async fn test_wipe_all() {
        let repo = repo().await;
        let fa = repo.replace_media(Bytes::from_static(b"A")).await.unwrap();
        repo.save_enabled(true).await.unwrap();
        repo.save_checkpoint(4.0, &fa).await.unwrap();
        repo.wipe_all().await.unwrap();

        let current = repo.load_current_source().await;
        assert!(current.media.is_none());
        assert!(current.fingerprint.is_none());
        assert!(current.checkpoint.is_none());
        assert!(!repo.load_enabled().await);
    }
}
