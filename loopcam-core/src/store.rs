//! Durable store adapter
//!
//! This module models the shared key-value store every execution context
//! opens independently. Data lives in named partitions; all reads and writes
//! go through transactions that either commit every staged write or none.
//!
//! Transactions never hold a lock while the caller works with them.
//! Concurrent writers resolve as last-committed-transaction-wins per key: a
//! commit only replays its own staged operations on top of the latest engine
//! state, so two contexts writing disjoint keys never clobber each other.
//!
//! Two engines are provided:
//! - [`MemoryEngine`]: in-process, shared through an `Arc`
//! - [`FileEngine`]: a directory of content-addressed blobs plus a manifest
//!   that is replaced atomically on every commit

use crate::error::{StoreError, StoreResult};
use crate::fingerprint;
use async_trait::async_trait;
use bytes::Bytes;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current schema version of the loopcam database
pub const SCHEMA_VERSION: u32 = 2;

/// Default database name
pub const DEFAULT_DB_NAME: &str = "virtualCameraDB";

/// Named partitions of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    /// Current media blob
    Media,
    /// Fingerprint of the current media blob
    Fingerprint,
    /// Enabled flag and playback checkpoint
    State,
}

impl Partition {
    /// Every partition known to the current schema
    pub const ALL: [Partition; 3] = [Partition::Media, Partition::Fingerprint, Partition::State];

    /// Stable partition name
    pub fn name(&self) -> &'static str {
        match self {
            Partition::Media => "media",
            Partition::Fingerprint => "fingerprint",
            Partition::State => "state",
        }
    }

    /// Look up a partition by its stable name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Versioned database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Database name
    pub name: String,
    /// Schema version
    pub version: u32,
    /// Partitions that must exist after an upgrade
    pub partitions: Vec<Partition>,
}

impl Schema {
    /// Current schema for the given database name
    pub fn current(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: SCHEMA_VERSION,
            partitions: Partition::ALL.to_vec(),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::current(DEFAULT_DB_NAME)
    }
}

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads only; any staged write is rejected
    ReadOnly,
    /// Reads and writes, committed atomically
    ReadWrite,
}

/// A single staged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store a value under a key
    Put {
        /// Target partition
        partition: Partition,
        /// Key
        key: String,
        /// Value
        value: Bytes,
    },
    /// Remove a key
    Delete {
        /// Target partition
        partition: Partition,
        /// Key
        key: String,
    },
    /// Remove every key of a partition
    Clear {
        /// Target partition
        partition: Partition,
    },
}

impl WriteOp {
    /// Partition touched by this write
    pub fn partition(&self) -> Partition {
        match self {
            WriteOp::Put { partition, .. }
            | WriteOp::Delete { partition, .. }
            | WriteOp::Clear { partition } => *partition,
        }
    }

    fn apply(&self, data: &mut HashMap<Partition, PartitionData>) {
        match self {
            WriteOp::Put {
                partition,
                key,
                value,
            } => {
                data.entry(*partition)
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
            WriteOp::Delete { partition, key } => {
                if let Some(entries) = data.get_mut(partition) {
                    entries.remove(key);
                }
            }
            WriteOp::Clear { partition } => {
                if let Some(entries) = data.get_mut(partition) {
                    entries.clear();
                }
            }
        }
    }
}

/// Keys and values of one partition
pub type PartitionData = BTreeMap<String, Bytes>;

/// Consistent view of several partitions
pub type Snapshot = HashMap<Partition, PartitionData>;

/// Raw storage engine behind a [`DurableStore`]
#[async_trait]
pub trait StorageEngine: Send + Sync + fmt::Debug {
    /// Create missing partitions; existing partitions are left untouched
    async fn upgrade(&self, schema: &Schema) -> StoreResult<()>;

    /// Read a consistent snapshot of the given partitions
    async fn snapshot(&self, partitions: &[Partition]) -> StoreResult<Snapshot>;

    /// Apply every write or none of them
    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<()>;

    /// Stored schema version (0 when never upgraded)
    async fn version(&self) -> StoreResult<u32>;
}

fn check_version(schema: &Schema, stored: u32) -> StoreResult<()> {
    if stored > schema.version {
        return Err(StoreError::SchemaMismatch {
            name: schema.name.clone(),
            stored,
            requested: schema.version,
        });
    }
    Ok(())
}

fn unknown(partition: Partition) -> StoreError {
    StoreError::UnknownPartition {
        partition: partition.name().to_string(),
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    version: u32,
    partitions: HashMap<Partition, PartitionData>,
}

/// In-process storage engine
///
/// Several contexts opening the same `Arc<MemoryEngine>` see the same data,
/// which is how tests model independent tabs and process restarts.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: RwLock<MemoryInner>,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty engine behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn upgrade(&self, schema: &Schema) -> StoreResult<()> {
        let mut inner = self.inner.write();
        check_version(schema, inner.version)?;
        for partition in &schema.partitions {
            inner.partitions.entry(*partition).or_default();
        }
        inner.version = schema.version;
        Ok(())
    }

    async fn snapshot(&self, partitions: &[Partition]) -> StoreResult<Snapshot> {
        let inner = self.inner.read();
        partitions
            .iter()
            .map(|p| {
                inner
                    .partitions
                    .get(p)
                    .map(|data| (*p, data.clone()))
                    .ok_or_else(|| unknown(*p))
            })
            .collect()
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(missing) = writes
            .iter()
            .map(WriteOp::partition)
            .find(|p| !inner.partitions.contains_key(p))
        {
            return Err(unknown(missing));
        }
        for op in &writes {
            op.apply(&mut inner.partitions);
        }
        Ok(())
    }

    async fn version(&self) -> StoreResult<u32> {
        Ok(self.inner.read().version)
    }
}

const MANIFEST_FILE: &str = "manifest.json";
const BLOB_DIR: &str = "blobs";
const LOCK_FILE: &str = "store.lock";

/// Advisory lock on a store directory, released on drop
#[derive(Debug)]
struct DirLock {
    file: std::fs::File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release store lock: {}", e);
        }
    }
}

/// On-disk index: partition name -> key -> blob digest
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    partitions: BTreeMap<String, BTreeMap<String, String>>,
}

/// Directory-backed storage engine
///
/// Values are written as immutable blob files named by their SHA-256 digest.
/// A commit writes any new blobs, then replaces `manifest.json` with a
/// write-to-temp-then-rename; the rename is the commit point, so a crash
/// before it leaves the previous state untouched.
///
/// Any number of engines, in this process or others, may open the same
/// directory. Upgrades and commits hold an exclusive advisory lock on
/// `store.lock` from reading the manifest until blob cleanup is done, and
/// snapshots hold a shared one, so a commit always starts from the latest
/// manifest and never removes a blob another engine still references.
#[derive(Debug)]
pub struct FileEngine {
    root: PathBuf,
    commit_lock: tokio::sync::Mutex<()>,
}

impl FileEngine {
    /// Open (or create) an engine rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(BLOB_DIR))?;
        info!("Opened file store at {}", root.display());
        Ok(Self {
            root,
            commit_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Directory this engine writes to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for the directory lock
    ///
    /// Blocks on a worker thread. A lock that cannot be taken abandons the
    /// transaction that asked for it.
    async fn lock_dir(&self, exclusive: bool) -> StoreResult<DirLock> {
        let path = self.root.join(LOCK_FILE);
        let locked = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            if exclusive {
                FileExt::lock_exclusive(&file)?;
            } else {
                FileExt::lock_shared(&file)?;
            }
            Ok(file)
        })
        .await;

        match locked {
            Ok(Ok(file)) => Ok(DirLock { file }),
            Ok(Err(e)) => Err(StoreError::TransactionAborted {
                reason: format!("cannot lock {}: {}", self.root.display(), e),
            }),
            Err(e) => Err(StoreError::TransactionAborted {
                reason: format!("store lock task failed: {}", e),
            }),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(digest)
    }

    async fn read_manifest(&self) -> StoreResult<Manifest> {
        match tokio::fs::read(self.manifest_path()).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomically(&self, target: &Path, contents: &[u8]) -> StoreResult<()> {
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_manifest(&self, manifest: &Manifest) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(manifest)?;
        self.write_atomically(&self.manifest_path(), &raw).await
    }

    async fn write_blob(&self, value: &Bytes) -> StoreResult<String> {
        let digest = fingerprint::digest(value).as_str().to_string();
        let path = self.blob_path(&digest);
        if tokio::fs::try_exists(&path).await? {
            return Ok(digest);
        }
        self.write_atomically(&path, value).await?;
        Ok(digest)
    }

    async fn collect_garbage(&self, manifest: &Manifest) {
        let live: HashSet<&str> = manifest
            .partitions
            .values()
            .flat_map(|entries| entries.values().map(String::as_str))
            .collect();

        let mut dir = match tokio::fs::read_dir(self.root.join(BLOB_DIR)).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipping blob cleanup: {}", e);
                return;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !live.contains(name) {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    debug!("Failed to remove stale blob {}: {}", name, e);
                }
            }
        }
    }
}

#[async_trait]
impl StorageEngine for FileEngine {
    async fn upgrade(&self, schema: &Schema) -> StoreResult<()> {
        let _guard = self.commit_lock.lock().await;
        let _dir = self.lock_dir(true).await?;
        let mut manifest = self.read_manifest().await?;
        check_version(schema, manifest.version)?;

        let mut changed = manifest.version != schema.version;
        for partition in &schema.partitions {
            if !manifest.partitions.contains_key(partition.name()) {
                manifest
                    .partitions
                    .insert(partition.name().to_string(), BTreeMap::new());
                changed = true;
            }
        }
        manifest.version = schema.version;

        if changed {
            debug!(
                "Upgrading {} to schema version {}",
                schema.name, schema.version
            );
            self.write_manifest(&manifest).await?;
        }
        Ok(())
    }

    async fn snapshot(&self, partitions: &[Partition]) -> StoreResult<Snapshot> {
        let _guard = self.commit_lock.lock().await;
        let _dir = self.lock_dir(false).await?;
        let manifest = self.read_manifest().await?;
        let mut snapshot = Snapshot::new();
        for partition in partitions {
            let entries = manifest
                .partitions
                .get(partition.name())
                .ok_or_else(|| unknown(*partition))?;
            let mut data = PartitionData::new();
            for (key, digest) in entries {
                let value = tokio::fs::read(self.blob_path(digest)).await?;
                data.insert(key.clone(), Bytes::from(value));
            }
            snapshot.insert(*partition, data);
        }
        Ok(snapshot)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<()> {
        let _guard = self.commit_lock.lock().await;
        let _dir = self.lock_dir(true).await?;
        let mut manifest = self.read_manifest().await?;

        if let Some(missing) = writes
            .iter()
            .map(WriteOp::partition)
            .find(|p| !manifest.partitions.contains_key(p.name()))
        {
            return Err(unknown(missing));
        }

        for op in &writes {
            match op {
                WriteOp::Put {
                    partition,
                    key,
                    value,
                } => {
                    let digest = self.write_blob(value).await?;
                    manifest
                        .partitions
                        .entry(partition.name().to_string())
                        .or_default()
                        .insert(key.clone(), digest);
                }
                WriteOp::Delete { partition, key } => {
                    if let Some(entries) = manifest.partitions.get_mut(partition.name()) {
                        entries.remove(key);
                    }
                }
                WriteOp::Clear { partition } => {
                    if let Some(entries) = manifest.partitions.get_mut(partition.name()) {
                        entries.clear();
                    }
                }
            }
        }

        self.write_manifest(&manifest).await?;
        self.collect_garbage(&manifest).await;
        Ok(())
    }

    async fn version(&self) -> StoreResult<u32> {
        Ok(self.read_manifest().await?.version)
    }
}

/// Handle to the shared durable store, one per execution context
#[derive(Debug, Clone)]
pub struct DurableStore {
    engine: Arc<dyn StorageEngine>,
    schema: Arc<Schema>,
}

impl DurableStore {
    /// Open the store, creating any partition the schema needs
    pub async fn open(engine: Arc<dyn StorageEngine>, schema: Schema) -> StoreResult<Self> {
        engine.upgrade(&schema).await?;
        debug!("Opened {} (schema v{})", schema.name, schema.version);
        Ok(Self {
            engine,
            schema: Arc::new(schema),
        })
    }

    /// Schema this handle was opened with
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Begin a transaction scoped to `partitions`
    pub async fn transaction(
        &self,
        partitions: &[Partition],
        mode: TxMode,
    ) -> StoreResult<Transaction> {
        let snapshot = self.engine.snapshot(partitions).await?;
        Ok(Transaction {
            engine: self.engine.clone(),
            mode,
            scope: partitions.to_vec(),
            view: snapshot,
            writes: Vec::new(),
            finished: false,
        })
    }

    /// Read a single key in its own read-only transaction
    pub async fn get(&self, partition: Partition, key: &str) -> StoreResult<Option<Bytes>> {
        let tx = self.transaction(&[partition], TxMode::ReadOnly).await?;
        tx.get(partition, key)
    }

    /// Write a single key in its own transaction
    pub async fn put(
        &self,
        partition: Partition,
        key: &str,
        value: impl Into<Bytes>,
    ) -> StoreResult<()> {
        let mut tx = self.transaction(&[partition], TxMode::ReadWrite).await?;
        tx.put(partition, key, value)?;
        tx.commit().await
    }

    /// Delete a single key in its own transaction
    pub async fn delete(&self, partition: Partition, key: &str) -> StoreResult<()> {
        let mut tx = self.transaction(&[partition], TxMode::ReadWrite).await?;
        tx.delete(partition, key)?;
        tx.commit().await
    }
}

/// Scoped unit of work over a set of partitions
///
/// Reads see the snapshot taken when the transaction began plus the
/// transaction's own staged writes. Dropping without [`Transaction::commit`]
/// discards every staged write.
#[derive(Debug)]
pub struct Transaction {
    engine: Arc<dyn StorageEngine>,
    mode: TxMode,
    scope: Vec<Partition>,
    view: Snapshot,
    writes: Vec<WriteOp>,
    finished: bool,
}

impl Transaction {
    fn check_scope(&self, partition: Partition) -> StoreResult<()> {
        if self.scope.contains(&partition) {
            Ok(())
        } else {
            Err(StoreError::PartitionNotInScope {
                partition: partition.name().to_string(),
            })
        }
    }

    fn check_writable(&self, partition: Partition) -> StoreResult<()> {
        self.check_scope(partition)?;
        if self.mode == TxMode::ReadOnly {
            let names: Vec<&str> = self.scope.iter().map(Partition::name).collect();
            return Err(StoreError::ReadOnlyTransaction {
                partitions: names.join(","),
            });
        }
        Ok(())
    }

    fn stage(&mut self, op: WriteOp) {
        op.apply(&mut self.view);
        self.writes.push(op);
    }

    /// Access mode
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Read a key
    pub fn get(&self, partition: Partition, key: &str) -> StoreResult<Option<Bytes>> {
        self.check_scope(partition)?;
        Ok(self
            .view
            .get(&partition)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    /// Stage a write
    pub fn put(
        &mut self,
        partition: Partition,
        key: &str,
        value: impl Into<Bytes>,
    ) -> StoreResult<()> {
        self.check_writable(partition)?;
        self.stage(WriteOp::Put {
            partition,
            key: key.to_string(),
            value: value.into(),
        });
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, partition: Partition, key: &str) -> StoreResult<()> {
        self.check_writable(partition)?;
        self.stage(WriteOp::Delete {
            partition,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Stage removal of every key in a partition
    pub fn clear(&mut self, partition: Partition) -> StoreResult<()> {
        self.check_writable(partition)?;
        self.stage(WriteOp::Clear { partition });
        Ok(())
    }

    /// Number of staged writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Commit all staged writes atomically
    pub async fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes);
        if writes.is_empty() {
            return Ok(());
        }
        self.engine.commit(writes).await
    }

    /// Discard all staged writes
    pub fn abort(mut self) {
        self.finished = true;
        if !self.writes.is_empty() {
            debug!("Transaction aborted with {} staged writes", self.writes.len());
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            debug!(
                "Transaction dropped without commit; {} staged writes discarded",
                self.writes.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> (Arc<MemoryEngine>, DurableStore) {
        let engine = MemoryEngine::shared();
        let store = DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();
        (engine, store)
    }

    #[test]
    fn test_partition_names() {
        assert_eq!(Partition::Media.name(), "media");
        assert_eq!(Partition::from_name("state"), Some(Partition::State));
        assert_eq!(Partition::from_name("videos"), None);
    }

    #[tokio::test]
    async fn test_upgrade_is_idempotent() {
        let engine = MemoryEngine::shared();
        DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();
        let store = DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();
        store.put(Partition::State, "enabled", "true").await.unwrap();

        // A third open must not wipe existing partitions
        let again = DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();
        assert_eq!(
            again.get(Partition::State, "enabled").await.unwrap(),
            Some(Bytes::from("true"))
        );
        assert_eq!(engine.version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_stored_schema_is_rejected() {
        let engine = MemoryEngine::shared();
        let mut future = Schema::default();
        future.version = SCHEMA_VERSION + 1;
        DurableStore::open(engine.clone(), future).await.unwrap();

        let err = DurableStore::open(engine, Schema::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_transaction_sees_own_writes() {
        let (_, store) = memory_store().await;
        let mut tx = store
            .transaction(&[Partition::Media, Partition::Fingerprint], TxMode::ReadWrite)
            .await
            .unwrap();
        tx.put(Partition::Media, "current", vec![1u8, 2, 3]).unwrap();
        assert_eq!(
            tx.get(Partition::Media, "current").unwrap(),
            Some(Bytes::from(vec![1u8, 2, 3]))
        );
        // Not visible to others before commit
        assert_eq!(store.get(Partition::Media, "current").await.unwrap(), None);
        tx.commit().await.unwrap();
        assert!(store.get(Partition::Media, "current").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_transaction_aborts() {
        let (_, store) = memory_store().await;
        {
            let mut tx = store
                .transaction(&[Partition::State], TxMode::ReadWrite)
                .await
                .unwrap();
            tx.put(Partition::State, "enabled", "true").unwrap();
        }
        assert_eq!(store.get(Partition::State, "enabled").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scope_and_mode_are_enforced() {
        let (_, store) = memory_store().await;
        let mut ro = store
            .transaction(&[Partition::State], TxMode::ReadOnly)
            .await
            .unwrap();
        assert!(matches!(
            ro.put(Partition::State, "enabled", "true"),
            Err(StoreError::ReadOnlyTransaction { .. })
        ));
        assert!(matches!(
            ro.get(Partition::Media, "current"),
            Err(StoreError::PartitionNotInScope { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let (_, store) = memory_store().await;
        store.put(Partition::State, "a", "1").await.unwrap();
        store.put(Partition::State, "b", "2").await.unwrap();
        store.delete(Partition::State, "a").await.unwrap();
        assert_eq!(store.get(Partition::State, "a").await.unwrap(), None);

        let mut tx = store
            .transaction(&[Partition::State], TxMode::ReadWrite)
            .await
            .unwrap();
        tx.clear(Partition::State).unwrap();
        assert_eq!(tx.get(Partition::State, "b").unwrap(), None);
        tx.commit().await.unwrap();
        assert_eq!(store.get(Partition::State, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_prior_state() {
        let engine = MemoryEngine::shared();
        let partial = Schema {
            name: DEFAULT_DB_NAME.to_string(),
            version: 1,
            partitions: vec![Partition::State],
        };
        let store = DurableStore::open(engine.clone(), partial).await.unwrap();
        store.put(Partition::State, "enabled", "false").await.unwrap();

        let result = engine
            .commit(vec![
                WriteOp::Put {
                    partition: Partition::State,
                    key: "enabled".to_string(),
                    value: Bytes::from("true"),
                },
                WriteOp::Put {
                    partition: Partition::Media,
                    key: "current".to_string(),
                    value: Bytes::from("blob"),
                },
            ])
            .await;
        assert!(matches!(result, Err(StoreError::UnknownPartition { .. })));
        assert_eq!(
            store.get(Partition::State, "enabled").await.unwrap(),
            Some(Bytes::from("false"))
        );
    }

    #[tokio::test]
    async fn test_racing_contexts_keep_disjoint_keys() {
        let engine = MemoryEngine::shared();
        let tab_a = DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();
        let tab_b = DurableStore::open(engine.clone(), Schema::default())
            .await
            .unwrap();

        let mut tx_a = tab_a
            .transaction(&[Partition::State], TxMode::ReadWrite)
            .await
            .unwrap();
        let mut tx_b = tab_b
            .transaction(&[Partition::State], TxMode::ReadWrite)
            .await
            .unwrap();
        tx_a.put(Partition::State, "enabled", "true").unwrap();
        tx_b.put(Partition::State, "checkpoint", "{}").unwrap();
        tx_b.put(Partition::State, "enabled", "false").unwrap();
        tx_a.commit().await.unwrap();
        tx_b.commit().await.unwrap();

        // Last committed wins per key; disjoint keys survive
        assert_eq!(
            tab_a.get(Partition::State, "enabled").await.unwrap(),
            Some(Bytes::from("false"))
        );
        assert!(tab_a
            .get(Partition::State, "checkpoint")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_engines_sharing_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = DurableStore::open(
            Arc::new(FileEngine::open(dir.path()).unwrap()),
            Schema::default(),
        )
        .await
        .unwrap();
        let tab_b = DurableStore::open(
            Arc::new(FileEngine::open(dir.path()).unwrap()),
            Schema::default(),
        )
        .await
        .unwrap();

        let writer = |store: DurableStore, key: &'static str| async move {
            for round in 0..40u32 {
                store
                    .put(Partition::State, key, round.to_string())
                    .await
                    .unwrap();
                store.get(Partition::State, key).await.unwrap();
            }
        };
        let a = tokio::spawn(writer(tab_a.clone(), "a"));
        let b = tokio::spawn(writer(tab_b.clone(), "b"));
        a.await.unwrap();
        b.await.unwrap();

        // Neither engine dropped the other's key or its blob
        for tab in [&tab_a, &tab_b] {
            assert_eq!(
                tab.get(Partition::State, "a").await.unwrap(),
                Some(Bytes::from("39"))
            );
            assert_eq!(
                tab.get(Partition::State, "b").await.unwrap(),
                Some(Bytes::from("39"))
            );
        }
    }

    #[tokio::test]
    async fn test_unlockable_directory_aborts_commit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("db");
        let store = DurableStore::open(
            Arc::new(FileEngine::open(&root).unwrap()),
            Schema::default(),
        )
        .await
        .unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let err = store.put(Partition::State, "enabled", "true").await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted { .. }));
        assert!(err.is_recoverable());
    }
}
