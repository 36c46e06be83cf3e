//! Embedded reference engine: N replicas in one process.
//!
//! `LocalCluster` plays the role a remote Dynamo-style store would:
//! 1. Fans every request out to the live replicas
//! 2. Waits for R responses (read) or W acks (write)
//! 3. Reconciles versions by vector clock and keeps concurrent ones
//! 4. Optionally repairs replicas that answered with stale versions
//!
//! Deletes are tombstones: a version whose clock descends from everything
//! the live replicas held. A replica that missed the delete hands its old
//! version back after healing, reconciliation drops it as dominated, and
//! read repair spreads the tombstone. Readers never see tombstones.
//!
//! Vector clocks never leave this module; the client sees them only as
//! opaque context bytes.

use crate::engine::{
    Engine, EngineError, FetchReply, PutReply, PutRequest, PutStatus, RawVersion,
};
use crate::operation::Quorum;
use crate::value::CausalContext;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use siblingkv_common::{ClientId, Location};
use siblingkv_config::{ClusterSettings, StorageSettings};
use siblingkv_storage::{
    FsyncPolicy, PutEffect, StorageEngine, StorageError, StorageRecord, VClock, VClockOrder,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Replication and quorum settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Replication factor (N).
    pub replicas: usize,
    /// Default read quorum (R).
    pub default_r: usize,
    /// Default write quorum (W).
    pub default_w: usize,
    /// Whether reads repair stale replicas.
    pub read_repair: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            default_r: 2,
            default_w: 2,
            read_repair: true,
        }
    }
}

impl From<&ClusterSettings> for ClusterConfig {
    fn from(settings: &ClusterSettings) -> Self {
        Self {
            replicas: settings.replicas,
            default_r: settings.r,
            default_w: settings.w,
            read_repair: settings.read_repair,
        }
    }
}

#[derive(Debug)]
struct Replica {
    storage: RwLock<StorageEngine>,
    up: AtomicBool,
}

type Replies = Vec<(usize, Vec<StorageRecord>)>;

#[derive(Debug, Clone)]
pub struct LocalCluster {
    replicas: Vec<Arc<Replica>>,
    config: ClusterConfig,
    /// Actor that stamps tombstones.
    node_id: ClientId,
}

impl LocalCluster {
    /// Open (or recover) one storage engine per replica under
    /// `data_dir/replica-{i}`.
    pub fn open(
        data_dir: &Path,
        fsync: FsyncPolicy,
        config: ClusterConfig,
    ) -> Result<Self, StorageError> {
        let mut replicas = Vec::with_capacity(config.replicas);
        for i in 0..config.replicas {
            let storage = StorageEngine::open(&data_dir.join(format!("replica-{i}")), fsync)?;
            replicas.push(Arc::new(Replica {
                storage: RwLock::new(storage),
                up: AtomicBool::new(true),
            }));
        }
        tracing::info!(
            "local cluster opened: N={} R={} W={} at {:?}",
            config.replicas,
            config.default_r,
            config.default_w,
            data_dir
        );
        Ok(Self {
            replicas,
            config,
            node_id: ClientId::random(),
        })
    }

    pub fn from_settings(
        cluster: &ClusterSettings,
        storage: &StorageSettings,
    ) -> Result<Self, StorageError> {
        Self::open(
            &storage.data_dir,
            FsyncPolicy::from_str_config(&storage.fsync),
            cluster.into(),
        )
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Take replica `index` offline. Out-of-range indexes are ignored.
    pub fn partition(&self, index: usize) {
        if let Some(replica) = self.replicas.get(index) {
            replica.up.store(false, Ordering::SeqCst);
            tracing::debug!("replica {} partitioned", index);
        }
    }

    pub fn heal(&self, index: usize) {
        if let Some(replica) = self.replicas.get(index) {
            replica.up.store(true, Ordering::SeqCst);
            tracing::debug!("replica {} healed", index);
        }
    }

    pub fn is_up(&self, index: usize) -> bool {
        self.replicas
            .get(index)
            .is_some_and(|r| r.up.load(Ordering::SeqCst))
    }

    /// Live versions replica `index` holds for a key, bypassing quorum.
    pub async fn replica_versions(&self, index: usize, location: &Location) -> usize {
        match self.replicas.get(index) {
            Some(replica) => replica
                .storage
                .read()
                .await
                .get(&location.bucket, &location.key)
                .iter()
                .filter(|v| !v.tombstone)
                .count(),
            None => 0,
        }
    }

    /// Flush every replica's WAL (batch fsync mode).
    pub async fn sync(&self) -> Result<(), StorageError> {
        for replica in &self.replicas {
            replica.storage.write().await.sync()?;
        }
        Ok(())
    }

    fn live(&self) -> Vec<(usize, Arc<Replica>)> {
        self.replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.up.load(Ordering::SeqCst))
            .map(|(i, r)| (i, r.clone()))
            .collect()
    }

    /// Resolve a quorum and check that enough replicas are live.
    fn quorum(
        &self,
        quorum: Quorum,
        default: usize,
    ) -> Result<(usize, Vec<(usize, Arc<Replica>)>), EngineError> {
        let n = self.replicas.len();
        let needed = quorum.required(n, default);
        if needed == 0 || needed > n {
            return Err(EngineError::Malformed(format!(
                "quorum {needed} outside 1..={n}"
            )));
        }
        let live = self.live();
        if live.len() < needed {
            return Err(EngineError::QuorumNotMet {
                needed,
                got: live.len(),
            });
        }
        Ok((needed, live))
    }

    /// Read every live replica's versions of a key.
    async fn gather(
        live: &[(usize, Arc<Replica>)],
        location: &Location,
    ) -> Replies {
        let mut futs = FuturesUnordered::new();
        for (index, replica) in live {
            let replica = replica.clone();
            let index = *index;
            futs.push(async move {
                let versions = replica
                    .storage
                    .read()
                    .await
                    .get(&location.bucket, &location.key);
                (index, versions)
            });
        }

        let mut replies = Vec::with_capacity(live.len());
        while let Some(reply) = futs.next().await {
            replies.push(reply);
        }
        replies
    }

    /// Write one record to every live replica. Returns the largest live
    /// version count any replica reported, once `needed` replicas acked.
    async fn fan_out(
        live: &[(usize, Arc<Replica>)],
        record: &StorageRecord,
        needed: usize,
    ) -> Result<usize, EngineError> {
        let mut futs = FuturesUnordered::new();
        for (index, replica) in live {
            let replica = replica.clone();
            let record = record.clone();
            let index = *index;
            futs.push(async move {
                let effect = replica.storage.write().await.put(record);
                (index, effect)
            });
        }

        let mut acks = 0usize;
        let mut versions = 0usize;
        let mut failure = None;
        while let Some((index, effect)) = futs.next().await {
            match effect {
                Ok(PutEffect::Stored { versions: n }) => {
                    acks += 1;
                    versions = versions.max(n);
                }
                Ok(PutEffect::Discarded) => acks += 1,
                Err(e) => {
                    tracing::warn!("write to replica {} failed: {}", index, e);
                    failure = Some(e);
                }
            }
        }

        if acks < needed {
            return Err(match failure {
                Some(e) => storage_failure(e),
                None => EngineError::QuorumNotMet { needed, got: acks },
            });
        }
        Ok(versions)
    }

    async fn read(
        &self,
        location: &Location,
        live: &[(usize, Arc<Replica>)],
        needed: usize,
    ) -> Result<FetchReply, EngineError> {
        let replies = Self::gather(live, location).await;
        if replies.len() < needed {
            return Err(EngineError::QuorumNotMet {
                needed,
                got: replies.len(),
            });
        }

        let all: Vec<StorageRecord> = replies
            .iter()
            .flat_map(|(_, versions)| versions.iter().cloned())
            .collect();
        let reconciled = reconcile_versions(all);

        if self.config.read_repair && !reconciled.is_empty() {
            self.repair(&replies, &reconciled).await;
        }

        Ok(to_reply(reconciled))
    }

    /// Push reconciled versions to replicas that answered with stale ones.
    async fn repair(&self, replies: &Replies, reconciled: &[StorageRecord]) {
        for (index, theirs) in replies {
            if !is_stale(theirs, reconciled) {
                continue;
            }
            let Some(replica) = self.replicas.get(*index) else {
                continue;
            };
            let mut storage = replica.storage.write().await;
            for version in reconciled {
                if let Err(e) = storage.put(version.clone()) {
                    tracing::warn!("read repair on replica {} failed: {}", index, e);
                    break;
                }
            }
            tracing::debug!(
                "read repair: replica {} brought to {} version(s)",
                index,
                reconciled.len()
            );
        }
    }
}

fn check_location(location: &Location) -> Result<(), EngineError> {
    if location.bucket.is_empty() {
        return Err(EngineError::Malformed("empty bucket name".into()));
    }
    if location.key.is_empty() {
        return Err(EngineError::Malformed("empty key".into()));
    }
    Ok(())
}

/// Tombstones are dropped from the reply but still count toward the
/// context, so a write based on it supersedes the delete.
fn to_reply(versions: Vec<StorageRecord>) -> FetchReply {
    let context = versions
        .iter()
        .fold(VClock::new(), |acc, v| acc.merge(&v.vclock));
    FetchReply {
        versions: versions
            .into_iter()
            .filter(|r| !r.tombstone)
            .map(|r| RawVersion {
                value: r.value,
                last_modified_ms: r.timestamp_ms,
                vtag: r.vtag,
            })
            .collect(),
        context: CausalContext::from_bytes(context.to_bytes()),
    }
}

fn storage_failure(e: StorageError) -> EngineError {
    EngineError::Storage(e.to_string())
}

#[async_trait::async_trait]
impl Engine for LocalCluster {
    async fn get(&self, location: &Location, quorum: Quorum) -> Result<FetchReply, EngineError> {
        check_location(location)?;
        let (needed, live) = self.quorum(quorum, self.config.default_r)?;
        self.read(location, &live, needed).await
    }

    async fn put(&self, request: PutRequest) -> Result<PutReply, EngineError> {
        check_location(&request.location)?;
        let (needed, live) = self.quorum(request.quorum, self.config.default_w)?;

        let context = VClock::from_bytes(request.context.as_bytes())
            .map_err(|e| EngineError::Malformed(format!("causal context: {e}")))?;

        // A writer's counter must move past its own earlier writes, or a
        // blind write would be dominated by them and silently dropped.
        let actor = request.writer.to_hex();
        let floor = Self::gather(&live, &request.location)
            .await
            .iter()
            .flat_map(|(_, versions)| versions.iter().map(|v| v.vclock.get(&actor)))
            .max()
            .unwrap_or(0);
        let vclock = context
            .merge(&VClock::from_entries([(actor.clone(), floor)]))
            .increment(&actor);

        let record = StorageRecord::new(
            request.location.bucket.clone(),
            request.location.key.clone(),
            request.value,
            vclock,
            uuid::Uuid::new_v4().to_string(),
        );

        let versions = Self::fan_out(&live, &record, needed).await?;
        let status = if versions > 1 {
            PutStatus::Conflict
        } else {
            PutStatus::Stored
        };
        let body = if request.return_body {
            Some(self.read(&request.location, &live, needed).await?)
        } else {
            None
        };
        Ok(PutReply { status, body })
    }

    async fn delete(&self, location: &Location, quorum: Quorum) -> Result<(), EngineError> {
        check_location(location)?;
        let (needed, live) = self.quorum(quorum, self.config.default_w)?;

        let seen = Self::gather(&live, location)
            .await
            .iter()
            .flat_map(|(_, versions)| versions.iter())
            .fold(VClock::new(), |acc, v| acc.merge(&v.vclock));
        let tombstone = StorageRecord::tombstone(
            location.bucket.clone(),
            location.key.clone(),
            seen.increment(&self.node_id.to_hex()),
            uuid::Uuid::new_v4().to_string(),
        );

        Self::fan_out(&live, &tombstone, needed).await?;
        tracing::debug!("tombstoned {} on {} replica(s)", location, live.len());
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, EngineError> {
        if bucket.is_empty() {
            return Err(EngineError::Malformed("empty bucket name".into()));
        }
        let live = self.live();
        if live.is_empty() {
            return Err(EngineError::QuorumNotMet { needed: 1, got: 0 });
        }

        let mut candidates = BTreeSet::new();
        for (_, replica) in &live {
            candidates.extend(replica.storage.read().await.keys(bucket));
        }

        // A replica that missed a delete still lists the key; only keys with a
        // live version after reconciliation count.
        let mut keys = Vec::with_capacity(candidates.len());
        for key in candidates {
            let location = Location::new(bucket, key);
            let all: Vec<StorageRecord> = Self::gather(&live, &location)
                .await
                .into_iter()
                .flat_map(|(_, versions)| versions)
                .collect();
            if reconcile_versions(all).iter().any(|v| !v.tombstone) {
                keys.push(location.key);
            }
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Keep only versions no other version dominates. Concurrent versions are
/// all kept; equal clocks collapse to one.
pub fn reconcile_versions(versions: Vec<StorageRecord>) -> Vec<StorageRecord> {
    if versions.len() <= 1 {
        return versions;
    }

    let mut result: Vec<StorageRecord> = Vec::new();

    for candidate in versions {
        let mut dominated = false;
        let mut to_remove = Vec::new();

        for (i, existing) in result.iter().enumerate() {
            match candidate.vclock.compare(&existing.vclock) {
                VClockOrder::DominatedBy | VClockOrder::Equal => {
                    dominated = true;
                    break;
                }
                VClockOrder::Dominates => to_remove.push(i),
                VClockOrder::Concurrent => {}
            }
        }

        if !dominated {
            for i in to_remove.into_iter().rev() {
                result.remove(i);
            }
            result.push(candidate);
        }
    }

    result
}

/// Whether a replica's versions differ from the reconciled set.
fn is_stale(theirs: &[StorageRecord], reconciled: &[StorageRecord]) -> bool {
    theirs.len() != reconciled.len()
        || reconciled
            .iter()
            .any(|r| !theirs.iter().any(|t| t.vclock == r.vclock))
}
