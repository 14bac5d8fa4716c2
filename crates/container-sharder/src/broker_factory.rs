use container_store::{records_from_trie, ContainerBroker, ObjectRecord, StoreError};
use shard_ring::Ring;
use shard_trie::{ShardTrie, Timestamp};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// `X-Container-Sysmeta-Shard-*` metadata keys stamped on every shard DB.
pub const META_SHARD_ACCOUNT: &str = "X-Container-Sysmeta-Shard-Account";
pub const META_SHARD_CONTAINER: &str = "X-Container-Sysmeta-Shard-Container";
pub const META_SHARD_PREFIX: &str = "X-Container-Sysmeta-Shard-Prefix";
pub const META_SHARDING: &str = "X-Container-Sysmeta-Sharding";

/// `(partition, broker handle, owning local device id)` for one shard
/// opened this pass.
#[derive(Clone)]
pub struct ShardHandle {
    pub part: u64,
    pub broker: Arc<ContainerBroker>,
    pub node_id: u32,
}

/// Opens and memoizes local handoff databases for new or relocated shards
/// within a single pass, and tracks which of them still need their local
/// copy deleted once the pass completes.
///
/// `shard_brokers` is pass-scoped: constructed at pass entry and reset
/// between the misplaced-objects phase and the candidate-split phase so a
/// broker freed by one phase is never referenced stale by the next.
/// `shard_cleanups` survives that reset - a caller marks a broker for
/// cleanup only once it has already been replicated, so the handle snapshot
/// taken at that point is all the end-of-pass sweep needs to delete the
/// local file; it never re-replicates.
pub struct BrokerFactory {
    root: PathBuf,
    ring: Arc<Ring>,
    shard_brokers: HashMap<String, ShardHandle>,
    shard_cleanups: HashMap<String, ShardHandle>,
}

impl BrokerFactory {
    pub fn new(root: impl Into<PathBuf>, ring: Arc<Ring>) -> Self {
        BrokerFactory {
            root: root.into(),
            ring,
            shard_brokers: HashMap::new(),
            shard_cleanups: HashMap::new(),
        }
    }

    /// Drops the pass's in-memory bookkeeping. Called between the
    /// misplaced-objects phase and the candidate-split phase so the two
    /// phases never share broker handles. Does not touch `shard_cleanups`,
    /// which must survive to the end of the pass.
    pub fn reset(&mut self) {
        self.shard_brokers.clear();
    }

    /// `(container, part, broker, node_id)` for every shard registered for
    /// end-of-pass local deletion. Each of these has already been replicated
    /// by the caller that marked it - the end-of-pass sweep only deletes.
    pub fn cleanups(&self) -> impl Iterator<Item = (&str, u64, &Arc<ContainerBroker>, u32)> {
        self.shard_cleanups
            .iter()
            .map(|(container, handle)| (container.as_str(), handle.part, &handle.broker, handle.node_id))
    }

    /// Registers the already-opened shard `container` for end-of-pass local
    /// deletion. Must be called only after the caller has itself replicated
    /// this broker's database - the snapshot taken here is not re-pushed.
    pub fn mark_for_cleanup(&mut self, container: &str) {
        if let Some(handle) = self.shard_brokers.get(container) {
            self.shard_cleanups.insert(container.to_string(), handle.clone());
        }
    }

    /// Opens or creates the local handoff database for `(account,
    /// container)`, stamping shard-sysmeta on first creation. Reuses the
    /// same handle for the rest of the pass if already opened.
    pub fn get_shard_broker(&mut self, prefix: &str, root_account: &str, root_container: &str, account: &str, container: &str, storage_policy_index: u32) -> anyhow::Result<Arc<ContainerBroker>> {
        use anyhow::Context;

        if let Some(handle) = self.shard_brokers.get(container) {
            return Ok(handle.broker.clone());
        }

        let part = self.ring.get_part(account, container);
        let device = self.ring.require_local_handoff(part).context("finding local handoff device")?;

        let hsh = container_store::shard_path::hash_path(account, container);
        let db_dir = container_store::shard_path::storage_directory("containers", part, &hsh);
        let db_path = self.root.join(&device.device).join(db_dir).join(format!("{hsh}.db"));

        let broker = ContainerBroker::open(&db_path, account, container).context("opening handoff database")?;
        let fresh = broker.initialize(storage_policy_index).is_ok();
        if fresh {
            let now = Timestamp::now();
            let _ = broker.set_metadata(META_SHARD_ACCOUNT, root_account, now);
            let _ = broker.set_metadata(META_SHARD_CONTAINER, root_container, now);
            let _ = broker.set_metadata(META_SHARD_PREFIX, prefix, now);
        }

        let broker = Arc::new(broker);
        self.shard_brokers.insert(
            container.to_string(),
            ShardHandle {
                part,
                broker: broker.clone(),
                node_id: device.id,
            },
        );
        Ok(broker)
    }

    /// `(part, broker, node_id)` for an already-opened shard this pass.
    pub fn handle(&self, container: &str) -> Option<(u64, Arc<ContainerBroker>, u32)> {
        self.shard_brokers.get(container).map(|h| (h.part, h.broker.clone(), h.node_id))
    }
}

/// Materializes records from either a trie or a raw row list into `broker`
/// via `merge_items`, per the record layout of the data model.
pub fn fill_from_trie(broker: &ContainerBroker, trie: &ShardTrie, policy_index: u32, delete: bool, at: Option<Timestamp>, filter_dist: bool) -> Result<(), StoreError> {
    let records = records_from_trie(trie, policy_index, delete, at, filter_dist);
    broker.merge_items(&records)
}

pub fn fill_from_rows(broker: &ContainerBroker, rows: &[ObjectRecord], delete: bool, at: Option<Timestamp>) -> Result<(), StoreError> {
    let records: Vec<ObjectRecord> = rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(at) = at {
                row.created_at = at;
            }
            row.deleted = delete;
            row
        })
        .collect();
    broker.merge_items(&records)
}
