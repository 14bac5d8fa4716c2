use crate::broker_factory::{self, BrokerFactory, META_SHARDING, META_SHARD_ACCOUNT, META_SHARD_CONTAINER, META_SHARD_PREFIX};
use crate::resolver::{self, FragmentCache};
use anyhow::Context;
use container_store::{shard_path, ContainerBroker, ObjectRecord, LISTING_LIMIT};
use futures::stream::{self, StreamExt};
use shard_client::{InternalClient, ReplicationEngine};
use shard_ring::Ring;
use shard_trie::{CountingTrie, Timestamp};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Error/progress counters, written only from the main task. Surfaced
/// through the recon cache and the daemon loop's logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub passes: u64,
    pub errors: u64,
    pub splits: u64,
    pub misplaced_relocated: u64,
}

/// Per-pass orchestrator: enumerates local container databases, relocates
/// misplaced objects, and performs at most one split per database.
pub struct SharderPass {
    pub group_count: usize,
    pub devices_root: PathBuf,
    pub ring: Arc<Ring>,
    pub client: InternalClient,
    pub base_url: reqwest::Url,
    pub replication: Arc<dyn ReplicationEngine>,
    /// Bounded worker-pool size for network-I/O fan-out (replication pushes,
    /// cleanup deletes). Arithmetic on tries and broker merges always runs
    /// on the main task regardless of this setting.
    pub concurrency: usize,
    /// Require a discovered device directory to be an actual mount point
    /// before walking its container databases.
    pub mount_check: bool,
}

impl SharderPass {
    /// Runs one full pass over every locally-owned, sharding-enabled
    /// container database. Errors from an individual database are logged
    /// and counted rather than propagated, so one bad DB never aborts the
    /// rest of the pass.
    pub async fn run_once(&self, stats: &mut Stats) -> anyhow::Result<()> {
        let brokers = discover_local_containers(&self.devices_root, self.mount_check).context("discovering local container databases")?;

        let mut factory = BrokerFactory::new(&self.devices_root, self.ring.clone());

        for broker in &brokers {
            if let Err(err) = self.process_container(broker, &mut factory, stats).await {
                tracing::warn!(container = broker.container(), error = %err, "sharder pass failed for container, skipping");
                stats.errors += 1;
            }
        }

        // Every handoff broker registered here was already replicated by
        // whichever phase marked it for cleanup (relocating misplaced
        // objects, or a completed split); this sweep only removes the local
        // copy, it never re-replicates.
        let cleanups: Vec<(String, Arc<ContainerBroker>)> = factory
            .cleanups()
            .map(|(container, _part, broker, _node_id)| (container.to_string(), broker.clone()))
            .collect();

        stream::iter(cleanups)
            .map(|(container, broker)| async move {
                if let Err(err) = std::fs::remove_file(broker.db_path()) {
                    tracing::warn!(container, error = %err, "failed to remove replicated handoff database");
                }
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        stats.passes += 1;
        Ok(())
    }

    /// Pushes every `(part, db_path, node_id)` job through `self.replication`,
    /// at most `self.concurrency` in flight at once. A single job's failure
    /// is logged and does not stop the others - the caller already tolerates
    /// partial replication within a pass (idempotent merges cover the rest
    /// on retry).
    async fn push_bounded(&self, jobs: Vec<(u64, PathBuf, u32, String)>) -> Vec<(String, bool)> {
        stream::iter(jobs)
            .map(|(part, db_path, node_id, label)| async move {
                match self.replication.push(part, &db_path, node_id).await {
                    Ok(()) => (label, true),
                    Err(err) => {
                        tracing::warn!(%label, error = %err, "replication push failed");
                        (label, false)
                    }
                }
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await
    }

    async fn process_container(&self, broker: &Arc<ContainerBroker>, factory: &mut BrokerFactory, stats: &mut Stats) -> anyhow::Result<()> {
        let sharding_on = broker.metadata(META_SHARDING)?.map(|(v, _)| v == "On").unwrap_or(false);
        let shard_account_meta = broker.metadata(META_SHARD_ACCOUNT)?;
        if !sharding_on && shard_account_meta.is_none() {
            return Ok(()); // not participating in sharding
        }

        let root_account = shard_account_meta
            .as_ref()
            .map(|(v, _)| v.clone())
            .unwrap_or_else(|| broker.account().to_string());
        let root_container = broker
            .metadata(META_SHARD_CONTAINER)?
            .map(|(v, _)| v)
            .unwrap_or_else(|| broker.container().to_string());
        let prefix = broker.metadata(META_SHARD_PREFIX)?.map(|(v, _)| v).unwrap_or_default();
        let is_root = root_container == broker.container();
        let policy_index = broker.storage_policy_index().unwrap_or(0);

        let mut counting = CountingTrie::new(prefix.clone(), self.group_count);
        if !is_root {
            for node in broker.get_shard_nodes()? {
                counting.add_distributed(&node.name);
            }
        }

        let mut marker = String::new();
        loop {
            let page = broker.list_objects_iter(LISTING_LIMIT, &marker)?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            for row in &page {
                marker = row.name.clone();
                counting.add_data(&row.name, row.clone());
            }
            if page_len < LISTING_LIMIT {
                break;
            }
        }

        if !counting.misplaced().is_empty() {
            self.relocate_misplaced(broker, &root_account, &root_container, policy_index, counting.misplaced(), factory)
                .await?;
            stats.misplaced_relocated += counting.misplaced().len() as u64;
            factory.reset();
        }

        if let Some(cand) = counting.candidates().first() {
            self.split_candidate(broker, &root_account, &root_container, &prefix, cand, policy_index, is_root, factory, stats)
                .await?;
        }

        Ok(())
    }

    async fn relocate_misplaced(
        &self,
        broker: &Arc<ContainerBroker>,
        root_account: &str,
        root_container: &str,
        policy_index: u32,
        misplaced: &[(String, String, ObjectRecord)],
        factory: &mut BrokerFactory,
    ) -> anyhow::Result<()> {
        let root_trie = self
            .client
            .fetch_trie(&self.base_url, root_account, root_container)
            .await
            .context("fetching root trie to relocate misplaced objects")?;
        let mut cache: FragmentCache = HashMap::new();
        cache.insert(String::new(), root_trie.clone());

        let mut buckets: HashMap<String, Vec<ObjectRecord>> = HashMap::new();
        for (key, _dist_key, data) in misplaced {
            let target_prefix = resolver::resolve(&root_trie, key, root_account, root_container, &self.client, &self.base_url, &mut cache)
                .await
                .with_context(|| format!("resolving shard path for misplaced key '{key}'"))?;
            buckets.entry(target_prefix).or_default().push(data.clone());
        }

        // Filling each handoff broker is synchronous, in-process work and
        // stays on the main task; only the subsequent replication pushes are
        // network I/O, so those are the ones fanned out concurrently.
        let mut jobs = Vec::with_capacity(buckets.len());
        let mut target_containers = Vec::with_capacity(buckets.len());
        for (target_prefix, rows) in buckets {
            let (acct, cont) = shard_path::get_container_shard_path(root_account, root_container, &target_prefix);
            let target_broker = factory
                .get_shard_broker(&target_prefix, root_account, root_container, &acct, &cont, policy_index)
                .context("opening handoff broker for misplaced objects")?;
            broker_factory::fill_from_rows(&target_broker, &rows, false, None).context("merging misplaced objects into target shard")?;

            if let Some((part, handle, node_id)) = factory.handle(&cont) {
                jobs.push((part, handle.db_path().to_path_buf(), node_id, cont.clone()));
            }
            target_containers.push(cont);
        }

        let results = self.push_bounded(jobs).await;
        if let Some((failed, _)) = results.iter().find(|(_, ok)| !ok) {
            anyhow::bail!("replicating misplaced-object shard '{failed}' failed");
        }

        // Each target broker has now been replicated; register it for
        // end-of-pass local deletion before the caller resets the pass's
        // open-broker map, which would otherwise leave these files orphaned
        // on disk with no handle left to clean them up.
        for cont in &target_containers {
            factory.mark_for_cleanup(cont);
        }

        let now = Timestamp::now();
        let tombstones: Vec<ObjectRecord> = misplaced.iter().map(|(_, _, data)| data.tombstone_of(now)).collect();
        broker.merge_items(&tombstones).context("tombstoning relocated misplaced objects in parent")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn split_candidate(
        &self,
        broker: &Arc<ContainerBroker>,
        root_account: &str,
        root_container: &str,
        prefix: &str,
        cand: &str,
        policy_index: u32,
        is_root: bool,
        factory: &mut BrokerFactory,
        stats: &mut Stats,
    ) -> anyhow::Result<()> {
        let (mut trie, _misplaced_seen) = broker.build_shard_trie(cand, "").context("building candidate sub-trie")?;
        if matches!(trie.root().flag, shard_trie::NodeFlag::DistributedBranch) {
            tracing::warn!(container = broker.container(), candidate = cand, "candidate is itself a distributed branch, skipping malformed state");
            return Ok(());
        }

        let mut marker = if trie.data_node_count() == LISTING_LIMIT {
            trie.get_last_node().unwrap_or_default()
        } else {
            String::new()
        };

        // `trie` is already rooted at `cand` (built that way by
        // `build_shard_trie`), so it is itself the subtree to move into the
        // new shard - nothing further needs detaching from it.
        let mut split = trie;
        let (new_acct, new_cont) = shard_path::get_container_shard_path(root_account, root_container, cand);
        let new_broker = factory
            .get_shard_broker(cand, root_account, root_container, &new_acct, &new_cont, policy_index)
            .context("opening handoff broker for new shard")?;
        broker_factory::fill_from_trie(&new_broker, &split, policy_index, false, None, false).context("filling new shard from split subtree")?;

        while !marker.is_empty() {
            let (page_trie, _) = broker.build_shard_trie(cand, &marker).context("paging candidate subtree")?;
            if page_trie.data_node_count() == 0 {
                break;
            }
            broker_factory::fill_from_trie(&new_broker, &page_trie, policy_index, false, None, false).context("filling new shard page")?;
            marker = if page_trie.data_node_count() == LISTING_LIMIT {
                page_trie.get_last_node().unwrap_or_default()
            } else {
                String::new()
            };
            for node in page_trie.get_data_nodes() {
                split.insert(&node.full_key, node.data.clone().unwrap_or_else(|| shard_trie::ObjectData::empty(policy_index)), node.timestamp).ok();
            }
        }

        if let Err(err) = self
            .client
            .create_container(&self.base_url, &new_acct, &new_cont, &policy_index.to_string())
            .await
        {
            tracing::warn!(container = %new_cont, error = %err, "create_container returned an unexpected response, continuing (idempotent retry next pass)");
        }

        // The new shard must be replicated before the parent's tombstone
        // batch is merged below, so no window exposes the split data as
        // lost. Local removal of this handoff copy is deferred to the
        // end-of-pass sweep, which only deletes - it does not re-replicate.
        if let Some((part, handle, node_id)) = factory.handle(&new_cont) {
            self.replication.push(part, handle.db_path(), node_id).await.context("replicating new shard before merging parent tombstones")?;
        }
        factory.mark_for_cleanup(&new_cont);

        let now = Timestamp::now();
        let mut tombstones = container_store::records_from_trie(&split, policy_index, true, Some(now), is_root);
        tombstones.push(ObjectRecord::trie_node(cand.to_string(), now));
        broker.merge_items(&tombstones).context("merging split tombstones and new branch into parent")?;

        if !is_root {
            let (root_acct, root_cont) = (root_account.to_string(), root_container.to_string());
            let root_handoff = factory
                .get_shard_broker("", root_account, root_container, &root_acct, &root_cont, policy_index)
                .context("opening handoff broker to propagate new branch to root")?;
            root_handoff
                .merge_items(&[ObjectRecord::trie_node(cand.to_string(), now)])
                .context("propagating new branch to root")?;
            if let Some((part, handle, node_id)) = factory.handle(&root_cont) {
                self.replication.push(part, handle.db_path(), node_id).await.context("replicating root branch propagation")?;
            }
        }

        let _ = prefix;
        stats.splits += 1;
        Ok(())
    }
}

/// Walks `devices_root` for container database files, recovering each
/// one's true account/container identity from the `X-Account`/
/// `X-Container` metadata it stamped on `initialize`.
///
/// When `mount_check` is set, a device directory that is not itself a
/// distinct mount point (same filesystem as `devices_root`) is skipped with
/// a warning rather than walked - an unmounted device presenting as an
/// empty directory on the root filesystem must never be treated as if it
/// held that device's actual container databases.
pub fn discover_local_containers(devices_root: impl AsRef<std::path::Path>, mount_check: bool) -> anyhow::Result<Vec<Arc<ContainerBroker>>> {
    let mut out = Vec::new();
    let devices_root = devices_root.as_ref();
    if !devices_root.exists() {
        return Ok(out);
    }

    for device in std::fs::read_dir(devices_root)? {
        let device = device?;
        let device_path = device.path();
        if mount_check && !is_mount_point(&device_path) {
            tracing::warn!(device = %device_path.display(), "device is not mounted, skipping (mount_check is on)");
            continue;
        }
        let containers_dir = device_path.join("containers");
        if !containers_dir.is_dir() {
            continue;
        }
        walk_db_files(&containers_dir, &mut out)?;
    }
    Ok(out)
}

/// Whether `path` sits on a different filesystem than its parent directory -
/// the standard `st_dev` comparison used to tell a real mount point from a
/// plain subdirectory. Read errors fail open (treated as mounted) so a
/// transiently unreadable device is merely skipped later by the normal
/// per-container error handling, not treated as categorically unmounted.
fn is_mount_point(path: &std::path::Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let parent = match path.parent() {
        Some(parent) => parent,
        None => return true,
    };
    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(here), Ok(up)) => here.dev() != up.dev(),
        _ => true,
    }
}

fn walk_db_files(dir: &std::path::Path, out: &mut Vec<Arc<ContainerBroker>>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_db_files(&path, out)?;
        } else if path.extension().map(|e| e == "db").unwrap_or(false) {
            let mut broker = ContainerBroker::open(&path, "", "").context("opening local container database")?;
            match (broker.metadata("X-Account"), broker.metadata("X-Container")) {
                (Ok(Some((account, _))), Ok(Some((container, _)))) => {
                    broker.set_identity(account, container);
                    out.push(Arc::new(broker));
                }
                _ => tracing::warn!(path = %path.display(), "skipping database with no recoverable identity"),
            }
        }
    }
    Ok(())
}
