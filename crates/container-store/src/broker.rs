use crate::error::StoreError;
use crate::record::{ObjectRecord, RecordType};
use shard_trie::{NodeFlag, ObjectData, ShardTrie, Timestamp};
use std::path::{Path, PathBuf};

/// Maximum rows returned by a single [`ContainerBroker::list_objects_iter`]
/// page, and the size a [`ShardTrie`] built by [`ContainerBroker::build_shard_trie`]
/// is capped at before the caller must page further with a marker.
pub const LISTING_LIMIT: usize = 10_000;

/// An embedded SQLite-backed broker for one container's listing database.
///
/// Mirrors the container database's external interface: iteration over live
/// objects, the stored distributed-branch markers, free-form metadata, and
/// the idempotent bulk upsert that both ordinary merges and split bookkeeping
/// funnel through.
pub struct ContainerBroker {
    conn: rusqlite::Connection,
    db_path: PathBuf,
    account: String,
    container: String,
}

impl ContainerBroker {
    /// Opens (without requiring it to exist yet) the database at `path`.
    /// Callers must follow with [`ContainerBroker::initialize`] before first
    /// use on a fresh path.
    pub fn open(path: impl AsRef<Path>, account: impl Into<String>, container: impl Into<String>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path.as_ref())?;
        Ok(ContainerBroker {
            conn,
            db_path: path.as_ref().to_path_buf(),
            account: account.into(),
            container: container.into(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Overwrites the in-memory account/container identity, used after
    /// discovering a database's true identity from its own stored metadata
    /// (see `X-Account`/`X-Container`) rather than the placeholder supplied
    /// at `open`.
    pub fn set_identity(&mut self, account: impl Into<String>, container: impl Into<String>) {
        self.account = account.into();
        self.container = container.into();
    }

    /// Creates the schema and stamps the storage policy index, failing with
    /// [`StoreError::DatabaseAlreadyExists`] if `container_info` already
    /// holds a row. Idempotent create is the caller's responsibility to
    /// swallow, per the error-handling design.
    pub fn initialize(&self, storage_policy_index: u32) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS object (
                name TEXT NOT NULL,
                created_at REAL NOT NULL,
                size INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                etag TEXT NOT NULL,
                deleted INTEGER NOT NULL,
                storage_policy_index INTEGER NOT NULL,
                record_type INTEGER NOT NULL,
                PRIMARY KEY (name, record_type)
            );
            CREATE TABLE IF NOT EXISTS container_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                timestamp REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS policy_stat (
                storage_policy_index INTEGER PRIMARY KEY
            );",
        )?;

        let already: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM policy_stat", [], |row| row.get(0))?;
        if already > 0 {
            return Err(StoreError::DatabaseAlreadyExists);
        }
        self.conn.execute(
            "INSERT INTO policy_stat (storage_policy_index) VALUES (?1)",
            rusqlite::params![storage_policy_index],
        )?;

        let now = Timestamp::now();
        self.set_metadata("X-Account", &self.account.clone(), now)?;
        self.set_metadata("X-Container", &self.container.clone(), now)?;
        Ok(())
    }

    pub fn storage_policy_index(&self) -> Result<u32, StoreError> {
        self.conn
            .query_row("SELECT storage_policy_index FROM policy_stat LIMIT 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|v| v.max(0) as u32)
            .map_err(|_| StoreError::NotInitialized)
    }

    pub fn set_metadata(&self, key: &str, value: &str, timestamp: Timestamp) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO container_info (key, value, timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp
             WHERE excluded.timestamp >= container_info.timestamp",
            rusqlite::params![key, value, timestamp.0],
        )?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<(String, Timestamp)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value, timestamp FROM container_info WHERE key = ?1")?;
        let mut rows = stmt.query(rusqlite::params![key])?;
        if let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            let ts: f64 = row.get(1)?;
            Ok(Some((value, Timestamp(ts))))
        } else {
            Ok(None)
        }
    }

    pub fn all_metadata(&self) -> Result<Vec<(String, String, Timestamp)>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT key, value, timestamp FROM container_info")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (k, v, ts) = row?;
            out.push((k, v, Timestamp(ts)));
        }
        Ok(out)
    }

    /// Live, non-deleted object rows with `name > marker`, ascending, capped
    /// at `limit`.
    pub fn list_objects_iter(&self, limit: usize, marker: &str) -> Result<Vec<ObjectRecord>, StoreError> {
        self.select_rows(RecordType::Object, marker, limit)
    }

    /// The container's stored distributed-branch markers.
    pub fn get_shard_nodes(&self) -> Result<Vec<ObjectRecord>, StoreError> {
        self.select_rows(RecordType::TrieNode, "", usize::MAX)
    }

    fn select_rows(&self, record_type: RecordType, marker: &str, limit: usize) -> Result<Vec<ObjectRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, created_at, size, content_type, etag, deleted, storage_policy_index, record_type
             FROM object
             WHERE name > ?1 AND record_type = ?2 AND deleted = 0
             ORDER BY name
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![marker, record_type.as_i64(), limit.min(i64::MAX as usize) as i64],
            |row| {
                Ok(ObjectRecord::from_row(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Idempotent bulk upsert keyed by `(name, record_type)`, last-writer-wins
    /// on `created_at`. Calling this twice with the same records is
    /// equivalent to calling it once.
    pub fn merge_items(&self, items: &[ObjectRecord]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for item in items {
            tx.execute(
                "INSERT INTO object (name, created_at, size, content_type, etag, deleted, storage_policy_index, record_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(name, record_type) DO UPDATE SET
                    created_at = excluded.created_at,
                    size = excluded.size,
                    content_type = excluded.content_type,
                    etag = excluded.etag,
                    deleted = excluded.deleted,
                    storage_policy_index = excluded.storage_policy_index
                 WHERE excluded.created_at >= object.created_at",
                rusqlite::params![
                    item.name,
                    item.created_at.0,
                    item.size as i64,
                    item.content_type,
                    item.etag,
                    item.deleted as i64,
                    item.storage_policy_index as i64,
                    item.record_type_db(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Builds a [`ShardTrie`] rooted at `prefix`, populated from this
    /// broker's stored distributed-branch markers plus one page of its live
    /// listing starting after `marker`. Returns the trie alongside any
    /// object keys discovered to lie beneath a branch other than the one
    /// they are currently filed under.
    pub fn build_shard_trie(
        &self,
        prefix: &str,
        marker: &str,
    ) -> Result<(ShardTrie, Vec<(String, String)>), StoreError> {
        self.build_shard_trie_limited(prefix, marker, LISTING_LIMIT)
    }

    /// [`ContainerBroker::build_shard_trie`] with the page size exposed, so
    /// tests can exercise marker-based paging without materializing
    /// `LISTING_LIMIT` rows.
    pub fn build_shard_trie_limited(
        &self,
        prefix: &str,
        marker: &str,
        limit: usize,
    ) -> Result<(ShardTrie, Vec<(String, String)>), StoreError> {
        let mut trie = ShardTrie::new(prefix);
        for node in self.get_shard_nodes()? {
            if node.name == prefix || node.name.starts_with(prefix) {
                // Ignore branches outside this trie's scope; `mark_distributed`
                // would reject them with `NoSuchPrefix` anyway.
                if trie.mark_distributed(&node.name, node.created_at).is_err() {
                    tracing::debug!(branch = %node.name, "skipping distributed marker that conflicts with an ancestor branch");
                }
            }
        }

        let mut misplaced = Vec::new();
        let rows = self.select_rows(RecordType::Object, marker, limit)?;
        for row in &rows {
            if !row.name.starts_with(prefix) {
                continue;
            }
            let data = ObjectData {
                size: row.size,
                content_type: row.content_type.clone(),
                etag: row.etag.clone(),
                storage_policy_index: row.storage_policy_index,
                deleted: row.deleted,
            };
            match trie.insert(&row.name, data, row.created_at) {
                Ok(()) => {}
                Err(err) => {
                    if let Some(branch) = err.distributed_branch_key() {
                        misplaced.push((row.name.clone(), branch.to_string()));
                    }
                }
            }
        }

        Ok((trie, misplaced))
    }
}

/// Produces `merge_items`-ready records from a trie's important nodes
/// (`DATA` and, unless `filter_dist`, `DISTRIBUTED_BRANCH`), optionally
/// marking every record deleted with a fixed timestamp. This is how a split
/// or misplaced-relocation's tombstone batch is built.
pub fn records_from_trie(trie: &ShardTrie, policy_index: u32, delete: bool, at: Option<Timestamp>, filter_dist: bool) -> Vec<ObjectRecord> {
    let nodes: Vec<_> = if filter_dist {
        trie.get_data_nodes().collect()
    } else {
        trie.get_important_nodes().collect()
    };

    nodes
        .into_iter()
        .map(|node| {
            let timestamp = at.unwrap_or(node.timestamp);
            let mut record = match node.flag {
                NodeFlag::DistributedBranch => ObjectRecord::trie_node(node.full_key.clone(), timestamp),
                _ => {
                    let data = node.data.as_ref();
                    ObjectRecord::object(
                        node.full_key.clone(),
                        timestamp,
                        data.map(|d| d.size).unwrap_or(0),
                        data.map(|d| d.content_type.clone()).unwrap_or_default(),
                        data.map(|d| d.etag.clone()).unwrap_or_default(),
                        data.map(|d| d.storage_policy_index).unwrap_or(policy_index),
                    )
                }
            };
            record.deleted = delete;
            record
        })
        .collect()
}
