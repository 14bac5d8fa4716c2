use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, represented as fractional seconds since the Unix epoch.
///
/// Mirrors the `Timestamp` convention used throughout the container database:
/// a plain, comparable, serializable scalar rather than a calendar type, since
/// trie nodes only ever need last-writer-wins comparison.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(dur.as_secs_f64())
    }

    pub fn zero() -> Self {
        Timestamp(0.0)
    }
}

impl Eq for Timestamp {}
impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// The payload carried by a `DATA` trie node: the non-key fields of an object
/// record (see the data model's object record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub storage_policy_index: u32,
    pub deleted: bool,
}

impl ObjectData {
    pub fn empty(storage_policy_index: u32) -> Self {
        ObjectData {
            size: 0,
            content_type: String::new(),
            etag: String::new(),
            storage_policy_index,
            deleted: false,
        }
    }
}

/// The role a trie node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFlag {
    /// A path node with no record of its own, present only to connect its
    /// children to the root.
    Interior,
    /// Holds exactly one object record; `full_key` is the object name.
    Data,
    /// The subtree beneath `full_key` lives in a remote shard container.
    /// Must never have children.
    DistributedBranch,
}

/// A single node of a [`crate::ShardTrie`].
///
/// `children` is keyed by the single next character of the edge label, which
/// keeps `insert`/`lookup` simple at the cost of the trunk-collapsing chains
/// that `trim_trunk` exists to clean up after a remote fragment is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardTrieNode {
    pub key: String,
    pub full_key: String,
    pub flag: NodeFlag,
    pub timestamp: Timestamp,
    pub data: Option<ObjectData>,
    pub children: std::collections::BTreeMap<char, ShardTrieNode>,
}

impl ShardTrieNode {
    pub fn new_interior(full_key: impl Into<String>, key: impl Into<String>) -> Self {
        ShardTrieNode {
            key: key.into(),
            full_key: full_key.into(),
            flag: NodeFlag::Interior,
            timestamp: Timestamp::zero(),
            data: None,
            children: Default::default(),
        }
    }

    pub fn is_interior(&self) -> bool {
        self.flag == NodeFlag::Interior
    }
}
