use shard_trie::Timestamp;

/// Distinguishes an ordinary object row from a stored trie-routing entry.
/// A `TrieNode` row's `name` is the branch's `full_key`; its `size`,
/// `content_type` and `etag` are always zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Object,
    TrieNode,
}

impl RecordType {
    pub(crate) fn as_i64(self) -> i64 {
        match self {
            RecordType::Object => 0,
            RecordType::TrieNode => 1,
        }
    }

    pub(crate) fn from_i64(v: i64) -> Self {
        if v == 1 {
            RecordType::TrieNode
        } else {
            RecordType::Object
        }
    }
}

/// One row of the `object` table: either a live object or a stored
/// distributed-branch marker, per the data model's object record.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub name: String,
    pub created_at: Timestamp,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub deleted: bool,
    pub storage_policy_index: u32,
    pub record_type: RecordType,
}

impl ObjectRecord {
    pub fn object(name: impl Into<String>, created_at: Timestamp, size: u64, content_type: impl Into<String>, etag: impl Into<String>, storage_policy_index: u32) -> Self {
        ObjectRecord {
            name: name.into(),
            created_at,
            size,
            content_type: content_type.into(),
            etag: etag.into(),
            deleted: false,
            storage_policy_index,
            record_type: RecordType::Object,
        }
    }

    pub fn trie_node(name: impl Into<String>, created_at: Timestamp) -> Self {
        ObjectRecord {
            name: name.into(),
            created_at,
            size: 0,
            content_type: String::new(),
            etag: String::new(),
            deleted: false,
            storage_policy_index: 0,
            record_type: RecordType::TrieNode,
        }
    }

    pub fn tombstone_of(&self, at: Timestamp) -> Self {
        ObjectRecord {
            name: self.name.clone(),
            created_at: at,
            size: 0,
            content_type: String::new(),
            etag: String::new(),
            deleted: true,
            storage_policy_index: self.storage_policy_index,
            record_type: self.record_type,
        }
    }

    pub(crate) fn record_type_db(&self) -> i64 {
        self.record_type.as_i64()
    }

    pub(crate) fn from_row(
        name: String,
        created_at: f64,
        size: i64,
        content_type: String,
        etag: String,
        deleted: i64,
        storage_policy_index: i64,
        record_type: i64,
    ) -> Self {
        ObjectRecord {
            name,
            created_at: Timestamp(created_at),
            size: size.max(0) as u64,
            content_type,
            etag,
            deleted: deleted != 0,
            storage_policy_index: storage_policy_index.max(0) as u32,
            record_type: RecordType::from_i64(record_type),
        }
    }
}
