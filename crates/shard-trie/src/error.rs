/// Errors produced while walking or mutating a [`crate::ShardTrie`].
///
/// `DistributedBranch` is not a failure in the usual sense: it is the structured
/// routing signal callers are expected to catch and act on (see the shard path
/// resolver), never something to be logged as an error in its own right.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    #[error("key '{0}' not found in trie")]
    NotFound(String),

    #[error("lookup of '{0}' crossed distributed branch at '{1}'")]
    DistributedBranch(String, String),

    #[error("prefix '{0}' does not name an existing node in this trie")]
    NoSuchPrefix(String),

    #[error("failed to serialize shard trie: {0}")]
    Serialize(String),

    #[error("failed to deserialize shard trie: {0}")]
    Deserialize(String),
}

impl TrieError {
    /// The `full_key` of the distributed branch that was crossed, if this is
    /// a [`TrieError::DistributedBranch`].
    pub fn distributed_branch_key(&self) -> Option<&str> {
        match self {
            TrieError::DistributedBranch(_, branch) => Some(branch),
            _ => None,
        }
    }
}
