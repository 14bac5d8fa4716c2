//! Prefix trie over object names, used to discover and route shard
//! boundaries without materializing the full object listing in memory.

mod counting;
mod error;
mod node;
mod trie;

pub use counting::CountingTrie;
pub use error::TrieError;
pub use node::{NodeFlag, ObjectData, ShardTrieNode, Timestamp};
pub use trie::ShardTrie;
