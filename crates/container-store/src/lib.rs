//! Embedded SQLite-backed container database: the concrete stand-in for the
//! "external" listing database that the sharder reads and merges into.

mod broker;
mod error;
mod record;
pub mod shard_path;

pub use broker::{records_from_trie, ContainerBroker, LISTING_LIMIT};
pub use error::StoreError;
pub use record::{ObjectRecord, RecordType};
