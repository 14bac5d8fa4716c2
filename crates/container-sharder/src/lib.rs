//! Per-node sharder daemon: decides whether and how to split an overgrown
//! container, carves subtrees into new shard containers, relocates
//! misplaced objects to their authoritative shards, and drives replication
//! of the resulting databases.

pub mod broker_factory;
pub mod config;
pub mod recon;
pub mod resolver;

mod pass;

pub use config::Config;
pub use pass::{discover_local_containers, SharderPass, Stats};
