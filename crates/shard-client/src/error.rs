/// Errors from the internal HTTP client used to fetch remote trie
/// fragments and create shard containers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("internal request timed out after {0} attempt(s)")]
    Timeout(u32),

    #[error("unexpected response status {status} from {url}")]
    UnexpectedResponse { status: u16, url: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Trie(#[from] shard_trie::TrieError),
}

/// Errors from pushing a database to a replica.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("no such device id {0} in the ring")]
    UnknownDevice(u32),

    #[error("unexpected response status {status} replicating to device {device_id}")]
    UnexpectedResponse { status: u16, device_id: u32 },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
