/// Errors surfaced while consulting a [`crate::Ring`].
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// No locally-mounted device is available to act as a handoff for a
    /// required partition. Recovered by the caller: skip this shard this
    /// pass.
    #[error("no mounted devices found suitable to handoff partition {0}")]
    DeviceUnavailable(u64),

    #[error("invalid ring file: {0}")]
    InvalidRingFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
