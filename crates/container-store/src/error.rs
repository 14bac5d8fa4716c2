/// Errors surfaced by a [`crate::ContainerBroker`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database already exists and is initialized")]
    DatabaseAlreadyExists,

    #[error("broker has not been initialized")]
    NotInitialized,

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
