use thiserror::Error;

/// Expected store outcomes are typed; only `Sqlite` carries an actual
/// persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation participants must differ")]
    InvalidPair,

    #[error("message content is empty")]
    EmptyContent,

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
