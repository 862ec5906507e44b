//! Cursor store error types.

/// Errors produced by [`CursorStore`](crate::CursorStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("sqlite cursor store: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The cursor database was unreachable at (re)connect, or
    /// `bot_polling_timestamps` could not be created.
    #[error("cannot open bot_polling_timestamps: {0}")]
    Bootstrap(#[source] postgres::Error),

    /// A cursor statement failed on an open session.
    #[error("postgres cursor store: {0}")]
    Postgres(#[from] postgres::Error),

    /// Creating the `SQLite` file's parent directory failed.
    #[error("cursor store path: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StateError>;
