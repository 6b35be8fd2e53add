use thiserror::Error;

/// Error taxonomy for the cache layer.
///
/// Synchronous data-path calls (`put`, `get`, `forget`, ...) propagate these
/// to the caller. Background loops (listener flushes, orphan cleanup, lock
/// release) log and swallow them so one failure does not take down a
/// long-running process. Lock contention is not an error: `lock()` returns
/// `Ok(false)`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("script execution failed: {message}")]
    Script { message: String },

    #[error("value serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
