//! Error types for slugdl.

/// Top-level error type for the downloader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural queue errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("No matching element found")]
    NotFound,
}

/// Tracker and lifecycle-state errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("A task with an equal key already exists")]
    AlreadyExists,

    #[error("Task not found")]
    NotFound,

    #[error("Completion state {0} is out of range")]
    InvalidState(i64),

    #[error("Cannot {op} a task in state {from}")]
    IllegalTransition { from: &'static str, op: &'static str },

    #[error("Cannot remove a running task")]
    CannotRemoveRunning,
}

/// Failures from external resolution collaborators.
///
/// These are captured per task, recorded on the `Task`, and converted into
/// a completed-with-error transition; they never cross the runner boundary.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("No aggregator registered for {0}")]
    UnknownAggregator(String),

    #[error("No filehost registered for {0}")]
    UnknownFilehost(String),

    #[error("Content not found (404) for slug {0}")]
    NotFound(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Page evaluation error: {0}")]
    Evaluate(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors. The open path degrades to the in-memory backend
/// instead of propagating these to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for the downloader.
pub type Result<T> = std::result::Result<T, Error>;
