//! Error types for the automation core.

/// Top-level error type for scheduling, execution and configuration.
#[derive(Debug, thiserror::Error)]
pub enum AutopilotError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A service was used outside of its start/stop lifecycle.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// A different task is already planned at the exact same instant and the
    /// collision policy rejects duplicates.
    #[error("schedule collision: {existing} already planned at {when}")]
    ScheduleCollision {
        /// Key of the task already occupying the instant.
        existing: String,
        /// The contested due-time.
        when: String,
    },

    /// Region name is empty or malformed.
    #[error("invalid region: {0:?}")]
    InvalidRegion(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AutopilotError>;
