use thiserror::Error;

/// The error taxonomy shared across the bitmap lifecycle core. `anyhow::Error`
/// is used at the orchestration layer (actions, CLI); library code returns
/// this enum so callers can match on the specific kind (e.g. to decide
/// whether a result is a benign no-op or a real failure).
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// The log file's size is not a multiple of 20, or EOF was hit
    /// mid-record.
    #[error("corrupt pack log: {0}")]
    CorruptLog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The bitmap builder could not acquire the GC PID lock; this is
    /// reported as a *successful* no-op `ActionResult`, not a failure.
    #[error("bitmap generation already ongoing")]
    BitmapAlreadyOngoing,

    /// The preserver or prune orchestrator could not acquire the GC PID
    /// lock; reported as a *failed* `ActionResult` with a "skipped" message.
    #[error("gc lock held by another process")]
    GcLockHeld,

    /// The external progress monitor requested cancellation.
    #[error("cancelled")]
    Cancelled,

    /// `gc.prunePackExpire` was present but unparseable; downgraded to a
    /// warning by the caller, never surfaced as a hard error.
    #[error("could not parse config value: {0}")]
    ConfigParse(String),
}
