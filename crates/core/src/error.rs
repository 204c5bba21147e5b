#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid rule, KPI, or aggregation configuration. Fatal: the run
    /// aborts before any row is processed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dataset invariant was violated while assembling rows.
    #[error("Schema error: {0}")]
    Schema(String),

    /// An invalid run-status transition was attempted.
    #[error("Invalid state transition: {0}")]
    State(String),
}
