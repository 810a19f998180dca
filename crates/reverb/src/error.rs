//! Error taxonomy for the verification engine.

/// Error types surfaced by session loading, replay, and reporting.
///
/// Per-interaction failures (`Render`, `Comparison`) are contained by the
/// replay engine: they populate `summary.errors` and never abort a session.
/// `Input` and `Io` abort the run at the CLI boundary with a nonzero exit.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("template rendering failed: {0}")]
    Render(String),
    #[error("comparison failed: {0}")]
    Comparison(String),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl VerifyError {
    pub fn input(msg: impl Into<String>) -> Self {
        VerifyError::Input(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        VerifyError::Render(msg.into())
    }
}
