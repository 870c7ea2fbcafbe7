//! Crate error type.

/// Everything that can go wrong while turning a raw `EXPLAIN` source string
/// into a plan tree.
#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    /// The JSON path hit a malformed token while tokenizing.
    #[error("malformed JSON plan: {0}")]
    Json(String),

    /// Best-effort parsing still failed to produce a root node.
    #[error("{0}")]
    Parse(String),

    /// `from_source` dispatched to the JSON path but no bracketed block
    /// could be located in the (preprocessed) source.
    #[error("no bracketed JSON block found in source")]
    NoJsonBlock,
}

impl ExplainError {
    /// Builds a `Json` error, logging it once at the point of construction.
    pub(crate) fn json(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error = %message, "malformed JSON plan");
        ExplainError::Json(message)
    }

    /// Builds a `Parse` error, logging it once at the point of construction.
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error = %message, "plan parse failed");
        ExplainError::Parse(message)
    }

    /// Builds `NoJsonBlock`, logging it once at the point of construction.
    pub(crate) fn no_json_block() -> Self {
        tracing::error!("no bracketed JSON block found in source");
        ExplainError::NoJsonBlock
    }
}

pub type Result<T> = std::result::Result<T, ExplainError>;
