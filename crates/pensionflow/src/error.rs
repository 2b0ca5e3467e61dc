//! Error types shared across the workspace.

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The unified error type for PensionFlow crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration problem (bad path, missing setting, malformed graph).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied input could not be interpreted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A tool failed while executing.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The chat model failed or timed out.
    #[error("Model error: {0}")]
    Model(String),

    /// The workflow graph was malformed or routed to an unknown node.
    #[error("Graph error: {0}")]
    Graph(String),

    /// A requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure from the persistent vector store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that does not fit the variants above.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = Error::tool_error("boom");
        assert_eq!(err.to_string(), "Tool error: boom");

        let err = Error::not_found("user 42");
        assert_eq!(err.to_string(), "Not found: user 42");
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
