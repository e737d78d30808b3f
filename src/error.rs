use thiserror::Error;

/// Result type for StormAudio operations
pub type Result<T> = std::result::Result<T, StormError>;

/// Errors that can occur when talking to a StormAudio processor
#[derive(Error, Debug)]
pub enum StormError {
    /// The TCP session could not be established
    #[error("Failed to connect to {addr}: {source}")]
    Connection {
        /// Address that was dialed
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted without an open connection
    #[error("Not connected")]
    NotConnected,

    /// Writing to an established session failed
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// No response arrived within the budget
    #[error("Request timeout")]
    Timeout,

    /// The processor closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// A response line could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid setup parameters
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Input name outside the static input catalog
    #[error("Unknown input: {0}")]
    UnknownInput(String),

    /// Service name the core does not provide
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StormError {
    /// Whether the error means the session is gone and a reconnect may help
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            StormError::Connection { .. }
                | StormError::NotConnected
                | StormError::Transport(_)
                | StormError::ConnectionClosed
        )
    }
}

/// Reasons a response line was rejected by the codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Line does not have the `ssp.<parameter>.<value>` shape
    #[error("malformed line: {0:?}")]
    Malformed(String),

    /// Parameter name outside the known set
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Value does not parse as the parameter's type
    #[error("invalid value {value:?} for {parameter}")]
    InvalidValue {
        parameter: &'static str,
        value: String,
    },

    /// Line exceeded the maximum frame length
    #[error("line too long")]
    LineTooLong,
}
