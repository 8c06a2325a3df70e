use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Error taxonomy for the relay.
///
/// Transient broker failures (connection, channel, consume, publish, declare)
/// are candidates for the retry wrapper; everything else propagates
/// immediately. Protocol violations are deliberately not retryable: they
/// signal an integrity problem, not a network fault.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection attempt exceeded {secs}s")]
    ConnectionTimeout { secs: u64 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("declaration error: {0}")]
    Declare(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("consume error: {0}")]
    Consume(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerdeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("interrupted by operator")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Whether the retry wrapper may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Connection(_)
                | RelayError::Channel(_)
                | RelayError::Declare(_)
                | RelayError::Publish(_)
                | RelayError::Consume(_)
        )
    }
}

// Classify lapin errors by their text, as there is no stable variant mapping
// for the cases we care about.
impl From<LapinError> for RelayError {
    fn from(error: LapinError) -> Self {
        let text = error.to_string();

        if text.contains("connection") {
            RelayError::Connection(text)
        } else {
            RelayError::Channel(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_variants_are_retryable() {
        assert!(RelayError::Connection("refused".into()).is_transient());
        assert!(RelayError::Channel("closed".into()).is_transient());
        assert!(RelayError::Publish("nack".into()).is_transient());
        assert!(RelayError::Consume("stream ended".into()).is_transient());
        assert!(RelayError::Declare("flaked".into()).is_transient());
    }

    #[test]
    fn fatal_variants_are_not_retryable() {
        assert!(!RelayError::ConnectionTimeout { secs: 10 }.is_transient());
        assert!(!RelayError::ProtocolViolation("double ack".into()).is_transient());
        assert!(!RelayError::Config("missing".into()).is_transient());
        assert!(!RelayError::Interrupted.is_transient());
    }
}
