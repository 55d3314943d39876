use thiserror::Error;

#[derive(Error, Debug)]
pub enum JsonStreamError {
    /// A complete span was found but it is not valid JSON.
    #[error("Malformed JSON value ({len} bytes): {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A closing bracket appeared outside of any value.
    #[error("Unexpected '{0}' outside of a value")]
    UnexpectedClose(char),

    /// The stream ended in the middle of a value.
    #[error("Stream ended inside a value ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// A single value grew beyond the configured limit.
    #[error("JSON value exceeds {limit} bytes")]
    ValueTooLarge { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JsonStreamError {
    /// Whether decoding can continue with the next value after this error.
    ///
    /// The offending bytes have already been discarded for malformed values.
    /// An oversized value is dropped mid-way, so the rest of the buffer is no
    /// longer aligned on a value boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::UnexpectedClose(_))
    }
}
