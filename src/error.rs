//! Error types for clickhouse-stream.

use thiserror::Error;

/// Error type for clickhouse-stream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The request target could not be built from the configuration.
    #[error("can't build request for host {host}: {message}")]
    RequestBuild {
        /// Host the request was addressed to.
        host: String,
        /// Description of what was malformed.
        message: String,
    },

    /// HTTP request failed at the transport level (DNS, connect, timeout).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-200 status.
    #[error("server returned status {status}: {message}")]
    Server {
        /// HTTP status code of the response.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// I/O error while reading a line from the response stream.
    #[error("can't fetch response: {0}")]
    Io(#[from] std::io::Error),

    /// A data row carried fewer fields than the header declared.
    #[error("row has {actual} fields but header declared {expected} columns")]
    RowTooShort {
        /// Number of columns declared by the header line.
        expected: usize,
        /// Number of fields found in the row.
        actual: usize,
    },

    /// The requested column does not exist in the result.
    #[error("can't get value by `{0}`")]
    ColumnNotFound(String),

    /// A raw field could not be coerced to the requested type.
    #[error("can't convert value {value} to {target}: {message}")]
    Conversion {
        /// The raw field string as received from the server.
        value: String,
        /// Name of the requested type.
        target: &'static str,
        /// Underlying parse failure.
        message: String,
    },
}

/// Result type alias for clickhouse-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
