//! Error types for URL reputation

use std::path::PathBuf;
use thiserror::Error;

/// URL canonicalization failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    /// Only plain `http://` URLs are canonicalized
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// No candidate form could be produced
    #[error("no candidates generated for {0}")]
    Empty(String),
}

/// Snapshot storage failure
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded
    #[error("snapshot encoding error in {path}: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot belongs to another list
    #[error("snapshot {path} holds list {found}, expected {expected}")]
    NameMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Snapshot written by a newer format
    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u32),
}

/// Update protocol violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First line is not a `[name major.minor]` header
    #[error("bad list header: {0:?}")]
    BadListHeader(String),

    /// Server answered for another list
    #[error("list name mismatch: expected {expected}, got {found}")]
    NameMismatch { expected: String, found: String },

    /// Server offered a version older than the one held
    #[error("version regression for {name}: {current} -> {offered}")]
    VersionRegression {
        name: String,
        current: String,
        offered: String,
    },

    /// Response status line could not be parsed
    #[error("bad status line: {0:?}")]
    BadStatusLine(String),

    /// Server answered with a non-200 status
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Response header could not be parsed
    #[error("bad response header: {0}")]
    BadHeader(String),

    /// Stream ended before the blank line closing the headers
    #[error("stream ended inside response head")]
    TruncatedHead,

    /// Stream ended before the whole body arrived
    #[error("stream ended after {received} body bytes")]
    TruncatedBody { received: usize },

    /// Chunk size line is not hex
    #[error("bad chunk size: {0:?}")]
    BadChunkSize(String),

    /// Body exceeds the accepted size
    #[error("response body larger than {0} bytes")]
    BodyTooLarge(usize),
}

/// Update run failure
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Connection could not be opened
    #[error("connect to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or exchange exceeded the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Stream error during the exchange
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server violated the update protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Snapshot could not be loaded or saved
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration failure
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Config parsed but is unusable
    #[error("config error: {0}")]
    Invalid(String),
}
