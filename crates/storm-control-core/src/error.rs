//! Error types shared across every storm-control crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("kernel map error on {operation} for interface {index}: {source}")]
    Map {
        operation: &'static str,
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("no map entry for interface {0}")]
    MapEntryMissing(u32),

    #[error("failed to attach XDP program to interface {index}: {reason}")]
    Attach { index: u32, reason: String },

    #[error("interface {0} is not attached")]
    NotAttached(u32),

    #[error("invalid interface index: {0}")]
    InvalidIndex(i64),

    #[error("invalid device regex {0:?}: {1}")]
    InvalidRegex(String, #[source] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
