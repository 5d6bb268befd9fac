// SPDX-License-Identifier: Apache-2.0
//
// Unified error types for Platen.

use thiserror::Error;

/// Top-level error type for all Platen operations.
#[derive(Debug, Error)]
pub enum PlatenError {
    // -- Bootstrap errors --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to bind listener: {0}")]
    Listener(String),

    #[error("spool directory error: {0}")]
    Spool(String),

    // -- Connection / protocol errors --
    #[error("HTTP protocol error: {0}")]
    Http(String),

    #[error("malformed IPP message: {0}")]
    IppParse(String),

    #[error("TLS error: {0}")]
    Tls(String),

    // -- Resource errors --
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("operation not possible: {0}")]
    NotPossible(String),

    // -- Processing errors --
    #[error("transform failed: {0}")]
    Transform(String),

    #[error("raster error: {0}")]
    Raster(String),

    #[error("unsupported document format: {0}")]
    UnsupportedDocument(String),

    #[error("service discovery failed: {0}")]
    Discovery(String),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PlatenError>;
