use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::PayloadKind;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("invalid record uid: {0:?}")]
    InvalidUid(String),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("unexpected NCBI response: {0}")]
    NcbiResponse(String),

    #[error("no cached {kind} entry for uid {uid}")]
    CacheMiss { kind: PayloadKind, uid: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("relational store error: {0}")]
    Relational(String),

    #[error("search index request failed: {0}")]
    SearchHttp(String),

    #[error("search index returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },
}

impl From<rusqlite::Error> for EtlError {
    fn from(err: rusqlite::Error) -> Self {
        EtlError::Relational(err.to_string())
    }
}
