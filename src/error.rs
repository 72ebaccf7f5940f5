use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NcfpError {
    #[error("input sequence file {0} does not exist")]
    InputNotFound(PathBuf),

    #[error("filesystem error: {0}")]
    Io(String),

    #[error("could not parse FASTA input: {0}")]
    FastaParse(String),

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("accession already present in cache: {0}")]
    AlreadyExists(String),

    #[error("multiple full records reachable for {accession}: {records:?}")]
    #[diagnostic(help(
        "rerun with --skip-ambiguous to skip such sequences instead of aborting"
    ))]
    MultipleRecords {
        accession: String,
        records: Vec<String>,
    },

    #[error("Entrez request failed: {0}")]
    EntrezHttp(String),

    #[error("Entrez returned status {status}: {message}")]
    EntrezStatus { status: u16, message: String },

    #[error("could not parse Entrez response: {0}")]
    EntrezParse(String),

    #[error("Entrez record fetch did not begin with {expected:?}")]
    MissingSentinel { expected: &'static str },

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("maximum retries ({attempts}) exceeded: {last}")]
    MaxRetriesExceeded { attempts: usize, last: String },

    #[error("could not parse GenBank record: {0}")]
    GenbankParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),
}

impl NcfpError {
    /// Failures worth another attempt against a remote service.
    ///
    /// Anything else (storage, configuration, parse errors on local data) is
    /// surfaced on the first occurrence instead of being retried.
    pub fn is_transient(&self) -> bool {
        match self {
            NcfpError::EntrezHttp(_)
            | NcfpError::EntrezParse(_)
            | NcfpError::MissingSentinel { .. }
            | NcfpError::UniprotHttp(_) => true,
            NcfpError::EntrezStatus { status, .. } | NcfpError::UniprotStatus { status, .. } => {
                is_retryable_status(*status)
            }
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl From<rusqlite::Error> for NcfpError {
    fn from(err: rusqlite::Error) -> Self {
        NcfpError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for NcfpError {
    fn from(err: std::io::Error) -> Self {
        NcfpError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(NcfpError::EntrezHttp("timeout".to_string()).is_transient());
        assert!(
            NcfpError::EntrezStatus {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !NcfpError::EntrezStatus {
                status: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!NcfpError::Storage("disk full".to_string()).is_transient());
    }
}
