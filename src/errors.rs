//! Error kinds (§7). Recoverable errors are handled at each component's own
//! boundary and never cross a worker boundary; only unrecoverable
//! initialization errors reach `main`.

use thiserror::Error;

/// Wire-visible ack/close reasons (§7 "surfaced on the wire").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    Invalid,
    Rejected,
    Blocked,
    Error,
}

impl WireErrorKind {
    pub fn prefix(self) -> &'static str {
        match self {
            WireErrorKind::Invalid => "invalid",
            WireErrorKind::Rejected => "rejected",
            WireErrorKind::Blocked => "blocked",
            WireErrorKind::Error => "error",
        }
    }

    pub fn ack_message(self, detail: &str) -> String {
        format!("{}: {detail}", self.prefix())
    }
}

/// Errors that abort process startup (§7 "only unrecoverable initialization
/// errors propagate to the process entry point").
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database pool: {0}")]
    Pool(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid bind address {0}: {1}")]
    BindAddr(String, std::net::AddrParseError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a document-store implementation may surface. Transient errors
/// trigger the storage batcher's retry path; permanent ones are isolated
/// per document (§4.7, §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("permanent store failure for this document: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors a policy-store implementation may surface.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy store unreachable: {0}")]
    Unreachable(String),
}
