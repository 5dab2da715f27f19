//! Error types for the exit engine

use thiserror::Error;

use crate::resilience::classify::{classify_message, ErrorKind};

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the exit engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Sentinels the exchange client lets escape
    #[error("No route available")]
    NoRoute,

    #[error("Sale notional {value_sol} SOL below minimum {min_sol} SOL")]
    BelowMinNotional { value_sol: f64, min_sol: f64 },

    #[error("Invalid mint: {0}")]
    InvalidMint(String),

    #[error("No signer configured")]
    MissingSigner,

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Router (aggregator HTTP) errors
    #[error("Router HTTP {status}: {message}")]
    RouterHttp { status: u16, message: String },

    #[error("Router error: {0}")]
    Router(String),

    /// Failure already reduced to a taxonomy kind
    #[error("{kind}: {message}")]
    Classified { kind: ErrorKind, message: String },

    // Trading errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction signing failed: {0}")]
    Signing(String),

    // Position management errors
    #[error("Position persistence failed: {0}")]
    PositionPersistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a classified failure
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Classified {
            kind,
            message: message.into(),
        }
    }

    /// Reduce this error to the closed taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Classified { kind, .. } => *kind,
            Error::NoRoute => ErrorKind::NoRoute,
            Error::BelowMinNotional { .. } => ErrorKind::RouterDust,
            Error::RpcTimeout(_) => ErrorKind::RpcTimeout,
            Error::RouterHttp { status: 429, .. } => ErrorKind::RpcLimit,
            Error::RouterHttp { status: 401 | 403, .. } => ErrorKind::RpcAuth,
            Error::RouterHttp { status, message } if *status >= 500 => {
                match classify_message(message) {
                    ErrorKind::SendFail => ErrorKind::Network,
                    other => other,
                }
            }
            Error::RouterHttp { message, .. } => classify_message(message),
            Error::Rpc(message) | Error::Router(message) => classify_message(message),
            Error::TransactionBuild(message) => match classify_message(message) {
                ErrorKind::SendFail => ErrorKind::TxTooLarge,
                other => other,
            },
            _ => ErrorKind::SendFail,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        self.kind().policy().retry_generic
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::classified(ErrorKind::RpcTimeout, e.to_string())
        } else if e.is_connect() || e.is_request() {
            Error::classified(ErrorKind::Network, e.to_string())
        } else if e.is_decode() {
            Error::Deserialization(e.to_string())
        } else {
            Error::Router(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
