//! Structured error taxonomy shared by every component of the crate.
//!
//! Each failure carries a stable machine-readable [`ErrorCode`], a human
//! message, an optional details map, and an optional wrapped cause. Callers
//! branch on codes with [`Error::is`] or [`Error::matches`], never on message
//! text.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes. The string form (see [`ErrorCode::as_str`]) is part of
/// the crate's wire-level contract and never changes for a given variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Input validation
    InvalidInput,
    MissingParameter,
    InvalidParameter,
    InvalidAddress,
    InvalidBlockIdentifier,
    InvalidEventSignature,
    InvalidEventArgs,
    UnsupportedEventArgType,
    InvalidPaginationToken,
    // Configuration
    Configuration,
    InvalidBlockchainConfig,
    ChainNotSupported,
    // Transport / remote
    RpcError,
    ExplorerError,
    RateLimitExceeded,
    InvalidApiKey,
    InvalidExplorerResponse,
    ExplorerRequestFailed,
    MissingApiKey,
    // Resource state
    TransactionNotFound,
    BlockNotFound,
    ContractNotFound,
    MethodNotFound,
    ResourceNotFound,
    AlreadyExists,
    // Contract interaction
    InvalidContract,
    InvalidContractCall,
    InvalidTokenBalance,
    // Transaction lifecycle
    InvalidTransaction,
    TransactionFailed,
    InvalidNonce,
    InvalidGasPrice,
    InvalidGasLimit,
}

impl ErrorCode {
    /// Stable string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::MissingParameter => "MISSING_PARAMETER",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::InvalidAddress => "INVALID_ADDRESS",
            ErrorCode::InvalidBlockIdentifier => "INVALID_BLOCK_IDENTIFIER",
            ErrorCode::InvalidEventSignature => "INVALID_EVENT_SIGNATURE",
            ErrorCode::InvalidEventArgs => "INVALID_EVENT_ARGS",
            ErrorCode::UnsupportedEventArgType => "UNSUPPORTED_EVENT_ARG_TYPE",
            ErrorCode::InvalidPaginationToken => "INVALID_PAGINATION_TOKEN",
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::InvalidBlockchainConfig => "INVALID_BLOCKCHAIN_CONFIG",
            ErrorCode::ChainNotSupported => "CHAIN_NOT_SUPPORTED",
            ErrorCode::RpcError => "RPC_ERROR",
            ErrorCode::ExplorerError => "EXPLORER_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::InvalidExplorerResponse => "INVALID_EXPLORER_RESPONSE",
            ErrorCode::ExplorerRequestFailed => "EXPLORER_REQUEST_FAILED",
            ErrorCode::MissingApiKey => "MISSING_API_KEY",
            ErrorCode::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ErrorCode::BlockNotFound => "BLOCK_NOT_FOUND",
            ErrorCode::ContractNotFound => "CONTRACT_NOT_FOUND",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidContract => "INVALID_CONTRACT",
            ErrorCode::InvalidContractCall => "INVALID_CONTRACT_CALL",
            ErrorCode::InvalidTokenBalance => "INVALID_TOKEN_BALANCE",
            ErrorCode::InvalidTransaction => "INVALID_TRANSACTION",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::InvalidNonce => "INVALID_NONCE",
            ErrorCode::InvalidGasPrice => "INVALID_GAS_PRICE",
            ErrorCode::InvalidGasLimit => "INVALID_GAS_LIMIT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded, structured error.
///
/// Composes with any other [`std::error::Error`] as a cause; [`Error::matches`]
/// unwraps transparently through the source chain.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    details: BTreeMap<String, serde_json::Value>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.details == other.details
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Construct an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a structured detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach a wrapped cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable code of this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured details attached at construction.
    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    /// Whether this error or any wrapped [`Error`] in its cause chain carries
    /// the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        Error::matches(self, code)
    }

    /// Whether `err` is (or wraps, at any depth) an [`Error`] with the given
    /// code.
    pub fn matches(err: &(dyn StdError + 'static), code: ErrorCode) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(coded) = e.downcast_ref::<Error>() {
                if coded.code == code {
                    return true;
                }
            }
            current = e.source();
        }
        false
    }

    /// Transport failure from the JSON-RPC upstream.
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RpcError, message)
    }

    /// Invalid caller-supplied input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Malformed or wrong-family address.
    pub fn invalid_address(address: impl Into<String>) -> Self {
        let address = address.into();
        Self::new(ErrorCode::InvalidAddress, format!("invalid address {address:?}"))
            .with_detail("address", address)
    }

    /// Transaction lookup miss.
    pub fn transaction_not_found(hash: impl Into<String>) -> Self {
        let hash = hash.into();
        Self::new(ErrorCode::TransactionNotFound, format!("transaction {hash} not found"))
            .with_detail("hash", hash)
    }

    /// Block lookup miss.
    pub fn block_not_found(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::new(ErrorCode::BlockNotFound, format!("block {identifier} not found"))
            .with_detail("identifier", identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_and_message() {
        let err = Error::new(ErrorCode::InvalidAddress, "not 20 bytes");
        assert_eq!(err.to_string(), "INVALID_ADDRESS: not 20 bytes");
    }

    #[test]
    fn matches_unwraps_through_the_source_chain() {
        let inner = Error::block_not_found("12345");
        let middle = Error::rpc("fetch failed").with_source(inner);
        let outer = Error::new(ErrorCode::ExplorerError, "sync failed").with_source(middle);

        assert!(Error::matches(&outer, ErrorCode::BlockNotFound));
        assert!(Error::matches(&outer, ErrorCode::RpcError));
        assert!(Error::matches(&outer, ErrorCode::ExplorerError));
        assert!(!Error::matches(&outer, ErrorCode::InvalidAddress));
    }

    #[test]
    fn matches_handles_foreign_errors_in_the_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone");
        let err = Error::rpc("ws closed").with_source(io);
        assert!(Error::matches(&err, ErrorCode::RpcError));
        assert!(!Error::matches(&err, ErrorCode::BlockNotFound));
    }

    #[test]
    fn details_round_trip() {
        let err = Error::invalid_address("0xzz");
        assert_eq!(
            err.details().get("address").and_then(|v| v.as_str()),
            Some("0xzz")
        );
        assert_eq!(err.code(), ErrorCode::InvalidAddress);
    }

    #[test]
    fn stable_strings_cover_every_family() {
        assert_eq!(ErrorCode::InvalidInput.as_str(), "INVALID_INPUT");
        assert_eq!(ErrorCode::ChainNotSupported.as_str(), "CHAIN_NOT_SUPPORTED");
        assert_eq!(ErrorCode::RpcError.as_str(), "RPC_ERROR");
        assert_eq!(ErrorCode::AlreadyExists.as_str(), "ALREADY_EXISTS");
        assert_eq!(ErrorCode::InvalidTokenBalance.as_str(), "INVALID_TOKEN_BALANCE");
        assert_eq!(ErrorCode::InvalidGasLimit.as_str(), "INVALID_GAS_LIMIT");
    }
}
