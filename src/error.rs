//! Engine-wide error types
//!
//! Mirrors the split the teacher draws in `utils/response.rs` between an
//! internal error enum and the classification a caller needs, but without
//! an HTTP status code since this crate has no API layer.

use thiserror::Error;

/// Errors surfaced by the matching engine, asset ledger, and persister.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("symbol inactive: {0}")]
    SymbolInactive(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("order not found: {0}")]
    OrderNotFound(u64),

    #[error("order already terminal: {0}")]
    OrderTerminal(u64),

    #[error("caller is not the order owner")]
    Unauthorized,

    #[error("symbol actor overloaded, queue depth exceeded")]
    Overloaded,

    #[error("ledger inconsistent during settlement: {0}")]
    LedgerInconsistent(String),

    #[error("cache tier unavailable: {0}")]
    CacheUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Broad classification used by callers that don't care about the exact
/// variant (e.g. deciding whether to retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, never retry.
    Client,
    /// A bug indicator; logged with full context, never retried blindly.
    Internal,
    /// Transient; safe to retry.
    Transient,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::SymbolInactive(_)
            | EngineError::InsufficientBalance
            | EngineError::OrderNotFound(_)
            | EngineError::OrderTerminal(_)
            | EngineError::Unauthorized => ErrorKind::Client,

            EngineError::Overloaded | EngineError::CacheUnavailable(_) => ErrorKind::Transient,

            EngineError::LedgerInconsistent(_) | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The stable machine-readable code, matching spec's enumerated error
    /// kinds. `LEDGER_INCONSISTENT` is reported to outside callers as
    /// `INTERNAL` per spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::SymbolInactive(_) => "SYMBOL_INACTIVE",
            EngineError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            EngineError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            EngineError::OrderTerminal(_) => "ORDER_TERMINAL",
            EngineError::Unauthorized => "UNAUTHORIZED",
            EngineError::Overloaded => "OVERLOADED",
            EngineError::LedgerInconsistent(_) => "INTERNAL",
            EngineError::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            EngineError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_inconsistent_reports_as_internal_to_clients() {
        let err = EngineError::LedgerInconsistent("settle_trade leg 2 failed".into());
        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn client_errors_are_classified_client() {
        assert_eq!(EngineError::InsufficientBalance.kind(), ErrorKind::Client);
        assert_eq!(EngineError::Overloaded.kind(), ErrorKind::Transient);
    }
}
