//! Error types reported across the session boundary.

use std::sync::Arc;
use thiserror::Error;

use speccore::data::matches::ResultSet;
use speccore::error::SpectrumError;

use crate::search::session::SessionHandle;

/// The four outcomes a caller has to distinguish.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    InvalidInput,
    InvalidHandle,
    Cancelled,
    InternalFailure,
}

/// Errors returned by search, session and transfer operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed query, unknown unit or technique code, malformed wire buffer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown or closed session handle.
    #[error("invalid session handle {0}")]
    InvalidHandle(SessionHandle),

    /// A second run was started on a session that is still running.
    #[error("session {0} is already running a search")]
    SessionBusy(SessionHandle),

    /// The run stopped on a cancellation request; `partial` holds what was ranked so far.
    #[error("search cancelled with {} partial results", .partial.len())]
    Cancelled { partial: Arc<ResultSet> },

    /// Unexpected engine fault, e.g. no database for the technique.
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidInput(_) => ErrorKind::InvalidInput,
            SearchError::InvalidHandle(_) | SearchError::SessionBusy(_) => ErrorKind::InvalidHandle,
            SearchError::Cancelled { .. } => ErrorKind::Cancelled,
            SearchError::InternalFailure(_) => ErrorKind::InternalFailure,
        }
    }

    /// Results ranked before a cancellation, if this is a cancellation.
    pub fn partial_results(&self) -> Option<&Arc<ResultSet>> {
        match self {
            SearchError::Cancelled { partial } => Some(partial),
            _ => None,
        }
    }
}

impl From<SpectrumError> for SearchError {
    fn from(e: SpectrumError) -> Self {
        if e.is_input_error() {
            SearchError::InvalidInput(e.to_string())
        } else {
            SearchError::InternalFailure(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        SearchError::InternalFailure(format!("library store: {}", e))
    }
}

impl From<std::io::Error> for SearchError {
    fn from(e: std::io::Error) -> Self {
        SearchError::InternalFailure(format!("io: {}", e))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        SearchError::InvalidInput(format!("configuration: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let handle = SessionHandle::from_raw(3);
        assert_eq!(SearchError::SessionBusy(handle).kind(), ErrorKind::InvalidHandle);
        assert_eq!(SearchError::from(SpectrumError::EmptySpectrum).kind(), ErrorKind::InvalidInput);
        assert_eq!(
            SearchError::from(SpectrumError::Numerical("singular".to_string())).kind(),
            ErrorKind::InternalFailure
        );
        let cancelled = SearchError::Cancelled { partial: Arc::new(ResultSet::empty()) };
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
        assert!(cancelled.partial_results().is_some());
        assert_eq!(cancelled.to_string(), "search cancelled with 0 partial results");
    }
}
