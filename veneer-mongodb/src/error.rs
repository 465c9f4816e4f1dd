//! Mapping of driver errors onto [`VeneerError`].
//!
//! Errors that mean the connection went away are reported as
//! [`VeneerError::Reconnect`], which resources retry. Everything else is
//! passed through unchanged as [`VeneerError::Driver`].

use mongodb::error::{Error, ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR};
use veneer_core::VeneerError;

/// Check if a driver error means the connection was lost.
pub fn is_transient(err: &Error) -> bool {
    if err.contains_label(RETRYABLE_WRITE_ERROR) || err.contains_label(TRANSIENT_TRANSACTION_ERROR)
    {
        return true;
    }
    matches!(
        *err.kind,
        ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. }
    )
}

/// Convert a driver error.
pub fn classify(err: Error) -> VeneerError {
    if is_transient(&err) {
        VeneerError::reconnect(err)
    } else {
        VeneerError::driver(err)
    }
}
