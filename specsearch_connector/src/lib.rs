pub mod handle;
pub mod matches;

/// Status codes returned by every exported function.
pub const SEARCHSDK_OK: i32 = 0;
pub const SEARCHSDK_INVALID_INPUT: i32 = 1;
pub const SEARCHSDK_INVALID_HANDLE: i32 = 2;
pub const SEARCHSDK_CANCELLED: i32 = 3;
pub const SEARCHSDK_INTERNAL_FAILURE: i32 = 4;

use specsearch::error::{ErrorKind, SearchError};

pub(crate) fn status_of(error: &SearchError) -> i32 {
    match error.kind() {
        ErrorKind::InvalidInput => SEARCHSDK_INVALID_INPUT,
        ErrorKind::InvalidHandle => SEARCHSDK_INVALID_HANDLE,
        ErrorKind::Cancelled => SEARCHSDK_CANCELLED,
        ErrorKind::InternalFailure => SEARCHSDK_INTERNAL_FAILURE,
    }
}
