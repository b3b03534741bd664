//! Helpers for finder functions.
//!
//! A finder looks up one remote object by key. It returns the object, the
//! NotFound sentinel when the remote definitively reports absence, or the
//! raw error otherwise. Finders never turn other errors into NotFound; the
//! calling handler decides what NotFound means.

use serde_json::Value;

use crate::errs;
use crate::error::{NotFoundError, ProviderError};

/// Convert a "does not exist" remote error into the NotFound sentinel,
/// keeping the original error and request for diagnostics. Other errors
/// pass through unchanged.
pub fn translate_not_found(err: ProviderError, request: Option<Value>) -> ProviderError {
    if !errs::is_not_found(&err) || matches!(err, ProviderError::NotFound(_)) {
        return err;
    }
    let mut sentinel = NotFoundError::new().last_error(err);
    sentinel.last_request = request;
    sentinel.into()
}

/// The sentinel for a list/describe call that returned nothing.
pub fn empty_result_error(request: Option<Value>) -> ProviderError {
    let mut sentinel = NotFoundError::with_message("empty result");
    sentinel.last_request = request;
    sentinel.into()
}

/// The sentinel for a lookup that matched more objects than expected.
pub fn too_many_results_error(expected: usize, got: usize) -> ProviderError {
    NotFoundError::with_message(format!(
        "too many results: wanted {}, got {}",
        expected, got
    ))
    .into()
}

/// Take the only element of a lookup result.
///
/// Zero elements is [`empty_result_error`]; more than one is
/// [`too_many_results_error`].
pub fn assert_single_result<T>(items: Vec<T>) -> Result<T, ProviderError> {
    let got = items.len();
    let mut items = items.into_iter();
    match (items.next(), items.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(empty_result_error(None)),
        (Some(_), Some(_)) => Err(too_many_results_error(1, got)),
    }
}

/// Take the only element matching `predicate`.
pub fn find_single<T, P>(items: Vec<T>, predicate: P) -> Result<T, ProviderError>
where
    P: FnMut(&T) -> bool,
{
    assert_single_result(items.into_iter().filter(predicate).collect())
}
