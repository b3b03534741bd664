//! Classification of remote errors.
//!
//! Cloud error codes are too coarse to act on by themselves, so most
//! decisions match a code together with a substring of the message. The
//! pattern tables in this module are data: extend them rather than adding
//! branches.
//!
//! Every predicate walks the [`std::error::Error::source`] chain and
//! inspects the first [`RemoteError`] it finds, so context added with
//! [`ProviderError::operation`](crate::ProviderError::operation) or a
//! [`TimeoutError`](crate::error::TimeoutError) wrapper does not hide the
//! underlying code. Predicates never fail.

use std::error::Error as StdError;

use crate::error::{NotFoundError, RemoteError, TimeoutError};

/// Matches a [`RemoteError`] when every specified component matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorPattern {
    /// Exact, case-sensitive error code.
    pub code: Option<&'static str>,
    /// Case-sensitive message substring; empty matches any message.
    pub message: Option<&'static str>,
    /// HTTP status.
    pub status: Option<u16>,
}

impl ErrorPattern {
    /// Match on code alone.
    pub const fn code(code: &'static str) -> Self {
        Self {
            code: Some(code),
            message: None,
            status: None,
        }
    }

    /// Match on code and message substring.
    pub const fn code_message(code: &'static str, message: &'static str) -> Self {
        Self {
            code: Some(code),
            message: Some(message),
            status: None,
        }
    }

    /// Match on code and HTTP status.
    pub const fn code_status(code: &'static str, status: u16) -> Self {
        Self {
            code: Some(code),
            message: None,
            status: Some(status),
        }
    }

    /// Match on HTTP status alone.
    pub const fn status(status: u16) -> Self {
        Self {
            code: None,
            message: None,
            status: Some(status),
        }
    }

    /// Whether this pattern matches the given remote error.
    pub fn matches(&self, err: &RemoteError) -> bool {
        self.code.map_or(true, |code| err.code == code)
            && self.message.map_or(true, |m| err.message.contains(m))
            && self.status.map_or(true, |s| err.status == Some(s))
    }
}

/// Per-service shapes of "entity does not exist".
pub const NOT_FOUND_PATTERNS: &[ErrorPattern] = &[
    ErrorPattern::code("ResourceNotFoundException"),
    ErrorPattern::code("ResourceNotFoundFault"),
    ErrorPattern::code("NotFoundException"),
    ErrorPattern::code("EntityNotFoundException"),
    ErrorPattern::code("NoSuchEntity"),
    ErrorPattern::code("NoSuchBucket"),
    ErrorPattern::code("NoSuchKey"),
    ErrorPattern::code("InvalidInstanceID.NotFound"),
    ErrorPattern::code("InvalidGroup.NotFound"),
    ErrorPattern::code("InvalidAllocationID.NotFound"),
    ErrorPattern::code("InvalidPermission.NotFound"),
    ErrorPattern::code("InvalidVpcID.NotFound"),
    ErrorPattern::code("InvalidSubnetID.NotFound"),
    ErrorPattern::code_message("ValidationException", "does not exist"),
    ErrorPattern::code_message("InvalidParameterValue", "does not exist"),
    ErrorPattern::code_message("InvalidParameterValueException", "not found"),
    // S3 HEAD requests answer with a bodiless 404.
    ErrorPattern::code_status("NotFound", 404),
];

/// Errors that mean "this region or account cannot be swept", not failure.
pub const SKIPPABLE_SWEEP_PATTERNS: &[ErrorPattern] = &[
    // Missing API endpoint.
    ErrorPattern::code_message("RequestError", "send request failed"),
    ErrorPattern::code_message("RequestError", "dispatch failure"),
    ErrorPattern::code("UnsupportedOperation"),
    ErrorPattern::code("UnsupportedOperationException"),
    ErrorPattern::code_message(
        "InvalidParameterValue",
        "not permitted in this API version for your account",
    ),
    ErrorPattern::code_message("InvalidParameterValue", "Access Denied to API Version"),
    // Blanket denial, common in GovCloud where the message is empty.
    ErrorPattern::code("AccessDeniedException"),
    ErrorPattern::code_message("BadRequestException", "not supported"),
    ErrorPattern::code_message("InvalidAction", "is not available"),
    ErrorPattern::code_message("InvalidAction", "Unavailable Operation"),
    ErrorPattern::code_message("UnauthorizedOperation", "API is not available in the"),
    ErrorPattern::code_message("UnknownOperationException", "Operation is disabled in this region"),
    ErrorPattern::code_message(
        "UnknownOperationException",
        "The requested operation is not supported in the called region",
    ),
    ErrorPattern::code_message(
        "ValidationException",
        "Account is not whitelisted to use this feature",
    ),
];

/// Codes that signal API rate limiting.
pub const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
];

/// Error code to user-facing remediation hint.
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientInstanceCapacity",
        "Try a different availability zone or instance type.",
    ),
    (
        "InstanceLimitExceeded",
        "Request a service limit increase via the Service Quotas console.",
    ),
    (
        "VcpuLimitExceeded",
        "Request a service limit increase via the Service Quotas console.",
    ),
    (
        "LimitExceededException",
        "Request a service limit increase via the Service Quotas console.",
    ),
    (
        "UnauthorizedOperation",
        "Check the IAM policy attached to the provider's credentials.",
    ),
    (
        "AccessDenied",
        "Check the IAM policy attached to the provider's credentials.",
    ),
    (
        "AccessDeniedException",
        "Check the IAM policy attached to the provider's credentials.",
    ),
    (
        "ExpiredToken",
        "Refresh the session credentials and run again.",
    ),
    (
        "Throttling",
        "API rate limit hit. The operation is retried automatically; lower parallelism if it persists.",
    ),
    (
        "ThrottlingException",
        "API rate limit hit. The operation is retried automatically; lower parallelism if it persists.",
    ),
    (
        "RequestLimitExceeded",
        "API rate limit hit. The operation is retried automatically; lower parallelism if it persists.",
    ),
];

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e: &&'a (dyn StdError + 'static)| (*e).source())
}

/// The first structured remote error in the chain.
pub fn as_remote<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a RemoteError> {
    chain(err).find_map(|e| e.downcast_ref::<RemoteError>())
}

/// Whether the remote error code equals `code` exactly.
pub fn code_equals(err: &(dyn StdError + 'static), code: &str) -> bool {
    as_remote(err).is_some_and(|r| r.code == code)
}

/// Whether the remote error code is one of `codes`.
pub fn code_in(err: &(dyn StdError + 'static), codes: &[&str]) -> bool {
    as_remote(err).is_some_and(|r| codes.contains(&r.code.as_str()))
}

/// Whether the remote error code equals `code` and its message contains
/// `substring`. An empty substring matches any message.
pub fn code_and_message(err: &(dyn StdError + 'static), code: &str, substring: &str) -> bool {
    as_remote(err).is_some_and(|r| r.code == code && r.message.contains(substring))
}

/// Whether the remote error matches any of `patterns`.
pub fn matches_any(err: &(dyn StdError + 'static), patterns: &[ErrorPattern]) -> bool {
    as_remote(err).is_some_and(|r| patterns.iter().any(|p| p.matches(r)))
}

/// Whether the rendered error, including wrapped context, contains `substring`.
pub fn message_contains(err: &(dyn StdError + 'static), substring: &str) -> bool {
    chain(err).any(|e| e.to_string().contains(substring))
}

/// Whether the error is the NotFound sentinel or a known per-service
/// "entity does not exist" error.
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(|e| e.is::<NotFoundError>()) || matches_any(err, NOT_FOUND_PATTERNS)
}

/// Whether the error is a retry/waiter timeout.
pub fn timed_out(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(|e| e.is::<TimeoutError>())
}

/// Whether the error is API throttling.
pub fn is_throttling(err: &(dyn StdError + 'static)) -> bool {
    code_in(err, THROTTLING_CODES)
}

/// Whether a sweeper should treat this error as "nothing to sweep here".
pub fn is_skippable_sweep_error(err: &(dyn StdError + 'static)) -> bool {
    matches_any(err, SKIPPABLE_SWEEP_PATTERNS)
}

/// A remediation hint for the remote error code, if one is known.
pub fn suggestion(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    let remote = as_remote(err)?;
    SUGGESTIONS
        .iter()
        .find(|(code, _)| *code == remote.code)
        .map(|(_, hint)| *hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::types::Operation;

    fn remote(code: &str, message: &str) -> ProviderError {
        RemoteError::new(code, message).into()
    }

    #[test]
    fn test_code_predicates() {
        let err = remote("InvalidParameterValue", "Value (foo) for parameter is invalid");
        assert!(code_equals(&err, "InvalidParameterValue"));
        assert!(!code_equals(&err, "invalidparametervalue"));
        assert!(code_in(&err, &["Other", "InvalidParameterValue"]));
        assert!(!code_in(&err, &[]));
        assert!(code_and_message(&err, "InvalidParameterValue", "for parameter"));
        assert!(code_and_message(&err, "InvalidParameterValue", ""));
        assert!(!code_and_message(&err, "InvalidParameterValue", "FOR PARAMETER"));
        assert!(!code_and_message(&err, "Other", ""));
    }

    #[test]
    fn test_predicates_on_non_remote_errors() {
        let err = ProviderError::Sdk("connection reset".to_string());
        assert!(!code_equals(&err, "Throttling"));
        assert!(!is_not_found(&err));
        assert!(!is_skippable_sweep_error(&err));
        assert!(!timed_out(&err));
        assert!(suggestion(&err).is_none());
    }

    #[test]
    fn test_predicates_see_through_context() {
        let err = ProviderError::operation(
            "aws_widget",
            Some("w-1"),
            Operation::Update,
            remote("ThrottlingException", "Rate exceeded"),
        );
        assert!(code_equals(&err, "ThrottlingException"));
        assert!(is_throttling(&err));
        assert!(message_contains(&err, "Throttling"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found(&ProviderError::from(NotFoundError::new())));
        assert!(is_not_found(&ProviderError::from(
            NotFoundError::new().last_error(remote("Anything", "x"))
        )));
        assert!(is_not_found(&remote("ResourceNotFoundException", "nope")));
        assert!(is_not_found(&remote(
            "ValidationException",
            "Stack with id foo does not exist"
        )));
        assert!(!is_not_found(&remote("ValidationException", "bad input")));
        assert!(is_not_found(&ProviderError::from(
            RemoteError::new("NotFound", "").with_status(404)
        )));
        assert!(!is_not_found(&ProviderError::from(
            RemoteError::new("UnknownError", "").with_status(404)
        )));
        assert!(!is_not_found(&ProviderError::from(
            RemoteError::new("UnknownError", "").with_status(500)
        )));
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = RemoteError::new("BadRequestException", "vpc link not supported for region")
            .with_status(400);
        assert!(ErrorPattern::code("BadRequestException").matches(&err));
        assert!(ErrorPattern::code_message("BadRequestException", "not supported").matches(&err));
        assert!(ErrorPattern::status(400).matches(&err));
        assert!(!ErrorPattern::status(404).matches(&err));
        assert!(!ErrorPattern::code_status("BadRequestException", 404).matches(&err));
        assert!(ErrorPattern::default().matches(&err));
    }

    #[test]
    fn test_skippable_sweep_errors() {
        assert!(is_skippable_sweep_error(&remote("UnsupportedOperation", "")));
        assert!(is_skippable_sweep_error(&remote("AccessDeniedException", "")));
        assert!(is_skippable_sweep_error(&remote(
            "InvalidParameterValue",
            "Access Denied to API Version: APIGlobalDatabases"
        )));
        assert!(is_skippable_sweep_error(&remote(
            "InvalidAction",
            "DescribeDBProxies is not available in this region"
        )));
        assert!(!is_skippable_sweep_error(&remote("InvalidParameterValue", "bad")));
        assert!(!is_skippable_sweep_error(&remote("Throttling", "")));
    }

    #[test]
    fn test_suggestions() {
        for (code, _) in SUGGESTIONS {
            assert!(suggestion(&remote(code, "")).is_some(), "no hint for {code}");
        }
        assert!(suggestion(&remote("SomeUnknownCode", "")).is_none());
    }
}
