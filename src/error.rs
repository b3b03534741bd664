//! Error types for the AWS provider runtime.
//!
//! [`ProviderError`] is the one error type that crosses handler boundaries.
//! The structured errors it wraps ([`RemoteError`], [`NotFoundError`],
//! [`TimeoutError`], [`UnexpectedStateError`]) stay reachable through
//! [`std::error::Error::source`], so the predicates in [`crate::errs`] keep
//! matching no matter how much context has been layered on top.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::schema::Diagnostic;
use crate::types::Operation;

/// Errors that can occur while running a resource lifecycle.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote object definitively does not exist.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A structured error returned by a cloud API.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// A retry loop or waiter exhausted its time budget.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// A waiter observed a state outside pending and target.
    #[error("{0}")]
    UnexpectedState(#[from] UnexpectedStateError),

    /// Several independent operations failed.
    #[error("{0}")]
    Multiple(#[from] MultiError),

    /// The operation was cancelled through its context token.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// User input failed schema validation.
    #[error("Validation error: {}", summarize(.0))]
    Validation(Vec<Diagnostic>),

    /// A resource identifier did not have the expected shape.
    #[error("Invalid ID: {0}")]
    InvalidId(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An unstructured SDK failure (transport, credentials, ...).
    #[error("SDK error: {0}")]
    Sdk(String),

    /// Operation not implemented for this resource type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// An update found the remote object missing.
    #[error("{resource_type} ({id}) is gone: {source}")]
    ResourceGone {
        /// The resource type.
        resource_type: String,
        /// The identifier recorded in state.
        id: String,
        /// The underlying NotFound.
        #[source]
        source: Box<ProviderError>,
    },

    /// Context added at a handler boundary.
    #[error("{operation} {resource_type}{}: {source}", fmt_id(.id))]
    Operation {
        /// The resource type.
        resource_type: String,
        /// The identifier, if one had been assigned.
        id: Option<String>,
        /// The failed operation.
        operation: Operation,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Wrap an error with the resource type, identifier and operation.
    ///
    /// The wrapped error stays reachable through `source()`, so predicates
    /// such as [`crate::errs::is_not_found`] still match.
    pub fn operation(
        resource_type: impl Into<String>,
        id: Option<&str>,
        operation: Operation,
        source: ProviderError,
    ) -> Self {
        Self::Operation {
            resource_type: resource_type.into(),
            id: id.filter(|id| !id.is_empty()).map(str::to_string),
            operation,
            source: Box::new(source),
        }
    }

    /// Convert this error into host diagnostics.
    ///
    /// Validation errors keep their per-attribute diagnostics; everything
    /// else becomes one error diagnostic, with a remediation hint as detail
    /// when the remote error code has one.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            Self::Validation(diagnostics) => diagnostics.clone(),
            other => {
                let diagnostic = Diagnostic::error(other.to_string());
                match crate::errs::suggestion(other) {
                    Some(hint) => vec![diagnostic.with_detail(hint)],
                    None => vec![diagnostic],
                }
            }
        }
    }
}

fn fmt_id(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" ({})", id),
        None => String::new(),
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(path) => format!("{} (at {})", d.summary, path),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn boxed_source(err: &Option<Box<ProviderError>>) -> Option<&(dyn StdError + 'static)> {
    err.as_deref().map(|e| e as &(dyn StdError + 'static))
}

/// A structured error returned by a cloud service API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Service-defined error code, e.g. `ResourceNotFoundException`.
    pub code: String,
    /// Human-readable message from the service.
    pub message: String,
    /// HTTP status of the response, when known.
    pub status: Option<u16>,
    /// Request ID for support cases.
    pub request_id: Option<String>,
}

impl RemoteError {
    /// Create a remote error from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            request_id: None,
        }
    }

    /// Attach the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status code: {}", status)?;
            if let Some(request_id) = &self.request_id {
                write!(f, ", request id: {}", request_id)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl StdError for RemoteError {}

/// The NotFound sentinel: the remote object definitively does not exist.
///
/// Compare with [`crate::errs::is_not_found`], never by identity.
#[derive(Debug, Default)]
pub struct NotFoundError {
    /// Overrides the default message.
    pub message: Option<String>,
    /// The SDK error that proved absence.
    pub last_error: Option<Box<ProviderError>>,
    /// The request that was sent, for diagnostics.
    pub last_request: Option<serde_json::Value>,
    /// How many consecutive lookups came back empty.
    pub retries: u32,
}

impl NotFoundError {
    /// A bare sentinel.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sentinel with an explicit message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Record the SDK error that proved absence.
    pub fn last_error(mut self, err: impl Into<ProviderError>) -> Self {
        self.last_error = Some(Box::new(err.into()));
        self
    }

    /// Record the request that was sent.
    pub fn last_request(mut self, request: serde_json::Value) -> Self {
        self.last_request = Some(request);
        self
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return f.write_str(message);
        }
        if self.retries > 0 {
            write!(f, "couldn't find resource ({} retries)", self.retries)?;
        } else {
            f.write_str("couldn't find resource")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

impl StdError for NotFoundError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        boxed_source(&self.last_error)
    }
}

/// A retry loop or waiter ran out of time.
#[derive(Debug, Default)]
pub struct TimeoutError {
    /// The last retryable error observed before time ran out.
    pub last_error: Option<Box<ProviderError>>,
    /// The last state a waiter observed.
    pub last_state: Option<String>,
    /// The configured total timeout.
    pub timeout: Duration,
    /// The states that would have ended the wait.
    pub expected_state: Vec<String>,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected = if self.expected_state.is_empty() {
            "resource to be gone".to_string()
        } else {
            format!("state to become '{}'", self.expected_state.join(", "))
        };

        let mut extra = Vec::new();
        if let Some(state) = self.last_state.as_deref().filter(|s| !s.is_empty()) {
            extra.push(format!("last state: '{}'", state));
        }
        if !self.timeout.is_zero() {
            extra.push(format!("timeout: {:?}", self.timeout));
        }
        let suffix = if extra.is_empty() {
            String::new()
        } else {
            format!(" ({})", extra.join(", "))
        };

        match &self.last_error {
            Some(err) => write!(f, "timeout while waiting for {}{}: {}", expected, suffix, err),
            None => write!(f, "timeout while waiting for {}{}", expected, suffix),
        }
    }
}

impl StdError for TimeoutError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        boxed_source(&self.last_error)
    }
}

/// A waiter observed a state that is neither pending nor a target.
#[derive(Debug)]
pub struct UnexpectedStateError {
    /// The observed state.
    pub state: String,
    /// The target states.
    pub expected_state: Vec<String>,
    /// The last error reported alongside the state, if any.
    pub last_error: Option<Box<ProviderError>>,
}

impl fmt::Display for UnexpectedStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected state '{}', wanted target '{}'",
            self.state,
            self.expected_state.join(", ")
        )?;
        if let Some(err) = &self.last_error {
            write!(f, ". last error: {}", err)?;
        }
        Ok(())
    }
}

impl StdError for UnexpectedStateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        boxed_source(&self.last_error)
    }
}

/// An accumulation of independent failures.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<ProviderError>,
}

impl MultiError {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure.
    pub fn push(&mut self, err: ProviderError) {
        self.errors.push(err);
    }

    /// The recorded failures.
    pub fn errors(&self) -> &[ProviderError] {
        &self.errors
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when empty, the single error when there is exactly one,
    /// otherwise the whole accumulation.
    pub fn into_result(mut self) -> Result<(), ProviderError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ProviderError::Multiple(self)),
        }
    }
}

impl Extend<ProviderError> for MultiError {
    fn extend<I: IntoIterator<Item = ProviderError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            writeln!(f, "1 error occurred:")?;
        } else {
            writeln!(f, "{} errors occurred:", self.errors.len())?;
        }
        for err in &self.errors {
            writeln!(f, "\t* {}", err)?;
        }
        Ok(())
    }
}

impl StdError for MultiError {}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        tonic::Status::new(status_code(&err), message)
    }
}

fn status_code(err: &ProviderError) -> tonic::Code {
    match err {
        ProviderError::NotFound(_) => tonic::Code::NotFound,
        ProviderError::ResourceGone { .. } => tonic::Code::NotFound,
        ProviderError::UnknownResource(_) => tonic::Code::NotFound,
        ProviderError::Remote(remote) => remote_status_code(remote),
        ProviderError::Timeout(_) => tonic::Code::DeadlineExceeded,
        ProviderError::UnexpectedState(_) => tonic::Code::FailedPrecondition,
        ProviderError::Multiple(_) => tonic::Code::Unknown,
        ProviderError::Cancelled(_) => tonic::Code::Cancelled,
        ProviderError::Validation(_) => tonic::Code::InvalidArgument,
        ProviderError::InvalidId(_) => tonic::Code::InvalidArgument,
        ProviderError::Serialization(_) => tonic::Code::InvalidArgument,
        ProviderError::Configuration(_) => tonic::Code::FailedPrecondition,
        ProviderError::Sdk(_) => tonic::Code::Internal,
        ProviderError::Unimplemented(_) => tonic::Code::Unimplemented,
        ProviderError::Operation { source, .. } => status_code(source),
    }
}

fn remote_status_code(remote: &RemoteError) -> tonic::Code {
    if crate::errs::THROTTLING_CODES.contains(&remote.code.as_str()) {
        return tonic::Code::ResourceExhausted;
    }
    match remote.status {
        Some(400) => tonic::Code::InvalidArgument,
        Some(401) => tonic::Code::Unauthenticated,
        Some(403) => tonic::Code::PermissionDenied,
        Some(404) => tonic::Code::NotFound,
        Some(409) => tonic::Code::AlreadyExists,
        Some(429) => tonic::Code::ResourceExhausted,
        Some(s) if s >= 500 => tonic::Code::Unavailable,
        _ => tonic::Code::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("ResourceNotFoundException", "Function not found");
        assert_eq!(err.to_string(), "ResourceNotFoundException: Function not found");

        let err = err.with_status(404).with_request_id("abc-123");
        assert_eq!(
            err.to_string(),
            "ResourceNotFoundException: Function not found (status code: 404, request id: abc-123)"
        );
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(NotFoundError::new().to_string(), "couldn't find resource");
        assert_eq!(
            NotFoundError::with_message("empty result").to_string(),
            "empty result"
        );

        let err = NotFoundError::new().last_error(RemoteError::new("NoSuchEntity", "gone"));
        assert_eq!(err.to_string(), "couldn't find resource: NoSuchEntity: gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_timeout_display() {
        let err = TimeoutError {
            last_error: Some(Box::new(RemoteError::new("Throttling", "slow down").into())),
            last_state: Some("creating".to_string()),
            timeout: Duration::from_secs(5),
            expected_state: vec!["available".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to become 'available' (last state: 'creating', timeout: 5s): Throttling: slow down"
        );

        let err = TimeoutError::default();
        assert_eq!(err.to_string(), "timeout while waiting for resource to be gone");
    }

    #[test]
    fn test_unexpected_state_display() {
        let err = UnexpectedStateError {
            state: "failed".to_string(),
            expected_state: vec!["available".to_string()],
            last_error: None,
        };
        assert_eq!(
            err.to_string(),
            "unexpected state 'failed', wanted target 'available'"
        );
    }

    #[test]
    fn test_operation_context_display() {
        let err = ProviderError::operation(
            "aws_widget",
            Some("w-123"),
            Operation::Delete,
            RemoteError::new("Throttling", "Rate exceeded").into(),
        );
        assert_eq!(
            err.to_string(),
            "deleting aws_widget (w-123): Throttling: Rate exceeded"
        );

        let err = ProviderError::operation(
            "aws_widget",
            Some(""),
            Operation::Create,
            ProviderError::Sdk("boom".to_string()),
        );
        assert_eq!(err.to_string(), "creating aws_widget: SDK error: boom");
    }

    #[test]
    fn test_source_chain_reaches_remote_error() {
        let err = ProviderError::operation(
            "aws_widget",
            Some("w-1"),
            Operation::Read,
            ProviderError::Timeout(TimeoutError {
                last_error: Some(Box::new(RemoteError::new("Throttling", "x").into())),
                ..TimeoutError::default()
            }),
        );
        let found = std::iter::successors(Some(&err as &(dyn StdError + 'static)), |e| (*e).source())
            .find_map(|e| e.downcast_ref::<RemoteError>());
        assert_eq!(found.map(|r| r.code.as_str()), Some("Throttling"));
    }

    #[test]
    fn test_multi_error() {
        let mut errs = MultiError::new();
        assert!(errs.is_empty());
        errs.push(ProviderError::Sdk("one".to_string()));
        errs.push(ProviderError::Sdk("two".to_string()));
        assert_eq!(errs.len(), 2);
        assert_eq!(
            errs.to_string(),
            "2 errors occurred:\n\t* SDK error: one\n\t* SDK error: two\n"
        );
        assert!(matches!(errs.into_result(), Err(ProviderError::Multiple(_))));

        let mut single = MultiError::new();
        single.push(ProviderError::Sdk("only".to_string()));
        assert!(matches!(single.into_result(), Err(ProviderError::Sdk(_))));
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::from(NotFoundError::new()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Validation(vec![]).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::from(TimeoutError::default()).into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let status: tonic::Status =
            ProviderError::from(RemoteError::new("AccessDenied", "no").with_status(403)).into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status =
            ProviderError::from(RemoteError::new("ThrottlingException", "slow")).into();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);

        let wrapped = ProviderError::operation(
            "aws_widget",
            None,
            Operation::Create,
            ProviderError::Configuration("bad".to_string()),
        );
        let status: tonic::Status = wrapped.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().starts_with("creating aws_widget"));
    }

    #[test]
    fn test_validation_display_and_diagnostics() {
        let err = ProviderError::Validation(vec![
            Diagnostic::error("Missing required attribute 'name'").with_attribute("name"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation error: Missing required attribute 'name' (at name)"
        );
        assert_eq!(err.to_diagnostics()[0].attribute.as_deref(), Some("name"));

        let err = ProviderError::from(RemoteError::new("VcpuLimitExceeded", "limit"));
        let diagnostics = err.to_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.is_some());
    }
}
