use std::fmt;

use crate::types::SubscriptionId;

/// Event catalog could not be constructed.
///
/// This is the only error in the crate that is allowed to be fatal:
/// it surfaces at process start, before any dispatch occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No event names were supplied.
    Empty,

    /// An entry had an empty or whitespace-only name.
    BlankName,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Empty =>
                write!(f, "event catalog is empty; add some webhook events"),
            CatalogError::BlankName =>
                write!(f, "event catalog contains a blank event name"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Subscription creation was rejected.
///
/// Surfaced synchronously to the caller; no attempt record is
/// created for a rejected subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Event name is not in the catalog.
    UnknownEvent { event: String },

    /// Target URL is empty, relative, or otherwise malformed.
    InvalidUrl { url: String, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnknownEvent { event } =>
                write!(f, "event not in catalog: {event}"),
            ValidationError::InvalidUrl { url, reason } =>
                write!(f, "invalid target url {url:?}: {reason}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Lookup of a subscription that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub id: SubscriptionId,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription not found: {}", self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Payload could not be serialized for the declared content type.
///
/// Deterministic, so never retried: the dispatcher records one
/// terminal failed attempt and stops the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Form encoding requires a top-level object.
    NotAnObject,

    /// Form encoding has no representation for nested values.
    NestedValue { key: String },

    /// Serializer failure.
    Serialize { detail: String },
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::NotAnObject =>
                write!(f, "form encoding requires a flat object payload"),
            EncodingError::NestedValue { key } =>
                write!(f, "form encoding cannot represent nested value at key {key:?}"),
            EncodingError::Serialize { detail } =>
                write!(f, "payload serialization failed: {detail}"),
        }
    }
}

impl std::error::Error for EncodingError {}

/// Errors returned when dispatching an event fails *before* any
/// per-subscription delivery begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Event name is not in the catalog.
    UnknownEvent { event: String },

    /// Dispatcher has been shut down.
    Shutdown,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownEvent { event } =>
                write!(f, "event not in catalog: {event}"),
            DispatchError::Shutdown =>
                write!(f, "dispatcher is shut down"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Request exceeded the delivery timeout.
    Timeout,

    /// Connection-level failure; no response received.
    Network,

    /// Receiver answered 408, 429 or 5xx.
    RemoteError,

    /// Receiver definitively rejected the request (other non-2xx).
    Rejected,

    /// Payload could not be encoded for the declared content type.
    Encoding,
}

impl FailureReason {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::Timeout | FailureReason::Network | FailureReason::RemoteError
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network =>
                write!(f, "network error"),
            FailureReason::RemoteError =>
                write!(f, "remote endpoint returned a retryable error"),
            FailureReason::Rejected =>
                write!(f, "remote endpoint rejected the request"),
            FailureReason::Encoding =>
                write!(f, "payload encoding failed"),
        }
    }
}

/// Classified result of a single delivery attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Response received with a 2xx status.
    Delivered {
        status: u16,
        body: String,
        content_type: Option<String>,
    },

    /// Anything else, with whatever response metadata exists.
    Failed {
        reason: FailureReason,
        status: Option<u16>,
        body: String,
        content_type: Option<String>,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Delivered { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptOutcome::Delivered { .. } => false,
            AttemptOutcome::Failed { reason, .. } => reason.is_retryable(),
        }
    }
}
