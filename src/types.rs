use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type used for the JSON encoding.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type used for the form encoding.
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Unique identifier for a subscription.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of subscription ids with other identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to the principal that owns a subscription.
///
/// The engine never interprets this value; identity management
/// lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Identifier for a recorded delivery attempt.
///
/// Ids are assigned from a process-wide sequence, so they order
/// attempts by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

/// Body encoding declared by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Json,
    Form,
}

impl ContentType {
    /// The MIME string sent in the `Content-Type` request header.
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Json => CONTENT_TYPE_JSON,
            ContentType::Form => CONTENT_TYPE_FORM,
        }
    }
}

/// A registered interest in one event name.
///
/// A `Subscription` describes *where* and *how* an event's payload
/// should be delivered. It carries no delivery state beyond the
/// timestamp of the most recent attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Opaque identifier, assigned at creation.
    pub id: SubscriptionId,

    /// Principal that created the subscription.
    pub owner: OwnerId,

    /// Event name this subscription listens for.
    ///
    /// Validated against the injected [`EventCatalog`](crate::EventCatalog)
    /// at creation time.
    pub event: String,

    /// Absolute target URL for delivery.
    pub target_url: String,

    /// Encoding used for the request body.
    pub content_type: ContentType,

    /// Completion time of the most recent delivery attempt,
    /// milliseconds since the epoch. `None` until the first attempt.
    ///
    /// Written only by the dispatcher, last-write-wins on the
    /// attempt's completion time.
    pub last_attempt_at: Option<u64>,

    /// Last modification time, milliseconds since the epoch.
    /// Drives the ordering of
    /// [`find_matching`](crate::SubscriptionRegistry::find_matching).
    pub modified_at: u64,
}

/// One concrete try to deliver a payload to a subscription's target.
///
/// Records are append-only: created once by the dispatcher, never
/// mutated or deleted, even when the subscription they reference is
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Monotonic identifier, ordered by creation.
    pub id: AttemptId,

    /// The subscription this attempt was made for. A reference,
    /// not a copy: the subscription may no longer exist.
    pub subscription: SubscriptionId,

    /// The exact bytes sent to the target, captured at encode time.
    pub payload: Vec<u8>,

    /// 1-based ordinal within one logical delivery sequence.
    pub attempt_number: u32,

    /// Whether the target acknowledged the delivery with a 2xx status.
    pub success: bool,

    /// HTTP status of the response, or `None` if the call never
    /// completed (timeout, connection failure, encoding failure).
    pub response_status: Option<u16>,

    /// Captured response body (bounded) or an error description.
    pub response_message: String,

    /// `Content-Type` header of the response, when one was received.
    pub response_content_type: Option<String>,

    /// Completion time of the attempt, milliseconds since the epoch.
    pub created_at: u64,
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
