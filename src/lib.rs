//! A single-process webhook delivery engine.
//!
//! Named application events fire, registered subscriptions are
//! resolved, payloads are encoded and POSTed to each subscriber's
//! URL, and every attempt's outcome lands in an **append-only**
//! attempt log.
//!
//! ## Guarantees
//! - At-least-once, best-effort delivery with bounded retries
//! - Per-subscription isolation: one failing target never affects another
//! - Strict attempt ordering within one delivery sequence
//! - Immutable, audit-grade attempt records
//!
//! ## Non-Guarantees
//! - Exactly-once delivery (the network precludes this)
//! - Receiver acknowledgement beyond HTTP status interpretation
//! - Payload transformation or templating
//!
//! The valid event names come from an [`EventCatalog`] built once at
//! process start and injected explicitly; the engine reads no ambient
//! global configuration.

mod catalog;
mod codec;
mod dispatcher;
mod error;
mod recorder;
mod registry;
mod types;
mod worker;

#[cfg(feature = "postgres")]
mod recorder_postgres;

pub use catalog::EventCatalog;
pub use codec::encode;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{
    AttemptOutcome,
    CatalogError,
    DispatchError,
    EncodingError,
    FailureReason,
    NotFoundError,
    ValidationError,
};
pub use recorder::{AttemptLog, InMemoryAttemptLog};
pub use registry::SubscriptionRegistry;
pub use types::{
    AttemptId, ContentType, DeliveryAttempt, OwnerId, Subscription, SubscriptionId,
    CONTENT_TYPE_FORM, CONTENT_TYPE_JSON,
};

#[cfg(feature = "postgres")]
pub use recorder_postgres::PostgresAttemptLog;
