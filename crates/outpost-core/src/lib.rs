//! Outpost core: the facade crate. Every other `outpost-*` crate is
//! re-exported as a module here, plus the glue this workspace needs but
//! no single leaf crate owns: the `MessageQueue`/`DeliveryLog`
//! external-collaborator seams and the `Dispatcher`/`Consumer` pair that
//! wires ingestion through matching to delivery and retry scheduling.
//!
//! ```text
//! ingest(event) -> MatchEvent -> []DestinationSummary
//!   -> DeliveryTask (one per match) -> MessageQueue::enqueue
//!   -> [consumer loop] -> MessageQueue::dequeue -> Consumer::process_task
//!   -> Destination lookup -> Provider::create_publisher -> Publisher::publish
//!   -> DeliveryLog::record -> (failure) RetryScheduler::schedule
//! ```
//!
//! Everything left of `MessageQueue::enqueue` is [`outpost_store`] plus
//! [`Dispatcher`]; everything right of `MessageQueue::dequeue` is
//! [`outpost_provider`]/[`outpost_webhook`]/[`outpost_adapters`] plus
//! [`Consumer`]. Neither half of the pipeline is synchronous with the
//! other — ingestion returns once the task is persisted to the queue,
//! not once it's delivered.

/// Domain types and the shared error taxonomy.
pub use outpost_types as types;

/// Key-value store driver abstraction.
pub use outpost_kv as kv;

/// Symmetric encryption of credential blobs at rest.
pub use outpost_cipher as cipher;

/// Recursive JSON-schema content matcher.
pub use outpost_matcher as matcher;

/// Retry policy/backoff, idempotency key, and retry-id construction.
pub use outpost_retry as retry;

/// Webhook signature manager: secrets, templates, algorithms, encoders.
pub use outpost_signature as signature;

/// The `Provider`/`Publisher` trait contract and the base publisher
/// lifecycle every adapter shares.
pub use outpost_provider as provider;

/// HTTP webhook providers: Standard Webhooks and classic Outpost.
pub use outpost_webhook as webhook;

/// Non-HTTP destination providers: message broker, object store.
pub use outpost_adapters as adapters;

/// Tenant/destination registry and event-matching engine.
pub use outpost_store as store;

mod dispatch;
mod log;
mod queue;
mod retry_scheduler;

pub use dispatch::{Consumer, Dispatcher};
pub use log::{DeliveryLog, InMemoryDeliveryLog};
pub use queue::{InMemoryQueue, MessageQueue};
pub use retry_scheduler::{InMemoryRetryScheduler, RetryScheduler};
