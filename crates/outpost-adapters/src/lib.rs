//! Non-HTTP destination providers.
//!
//! `outpost-webhook` shows the `Provider`/`Publisher` contract applied to
//! HTTP; this crate shows the same contract applied to two transports that
//! never speak HTTP, proving the adapter model is transport-agnostic.
//! Both adapters are thin reference implementations: the message-broker
//! client and the object-store client are external collaborators this
//! workspace does not own, exactly like the real AMQP/Kafka/SQS transport.
//! Each adapter still runs the full `Provider` lifecycle (validate,
//! preprocess, publish, close-draining) so callers can exercise the
//! end-to-end dispatch path without a real broker or bucket.

pub mod broker;
pub mod objectstore;

pub use broker::MessageBrokerProvider;
pub use objectstore::ObjectStoreProvider;
