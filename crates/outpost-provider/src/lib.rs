//! The destination-provider trait contract and the publisher lifecycle
//! every transport adapter (`outpost-webhook`, `outpost-adapters`) shares.
//!
//! A `Provider` is a per-destination-type strategy object: it validates
//! and preprocesses a destination's config/credentials, decides what to
//! show a caller in place of raw secrets, computes a human-readable
//! target, and hands out bound `Publisher`s. A `Publisher` is bound to one
//! destination and owns whatever connection state that requires; its
//! `close` must drain in-flight publishes before returning so a consumer
//! can shut down without losing a message that's already underway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use outpost_types::{Destination, DeliveryTask, Result};
use tokio::sync::Notify;

/// Who is asking. Admins may set anything on a destination; tenants are
/// restricted to the whitelisted fields `Preprocess` exposes to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Tenant,
}

/// Options threaded through `Provider::preprocess`.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub role: Role,
}

/// A short, human-readable description of where an event will be sent,
/// shown in place of the raw destination config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub url: Option<String>,
}

impl Target {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: None,
        }
    }

    pub fn with_url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: Some(url.into()),
        }
    }
}

/// A destination-type-specific strategy: validation, preprocessing,
/// obfuscation, target description, and publisher construction.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The `destination.type` tag this provider handles, e.g. `"webhook"`.
    fn destination_type(&self) -> &'static str;

    /// Structural validation, independent of who's asking. Returns every
    /// offending field, not just the first.
    fn validate(&self, destination: &Destination) -> Result<()>;

    /// Apply role-scoped defaults and restrictions in place. `original` is
    /// `None` on create. Tenants may not overwrite an existing credential
    /// field with a new value unless the provider treats it as a rotation
    /// trigger (e.g. `rotate_secret`); admins are unrestricted.
    fn preprocess(
        &self,
        destination: &mut Destination,
        original: Option<&Destination>,
        opts: PreprocessOptions,
    ) -> Result<()>;

    /// What a caller without admin rights sees in place of raw
    /// credentials. Pass-through by default; providers that can derive a
    /// safe partial view (last 4 chars, a key id) may override it.
    fn obfuscate_destination(&self, destination: &Destination) -> Destination {
        destination.clone()
    }

    /// Short label plus optional URL describing where events land.
    fn compute_target(&self, destination: &Destination) -> Target;

    /// Build a `Publisher` bound to this destination. May re-validate.
    async fn create_publisher(&self, destination: &Destination) -> Result<Arc<dyn Publisher>>;
}

/// A destination-bound delivery sink.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver one task. `Ok` always carries a `Delivery` record, whether
    /// the destination accepted or rejected it; `Err` means no delivery
    /// record could be produced at all (the publisher is closed, the call
    /// was cancelled, or the task never reached the destination).
    async fn publish(&self, task: &DeliveryTask) -> Result<outpost_types::Delivery>;

    /// Stop accepting new publishes and wait for in-flight ones to drain.
    /// Idempotent: closing an already-closed publisher is a no-op.
    async fn close(&self);
}

/// Looks providers up by `destination.type`.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.destination_type(), provider);
    }

    pub fn get(&self, destination_type: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(destination_type).cloned()
    }

    pub fn destination_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.keys().copied()
    }
}

/// High bit of the packed state word marks "closing"; the rest counts
/// in-flight publishes. Packing both into one atomic makes the
/// check-and-increment in `start_publish` a single compare-exchange
/// instead of two separately-observable loads, so a `close()` that has
/// just set the flag can never miss a publish that raced in after it.
const CLOSING_BIT: u64 = 1 << 63;
const INFLIGHT_MASK: u64 = !CLOSING_BIT;

/// Shared lifecycle primitive every `Publisher` impl composes rather than
/// inherits: track in-flight publishes, refuse new ones once closing has
/// started, and let `close` block until the count reaches zero.
#[derive(Default)]
pub struct BasePublisher {
    state: AtomicU64,
    notify: Notify,
}

impl BasePublisher {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Reserve a publish slot. Fails with `PublisherClosed` once `close`
    /// has been called, even if it hasn't finished draining yet.
    pub fn start_publish(&self) -> Result<PublishGuard<'_>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & CLOSING_BIT != 0 {
                return Err(outpost_types::OutpostError::PublisherClosed);
            }
            let next = current + 1;
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(PublishGuard { base: self }),
                Err(observed) => current = observed,
            }
        }
    }

    /// Mark closing and wait for every reserved slot to release. Safe to
    /// call more than once; later callers just wait alongside the first.
    pub async fn close(&self) {
        self.state.fetch_or(CLOSING_BIT, Ordering::AcqRel);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.load(Ordering::Acquire) & INFLIGHT_MASK == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSING_BIT != 0
    }

    pub fn inflight(&self) -> u64 {
        self.state.load(Ordering::Acquire) & INFLIGHT_MASK
    }

    fn finish_publish(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        if (previous - 1) & INFLIGHT_MASK == 0 {
            self.notify.notify_waiters();
        }
    }
}

/// Releases its `BasePublisher` slot on drop, so a publish that panics or
/// returns early via `?` still gets counted as finished.
pub struct PublishGuard<'a> {
    base: &'a BasePublisher,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.base.finish_publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn start_publish_succeeds_when_open() {
        let base = BasePublisher::new();
        let guard = base.start_publish().expect("not closing");
        assert_eq!(base.inflight(), 1);
        drop(guard);
        assert_eq!(base.inflight(), 0);
    }

    #[tokio::test]
    async fn close_on_idle_publisher_returns_immediately() {
        let base = BasePublisher::new();
        tokio::time::timeout(Duration::from_millis(50), base.close())
            .await
            .expect("close should not hang with nothing in flight");
        assert!(base.is_closing());
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let base = BasePublisher::new();
        base.close().await;
        match base.start_publish() {
            Err(outpost_types::OutpostError::PublisherClosed) => {}
            other => panic!("expected PublisherClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_waits_for_inflight_publish_to_finish() {
        let base = Arc::new(BasePublisher::new());
        let guard = base.start_publish().expect("not closing");
        assert_eq!(base.inflight(), 1);

        let finished = Arc::new(AtomicBool::new(false));
        let close_base = base.clone();
        let close_finished = finished.clone();
        let closer = tokio::spawn(async move {
            close_base.close().await;
            close_finished.store(true, Ordering::SeqCst);
        });

        // Close must still be waiting; nothing has released the slot yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!finished.load(Ordering::SeqCst));

        drop(guard);
        closer.await.expect("closer task panicked");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn new_publish_cannot_sneak_in_after_close_starts() {
        let base = Arc::new(BasePublisher::new());
        let guard = base.start_publish().expect("not closing");

        let close_base = base.clone();
        let closer = tokio::spawn(async move {
            close_base.close().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            base.start_publish(),
            Err(outpost_types::OutpostError::PublisherClosed)
        ));

        drop(guard);
        closer.await.expect("closer task panicked");
    }

    #[test]
    fn provider_registry_looks_up_by_destination_type() {
        struct Dummy;
        #[async_trait]
        impl Provider for Dummy {
            fn destination_type(&self) -> &'static str {
                "dummy"
            }
            fn validate(&self, _destination: &Destination) -> Result<()> {
                Ok(())
            }
            fn preprocess(
                &self,
                _destination: &mut Destination,
                _original: Option<&Destination>,
                _opts: PreprocessOptions,
            ) -> Result<()> {
                Ok(())
            }
            fn compute_target(&self, _destination: &Destination) -> Target {
                Target::new("dummy")
            }
            async fn create_publisher(&self, _destination: &Destination) -> Result<Arc<dyn Publisher>> {
                unimplemented!()
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Dummy));
        assert!(registry.get("dummy").is_some());
        assert!(registry.get("other").is_none());
    }
}
