//! Retry backoff policies plus the idempotency/retry key construction
//! rules that tie a delivery task back to a stable slot.
//!
//! The backoff half of this crate is carried over near-verbatim from a
//! general-purpose retry utility: strategy selection, jitter, and
//! per-error-class overrides are exactly the kind of infrastructure a
//! delivery system and a CLI tool both need, just pointed at a different
//! caller.

use std::time::Duration;

use outpost_types::DeliveryTask;
use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately.
    Immediate,
    /// Delay doubles each attempt.
    #[default]
    Exponential,
    /// Delay increases linearly each attempt.
    Linear,
    /// Same delay every attempt.
    Constant,
}

/// Predefined retry policies with sensible defaults for different
/// delivery workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    /// Fully custom configuration, supplied explicitly.
    Custom,
}

impl RetryPolicy {
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                jitter: 0.5,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 10,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// 0.0 = no jitter, 1.0 = full jitter.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        RetryPolicy::Default.to_config()
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    #[default]
    Retryable,
    /// Outcome unknown; the publish may have actually succeeded.
    Ambiguous,
    Permanent,
}

/// Per-error-class retry configuration override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerErrorConfig {
    #[serde(default)]
    pub retryable: Option<RetryStrategyConfig>,
    #[serde(default)]
    pub ambiguous: Option<RetryStrategyConfig>,
    #[serde(default)]
    pub permanent: Option<RetryStrategyConfig>,
}

/// Delay before the next retry attempt. `attempt` is 1-indexed.
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Pick the retry configuration for `error_class`, falling back to
/// `default_config` if no per-class override is set.
pub fn config_for_error(
    default_config: &RetryStrategyConfig,
    per_error_config: Option<&PerErrorConfig>,
    error_class: ErrorClass,
) -> RetryStrategyConfig {
    if let Some(per_error) = per_error_config {
        let overridden = match error_class {
            ErrorClass::Retryable => per_error.retryable.as_ref(),
            ErrorClass::Ambiguous => per_error.ambiguous.as_ref(),
            ErrorClass::Permanent => per_error.permanent.as_ref(),
        };
        if let Some(config) = overridden {
            return config.clone();
        }
    }
    default_config.clone()
}

/// `event_id:destination_id` for automatic deliveries, so repeated
/// automatic redeliveries of the same task deduplicate against each
/// other; `event_id:destination_id:manual:<nonce>` for manual ones, so
/// each manual `/retry` call gets its own slot instead of colliding with
/// whatever automatic retry is already scheduled.
pub fn idempotency_key(event_id: &str, destination_id: &str, manual_nonce: Option<&str>) -> String {
    match manual_nonce {
        Some(nonce) => format!("{event_id}:{destination_id}:manual:{nonce}"),
        None => format!("{event_id}:{destination_id}"),
    }
}

/// `event_id:destination_id`, shared between automatic and manual
/// retries so that a manual `/retry` can cancel whatever automatic
/// retry is already scheduled for the same task.
pub fn retry_id(event_id: &str, destination_id: &str) -> String {
    format!("{event_id}:{destination_id}")
}

/// Convenience accessors mirroring `idempotency_key`/`retry_id` on a
/// `DeliveryTask` directly.
pub trait DeliveryTaskExt {
    fn idempotency_key(&self) -> String;
    fn retry_id(&self) -> String;
}

impl DeliveryTaskExt for DeliveryTask {
    fn idempotency_key(&self) -> String {
        let nonce = if self.manual { self.manual_nonce.as_deref() } else { None };
        idempotency_key(&self.event.id, &self.destination_id, nonce)
    }

    fn retry_id(&self) -> String {
        retry_id(&self.event.id, &self.destination_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_doubles() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
            max_attempts: 20,
        };
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(5));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(6));
    }

    #[test]
    fn immediate_strategy_has_no_delay() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            ..RetryPolicy::Default.to_config()
        };
        assert_eq!(calculate_delay(&config, 5), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter: 0.5,
            max_attempts: 10,
        };
        for _ in 0..50 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn per_error_override_falls_back_to_default() {
        let default = RetryPolicy::Default.to_config();
        let per_error = PerErrorConfig {
            permanent: Some(RetryStrategyConfig {
                max_attempts: 0,
                ..RetryPolicy::Conservative.to_config()
            }),
            ..Default::default()
        };
        let retryable = config_for_error(&default, Some(&per_error), ErrorClass::Retryable);
        assert_eq!(retryable.max_attempts, default.max_attempts);

        let permanent = config_for_error(&default, Some(&per_error), ErrorClass::Permanent);
        assert_eq!(permanent.max_attempts, 0);
    }

    #[test]
    fn idempotency_key_automatic_vs_manual() {
        assert_eq!(idempotency_key("evt1", "dest1", None), "evt1:dest1");
        assert_eq!(
            idempotency_key("evt1", "dest1", Some("abc123")),
            "evt1:dest1:manual:abc123"
        );
    }

    #[test]
    fn retry_id_ignores_manual_flag() {
        assert_eq!(retry_id("evt1", "dest1"), "evt1:dest1");
    }

    proptest::proptest! {
        #[test]
        fn calculated_delay_never_exceeds_jittered_max(
            strategy in prop_oneof![
                Just(RetryStrategyType::Immediate),
                Just(RetryStrategyType::Exponential),
                Just(RetryStrategyType::Linear),
                Just(RetryStrategyType::Constant),
            ],
            base_millis in 0u64..10_000,
            max_millis in 0u64..10_000,
            jitter in 0.0f64..1.0,
            attempt in 1u32..50,
        ) {
            let config = RetryStrategyConfig {
                strategy,
                max_attempts: 10,
                base_delay: Duration::from_millis(base_millis),
                max_delay: Duration::from_millis(max_millis),
                jitter,
            };
            let delay = calculate_delay(&config, attempt);
            // jitter can scale the capped delay up to `1.0 + jitter` of itself.
            let upper_bound = Duration::from_millis((max_millis as f64 * (1.0 + jitter)).ceil() as u64 + 1);
            prop_assert!(delay <= upper_bound);
        }
    }

    #[test]
    fn delivery_task_ext_matches_free_functions() {
        use chrono::Utc;
        use outpost_types::Event;
        use std::collections::BTreeMap;

        let event = Event {
            id: "evt1".into(),
            tenant_id: "t1".into(),
            destination_id: None,
            topic: "order.created".into(),
            time: Utc::now(),
            metadata: BTreeMap::new(),
            data: serde_json::json!({}),
            eligible_for_retry: true,
            telemetry: None,
        };
        let automatic = DeliveryTask {
            event: event.clone(),
            destination_id: "dest1".into(),
            attempt: 0,
            manual: false,
            manual_nonce: None,
            telemetry: None,
        };
        assert_eq!(automatic.idempotency_key(), "evt1:dest1");
        assert_eq!(automatic.retry_id(), "evt1:dest1");

        let manual = DeliveryTask {
            manual: true,
            manual_nonce: Some("nonce-1".into()),
            ..automatic
        };
        assert_eq!(manual.idempotency_key(), "evt1:dest1:manual:nonce-1");
        assert_eq!(manual.retry_id(), "evt1:dest1");
    }
}
