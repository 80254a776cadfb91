//! Pipeline configuration
//!
//! Every option resolves independently through the same chain:
//!
//! 1. an explicit value (CLI flag or [`PipelineOverrides`] set in code)
//! 2. the environment variable, if set, non-empty and parseable
//! 3. the built-in default
//!
//! The queue URL and the egress bucket have no default; leaving both the
//! explicit value and the variable unset is a [`ConduitError::Config`].
//! Resolution runs once at startup and produces an immutable
//! [`PipelineConfig`] that every lane shares.

use conduit_common::{ConduitError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Defaults
// ============================================================================

/// Default maximum number of messages requested per poll.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Default interval between polls in milliseconds.
pub const DEFAULT_POLL_FREQUENCY_MS: u64 = 3000;

/// Default visibility lease in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 10;

/// Default number of lanes.
pub const DEFAULT_CONCURRENCY: u32 = 1;

/// Default per-lane ceiling on running stage tasks; 0 is unbounded.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 0;

/// Default time a stopping lane waits for dispatched work.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Limits
// ============================================================================

/// Largest receive batch the queue accepts.
pub const MAX_BATCH_SIZE: u32 = 10;

/// Longest accepted poll interval in milliseconds, one day.
pub const MAX_POLL_FREQUENCY_MS: u64 = 86_400_000;

// ============================================================================
// Environment variables
// ============================================================================

pub const ENV_BATCH_SIZE: &str = "CONDUIT_BATCH_SIZE";
pub const ENV_POLL_FREQUENCY: &str = "CONDUIT_POLL_FREQUENCY";
pub const ENV_VISIBILITY_TIMEOUT: &str = "CONDUIT_VISIBILITY_TIMEOUT";
pub const ENV_CONCURRENCY: &str = "CONDUIT_CONCURRENCY";
pub const ENV_QUEUE_URL: &str = "CONDUIT_QUEUE_URL";
pub const ENV_EGRESS_BUCKET: &str = "CONDUIT_S3_EGRESS_BUCKET";
pub const ENV_MAX_IN_FLIGHT: &str = "CONDUIT_MAX_IN_FLIGHT";
pub const ENV_EMPTY_OUTPUT_POLICY: &str = "CONDUIT_EMPTY_OUTPUT_POLICY";
pub const ENV_DRAIN_TIMEOUT: &str = "CONDUIT_DRAIN_TIMEOUT";

/// What to do with a record whose transform produced no output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyOutputPolicy {
    /// Leave the message on the queue; it is redelivered after its lease
    #[default]
    Retain,
    /// Delete the message without writing anything
    Acknowledge,
}

impl FromStr for EmptyOutputPolicy {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "retain" | "keep" => Ok(Self::Retain),
            "acknowledge" | "ack" | "drop" => Ok(Self::Acknowledge),
            other => Err(ConduitError::config(format!(
                "invalid empty output policy '{other}', expected 'retain' or 'acknowledge'"
            ))),
        }
    }
}

/// Explicit values that win over the environment
#[derive(Debug, Clone, Default)]
pub struct PipelineOverrides {
    pub batch_size: Option<u32>,
    pub poll_frequency_ms: Option<u64>,
    pub visibility_timeout_secs: Option<u64>,
    pub concurrency: Option<u32>,
    pub queue_url: Option<String>,
    pub egress_bucket: Option<String>,
    pub max_in_flight: Option<usize>,
    pub empty_output: Option<EmptyOutputPolicy>,
    pub drain_timeout_secs: Option<u64>,
}

impl PipelineOverrides {
    pub fn batch_size(mut self, value: u32) -> Self {
        self.batch_size = Some(value);
        self
    }

    pub fn poll_frequency_ms(mut self, value: u64) -> Self {
        self.poll_frequency_ms = Some(value);
        self
    }

    pub fn visibility_timeout_secs(mut self, value: u64) -> Self {
        self.visibility_timeout_secs = Some(value);
        self
    }

    pub fn concurrency(mut self, value: u32) -> Self {
        self.concurrency = Some(value);
        self
    }

    pub fn queue_url(mut self, value: impl Into<String>) -> Self {
        self.queue_url = Some(value.into());
        self
    }

    pub fn egress_bucket(mut self, value: impl Into<String>) -> Self {
        self.egress_bucket = Some(value.into());
        self
    }

    pub fn max_in_flight(mut self, value: usize) -> Self {
        self.max_in_flight = Some(value);
        self
    }

    pub fn empty_output(mut self, value: EmptyOutputPolicy) -> Self {
        self.empty_output = Some(value);
        self
    }

    pub fn drain_timeout_secs(mut self, value: u64) -> Self {
        self.drain_timeout_secs = Some(value);
        self
    }
}

/// Resolved, validated pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub batch_size: u32,
    pub poll_frequency: Duration,
    pub visibility_timeout: Duration,
    pub concurrency: u32,
    pub queue_url: String,
    pub egress_bucket: String,
    pub max_in_flight: usize,
    pub empty_output: EmptyOutputPolicy,
    pub drain_timeout: Duration,
}

impl PipelineConfig {
    /// Load `.env`, then resolve against the process environment
    pub fn load(overrides: PipelineOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env(overrides)
    }

    pub fn from_env(overrides: PipelineOverrides) -> Result<Self> {
        Self::resolve(overrides, |name| std::env::var(name).ok())
    }

    /// Resolve every option, reading variables through `lookup`
    pub fn resolve<F>(overrides: PipelineOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch_size = resolve_positive(
            "batch size",
            overrides.batch_size,
            lookup(ENV_BATCH_SIZE).as_deref(),
            DEFAULT_BATCH_SIZE,
        )?;
        let poll_frequency_ms = resolve_positive(
            "poll frequency",
            overrides.poll_frequency_ms,
            lookup(ENV_POLL_FREQUENCY).as_deref(),
            DEFAULT_POLL_FREQUENCY_MS,
        )?;
        let visibility_timeout_secs = resolve_positive(
            "visibility timeout",
            overrides.visibility_timeout_secs,
            lookup(ENV_VISIBILITY_TIMEOUT).as_deref(),
            DEFAULT_VISIBILITY_TIMEOUT_SECS,
        )?;
        let concurrency = resolve_positive(
            "concurrency",
            overrides.concurrency,
            lookup(ENV_CONCURRENCY).as_deref(),
            DEFAULT_CONCURRENCY,
        )?;
        let queue_url = resolve_text(
            "queue url",
            overrides.queue_url,
            lookup(ENV_QUEUE_URL).as_deref(),
            None,
        )?;
        let egress_bucket = resolve_text(
            "egress bucket",
            overrides.egress_bucket,
            lookup(ENV_EGRESS_BUCKET).as_deref(),
            None,
        )?;
        let max_in_flight = resolve(
            "max in flight",
            overrides.max_in_flight,
            lookup(ENV_MAX_IN_FLIGHT).as_deref(),
            Some(DEFAULT_MAX_IN_FLIGHT),
        )?;
        let empty_output = resolve(
            "empty output policy",
            overrides.empty_output,
            lookup(ENV_EMPTY_OUTPUT_POLICY).as_deref(),
            Some(EmptyOutputPolicy::default()),
        )?;
        let drain_timeout_secs = resolve(
            "drain timeout",
            overrides.drain_timeout_secs,
            lookup(ENV_DRAIN_TIMEOUT).as_deref(),
            Some(DEFAULT_DRAIN_TIMEOUT_SECS),
        )?;

        let config = Self {
            batch_size,
            poll_frequency: Duration::from_millis(poll_frequency_ms),
            visibility_timeout: Duration::from_secs(visibility_timeout_secs),
            concurrency,
            queue_url,
            egress_bucket,
            max_in_flight,
            empty_output,
            drain_timeout: Duration::from_secs(drain_timeout_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants a hand-built config must also satisfy
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConduitError::config("batch size must be greater than 0"));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConduitError::config(format!(
                "batch size must be at most {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.poll_frequency.is_zero() {
            return Err(ConduitError::config("poll frequency must be greater than 0"));
        }
        if self.poll_frequency > Duration::from_millis(MAX_POLL_FREQUENCY_MS) {
            return Err(ConduitError::config(format!(
                "poll frequency must be at most {}ms, got {:?}",
                MAX_POLL_FREQUENCY_MS, self.poll_frequency
            )));
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConduitError::config(
                "visibility timeout must be greater than 0",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConduitError::config("concurrency must be greater than 0"));
        }
        if self.queue_url.trim().is_empty() {
            return Err(ConduitError::config("queue url cannot be empty"));
        }
        if self.egress_bucket.trim().is_empty() {
            return Err(ConduitError::config("egress bucket cannot be empty"));
        }
        if self.visibility_timeout < self.poll_frequency {
            warn!(
                visibility = ?self.visibility_timeout,
                poll = ?self.poll_frequency,
                "Visibility timeout is shorter than the poll interval; messages may be redelivered while still in flight"
            );
        }
        Ok(())
    }

    /// Delay before lane `lane` starts polling
    ///
    /// Lanes are spread evenly across one poll interval so that `concurrency`
    /// lanes never poll in a burst.
    ///
    /// Falls back to no offset if the product overflows, which a validated
    /// config never reaches.
    pub fn lane_start_offset(&self, lane: u32) -> Duration {
        self.poll_frequency
            .checked_mul(lane)
            .and_then(|spread| spread.checked_div(self.concurrency))
            .unwrap_or_default()
    }
}

/// Resolve one option: explicit, then environment, then default
///
/// An environment value that is blank or fails to parse is skipped with a
/// warning. Without a default, an unresolved option is a configuration error.
pub fn resolve<T>(
    option: &str,
    explicit: Option<T>,
    env_value: Option<&str>,
    default: Option<T>,
) -> Result<T>
where
    T: FromStr,
{
    resolve_where(option, explicit, env_value, default, |_| true)
}

fn resolve_where<T, P>(
    option: &str,
    explicit: Option<T>,
    env_value: Option<&str>,
    default: Option<T>,
    accept: P,
) -> Result<T>
where
    T: FromStr,
    P: Fn(&T) -> bool,
{
    if let Some(value) = explicit {
        return Ok(value);
    }

    if let Some(raw) = env_value.map(str::trim).filter(|raw| !raw.is_empty()) {
        match raw.parse::<T>() {
            Ok(value) if accept(&value) => return Ok(value),
            _ => warn!(option, value = raw, "Ignoring invalid environment value"),
        }
    }

    default.ok_or_else(|| ConduitError::config(format!("{option} is required but was not set")))
}

/// Numeric option that must be greater than zero
///
/// A zero from the environment falls through to the default; an explicit zero
/// is left for [`PipelineConfig::validate`] to reject.
fn resolve_positive<T>(option: &str, explicit: Option<T>, env_value: Option<&str>, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    resolve_where(option, explicit, env_value, Some(default), |value| {
        *value > T::default()
    })
}

/// Text option where an empty explicit value counts as unset
fn resolve_text(
    option: &str,
    explicit: Option<String>,
    env_value: Option<&str>,
    default: Option<&str>,
) -> Result<String> {
    let explicit = explicit.filter(|value| !value.trim().is_empty());
    resolve(option, explicit, env_value, default.map(str::to_string))
}
