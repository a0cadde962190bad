//! Token lifetime arithmetic.
//!
//! Providers report expiry in several shapes: a relative `expires_in`, an
//! RFC 3339 instant, or a timestamp without any zone designator. Every shape
//! is converted to a UTC instant here, before any subtraction happens, so a
//! zone-less value can never be compared against a zone-aware one.

use std::fmt;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Upper bound accepted for a provider-reported lifetime, in seconds.
pub const MAX_LIFETIME_SECS: i64 = 7200;

/// Lifetime substituted when the provider value is out of range.
pub const FALLBACK_LIFETIME_SECS: i64 = 3600;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Expiry value as reported by a token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderExpiry {
    /// Seconds from now (`expires_in`).
    Relative(i64),
    /// Instant with an explicit offset.
    Aware(DateTime<FixedOffset>),
    /// Instant without a zone designator; interpreted as UTC.
    Naive(NaiveDateTime),
    /// The provider did not report an expiry.
    Missing,
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

impl ProviderExpiry {
    /// Parses an absolute expiry timestamp.
    ///
    /// Accepts RFC 3339 (`2024-05-01T10:00:00+02:00`), zone-less ISO 8601
    /// (`2024-05-01T10:00:00.123`) and Unix epoch seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the value matches none of these shapes.
    pub fn parse_timestamp(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::Aware(aware));
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(Self::Naive(naive));
            }
        }

        if let Ok(epoch) = raw.parse::<i64>()
            && let Some(instant) = DateTime::from_timestamp(epoch, 0)
        {
            return Ok(Self::Aware(instant.fixed_offset()));
        }

        Err(Error::InvalidResponse(format!(
            "unrecognized expiry timestamp: {raw}"
        )))
    }

    /// Seconds between `now` and the reported expiry, after normalizing the
    /// expiry to UTC. `None` when no expiry was reported.
    #[must_use]
    pub fn seconds_from(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            Self::Relative(secs) => Some(*secs),
            Self::Aware(instant) => Some((instant.with_timezone(&Utc) - now).num_seconds()),
            Self::Naive(naive) => Some((naive.and_utc() - now).num_seconds()),
            Self::Missing => None,
        }
    }
}

/// Why a provider expiry was replaced by the fallback lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAnomaly {
    /// Expiry is at or before the current time.
    NonPositive {
        /// Computed lifetime in seconds.
        raw_secs: i64,
    },
    /// Expiry is further away than [`MAX_LIFETIME_SECS`].
    TooLong {
        /// Computed lifetime in seconds.
        raw_secs: i64,
    },
    /// No expiry reported at all.
    Missing,
}

impl fmt::Display for ExpiryAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositive { raw_secs } => write!(f, "expiry {raw_secs}s is not in the future"),
            Self::TooLong { raw_secs } => {
                write!(f, "expiry {raw_secs}s exceeds {MAX_LIFETIME_SECS}s")
            }
            Self::Missing => f.write_str("no expiry reported"),
        }
    }
}

/// Validated token lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// Seconds until expiry, always in `1..=MAX_LIFETIME_SECS`.
    pub expires_in: i64,
    /// Absolute expiry instant (`now + expires_in`).
    pub expires_at: DateTime<Utc>,
    /// Set when the fallback lifetime was substituted.
    pub anomaly: Option<ExpiryAnomaly>,
}

impl Lifetime {
    /// Computes the lifetime of a token issued at `now`.
    ///
    /// Out-of-range or missing values are replaced by
    /// [`FALLBACK_LIFETIME_SECS`] and reported through `anomaly`.
    #[must_use]
    pub fn compute(expiry: &ProviderExpiry, now: DateTime<Utc>) -> Self {
        let (expires_in, anomaly) = match expiry.seconds_from(now) {
            Some(secs) if secs > 0 && secs <= MAX_LIFETIME_SECS => (secs, None),
            Some(secs) if secs <= 0 => (
                FALLBACK_LIFETIME_SECS,
                Some(ExpiryAnomaly::NonPositive { raw_secs: secs }),
            ),
            Some(secs) => (
                FALLBACK_LIFETIME_SECS,
                Some(ExpiryAnomaly::TooLong { raw_secs: secs }),
            ),
            None => (FALLBACK_LIFETIME_SECS, Some(ExpiryAnomaly::Missing)),
        };

        let expires_at = now + TimeDelta::seconds(expires_in);

        if let Some(anomaly) = anomaly {
            warn!(
                provider_expiry = ?expiry,
                now = %now,
                fallback_secs = FALLBACK_LIFETIME_SECS,
                %anomaly,
                "Token expiry out of range, using fallback lifetime"
            );
        }
        debug!(
            expires_in,
            expires_at = %expires_at,
            now = %now,
            "Computed token lifetime"
        );

        Self {
            expires_in,
            expires_at,
            anomaly,
        }
    }

    /// Returns true when the fallback lifetime was used.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.anomaly.is_some()
    }

    /// Expiry instant in the local time zone, for display.
    #[must_use]
    pub fn expires_at_local(&self) -> DateTime<Local> {
        self.expires_at.with_timezone(&Local)
    }
}
