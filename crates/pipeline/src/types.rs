//! Shared value types for the generation pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. detection scores are in `[0.0, 10.0]`,
//! token counts are non-negative integers) and participate in domain computations.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token accounting
// ---------------------------------------------------------------------------

/// Number of tokens consumed by a backend call or an entire run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// How machine-generated a piece of text appears, in the range `[0.0, 10.0]`.
///
/// Higher is worse. Produced by the external detection heuristic and averaged by
/// the detection gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DetectionScore(f64);

impl DetectionScore {
    /// Upper bound of the score range.
    pub const MAX: f64 = 10.0;

    /// Creates a [`DetectionScore`], returning `None` if `value` is outside
    /// `[0.0, 10.0]` or not finite.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=Self::MAX).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`DetectionScore`] by clamping `value` into range.
    ///
    /// Non-finite input maps to zero.
    pub fn clamped(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, Self::MAX))
        } else {
            Self(0.0)
        }
    }

    /// The zero score assigned to units that were never scored.
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the score as an `f64` in `[0.0, 10.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for DetectionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Time elapsed from `earlier` to `self`. Negative if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        self.0 - earlier.0
    }

    /// Returns this timestamp shifted by `delta`.
    #[must_use]
    pub fn plus(self, delta: Duration) -> Self {
        Self(self.0 + delta)
    }

    /// Returns this timestamp shifted back by `delta`.
    #[must_use]
    pub fn minus(self, delta: Duration) -> Self {
        Self(self.0 - delta)
    }

    /// The calendar day this instant falls on at the given UTC offset.
    pub fn day_key(self, offset: FixedOffset) -> DayKey {
        DayKey(self.0.with_timezone(&offset).date_naive())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A calendar date used to bucket the daily invocation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey(NaiveDate);

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}
