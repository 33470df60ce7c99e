//! Reference clock synthesized from GPS samples
//!
//! GPS fixes arrive about once per second; NTP requests arrive whenever they like.
//! The clock keeps the most recent sample and extrapolates from it with the local
//! monotonic clock, so any caller can ask "what UTC instant is it now":
//!
//! ```text
//! now = reference_instant + (Instant::now() - local_anchor)
//! dispersion = error_bound + tolerance * (Instant::now() - local_anchor)
//! ```
//!
//! The whole state is one immutable [`ClockState`] behind an [`ArcSwap`]. The serial
//! source swaps in a new state per fix; readers take an `Arc` snapshot and never see
//! a partially written sample.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::core::{ClockConfig, Error, Result};

/// One GPS time observation tied to the local monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// True UTC instant at `local_anchor` (decoded time minus serial delay)
    pub reference_instant: DateTime<Utc>,
    /// Monotonic instant the sentence was fully received
    pub local_anchor: Instant,
    /// Serial delay that was subtracted from the decoded time
    pub applied_delay: chrono::Duration,
    /// Error bound of the serial link
    pub error_bound: Duration,
}

impl ClockSample {
    /// Builds a sample from a decoded sentence time and its arrival instant.
    ///
    /// Fails with `MalformedField` if the delay moves the time out of range.
    pub fn new(
        decoded: DateTime<Utc>,
        local_anchor: Instant,
        applied_delay: chrono::Duration,
        error_bound: Duration,
    ) -> Result<Self> {
        let reference_instant = decoded
            .checked_sub_signed(applied_delay)
            .ok_or_else(|| Error::malformed("delay", applied_delay.to_string()))?;
        Ok(ClockSample {
            reference_instant,
            local_anchor,
            applied_delay,
            error_bound,
        })
    }
}

/// Result of reading the clock at one local instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    /// Extrapolated UTC time
    pub time: DateTime<Utc>,
    /// Reference instant of the sample the reading came from
    pub reference: DateTime<Utc>,
    /// Estimated maximum error of `time`
    pub dispersion: Duration,
    /// Time since the sample's local anchor
    pub age: Duration,
    /// Whether the reading may be served as stratum 1
    pub synchronized: bool,
}

/// Immutable view of the clock
#[derive(Debug, Clone)]
pub struct ClockState {
    sample: Option<ClockSample>,
    generation: u64,
    unsynchronized: Option<String>,
    config: ClockConfig,
}

impl ClockState {
    /// Current sample, if any fix has been published
    pub fn sample(&self) -> Option<&ClockSample> {
        self.sample.as_ref()
    }

    /// Number of samples published before this state
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Why the source gave up on the clock, if it has
    pub fn unsynchronized_reason(&self) -> Option<&str> {
        self.unsynchronized.as_deref()
    }

    /// Advertised dispersion floor while unsynchronized
    pub fn unsynchronized_dispersion(&self) -> Duration {
        self.config.unsynchronized_dispersion
    }

    /// Extrapolates the sample to `local`.
    ///
    /// Fails with `Unsynchronized` only when there is no sample at all; stale or
    /// explicitly abandoned samples still produce a reading, flagged unsynchronized.
    pub fn read_at(&self, local: Instant) -> Result<ClockReading> {
        let sample = self.sample.as_ref().ok_or(Error::Unsynchronized)?;
        let age = local.saturating_duration_since(sample.local_anchor);
        let elapsed = chrono::Duration::from_std(age).map_err(|_| Error::Unsynchronized)?;

        let time = sample
            .reference_instant
            .checked_add_signed(elapsed)
            .ok_or(Error::Unsynchronized)?;

        let drift = age.mul_f64(self.config.frequency_tolerance_ppm * 1e-6);
        Ok(ClockReading {
            time,
            reference: sample.reference_instant,
            dispersion: sample.error_bound.saturating_add(drift),
            age,
            synchronized: self.unsynchronized.is_none() && age <= self.config.max_sample_age,
        })
    }
}

/// Shared clock: one writer (the serial source), any number of readers
pub struct ReferenceClock {
    state: ArcSwap<ClockState>,
    config: ClockConfig,
}

impl ReferenceClock {
    /// Creates a clock with no sample
    pub fn new(config: ClockConfig) -> Self {
        ReferenceClock {
            state: ArcSwap::from_pointee(ClockState {
                sample: None,
                generation: 0,
                unsynchronized: None,
                config,
            }),
            config,
        }
    }

    /// Replaces the current sample and clears any unsynchronized mark
    pub fn publish(&self, sample: ClockSample) {
        let config = self.config;
        self.state.rcu(|current| ClockState {
            sample: Some(sample),
            generation: current.generation + 1,
            unsynchronized: None,
            config,
        });
    }

    /// Flags the clock unsynchronized, keeping the last sample for best-effort reads.
    ///
    /// Returns `false` if it was already flagged.
    pub fn mark_unsynchronized(&self, reason: impl Into<String>) -> bool {
        if self.state.load().unsynchronized.is_some() {
            return false;
        }
        let reason = reason.into();
        self.state.rcu(|current| ClockState {
            unsynchronized: Some(reason.clone()),
            ..ClockState::clone(current)
        });
        true
    }

    /// One consistent view of the clock
    pub fn snapshot(&self) -> Arc<ClockState> {
        self.state.load_full()
    }

    /// Reads the clock at the current instant
    pub fn now(&self) -> Result<ClockReading> {
        self.now_at(Instant::now())
    }

    /// Reads the clock at `local`
    pub fn now_at(&self, local: Instant) -> Result<ClockReading> {
        self.state.load().read_at(local)
    }

    /// Number of samples published so far
    pub fn generation(&self) -> u64 {
        self.state.load().generation
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1994, 3, 23, 12, 35, 19).unwrap()
    }

    fn sample_at(anchor: Instant) -> ClockSample {
        ClockSample::new(reference(), anchor, chrono::Duration::zero(), Duration::from_millis(2))
            .unwrap()
    }

    #[test]
    fn test_no_sample_is_unsynchronized() {
        let clock = ReferenceClock::new(ClockConfig::default());
        assert!(matches!(clock.now(), Err(Error::Unsynchronized)));
        assert_eq!(clock.generation(), 0);
        assert!(clock.snapshot().sample().is_none());
    }

    #[test]
    fn test_extrapolation() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now();
        clock.publish(sample_at(anchor));

        let reading = clock.now_at(anchor + Duration::from_secs(5)).unwrap();
        assert_eq!(reading.time, reference() + chrono::Duration::seconds(5));
        assert_eq!(reading.reference, reference());
        assert_eq!(reading.age, Duration::from_secs(5));
        assert!(reading.synchronized);
    }

    #[test]
    fn test_delay_applied() {
        let anchor = Instant::now();
        let sample = ClockSample::new(
            reference(),
            anchor,
            chrono::Duration::milliseconds(150),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(
            sample.reference_instant,
            reference() - chrono::Duration::milliseconds(150)
        );

        let sample = ClockSample::new(
            reference(),
            anchor,
            chrono::Duration::milliseconds(-20),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(sample.reference_instant, reference() + chrono::Duration::milliseconds(20));
    }

    #[test]
    fn test_out_of_range_delay_rejected() {
        let delay = chrono::Duration::seconds(100_000_000_000_000);
        let result = ClockSample::new(reference(), Instant::now(), delay, Duration::ZERO);
        assert!(matches!(result, Err(Error::MalformedField { field: "delay", .. })));
    }

    #[test]
    fn test_dispersion_saturates() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now();
        let sample =
            ClockSample::new(reference(), anchor, chrono::Duration::zero(), Duration::MAX).unwrap();
        clock.publish(sample);

        let reading = clock.now_at(anchor + Duration::from_secs(60)).unwrap();
        assert_eq!(reading.dispersion, Duration::MAX);
    }

    #[test]
    fn test_monotonic_reads() {
        let clock = ReferenceClock::new(ClockConfig::default());
        clock.publish(sample_at(Instant::now()));

        let first = clock.now().unwrap();
        let second = clock.now().unwrap();
        assert!(second.time >= first.time);
    }

    #[test]
    fn test_read_before_anchor_saturates() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now() + Duration::from_secs(1);
        clock.publish(sample_at(anchor));

        let reading = clock.now_at(anchor - Duration::from_millis(500)).unwrap();
        assert_eq!(reading.time, reference());
        assert_eq!(reading.age, Duration::ZERO);
    }

    #[test]
    fn test_dispersion_grows_with_age() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now();
        clock.publish(sample_at(anchor));

        let fresh = clock.now_at(anchor).unwrap();
        assert_eq!(fresh.dispersion, Duration::from_millis(2));

        // 15 PPM over 4 s is 60 us
        let later = clock.now_at(anchor + Duration::from_secs(4)).unwrap();
        let expected = Duration::from_millis(2) + Duration::from_micros(60);
        let diff = if later.dispersion > expected {
            later.dispersion - expected
        } else {
            expected - later.dispersion
        };
        assert!(diff < Duration::from_nanos(10), "dispersion off by {:?}", diff);
    }

    #[test]
    fn test_staleness() {
        let config = ClockConfig {
            max_sample_age: Duration::from_secs(8),
            ..ClockConfig::default()
        };
        let clock = ReferenceClock::new(config);
        let anchor = Instant::now();
        clock.publish(sample_at(anchor));

        assert!(clock.now_at(anchor + Duration::from_secs(8)).unwrap().synchronized);

        let stale = clock.now_at(anchor + Duration::from_secs(9)).unwrap();
        assert!(!stale.synchronized);
        assert_eq!(stale.time, reference() + chrono::Duration::seconds(9));
    }

    #[test]
    fn test_mark_unsynchronized_and_recover() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now();
        clock.publish(sample_at(anchor));

        assert!(clock.mark_unsynchronized("serial link silent"));
        assert!(!clock.mark_unsynchronized("again"));

        let snapshot = clock.snapshot();
        assert_eq!(snapshot.unsynchronized_reason(), Some("serial link silent"));
        let reading = snapshot.read_at(anchor).unwrap();
        assert!(!reading.synchronized);
        assert_eq!(reading.time, reference());

        clock.publish(sample_at(anchor + Duration::from_secs(1)));
        assert!(clock.now_at(anchor + Duration::from_secs(1)).unwrap().synchronized);
        assert_eq!(clock.generation(), 2);
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let clock = ReferenceClock::new(ClockConfig::default());
        let anchor = Instant::now();
        clock.publish(sample_at(anchor));
        let held = clock.snapshot();

        let newer = ClockSample::new(
            reference() + chrono::Duration::hours(1),
            anchor,
            chrono::Duration::zero(),
            Duration::ZERO,
        )
        .unwrap();
        clock.publish(newer);

        assert_eq!(held.read_at(anchor).unwrap().reference, reference());
        assert_eq!(clock.now_at(anchor).unwrap().reference, newer.reference_instant);
    }
}
