use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::{Error, SerialConfig};
use crate::util;
use super::clock::{ClockSample, ReferenceClock};
use super::nmea;
use super::source::SentenceReader;

/// Longest uninterrupted sleep while backing off, so shutdown stays responsive
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Counters kept by the serial time source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Complete lines read from the device
    pub lines: u64,
    /// Samples published to the clock
    pub published: u64,
    /// Fixes the receiver flagged as not valid
    pub invalid_fixes: u64,
    /// Sentences of another kind than the configured one
    pub ignored: u64,
    /// Lines dropped for bad checksums or fields
    pub decode_failures: u64,
    /// Failed reads, including end of file
    pub io_errors: u64,
    /// Times the clock was marked unsynchronized
    pub unsync_transitions: u64,
}

/// Feeds the reference clock from a GPS receiver
///
/// Runs on a dedicated blocking thread and is the clock's only writer.
pub struct GpsTimeSource<R: SentenceReader> {
    reader: R,
    clock: Arc<ReferenceClock>,
    config: SerialConfig,
    delay: chrono::Duration,
    error_bound: Duration,
    stats: SourceStats,
    last_data: Instant,
    consecutive_errors: u32,
    backoff: Duration,
}

impl<R: SentenceReader> GpsTimeSource<R> {
    pub fn new(reader: R, clock: Arc<ReferenceClock>, config: SerialConfig) -> Self {
        GpsTimeSource {
            reader,
            clock,
            delay: util::signed_secs_to_delta(config.delay),
            error_bound: util::secs_to_duration(config.error_bound),
            backoff: config.retry_backoff,
            config,
            stats: SourceStats::default(),
            last_data: Instant::now(),
            consecutive_errors: 0,
        }
    }

    /// Counters so far
    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    /// Reads sentences until `shutdown` is cancelled.
    pub fn run(&mut self, shutdown: &CancellationToken) -> SourceStats {
        info!(
            device = %self.config.device,
            sentence = %self.config.sentence,
            delay = self.config.delay,
            error_bound = util::duration_to_secs(self.error_bound),
            "Serial time source started"
        );

        let mut line = String::new();
        self.last_data = Instant::now();

        while !shutdown.is_cancelled() {
            match self.reader.read_line(&mut line) {
                Ok(n) if n > 0 && line.ends_with('\n') => {
                    let arrival = Instant::now();
                    self.last_data = arrival;
                    self.consecutive_errors = 0;
                    self.backoff = self.config.retry_backoff;
                    self.ingest_line(&line, arrival);
                    line.clear();
                }
                Ok(_) => {
                    line.clear();
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "serial device closed");
                    self.handle_io_error(eof, shutdown);
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    let now = Instant::now();
                    if !line.is_empty() {
                        // Part of a sentence arrived, the link is alive
                        self.last_data = now;
                    }
                    self.check_silence(now);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    // Line noise that is not UTF-8
                    self.stats.decode_failures += 1;
                    debug!(error = %e, "Dropped undecodable serial data");
                    line.clear();
                }
                Err(e) => {
                    line.clear();
                    self.handle_io_error(e, shutdown);
                }
            }
        }

        info!(
            lines = self.stats.lines,
            published = self.stats.published,
            invalid_fixes = self.stats.invalid_fixes,
            ignored = self.stats.ignored,
            decode_failures = self.stats.decode_failures,
            io_errors = self.stats.io_errors,
            unsync_transitions = self.stats.unsync_transitions,
            "Serial time source stopped"
        );
        self.stats.clone()
    }

    /// Decodes one complete line received at `arrival`, publishing it if it is
    /// a valid fix of the configured kind.
    pub fn ingest_line(&mut self, line: &str, arrival: Instant) -> Option<ClockSample> {
        self.stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let fix = match nmea::decode(line) {
            Ok(fix) => fix,
            Err(Error::UnsupportedSentence(id)) => {
                self.stats.ignored += 1;
                trace!(sentence = %id, "Ignoring sentence");
                return None;
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                if e.is_recoverable() {
                    debug!(error = %e, line = %line, "Dropped NMEA sentence");
                } else {
                    warn!(error = %e, line = %line, "Failed to decode NMEA sentence");
                }
                return None;
            }
        };

        if fix.sentence != self.config.sentence {
            self.stats.ignored += 1;
            trace!(sentence = %fix.sentence, "Ignoring sentence of unconfigured type");
            return None;
        }
        if !fix.fix_valid {
            self.stats.invalid_fixes += 1;
            debug!(utc = %fix.utc, "Receiver reports no valid fix");
            return None;
        }

        let sample = match ClockSample::new(fix.utc, arrival, self.delay, self.error_bound) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(error = %e, utc = %fix.utc, "Serial delay puts fix out of range");
                return None;
            }
        };
        let previous = self.clock.snapshot();
        self.clock.publish(sample);
        self.stats.published += 1;

        if previous.sample().is_none() {
            info!(utc = %sample.reference_instant, "First GPS fix, clock synchronized");
        } else if let Some(reason) = previous.unsynchronized_reason() {
            info!(utc = %sample.reference_instant, was = %reason, "Clock resynchronized");
        } else {
            trace!(utc = %sample.reference_instant, "Published GPS sample");
        }
        Some(sample)
    }

    /// Marks the clock unsynchronized once the link has been silent too long.
    pub fn check_silence(&mut self, now: Instant) {
        let silent = now.saturating_duration_since(self.last_data);
        if silent >= self.config.silence_limit() {
            self.mark_unsynchronized(format!("no serial data for {:.1}s", silent.as_secs_f64()));
        }
    }

    fn mark_unsynchronized(&mut self, reason: String) {
        if self.clock.mark_unsynchronized(reason.as_str()) {
            self.stats.unsync_transitions += 1;
            warn!(device = %self.config.device, reason = %reason, "Clock marked unsynchronized");
        }
    }

    fn handle_io_error(&mut self, error: io::Error, shutdown: &CancellationToken) {
        self.stats.io_errors += 1;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        warn!(
            device = %self.config.device,
            error = %error,
            attempt = self.consecutive_errors,
            "Serial read failed"
        );

        if self.consecutive_errors >= self.config.max_read_errors {
            self.mark_unsynchronized(format!(
                "{} consecutive serial read errors",
                self.consecutive_errors
            ));
        }
        self.check_silence(Instant::now());

        let delay = self.backoff;
        self.backoff = self
            .backoff
            .saturating_mul(2)
            .min(self.config.max_retry_backoff);
        if !sleep_unless_cancelled(delay, shutdown) {
            return;
        }

        if let Err(e) = self.reader.reconnect() {
            warn!(device = %self.config.device, error = %e, "Serial reconnect failed");
        }
    }
}

/// Sleeps for `duration`, returning `false` early if `shutdown` fires.
fn sleep_unless_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
