//! Time management utilities
//!
//! The simulation runs on a fixed tick while rendering runs as fast as the
//! swapchain allows; [`FixedTimestep`] bridges the two and yields the sub-tick
//! interpolation delta handed to the renderer.

use std::time::{Duration, Instant};

/// Frame timer for FPS reporting
pub struct Timer {
    last_frame: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            last_frame: Instant::now(),
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
        }
    }

    /// Update the timer (should be called once per frame)
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.total_time += self.delta_time;
        self.last_frame = now;
        self.frame_count += 1;
    }

    /// Time since the last frame in seconds
    pub const fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Number of frames counted so far
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average FPS since timer creation
    pub fn average_fps(&self) -> f32 {
        if self.total_time > 0.0 {
            self.frame_count as f32 / self.total_time
        } else {
            0.0
        }
    }
}

/// Simple stopwatch for measuring elapsed time
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub const fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.start_time.map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// Elapsed whole milliseconds, the time base of animations and room scrolling
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Check if the stopwatch is currently running
    pub const fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}

/// Fixed-rate simulation clock
///
/// Feed it wall-clock frame durations; it reports how many whole ticks to
/// simulate and the fraction of a tick left over for interpolation.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_length: Duration,
    accumulator: Duration,
    max_ticks_per_frame: u32,
    tick_count: u64,
}

impl FixedTimestep {
    /// Create a clock ticking `rate_hz` times per second
    pub fn new(rate_hz: u32) -> Self {
        let rate_hz = rate_hz.max(1);
        Self {
            tick_length: Duration::from_secs(1) / rate_hz,
            accumulator: Duration::ZERO,
            max_ticks_per_frame: 5,
            tick_count: 0,
        }
    }

    /// Length of one tick
    pub const fn tick_length(&self) -> Duration {
        self.tick_length
    }

    /// Total ticks consumed
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Add elapsed frame time and return the number of ticks to simulate now
    ///
    /// After a long stall the backlog is dropped instead of simulated, so the
    /// game never spirals trying to catch up.
    pub fn advance(&mut self, frame_time: Duration) -> u32 {
        self.accumulator += frame_time;
        let mut ticks = 0;
        while self.accumulator >= self.tick_length {
            self.accumulator -= self.tick_length;
            ticks += 1;
            if ticks == self.max_ticks_per_frame {
                log::debug!("Dropping {:?} of simulation backlog", self.accumulator);
                self.accumulator = Duration::ZERO;
                break;
            }
        }
        self.tick_count += u64::from(ticks);
        ticks
    }

    /// Fraction of the way into the next tick, in `[0, 1)`
    pub fn interpolation_delta(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.tick_length.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_timestep_counts_whole_ticks() {
        let mut clock = FixedTimestep::new(20);
        assert_eq!(clock.tick_length(), Duration::from_millis(50));

        assert_eq!(clock.advance(Duration::from_millis(30)), 0);
        assert_relative_eq!(clock.interpolation_delta(), 0.6, epsilon = 1e-5);

        assert_eq!(clock.advance(Duration::from_millis(30)), 1);
        assert_relative_eq!(clock.interpolation_delta(), 0.2, epsilon = 1e-5);
        assert_eq!(clock.tick_count(), 1);
    }

    #[test]
    fn test_fixed_timestep_drops_backlog() {
        let mut clock = FixedTimestep::new(20);
        assert_eq!(clock.advance(Duration::from_secs(10)), 5);
        assert_relative_eq!(clock.interpolation_delta(), 0.0);
    }

    #[test]
    fn test_stopwatch_accumulates_only_while_running() {
        let mut stopwatch = Stopwatch::new();
        assert!(!stopwatch.is_running());
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
        stopwatch.start();
        assert!(stopwatch.is_running());
        stopwatch.stop();
        let frozen = stopwatch.elapsed();
        assert_eq!(stopwatch.elapsed(), frozen);
    }
}
