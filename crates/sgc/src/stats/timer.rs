//! GC Timer - Timing Utilities

use std::time::{Duration, Instant};

/// GcTimer - timer for one phase or pause
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `callback` with the elapsed time when dropped
pub struct ScopedTimer<'a> {
    start: Instant,
    callback: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Duration) + 'a,
    {
        Self {
            start: Instant::now(),
            callback: Box::new(callback),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        (self.callback)(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_timer_reports_on_drop() {
        let mut seen = None;
        {
            let _t = ScopedTimer::new(|d| seen = Some(d));
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(seen.unwrap() >= Duration::from_millis(2));
    }
}
