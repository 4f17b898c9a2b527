//! Bounded reading history with median smoothing.
//!
//! Each vial keeps the last `window` readings in a fixed-capacity deque;
//! the oldest reading is evicted once the window is full.  The median
//! rejects single-sample sensor spikes that a mean would follow.

use heapless::Deque;

/// Largest supported smoothing window.
pub const MAX_WINDOW: usize = 64;

#[derive(Debug, Clone)]
pub struct ReadingWindow {
    window: usize,
    samples: Deque<f64, MAX_WINDOW>,
}

impl ReadingWindow {
    /// `window` is clamped to `1..=MAX_WINDOW`; callers validate it first.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.clamp(1, MAX_WINDOW),
            samples: Deque::new(),
        }
    }

    pub fn push(&mut self, reading: f64) {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        // Cannot fail: length is below `window` <= capacity.
        let _ = self.samples.push_back(reading);
    }

    /// True once `window` readings have been collected.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Median of the finite readings, or NaN if there are none.
    pub fn median(&self) -> f64 {
        let mut finite: Vec<f64> = self.samples.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return f64::NAN;
        }
        finite.sort_by(f64::total_cmp);
        let mid = finite.len() / 2;
        if finite.len() % 2 == 0 {
            (finite[mid - 1] + finite[mid]) / 2.0
        } else {
            finite[mid]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut w = ReadingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert!(w.is_full());
        assert_eq!(w.median(), 3.0);
        assert_eq!(w.latest(), Some(4.0));
    }

    #[test]
    fn median_rejects_single_spike() {
        let mut w = ReadingWindow::new(5);
        for v in [0.40, 0.41, 9.0, 0.42, 0.40] {
            w.push(v);
        }
        assert!((w.median() - 0.41).abs() < 1e-12);
    }

    #[test]
    fn median_of_even_window_averages_middle_pair() {
        let mut w = ReadingWindow::new(4);
        for v in [1.0, 4.0, 2.0, 3.0] {
            w.push(v);
        }
        assert_eq!(w.median(), 2.5);
    }

    #[test]
    fn nan_readings_are_skipped() {
        let mut w = ReadingWindow::new(3);
        w.push(f64::NAN);
        assert!(w.median().is_nan());
        w.push(0.5);
        assert_eq!(w.median(), 0.5);
    }
}
