//! Rolling position-update counter shown on the overlay info label.
//!
//! Display only; nothing in the session depends on these numbers.

const WINDOW_LIMIT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateStats {
    total: u64,
    window: u64,
    window_start_ms: i64,
}

impl RateStats {
    pub fn new(now_ms: i64) -> Self {
        Self {
            total: 0,
            window: 0,
            window_start_ms: now_ms,
        }
    }

    pub fn record(&mut self, now_ms: i64) {
        self.total += 1;
        if self.window > WINDOW_LIMIT {
            self.window = 0;
            self.window_start_ms = now_ms;
        }
        self.window += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Average milliseconds between updates in the current window.
    pub fn update_rate_ms(&self, now_ms: i64) -> u64 {
        if self.window == 0 {
            return 0;
        }
        let elapsed = now_ms.saturating_sub(self.window_start_ms).max(0) as u64;
        elapsed / self.window
    }

    pub fn label(&self, now_ms: i64) -> String {
        format!(
            "Estimations: {} @ {} ms",
            self.total,
            self.update_rate_ms(now_ms)
        )
    }
}
