//! Location fixes for waypoint events.
//!
//! The coordination loop never waits for a fix itself: it hands a
//! [`FixRequest`] to a worker thread, which asks a [`FixProvider`] and posts
//! the answer back into the loop.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub longitude: f64,
    pub latitude: f64,
}

impl Fix {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Placeholder written to the log when no fix could be obtained.
    pub fn unavailable() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequest {
    /// Upper bound on how long the request may wait for a fix.
    pub timeout: Duration,
    /// Oldest cached fix that may be returned without waiting.
    pub max_age: Duration,
    pub high_accuracy: bool,
}

impl Default for FixRequest {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_age: Duration::from_millis(200),
            high_accuracy: true,
        }
    }
}

pub trait FixProvider: Send + Sync {
    /// Best-effort fix. Must return within `request.timeout`; `None` means no
    /// fix was available.
    fn current_fix(&self, request: &FixRequest) -> Option<Fix>;
}

/// Fix provider fed by the positioning collaborator through `report_fix`.
///
/// A request is answered from the latest fix when it is fresh enough;
/// otherwise the caller blocks until a newer fix is published or the request
/// times out.
#[derive(Default)]
pub struct ReportedFixProvider {
    latest: Mutex<Option<(Instant, Fix)>>,
    published: Condvar,
}

impl ReportedFixProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, fix: Fix) {
        let mut latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *latest = Some((Instant::now(), fix));
        self.published.notify_all();
    }
}

impl FixProvider for ReportedFixProvider {
    fn current_fix(&self, request: &FixRequest) -> Option<Fix> {
        let asked_at = Instant::now();
        let deadline = asked_at + request.timeout;
        let mut latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        loop {
            if let Some((received_at, fix)) = *latest {
                if received_at.elapsed() <= request.max_age || received_at >= asked_at {
                    return Some(fix);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(
                    timeout_ms = request.timeout.as_millis() as u64,
                    "No fresh fix before timeout"
                );
                return None;
            }

            latest = match self.published.wait_timeout(latest, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn short_request(timeout_ms: u64, max_age_ms: u64) -> FixRequest {
        FixRequest {
            timeout: Duration::from_millis(timeout_ms),
            max_age: Duration::from_millis(max_age_ms),
            high_accuracy: true,
        }
    }

    #[test]
    fn unavailable_is_nan() {
        let fix = Fix::unavailable();
        assert!(fix.longitude.is_nan());
        assert!(fix.latitude.is_nan());
    }

    #[test]
    fn fresh_fix_is_returned_immediately() {
        let provider = ReportedFixProvider::new();
        provider.publish(Fix::new(10.0, 20.0));

        let started = Instant::now();
        let fix = provider.current_fix(&short_request(2_000, 1_000));
        assert_eq!(fix, Some(Fix::new(10.0, 20.0)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn times_out_without_any_fix() {
        let provider = ReportedFixProvider::new();
        let started = Instant::now();
        assert_eq!(provider.current_fix(&short_request(50, 200)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn stale_fix_is_not_reused() {
        let provider = ReportedFixProvider::new();
        provider.publish(Fix::new(1.0, 1.0));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(provider.current_fix(&short_request(40, 5)), None);
    }

    #[test]
    fn waits_for_a_newly_published_fix() {
        let provider = Arc::new(ReportedFixProvider::new());
        let publisher = Arc::clone(&provider);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            publisher.publish(Fix::new(3.0, 4.0));
        });

        let fix = provider.current_fix(&short_request(2_000, 0));
        handle.join().expect("publisher thread");
        assert_eq!(fix, Some(Fix::new(3.0, 4.0)));
    }
}
