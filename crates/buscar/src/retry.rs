//! Retry scheduling for deferred queries.
//!
//! A query attempt either succeeds, fails an assertion (the page is not in
//! the expected state *yet*), or fails fatally. The scheduler re-runs the
//! attempt until the assertion stops failing or the timeout expires; fatal
//! errors pass straight through. There is no mid-flight cancellation — an
//! attempt, once started, runs to completion.
//!
//! Time is abstracted behind [`Clock`] so tests drive retries
//! deterministically without sleeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::query::Resolution;
use crate::result::BuscarResult;

/// Default timeout for query resolution (1 second)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default interval between retry attempts (10ms)
pub const DEFAULT_INTERVAL_MS: u64 = 10;

/// Timing settings the scheduler polls under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total time budget for retries
    pub timeout: Duration,
    /// Wait between attempts (the first retry waits 0ms)
    pub interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }
}

/// A source of time and delay
pub trait Clock: fmt::Debug + Send + Sync {
    /// Milliseconds elapsed since an arbitrary origin
    fn now_ms(&self) -> u64;

    /// Block for the given duration
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time via [`Instant`] and [`std::thread::sleep`]
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a system clock
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests: sleeping advances time, nothing blocks
#[derive(Debug, Default)]
pub struct TestClock {
    now_ms: AtomicU64,
}

impl TestClock {
    /// Create a test clock at time zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock without sleeping
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Drives query attempts to a final outcome
pub trait Scheduler: fmt::Debug + Send + Sync {
    /// Run the attempt until success, fatal error, or timeout.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once the time budget is spent, or
    /// the first non-assertion error immediately.
    fn run(
        &self,
        settings: &RetrySettings,
        attempt: &mut dyn FnMut() -> BuscarResult<Resolution>,
    ) -> BuscarResult<Resolution>;
}

/// The default scheduler: poll until success or timeout.
///
/// The very first failure retries immediately (0ms wait); every later
/// failure waits `interval`. Once elapsed time reaches the timeout the last
/// error is returned unchanged.
#[derive(Debug, Clone)]
pub struct Poll {
    clock: Arc<dyn Clock>,
}

impl Poll {
    /// Create a poll scheduler on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Create a poll scheduler on a custom clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for Poll {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Poll {
    fn run(
        &self,
        settings: &RetrySettings,
        attempt: &mut dyn FnMut() -> BuscarResult<Resolution>,
    ) -> BuscarResult<Resolution> {
        let timeout_ms = u64::try_from(settings.timeout.as_millis()).unwrap_or(u64::MAX);
        let start = self.clock.now_ms();
        let mut attempts: u64 = 0;
        let mut first_failure = true;
        loop {
            attempts += 1;
            match attempt() {
                Ok(resolution) => {
                    trace!(attempts, "query resolved");
                    return Ok(resolution);
                }
                Err(error) if error.is_assertion() => {
                    let elapsed = self.clock.now_ms().saturating_sub(start);
                    if elapsed >= timeout_ms {
                        debug!(attempts, elapsed_ms = elapsed, "query timed out");
                        return Err(error);
                    }
                    let wait = if first_failure {
                        Duration::ZERO
                    } else {
                        settings.interval
                    };
                    first_failure = false;
                    trace!(
                        attempts,
                        elapsed_ms = elapsed,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "assertion failed; retrying"
                    );
                    self.clock.sleep(wait);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Single-attempt scheduler: no retries, for immediate execution mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn run(
        &self,
        _settings: &RetrySettings,
        attempt: &mut dyn FnMut() -> BuscarResult<Resolution>,
    ) -> BuscarResult<Resolution> {
        attempt()
    }
}
