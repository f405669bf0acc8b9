use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use parking_lot::Mutex;

/// Identity a request is throttled under (the sender's user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Over the limit; the oldest counted request leaves the window in this many seconds
    Denied { retry_after_secs: u64 },
    /// The service is shutting down and admits nothing
    Closed,
}

/// Time source for the limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Per-identity sliding-window throttle.
///
/// Each identity keeps the timestamps of its admitted requests that are still inside
/// the window. A single lock guards the whole map; admission is a short critical section.
pub struct AdmissionLimiter<C: Clock = SystemClock> {
    max_requests: usize,
    window: Duration,
    clock: C,
    history: Mutex<HashMap<UserId, VecDeque<Instant>>>,
}

impl AdmissionLimiter<SystemClock> {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, SystemClock)
    }
}

impl<C: Clock> AdmissionLimiter<C> {
    pub fn with_clock(max_requests: usize, window: Duration, clock: C) -> Self {
        Self {
            max_requests,
            window,
            clock,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Check and, if allowed, record a request for `identity`
    pub fn admit(&self, identity: UserId) -> Admission {
        let now = self.clock.now();
        let mut history = self.history.lock();
        let requests = history.entry(identity).or_default();

        prune_expired(requests, now, self.window);

        if requests.len() >= self.max_requests {
            let oldest = requests.front().copied().unwrap_or(now);
            let remaining = self.window.saturating_sub(now.saturating_duration_since(oldest));
            return Admission::Denied {
                retry_after_secs: ceil_secs(remaining).max(1),
            };
        }

        requests.push_back(now);
        Admission::Allowed
    }

    /// Drop identities with no requests left in the window. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|_, requests| {
            prune_expired(requests, now, self.window);
            !requests.is_empty()
        });
        before - history.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.history.lock().len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn prune_expired(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = requests.front() {
        if now.saturating_duration_since(oldest) >= window {
            requests.pop_front();
        } else {
            break;
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
