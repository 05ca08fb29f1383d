//! Leaky bucket rate limiting

use std::time::Instant;

/// Implements the leaky bucket algorithm for simple rate limiting.
///
/// A bucket has a certain capacity ("burst limit"). A caller consumes one
/// token per request; the bucket refills at a fixed rate (tokens per second)
/// up to its capacity. The bucket starts out full. An empty bucket rejects
/// the request immediately; there is no queuing.
///
/// One bucket serves one identity. Callers serialize access per identity so
/// interleaved requests cannot spend the same token twice.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u32,
    rate: f64,
    tokens: f64,
    last_update: Instant,
}

impl LeakyBucket {
    pub fn new(capacity: u32, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity as f64,
            last_update: Instant::now(),
        }
    }

    /// Attempts to consume a token from the bucket.
    pub fn consume(&mut self) -> bool {
        self.consume_at(Instant::now())
    }

    /// Clock-explicit variant of [`consume`](Self::consume).
    pub fn consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        // refill `rate` tokens per second, without exceeding capacity
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity as f64);
        self.last_update = now;
    }
}
