use crate::constants::RATE_UNLIMITED;
use std::time::{Duration, Instant};

/// Token bucket gating data-channel I/O, one token per byte.
///
/// Tokens accrue in whole seconds, so the fractional part of an interval is
/// carried over instead of being lost between calls.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate: u64, // tokens per second, 0 = unlimited
    max: u64,  // cap, 0 = uncapped
    pool: u64,
    last: Instant,
}

impl RateLimiter {
    pub fn new(rate: u64, max: u64, now: Instant) -> Self {
        let mut limiter = Self {
            rate,
            max,
            pool: 0,
            last: now,
        };
        limiter.reset(now);
        limiter
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    /// Applies new limits and refills the bucket to one second's worth.
    pub fn reconfigure(&mut self, rate: u64, max: u64, now: Instant) {
        self.rate = rate;
        self.max = max;
        self.reset(now);
    }

    pub fn reset(&mut self, now: Instant) {
        self.pool = self.clamp(self.rate);
        self.last = now;
    }

    /// Bytes that may move right now.
    pub fn bytes_allowed(&mut self, now: Instant) -> u64 {
        if self.rate == 0 {
            return RATE_UNLIMITED;
        }
        let dif = now.saturating_duration_since(self.last).as_secs();
        if dif > 0 {
            let room = RATE_UNLIMITED.saturating_sub(self.pool);
            self.pool = if room / dif < self.rate {
                if self.max > 0 {
                    self.max
                } else {
                    RATE_UNLIMITED
                }
            } else {
                self.pool + dif * self.rate
            };
            self.pool = self.clamp(self.pool);
            self.last += Duration::from_secs(dif);
        }
        self.pool
    }

    pub fn bytes_used(&mut self, bytes: u64) {
        self.pool = self.pool.saturating_sub(bytes);
    }

    fn clamp(&self, tokens: u64) -> u64 {
        if self.max > 0 && tokens > self.max {
            self.max
        } else {
            tokens
        }
    }
}
