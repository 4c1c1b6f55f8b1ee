//! Per-room rate limiting of inbound control messages
//!
//! Token bucket: a room may burst up to `capacity` messages, then
//! `refill_rate` per second sustained.
//!
//! ```text
//!   capacity=10, rate=2/sec
//!   ● ● ● ● ● ● ● ● ● ●   burst of 10 accepted
//!   ○ ○ ○ ○ ○ ○ ○ ○ ○ ○   11th rejected
//!   ● ●                   one second later: 2 more
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Tokens are stored scaled so fractional refills are not lost
const SCALE: u64 = 1000;

pub struct RateLimiter {
    capacity: u64,
    refill_rate: f64,
    tokens_scaled: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens_scaled: AtomicU64::new(capacity * SCALE),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// 20 burst, 5 messages/sec
    pub fn with_defaults() -> Self {
        Self::new(20, 5.0)
    }

    /// Consume one token; `false` means the message must be rejected
    pub fn try_acquire(&self) -> bool {
        self.refill();
        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            if current < SCALE {
                return false;
            }
            if self
                .tokens_scaled
                .compare_exchange(current, current - SCALE, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn refill(&self) {
        let now = Instant::now();
        let mut last = match self.last_refill.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        let to_add = (now.duration_since(*last).as_secs_f64() * self.refill_rate * SCALE as f64) as u64;
        if to_add == 0 {
            return;
        }
        *last = now;

        let max_scaled = self.capacity * SCALE;
        let _ = self
            .tokens_scaled
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |current| {
                Some(std::cmp::min(current + to_add, max_scaled))
            });
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens_scaled.load(Ordering::Relaxed) / SCALE
    }

    /// Time until one more token is available
    pub fn retry_after(&self) -> Duration {
        if self.refill_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.refill_rate)
        } else {
            Duration::from_secs(1)
        }
    }
}

/// Rooms idle this long lose their bucket
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

struct RoomBucket {
    limiter: Arc<RateLimiter>,
    last_used: Instant,
}

/// One bucket per room, created on first use
///
/// A bucket outlives the room's connections so reconnecting does not reset
/// it. Buckets nobody holds and nobody has asked for within the idle TTL
/// are dropped on the next lookup.
pub struct RoomLimiters {
    capacity: u64,
    refill_rate: f64,
    idle_ttl: Duration,
    buckets: Mutex<HashMap<String, RoomBucket>>,
}

impl RoomLimiters {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            idle_ttl: DEFAULT_IDLE_TTL,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn for_room(&self, room: &str) -> Arc<RateLimiter> {
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            Arc::strong_count(&bucket.limiter) > 1 || now.duration_since(bucket.last_used) < self.idle_ttl
        });

        let bucket = buckets.entry(room.to_string()).or_insert_with(|| RoomBucket {
            limiter: Arc::new(RateLimiter::new(self.capacity, self.refill_rate)),
            last_used: now,
        });
        bucket.last_used = now;
        bucket.limiter.clone()
    }

    /// Rooms currently holding a bucket
    pub fn tracked(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}
