//! In-process token buckets, one per provider.
//!
//! Buckets are not shared across replicas; multi-replica deployments accept
//! some overshoot, which provider-side limits tolerate.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled continuously at a fixed rate.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket that allows `per_minute` acquisitions per minute, with a burst
    /// capacity of the same size.
    pub fn per_minute(per_minute: u64) -> Self {
        let capacity = per_minute as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    /// Take one token if available. Non-blocking; used by webhook admission,
    /// where exhaustion is a `rate_limited` rejection.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        Self::refill(&mut state, self.capacity, self.refill_per_sec, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it. Used by outbound API
    /// calls, which must pace rather than fail.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("bucket lock poisoned");
                let now = Instant::now();
                Self::refill(&mut state, self.capacity, self.refill_per_sec, now);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity() {
        let bucket = TokenBucket::per_minute(3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::per_minute(60);
        let start = Instant::now();
        for _ in 0..60 {
            assert!(bucket.try_acquire_at(start));
        }
        assert!(!bucket.try_acquire_at(start));
        // One token per second at 60/min.
        assert!(bucket.try_acquire_at(start + Duration::from_millis(1100)));
        assert!(!bucket.try_acquire_at(start + Duration::from_millis(1100)));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        // 100 tokens/sec, so the post-drain wait is at most ~10ms.
        let bucket = TokenBucket::per_minute(6000);
        while bucket.try_acquire() {}
        bucket.acquire().await;
    }
}
