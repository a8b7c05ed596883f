//! Aggregate bandwidth limiting
//!
//! A single [`BandwidthLimiter`] is shared by every download manager in a run,
//! so the configured cap bounds the total throughput, not each file's.
//!
//! ## Algorithm
//!
//! Token bucket with one token per byte. The bucket starts full (`burst`
//! tokens) and refills continuously at `rate` tokens per second, never above
//! `burst`. Over any window of `t` seconds at most `burst + rate * t` bytes
//! are admitted.
//!
//! Requests larger than the bucket are admitted in bucket-sized portions so a
//! single large read can never deadlock waiting for more tokens than the
//! bucket can hold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Shortest sleep while waiting for tokens
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Throughput cap for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthCap {
    /// No throttling
    Unlimited,
    /// At most `rate` bytes per second with bursts of up to `burst` bytes
    Limited { rate: u64, burst: u64 },
}

impl BandwidthCap {
    /// Build a cap from KiB-denominated settings; `0` means unlimited
    pub fn from_kbps(limit_kbps: u64, burst_kb: u64) -> Self {
        if limit_kbps == 0 {
            return Self::Unlimited;
        }
        let rate = limit_kbps.saturating_mul(1024);
        let burst = burst_kb.saturating_mul(1024).max(1);
        Self::Limited { rate, burst }
    }
}

impl Default for BandwidthCap {
    fn default() -> Self {
        Self::Unlimited
    }
}

/// Mutable inner state of the bucket
struct BucketInner {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    capacity: f64,
    refill_rate: f64,
    inner: Mutex<BucketInner>,
}

impl Bucket {
    fn new(rate: u64, burst: u64) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            capacity,
            refill_rate: rate.max(1) as f64,
            inner: Mutex::new(BucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, inner: &mut BucketInner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.refill_rate).min(self.capacity);
            inner.last_refill = now;
        }
    }

    /// Take `want` tokens, or report how long until they could be available
    fn reserve(&self, want: f64) -> Result<(), Duration> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut inner);
        if inner.tokens >= want {
            inner.tokens -= want;
            Ok(())
        } else {
            let deficit = want - inner.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate).max(MIN_WAIT))
        }
    }

    fn available(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut inner);
        inner.tokens
    }
}

/// Shared byte-rate limiter
pub struct BandwidthLimiter {
    bucket: Option<Bucket>,
    consumed: AtomicU64,
}

impl BandwidthLimiter {
    /// Creates a limiter enforcing `cap`
    pub fn new(cap: BandwidthCap) -> Self {
        let bucket = match cap {
            BandwidthCap::Unlimited => None,
            BandwidthCap::Limited { rate, burst } => Some(Bucket::new(rate, burst)),
        };
        Self {
            bucket,
            consumed: AtomicU64::new(0),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(BandwidthCap::Unlimited)
    }

    /// Whether this limiter ever throttles
    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Wait until `bytes` tokens have been taken from the bucket
    ///
    /// Yields cooperatively while the bucket is empty; never blocks the
    /// runtime thread.
    pub async fn acquire(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        if let Some(bucket) = &self.bucket {
            let mut remaining = bytes as f64;
            while remaining > 0.0 {
                let portion = remaining.min(bucket.capacity);
                match bucket.reserve(portion) {
                    Ok(()) => remaining -= portion,
                    Err(wait) => {
                        trace!(wait_ms = wait.as_millis() as u64, "Waiting for bandwidth tokens");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
        self.consumed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take `bytes` tokens if they are available right now
    ///
    /// Requests larger than the bucket capacity always fail.
    pub fn try_acquire(&self, bytes: u64) -> bool {
        let granted = match &self.bucket {
            None => true,
            Some(bucket) => bucket.reserve(bytes as f64).is_ok(),
        };
        if granted {
            self.consumed.fetch_add(bytes, Ordering::Relaxed);
        }
        granted
    }

    /// Tokens currently in the bucket, `None` when unlimited
    pub fn available_tokens(&self) -> Option<f64> {
        self.bucket.as_ref().map(Bucket::available)
    }

    /// Total bytes admitted since creation
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
