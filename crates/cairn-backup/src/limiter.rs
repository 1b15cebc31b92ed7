//! Write throttling for archive output.
//!
//! A [`TokenBucket`] refills at a fixed byte rate up to its capacity. Each
//! write takes as many tokens as it has bytes; when the bucket runs short the
//! writer sleeps until the deficit would have been refilled. Writes larger
//! than the capacity are allowed and leave the bucket in debt.

use std::io::{self, Write};
use std::time::{Duration, Instant};

const BYTES_PER_MIB: u64 = 1024 * 1024;

fn mib_per_sec_to_bytes_per_sec(mib_per_sec: u64) -> u64 {
    mib_per_sec.saturating_mul(BYTES_PER_MIB)
}

/// Token bucket measured in bytes.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Creates a full bucket refilling at `bytes_per_sec` up to `capacity`.
    pub fn new(bytes_per_sec: u64, capacity: u64) -> Self {
        Self::new_at(bytes_per_sec, capacity, Instant::now())
    }

    fn new_at(bytes_per_sec: u64, capacity: u64, now: Instant) -> Self {
        Self {
            rate: bytes_per_sec.max(1) as f64,
            capacity: capacity.max(1) as f64,
            tokens: capacity.max(1) as f64,
            last: now,
        }
    }

    /// Bucket whose capacity and refill rate both equal `mib_per_sec` MiB.
    /// Returns `None` when throttling is disabled (0).
    pub fn from_mib_per_sec(mib_per_sec: u64) -> Option<Self> {
        if mib_per_sec == 0 {
            return None;
        }
        let bytes = mib_per_sec_to_bytes_per_sec(mib_per_sec);
        Some(Self::new(bytes, bytes))
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Takes `n` tokens and returns how long the caller has to wait before
    /// the bytes may be written.
    pub fn take(&mut self, n: u64) -> Duration {
        self.take_at(n, Instant::now())
    }

    fn take_at(&mut self, n: u64, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.tokens -= n as f64;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }
}

/// Writer that paces its downstream to the bucket's sustained rate.
#[derive(Debug)]
pub struct RateLimitedWriter<W> {
    inner: W,
    bucket: TokenBucket,
}

impl<W: Write> RateLimitedWriter<W> {
    pub fn new(inner: W, bucket: TokenBucket) -> Self {
        Self { inner, bucket }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for RateLimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let wait = self.bucket.take(buf.len() as u64);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bucket_does_not_wait() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 100, start);
        assert_eq!(bucket.take_at(60, start), Duration::ZERO);
        assert_eq!(bucket.take_at(40, start), Duration::ZERO);
    }

    #[test]
    fn test_deficit_waits_proportionally() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 100, start);
        bucket.take_at(100, start);

        let wait = bucket.take_at(50, start);
        assert!((wait.as_secs_f64() - 0.5).abs() < 1e-9, "got {wait:?}");
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 100, start);
        bucket.take_at(100, start);

        // Ten seconds refill 1000 tokens, but only 100 fit.
        let later = start + Duration::from_secs(10);
        assert_eq!(bucket.take_at(100, later), Duration::ZERO);
        let wait = bucket.take_at(100, later);
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_write_goes_into_debt() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 100, start);
        let wait = bucket.take_at(300, start);
        assert!((wait.as_secs_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_limit() {
        assert!(TokenBucket::from_mib_per_sec(0).is_none());
    }

    #[test]
    fn test_limit_sizing() {
        let bucket = TokenBucket::from_mib_per_sec(2).unwrap();
        assert_eq!(bucket.rate(), 2 * 1024 * 1024);
        assert_eq!(bucket.capacity(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_writes_pass_through() {
        let bucket = TokenBucket::from_mib_per_sec(1).unwrap();
        let mut writer = RateLimitedWriter::new(Vec::new(), bucket);
        writer.write_all(b"throttled bytes").unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.into_inner(), b"throttled bytes");
    }
}
