use leaky_bucket::RateLimiter;

// Refill every 100ms.
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// A fair leaky bucket holding one second worth of `per_second` tokens.
pub fn build_rate_limiter(per_second: usize) -> RateLimiter {
    let per_second = per_second.max(1);
    let refill = if per_second <= REFILL_PER_INTERVAL_DIVIDER {
        1
    } else {
        per_second / REFILL_PER_INTERVAL_DIVIDER
    };

    RateLimiter::builder()
        .max(per_second)
        .initial(per_second)
        .refill(refill)
        .fair(true)
        .build()
}

/// Bandwidth limit of one transfer, shared by its part tasks.
pub struct Throttle {
    limiter: Option<RateLimiter>,
    max_chunk: usize,
}

impl Throttle {
    pub fn new(bytes_per_second: Option<u64>) -> Self {
        match bytes_per_second {
            Some(rate) if rate > 0 => {
                let rate = usize::try_from(rate).unwrap_or(usize::MAX);
                Self {
                    limiter: Some(build_rate_limiter(rate)),
                    max_chunk: rate,
                }
            }
            _ => Self::unlimited(),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            limiter: None,
            max_chunk: usize::MAX,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Waits until `bytes` may be sent or received.
    pub async fn consume(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else {
            return;
        };

        // The bucket never holds more than `max_chunk` tokens.
        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = remaining.min(self.max_chunk);
            limiter.acquire(chunk).await;
            remaining -= chunk;
        }
    }
}
