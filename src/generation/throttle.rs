//! Cooperative pacing of generation calls.
//!
//! The wait before the next call grows with the previous call's payload:
//! `wait_between_calls * len / reference_length + padding`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use super::{GenerationError, GenerationRequest, Generator};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub wait_between_calls: Duration,
    /// Payload length (bytes) that costs one full `wait_between_calls`.
    pub reference_length: usize,
    pub padding: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            wait_between_calls: Duration::from_secs(60),
            reference_length: 3_500_000,
            padding: Duration::from_secs(2),
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Single-slot leaky bucket keyed on the previous payload size.
#[derive(Debug)]
pub struct LeakyBucket {
    next_call_at: Mutex<Option<Instant>>,
    wait_between_calls: Duration,
    reference_length: usize,
    padding: Duration,
}

impl LeakyBucket {
    pub fn new(wait_between_calls: Duration, reference_length: usize, padding: Duration) -> Self {
        Self {
            next_call_at: Mutex::new(None),
            wait_between_calls,
            reference_length: reference_length.max(1),
            padding,
        }
    }

    /// Wait that a payload of `len` bytes imposes on the following call.
    pub fn wait_for(&self, len: usize) -> Duration {
        let share = len as f64 / self.reference_length as f64;
        let secs = (self.wait_between_calls.as_secs_f64() * share).round();
        Duration::from_secs_f64(secs) + self.padding
    }

    /// Sleeps until the bucket allows the next call.
    pub async fn acquire(&self) {
        let next = *self.next_call_at.lock().await;
        if let Some(at) = next {
            if at > Instant::now() {
                debug!(wait_ms = (at - Instant::now()).as_millis() as u64, "throttling");
                sleep_until(at).await;
            }
        }
    }

    /// Records a finished call of `len` bytes.
    pub async fn record(&self, len: usize) {
        let at = Instant::now() + self.wait_for(len);
        *self.next_call_at.lock().await = Some(at);
    }
}

pub struct ThrottledGenerator<G> {
    inner: G,
    bucket: LeakyBucket,
    config: ThrottleConfig,
}

impl<G: Generator> ThrottledGenerator<G> {
    pub fn new(inner: G, config: ThrottleConfig) -> Self {
        let bucket = LeakyBucket::new(
            config.wait_between_calls,
            config.reference_length,
            config.padding,
        );
        Self {
            inner,
            bucket,
            config,
        }
    }

    pub fn bucket(&self) -> &LeakyBucket {
        &self.bucket
    }
}

#[async_trait]
impl<G: Generator> Generator for ThrottledGenerator<G> {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            self.bucket.acquire().await;
            let result = self.inner.generate(req).await;
            self.bucket.record(req.len()).await;

            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt)
                        .max(err.retry_after().unwrap_or_default());
                    warn!(code = err.code(), attempt, ?delay, "retrying generation");
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_scales_with_payload() {
        let bucket = LeakyBucket::new(Duration::from_secs(60), 3_500_000, Duration::from_secs(2));
        assert_eq!(bucket.wait_for(0), Duration::from_secs(2));
        assert_eq!(bucket.wait_for(3_500_000), Duration::from_secs(62));
        assert_eq!(bucket.wait_for(490_000), Duration::from_secs(10));
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
    }
}
