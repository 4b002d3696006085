use crate::{common::*, rt};
use rand::prelude::*;

/// Retry policy with exponential backoff.
///
/// The work is invoked at most `max_attempts` times. Before retry `k`, counted
/// from zero, the policy waits `min(initial_delay * multiplier^k, max_delay)`,
/// which jitter may shorten down to half. The last failure is returned when
/// every attempt fails.
///
/// ```rust
/// use lazy_react::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3).with_initial_delay(Duration::ZERO);
/// let mut calls = 0;
/// let value = policy.run(|| {
///     calls += 1;
///     if calls < 3 {
///         Err("not yet")
///     } else {
///         Ok(calls)
///     }
/// });
/// assert_eq!(value, Ok(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        assert!(max_attempts > 0, "max_attempts must be positive");
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that runs the work exactly once.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_initial_delay(self, initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..self
        }
    }

    pub fn with_multiplier(self, multiplier: f64) -> Self {
        assert!(
            multiplier.is_finite() && multiplier >= 1.0,
            "multiplier must be finite and at least 1"
        );
        Self { multiplier, ..self }
    }

    pub fn with_max_delay(self, max_delay: Duration) -> Self {
        Self { max_delay, ..self }
    }

    pub fn with_jitter(self, jitter: bool) -> Self {
        Self { jitter, ..self }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The backoff before retry `k`, without jitter.
    pub fn delay_for(&self, k: usize) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = k.min(i32::MAX as usize) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);

        if secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    fn backoff(&self, k: usize) -> Duration {
        let delay = self.delay_for(k);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(thread_rng().gen_range((nanos / 2)..=nanos))
    }

    /// Runs `f` until it succeeds or the attempts are exhausted, sleeping the calling thread between attempts.
    pub fn run<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => break Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        break Err(err);
                    }
                    let delay = self.backoff(attempt - 1);
                    debug!(attempt, ?delay, "retrying failed work");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }

    /// Runs the future returned by `f` until it succeeds or the attempts are exhausted.
    pub async fn run_async<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => break Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        break Err(err);
                    }
                    let delay = self.backoff(attempt - 1);
                    debug!(attempt, ?delay, "retrying failed work");
                    if !delay.is_zero() {
                        rt::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_on_third_attempt() {
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_millis(1));
        let mut calls = 0;

        let result: Result<i32, &str> = policy.run(|| {
            calls += 1;
            if calls <= 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        });

        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhaustion_returns_last_failure() {
        let policy = RetryPolicy::new(4).with_initial_delay(Duration::ZERO);
        let mut calls = 0;

        let result: Result<(), usize> = policy.run(|| {
            calls += 1;
            Err(calls)
        });

        assert_eq!(result, Err(4));
        assert_eq!(calls, 4);
    }

    #[test]
    fn delays_grow_and_are_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_millis(300));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(1000), Duration::from_millis(300));

        let immediate = RetryPolicy::default().with_initial_delay(Duration::ZERO);
        assert_eq!(immediate.delay_for(0), Duration::ZERO);
        assert_eq!(immediate.delay_for(2000), Duration::ZERO);

        let jittered = RetryPolicy::default().with_jitter(true);
        for _ in 0..20 {
            let delay = jittered.backoff(1);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test]
    async fn async_retry_counts_attempts() {
        let policy = RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1));
        let calls = AtomicUsize::new(0);

        let result: Result<(), &str> = policy
            .run_async(|| {
                calls.fetch_add(1, SeqCst);
                async { Err("down") }
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(SeqCst), 2);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
