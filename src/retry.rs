use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::errors::{RelayError, Result};

/// Bounded-retry policy for transient broker failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; `max_retries = N` means at most
    /// `N + 1` attempts in total.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Run `op`, retrying transient failures with an increasing interval.
///
/// Before each sleep the `errback` is invoked with the error and the chosen
/// interval, for observability. Non-transient errors, and the original error
/// once retries are exhausted, propagate unchanged. Every broker operation
/// that can fail transiently is expected to go through here; a raw unwrapped
/// call in the service loop is a bug.
pub async fn ensure<T, Op, Fut>(
    policy: &RetryPolicy,
    mut errback: impl FnMut(&RelayError, Duration),
    mut op: Op,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;
    let mut delay = policy.base_delay;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && failures < policy.max_retries => {
                failures += 1;
                let interval = jittered(delay);
                debug!(
                    failures,
                    max_retries = policy.max_retries,
                    ?interval,
                    "transient failure, backing off"
                );
                errback(&err, interval);
                sleep(interval).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

// +/- 15% jitter so that parallel relays do not hammer a recovering broker in
// lockstep.
fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as f64;
    let jitter = (rand::random::<f64>() * 0.3 - 0.15) * millis;
    Duration::from_millis((millis + jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn first_success_needs_no_retry() {
        let calls = Cell::new(0u32);
        let result = ensure(&instant_policy(3), |_, _| {}, || {
            calls.set(calls.get() + 1);
            async { Ok::<_, RelayError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_makes_exactly_n_plus_one_attempts() {
        let calls = Cell::new(0u32);
        let result: Result<()> = ensure(&instant_policy(3), |_, _| {}, || {
            calls.set(calls.get() + 1);
            async { Err(RelayError::Publish("broker away".into())) }
        })
        .await;

        assert!(matches!(result, Err(RelayError::Publish(_))));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn recovery_mid_way_returns_the_value() {
        let calls = Cell::new(0u32);
        let result = ensure(&instant_policy(5), |_, _| {}, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(RelayError::Consume("not yet".into()))
                } else {
                    Ok("delivered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn errback_sees_every_failure_and_an_interval() {
        let reported = Cell::new(0u32);
        let _: Result<()> = ensure(
            &instant_policy(2),
            |err, interval| {
                assert!(err.is_transient());
                assert_eq!(interval, Duration::ZERO);
                reported.set(reported.get() + 1);
            },
            || async { Err(RelayError::Channel("gone".into())) },
        )
        .await;

        // Two retries, two errback invocations; the final failure propagates
        // instead of being reported.
        assert_eq!(reported.get(), 2);
    }

    #[tokio::test]
    async fn protocol_violations_are_never_retried() {
        let calls = Cell::new(0u32);
        let result: Result<()> = ensure(&instant_policy(5), |_, _| {}, || {
            calls.set(calls.get() + 1);
            async { Err(RelayError::ProtocolViolation("double ack".into())) }
        })
        .await;

        assert!(matches!(result, Err(RelayError::ProtocolViolation(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let j = jittered(Duration::from_millis(1000));
            assert!(j >= Duration::from_millis(850));
            assert!(j <= Duration::from_millis(1150));
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
