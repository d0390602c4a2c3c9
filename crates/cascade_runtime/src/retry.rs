//! Fixed-delay retry for forwards.

use crate::transport::{NodeTransport, TransportError};
use bytes::Bytes;
use cascade_core::{NodeId, TxnId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for synchronous forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between consecutive attempts
    pub delay: Duration,
    /// Bound on each individual attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Single attempt, no delay
    #[must_use]
    pub fn once(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            attempt_timeout,
        }
    }

    /// Set attempt count
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set delay between attempts
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set per-attempt timeout
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(80),
        }
    }
}

/// What a retried forward went through
#[derive(Debug)]
pub struct ForwardOutcome {
    /// Attempts made
    pub attempts: u32,
    /// Final result; on failure, the last attempt's error
    pub result: Result<(), TransportError>,
}

impl ForwardOutcome {
    /// Whether some attempt succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Send `payload` to `target`, retrying per `policy`
///
/// Each failed attempt is logged; the caller decides what exhaustion means.
/// A hop-limit refusal ends the forward at once.
pub async fn forward_with_retry(
    transport: &dyn NodeTransport,
    policy: &RetryPolicy,
    tid: &TxnId,
    target: &NodeId,
    payload: Bytes,
    hops: u32,
) -> ForwardOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(
            policy.attempt_timeout,
            transport.send(target, payload.clone(), hops),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                target: target.clone(),
                after: policy.attempt_timeout,
            }),
        };

        match result {
            Ok(()) => {
                tracing::debug!(%tid, %target, attempt, "forward succeeded");
                return ForwardOutcome {
                    attempts: attempt,
                    result: Ok(()),
                };
            }
            Err(err) if err.is_loop_refusal() => {
                tracing::warn!(%tid, %target, attempt, "forward refused at hop limit, not retrying");
                return ForwardOutcome {
                    attempts: attempt,
                    result: Err(err),
                };
            }
            Err(err) => {
                tracing::warn!(%tid, %target, attempt, error = %err, "forward attempt failed");
                if attempt >= max_attempts {
                    return ForwardOutcome {
                        attempts: attempt,
                        result: Err(err),
                    };
                }
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` sends, recording when each arrived
    struct Flaky {
        failures: u32,
        sent: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NodeTransport for Flaky {
        async fn send(&self, target: &NodeId, _payload: Bytes, _hops: u32) -> Result<(), TransportError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Instant::now());
            if sent.len() as u32 <= self.failures {
                Err(TransportError::Status {
                    target: target.clone(),
                    status: 500,
                    body: "Error processing trace packet".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Refuses every send at the hop limit
    struct Looping {
        sent: Mutex<u32>,
    }

    #[async_trait]
    impl NodeTransport for Looping {
        async fn send(&self, target: &NodeId, _payload: Bytes, _hops: u32) -> Result<(), TransportError> {
            *self.sent.lock().unwrap() += 1;
            Err(TransportError::Status {
                target: target.clone(),
                status: crate::transport::LOOP_DETECTED_STATUS,
                body: "hop limit".to_string(),
            })
        }
    }

    struct Hanging;

    #[async_trait]
    impl NodeTransport for Hanging {
        async fn send(&self, _target: &NodeId, _payload: Bytes, _hops: u32) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    fn tid() -> TxnId {
        TxnId::from("t1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_fixed_spacing() {
        let transport = Flaky::new(2);
        let outcome = forward_with_retry(
            &transport,
            &RetryPolicy::default(),
            &tid(),
            &NodeId::from("n2"),
            Bytes::from_static(b"{}"),
            1,
        )
        .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1] - sent[0], Duration::from_secs(2));
        assert_eq!(sent[2] - sent[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let transport = Flaky::new(u32::MAX);
        let outcome = forward_with_retry(
            &transport,
            &RetryPolicy::default(),
            &tid(),
            &NodeId::from("n2"),
            Bytes::new(),
            1,
        )
        .await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(TransportError::Status { status: 500, .. })));
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hop_limit_refusal_is_not_retried() {
        let transport = Looping { sent: Mutex::new(0) };
        let start = Instant::now();
        let outcome = forward_with_retry(
            &transport,
            &RetryPolicy::default(),
            &tid(),
            &NodeId::from("n2"),
            Bytes::new(),
            65,
        )
        .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.as_ref().is_err_and(TransportError::is_loop_refusal));
        assert_eq!(*transport.sent.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_bounded() {
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_secs(5));
        let start = Instant::now();
        let outcome = forward_with_retry(
            &Hanging,
            &policy,
            &tid(),
            &NodeId::from("n9"),
            Bytes::new(),
            1,
        )
        .await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.result, Err(TransportError::Timeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }
}
