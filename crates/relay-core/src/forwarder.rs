//! Forwarder: sends composed messages with rate-limit and backoff handling.
//!
//! Each send goes `Sending -> {Sent | WaitingBackoff | Failed}`:
//! - a rate limit waits exactly the advised duration and retries without
//!   touching `retry_count`;
//! - a transient error bumps `retry_count` and, while within budget, waits an
//!   exponential backoff before retrying;
//! - a fatal error fails immediately;
//! - an ignorable error drops the message.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    classify::{classify, Classification},
    domain::{MessageKey, OutboundMessage},
    errors::Error,
    messaging::port::SendPort,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before transient retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Non-error terminal outcomes of a forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    Sent(MessageKey),
    Dropped,
}

pub struct Forwarder {
    port: Arc<dyn SendPort>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Forwarder {
    pub fn new(port: Arc<dyn SendPort>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            port,
            policy,
            cancel,
        }
    }

    /// Drive `msg` to a terminal outcome.
    ///
    /// `Err` is always one of `TransientSendFailure`, `FatalSendFailure` or
    /// `Cancelled` (shutdown interrupted a wait).
    pub async fn forward(&self, msg: &mut OutboundMessage) -> Result<ForwardOutcome> {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            let err = match self.port.send_text(msg.channel_id, &msg.text).await {
                Ok(sent) => {
                    info!(
                        origin = %msg.origin,
                        target = msg.channel_id.0,
                        attempt,
                        "message sent"
                    );
                    return Ok(ForwardOutcome::Sent(sent));
                }
                Err(e) => e,
            };

            match classify(&err) {
                Classification::RateLimited(wait) => {
                    warn!(
                        origin = %msg.origin,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, waiting"
                    );
                    self.wait(wait).await?;
                }
                Classification::Transient => {
                    msg.retry_count += 1;
                    if msg.retry_count > self.policy.max_retries {
                        return Err(Error::TransientSendFailure {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.policy.backoff(msg.retry_count);
                    warn!(
                        origin = %msg.origin,
                        attempt,
                        retry = msg.retry_count,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient send failure, backing off"
                    );
                    self.wait(delay).await?;
                }
                Classification::Fatal => {
                    return Err(Error::FatalSendFailure { source: err });
                }
                Classification::Ignorable => {
                    debug!(origin = %msg.origin, error = %err, "send reported no-op, dropping");
                    return Ok(ForwardOutcome::Dropped);
                }
            }
        }
    }

    async fn wait(&self, d: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        domain::{ChannelId, MessageId},
        errors::{PlatformError, PlatformErrorKind},
    };

    /// Replays scripted results; once the script runs out every send succeeds.
    #[derive(Default)]
    pub(crate) struct FakeSender {
        script: Mutex<VecDeque<std::result::Result<(), PlatformError>>>,
        sent: Mutex<Vec<(ChannelId, String, Instant)>>,
        calls: Mutex<u32>,
    }

    impl FakeSender {
        pub(crate) fn scripted(
            results: Vec<std::result::Result<(), PlatformError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
                ..Default::default()
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        pub(crate) fn sent_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t, _)| t.clone())
                .collect()
        }

        pub(crate) fn sent_at(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(_, _, at)| *at).collect()
        }
    }

    #[async_trait]
    impl SendPort for FakeSender {
        async fn send_text(
            &self,
            channel_id: ChannelId,
            text: &str,
        ) -> std::result::Result<MessageKey, PlatformError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if let Some(Err(e)) = self.script.lock().unwrap().pop_front() {
                return Err(e);
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel_id, text.to_string(), Instant::now()));
            Ok(MessageKey {
                channel_id,
                message_id: MessageId(n as i32),
            })
        }
    }

    fn transient() -> std::result::Result<(), PlatformError> {
        Err(PlatformError::new(PlatformErrorKind::Network, "connection reset"))
    }

    fn fatal() -> std::result::Result<(), PlatformError> {
        Err(PlatformError::new(
            PlatformErrorKind::PermissionDenied,
            "not enough rights",
        ))
    }

    fn outbound() -> OutboundMessage {
        OutboundMessage::new(
            MessageKey {
                channel_id: ChannelId(-1001),
                message_id: MessageId(10),
            },
            ChannelId(-1002),
            "2000.00".to_string(),
        )
    }

    fn forwarder(port: Arc<FakeSender>) -> Forwarder {
        Forwarder::new(port, RetryPolicy::default(), CancellationToken::new())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(4), Duration::from_secs(3));
        assert_eq!(p.backoff(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_on_first_try() {
        let port = FakeSender::scripted(vec![]);
        let mut msg = outbound();
        let out = forwarder(port.clone()).forward(&mut msg).await.unwrap();
        assert!(matches!(out, ForwardOutcome::Sent(_)));
        assert_eq!(port.sent_texts(), vec!["2000.00".to_string()]);
        assert_eq!(msg.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_exactly_and_does_not_count() {
        let port = FakeSender::scripted(vec![Err(PlatformError::rate_limited(
            Duration::from_secs(5),
        ))]);
        let mut msg = outbound();
        let started = Instant::now();

        let out = forwarder(port.clone()).forward(&mut msg).await.unwrap();

        assert!(matches!(out, ForwardOutcome::Sent(_)));
        assert_eq!(msg.retry_count, 0);
        assert_eq!(port.calls(), 2);
        let waited = port.sent_at()[0] - started;
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn many_rate_limits_never_exhaust_budget() {
        let limited = || Err(PlatformError::rate_limited(Duration::from_secs(1)));
        let port = FakeSender::scripted(vec![limited(), limited(), limited(), limited(), limited()]);
        let mut msg = outbound();

        let out = forwarder(port.clone()).forward(&mut msg).await.unwrap();

        assert!(matches!(out, ForwardOutcome::Sent(_)));
        assert_eq!(port.calls(), 6);
        assert_eq!(msg.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_recovers_within_budget() {
        let port = FakeSender::scripted(vec![transient(), transient()]);
        let mut msg = outbound();
        let started = Instant::now();

        forwarder(port.clone()).forward(&mut msg).await.unwrap();

        assert_eq!(msg.retry_count, 2);
        // 1s + 2s of backoff.
        assert!(port.sent_at()[0] - started >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_fails_without_extra_attempts() {
        let port = FakeSender::scripted(vec![transient(); 10]);
        let mut msg = outbound();

        let err = forwarder(port.clone()).forward(&mut msg).await.unwrap_err();

        assert!(matches!(err, Error::TransientSendFailure { attempts: 4, .. }));
        assert_eq!(err.category(), "TransientSendFailure");
        assert_eq!(port.calls(), 4);
        assert_eq!(msg.retry_count, 4);
        assert!(port.sent_texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_three_times_then_fatal_stops() {
        let port = FakeSender::scripted(vec![transient(), transient(), transient(), fatal()]);
        let mut msg = outbound();

        let err = forwarder(port.clone()).forward(&mut msg).await.unwrap_err();

        assert_eq!(err.category(), "FatalSendFailure");
        assert_eq!(port.calls(), 4);
        assert_eq!(msg.retry_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_is_not_retried() {
        let port = FakeSender::scripted(vec![fatal()]);
        let mut msg = outbound();

        let err = forwarder(port.clone()).forward(&mut msg).await.unwrap_err();

        assert!(matches!(err, Error::FatalSendFailure { .. }));
        assert_eq!(port.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_modified_drops_message() {
        let port = FakeSender::scripted(vec![Err(PlatformError::new(
            PlatformErrorKind::NotModified,
            "message is not modified",
        ))]);
        let mut msg = outbound();

        let out = forwarder(port.clone()).forward(&mut msg).await.unwrap();

        assert_eq!(out, ForwardOutcome::Dropped);
        assert_eq!(port.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let port = FakeSender::scripted(vec![Err(PlatformError::rate_limited(
            Duration::from_secs(600),
        ))]);
        let cancel = CancellationToken::new();
        let fwd = Forwarder::new(port.clone(), RetryPolicy::default(), cancel.clone());
        let mut msg = outbound();

        let handle = tokio::spawn(async move { fwd.forward(&mut msg).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(port.calls(), 1);
    }
}
