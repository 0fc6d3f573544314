//! Event Listener: turns inbound channel posts into forwarded messages.
//!
//! Events are accepted one at a time from an mpsc stream, rewritten
//! synchronously (locate, transform, compose) and then handed to a tracked
//! task for forwarding, so a long backoff never stalls delivery. Runs for the
//! same source message are chained: a run only sends after its predecessor
//! finished or was abandoned.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn, Level};

use crate::{
    compose::compose,
    domain::{ChannelId, InboundPost, MessageKey, OutboundMessage, PostEvent},
    errors::Error,
    forwarder::{ForwardOutcome, Forwarder, RetryPolicy},
    messaging::port::SendPort,
    numeral::locate,
    transform::transform,
    Result,
};

/// Already-resolved values the listener runs with.
#[derive(Clone, Copy, Debug)]
pub struct RelayConfig {
    pub source: ChannelId,
    pub target: ChannelId,
    pub retry: RetryPolicy,
    pub shutdown_grace: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    OtherChannel,
    EmptyText,
    NoNumberFound,
    /// The numeral does not fit in an `f64`.
    OutOfRange,
    /// An edit that would resend exactly what its predecessor sent.
    Unchanged,
    /// The platform reported the send as a no-op.
    Ignorable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Sent(MessageKey),
    Dropped(DropReason),
}

/// What `dispatch` did with an event.
#[derive(Debug)]
pub enum Dispatch {
    Discarded(DropReason),
    Spawned(JoinHandle<Result<RunOutcome>>),
}

/// Locate the first numeral in `text`, transform it and splice it back.
pub fn rewrite(text: &str) -> std::result::Result<String, DropReason> {
    if text.is_empty() {
        return Err(DropReason::EmptyText);
    }
    let m = locate(text).ok_or(DropReason::NoNumberFound)?;
    // A numeral past f64::MAX parses to infinity.
    let formatted = transform(m.value).ok_or(DropReason::OutOfRange)?;
    info!(original = %m.raw, processed = %formatted, "number extracted");
    compose(text, &m, &formatted).ok_or(DropReason::NoNumberFound)
}

/// Text sent by a finished run, or `None` if it sent nothing.
type Handoff = Option<String>;

struct Turn {
    ticket: u64,
    prev: Option<oneshot::Receiver<Handoff>>,
    done: oneshot::Sender<Handoff>,
}

struct Slot {
    ticket: u64,
    done: oneshot::Receiver<Handoff>,
}

#[derive(Default)]
struct QueueState {
    next_ticket: u64,
    slots: HashMap<MessageKey, Slot>,
}

/// Per-message run chains.
#[derive(Default)]
struct MessageQueues {
    inner: Mutex<QueueState>,
}

impl MessageQueues {
    /// Append a run for `key`; called in event order.
    async fn enqueue(&self, key: MessageKey) -> Turn {
        let mut state = self.inner.lock().await;
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let (done, rx) = oneshot::channel();
        let prev = state
            .slots
            .insert(key, Slot { ticket, done: rx })
            .map(|s| s.done);
        Turn { ticket, prev, done }
    }

    /// Forget `key` unless a later run has queued behind this one.
    async fn finish(&self, key: MessageKey, ticket: u64) {
        let mut state = self.inner.lock().await;
        if state.slots.get(&key).is_some_and(|s| s.ticket == ticket) {
            state.slots.remove(&key);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }
}

pub struct EventListener {
    cfg: RelayConfig,
    forwarder: Arc<Forwarder>,
    queues: Arc<MessageQueues>,
    tracker: TaskTracker,
    abandon: CancellationToken,
}

impl EventListener {
    pub fn new(cfg: RelayConfig, port: Arc<dyn SendPort>) -> Self {
        let abandon = CancellationToken::new();
        Self {
            cfg,
            forwarder: Arc::new(Forwarder::new(port, cfg.retry, abandon.clone())),
            queues: Arc::new(MessageQueues::default()),
            tracker: TaskTracker::new(),
            abandon,
        }
    }

    /// Consume events until the stream closes or `shutdown` fires, then give
    /// in-flight runs the grace period. Returns how many runs were abandoned.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<InboundPost>,
        shutdown: CancellationToken,
    ) -> usize {
        info!(
            source = self.cfg.source.0,
            target = self.cfg.target.0,
            "listening for channel posts"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                ev = events.recv() => match ev {
                    Some(raw) => {
                        self.dispatch(raw).await;
                    }
                    None => break,
                },
            }
        }
        self.drain().await
    }

    /// Validate and rewrite one event, then spawn its forward.
    pub async fn dispatch(&self, raw: InboundPost) -> Dispatch {
        let event = match PostEvent::try_from(raw) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "discarding malformed event");
                return Dispatch::Discarded(DropReason::Malformed);
            }
        };
        let key = event.key();

        if event.channel_id != self.cfg.source {
            debug!(post = %key, "post from unexpected channel, ignoring");
            return Dispatch::Discarded(DropReason::OtherChannel);
        }

        info!(post = %key, is_edit = event.is_edit, "post received");
        let text = event.text.as_deref().unwrap_or_default();
        debug!(post = %key, original = text, "original text");

        let composed = match rewrite(text) {
            Ok(t) => t,
            Err(reason) => {
                info!(post = %key, ?reason, "nothing to relay");
                return Dispatch::Discarded(reason);
            }
        };
        info!(post = %key, modified = %composed, "modified text");

        let turn = self.queues.enqueue(key).await;
        let outbound = OutboundMessage::new(key, self.cfg.target, composed);
        let forwarder = self.forwarder.clone();
        let queues = self.queues.clone();
        let abandon = self.abandon.clone();
        let is_edit = event.is_edit;

        Dispatch::Spawned(self.tracker.spawn(async move {
            let ticket = turn.ticket;
            let res = run_turn(forwarder, turn, outbound, is_edit, abandon).await;
            queues.finish(key, ticket).await;

            match &res {
                Ok(outcome) => debug!(post = %key, ?outcome, "run finished"),
                Err(Error::Cancelled) => warn!(post = %key, "run abandoned at shutdown"),
                Err(e) => report_failure(key, e),
            }
            res
        }))
    }

    /// Stop accepting runs and wait up to the grace period for in-flight ones.
    pub async fn drain(&self) -> usize {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight forwards");
        }
        if tokio::time::timeout(self.cfg.shutdown_grace, self.tracker.wait())
            .await
            .is_ok()
        {
            return 0;
        }

        let abandoned = self.tracker.len();
        self.abandon.cancel();
        warn!(abandoned, "grace period expired, abandoning forwards");
        abandoned
    }

    #[cfg(test)]
    async fn pending_messages(&self) -> usize {
        self.queues.len().await
    }
}

/// Retry exhaustion is a warning; anything else that stops a post is an error.
fn failure_level(e: &Error) -> Level {
    match e {
        Error::TransientSendFailure { .. } | Error::Cancelled => Level::WARN,
        _ => Level::ERROR,
    }
}

fn report_failure(key: MessageKey, e: &Error) {
    if failure_level(e) == Level::WARN {
        warn!(
            message_id = key.message_id.0,
            channel_id = key.channel_id.0,
            category = e.category(),
            error = %e,
            "retries exhausted, post not relayed"
        );
    } else {
        error!(
            message_id = key.message_id.0,
            channel_id = key.channel_id.0,
            category = e.category(),
            error = %e,
            "failed to relay post"
        );
    }
}

async fn run_turn(
    forwarder: Arc<Forwarder>,
    turn: Turn,
    mut outbound: OutboundMessage,
    is_edit: bool,
    abandon: CancellationToken,
) -> Result<RunOutcome> {
    let Turn { prev, done, .. } = turn;

    let previous = match prev {
        Some(rx) => tokio::select! {
            // A dropped sender means the predecessor was abandoned.
            handoff = rx => handoff.unwrap_or(None),
            _ = abandon.cancelled() => return Err(Error::Cancelled),
        },
        None => None,
    };

    if is_edit && previous.as_deref() == Some(outbound.text.as_str()) {
        debug!(post = %outbound.origin, "edit matches previous send, skipping");
        // Later runs should still compare against the text on the channel.
        let _ = done.send(previous);
        return Ok(RunOutcome::Dropped(DropReason::Unchanged));
    }

    let res = forwarder.forward(&mut outbound).await;
    let sent = matches!(res, Ok(ForwardOutcome::Sent(_))).then(|| outbound.text.clone());
    let _ = done.send(sent);

    Ok(match res? {
        ForwardOutcome::Sent(key) => RunOutcome::Sent(key),
        ForwardOutcome::Dropped => RunOutcome::Dropped(DropReason::Ignorable),
    })
}
