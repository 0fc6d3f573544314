use std::{future::Future, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{
    config::Config,
    domain::{ChannelId, InboundPost, MessageId, MessageKey, OutboundMessage},
    forwarder::{ForwardOutcome, Forwarder},
    listener::{EventListener, RelayConfig},
    messaging::{port::SendPort, throttled::ThrottledSender},
};

use crate::{resolve_channel, TelegramSender};

/// Dispatcher dependency: where accepted posts go.
struct Inbox {
    source: ChannelId,
    tx: mpsc::Sender<InboundPost>,
}

/// Text of the one-off message sent by `send_test_message`.
pub const TEST_MESSAGE: &str = "🧪 Test message from channel relay\n\nIf you see this, sending to the target channel works.";

pub async fn run_polling(cfg: Arc<Config>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    info!(username = %me.username(), "logged in");

    let source = resolve_channel(&bot, &cfg.source_channel).await?;
    let target = resolve_channel(&bot, &cfg.target_channel).await?;
    info!(source = %cfg.source_channel, source_id = source.0, "source channel");
    info!(target = %cfg.target_channel, target_id = target.0, "target channel");

    // Throttle in front of the raw sender to keep bursts under flood limits;
    // the Forwarder still handles any RetryAfter that slips through.
    let raw_sender: Arc<dyn SendPort> = Arc::new(TelegramSender::new(bot.clone()));
    let sender: Arc<dyn SendPort> = Arc::new(ThrottledSender::new(raw_sender, cfg.throttle));

    let listener = EventListener::new(
        RelayConfig {
            source,
            target,
            retry: cfg.retry,
            shutdown_grace: cfg.shutdown_grace,
        },
        sender,
    );

    let (tx, rx) = mpsc::channel(cfg.event_queue_capacity);
    let inbox = Arc::new(Inbox { source, tx });

    let handler = dptree::entry()
        .branch(
            Update::filter_channel_post()
                .filter(from_source)
                .endpoint(handle_new_post),
        )
        .branch(
            Update::filter_edited_channel_post()
                .filter(from_source)
                .endpoint(handle_edited_post),
        );

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![inbox])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    let stopper = tokio::spawn(shutdown_when_running(shutdown.clone(), move || {
        let owned = token.clone();
        match token.shutdown() {
            Ok(_) => Ok(async move {
                if let Ok(done) = owned.shutdown() {
                    done.await
                }
            }),
            Err(e) => Err(e),
        }
    }));

    // The listener drains once its stream closes, i.e. when the dispatcher
    // (and with it the last sender) is gone, or directly on shutdown.
    let stopped_early = shutdown.is_cancelled();
    let listening = tokio::spawn(async move { listener.run(rx, shutdown).await });
    if stopped_early {
        info!("shutdown requested during startup, not polling");
    } else {
        dispatcher.dispatch().await;
    }
    // Once polling is over the dispatcher stays idle; stop asking.
    stopper.abort();
    drop(dispatcher);

    let abandoned = listening.await?;
    info!(abandoned, "relay stopped");
    Ok(())
}

/// Delay between shutdown requests while the dispatcher is not yet polling.
const SHUTDOWN_RETRY: Duration = Duration::from_millis(100);

/// Once `stop` fires, ask the dispatcher to shut down.
///
/// The dispatcher refuses while idle (not polling yet), so keep asking until
/// it accepts.
async fn shutdown_when_running<F, Fut, E>(stop: CancellationToken, mut try_shutdown: F)
where
    F: FnMut() -> std::result::Result<Fut, E>,
    Fut: Future<Output = ()>,
{
    stop.cancelled().await;
    loop {
        match try_shutdown() {
            Ok(done) => return done.await,
            Err(_) => tokio::time::sleep(SHUTDOWN_RETRY).await,
        }
    }
}

/// Resolve the target and push one test message through the Forwarder.
pub async fn send_test_message(cfg: &Config) -> anyhow::Result<MessageKey> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let target = resolve_channel(&bot, &cfg.target_channel).await?;

    let forwarder = Forwarder::new(
        Arc::new(TelegramSender::new(bot)),
        cfg.retry,
        CancellationToken::new(),
    );
    let origin = MessageKey {
        channel_id: target,
        message_id: MessageId(0),
    };
    let mut msg = OutboundMessage::new(origin, target, TEST_MESSAGE.to_string());

    match forwarder.forward(&mut msg).await? {
        ForwardOutcome::Sent(key) => Ok(key),
        ForwardOutcome::Dropped => Err(anyhow::anyhow!("platform dropped the test message")),
    }
}

fn from_source(msg: Message, inbox: Arc<Inbox>) -> bool {
    msg.chat.id.0 == inbox.source.0
}

async fn handle_new_post(msg: Message, inbox: Arc<Inbox>) -> ResponseResult<()> {
    enqueue(&inbox, to_inbound(&msg, false)).await;
    Ok(())
}

async fn handle_edited_post(msg: Message, inbox: Arc<Inbox>) -> ResponseResult<()> {
    enqueue(&inbox, to_inbound(&msg, true)).await;
    Ok(())
}

async fn enqueue(inbox: &Inbox, post: InboundPost) {
    if inbox.tx.send(post).await.is_err() {
        warn!("listener stopped, dropping channel post");
    }
}

fn to_inbound(msg: &Message, is_edit: bool) -> InboundPost {
    if msg.text().is_none() {
        debug!(message_id = msg.id.0, "channel post without text");
    }
    InboundPost {
        channel_id: Some(ChannelId(msg.chat.id.0)),
        message_id: Some(MessageId(msg.id.0)),
        text: msg.text().map(str::to_string),
        is_edit,
    }
}
