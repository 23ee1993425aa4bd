//! Mailbox actor runtime.
//!
//! An actor owns its state and processes one message at a time from a
//! bounded mailbox. The loop stops when the shutdown signal fires, when the
//! actor asks to stop, on a permanent error, or once every external handle
//! is gone.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop, or `Err` on failure.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Context provided to actors during message handling.
pub struct ActorContext {
    pub actor_id: String,
    pub messages_processed: u64,
}

impl ActorContext {
    pub fn new(actor_id: String) -> Self {
        Self {
            actor_id,
            messages_processed: 0,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ActorError {
    /// The actor cannot continue.
    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("mailbox full")]
    MailboxFull,

    #[error("actor stopped")]
    ActorStopped,
}

// =============================================================================
// Handles
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        try_send(&self.tx, msg)
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

fn try_send<M: Message>(tx: &mpsc::Sender<M>, msg: M) -> Result<(), ActorError> {
    tx.try_send(msg).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
        mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
    })
}

/// Handle an actor keeps to itself. It does not keep the mailbox open.
pub struct WeakActorHandle<M: Message> {
    tx: mpsc::WeakSender<M>,
}

impl<M: Message> Clone for WeakActorHandle<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M: Message> WeakActorHandle<M> {
    /// Post without waiting. Fails once the mailbox is full or closed.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        let tx = self.tx.upgrade().ok_or(ActorError::ActorStopped)?;
        try_send(&tx, msg)
    }

    /// Post, waiting for mailbox space. Used by timers outside the actor.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        let tx = self.tx.upgrade().ok_or(ActorError::ActorStopped)?;
        tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }
}

/// Start `build`'s actor on the runtime. `build` receives the actor's own
/// weak handle so that it can post messages to itself.
pub fn spawn<A, F>(build: F, mailbox_size: usize, shutdown: watch::Receiver<bool>) -> (ActorHandle<A::Message>, JoinHandle<()>)
where
    A: Actor,
    F: FnOnce(WeakActorHandle<A::Message>) -> A,
{
    let (tx, rx) = mpsc::channel(mailbox_size.max(1));
    let mut actor = build(WeakActorHandle { tx: tx.downgrade() });
    let actor_id = format!("{}_{}", actor.name(), generate_actor_id());
    let handle = ActorHandle {
        tx,
        actor_id: actor_id.clone(),
    };
    info!(actor_id = %actor_id, "Spawned actor");

    let task = tokio::spawn({
        let actor_id = actor_id.clone();
        async move {
            let mut ctx = ActorContext::new(actor_id.clone());
            if let Err(e) = actor.on_start(&mut ctx).await {
                error!(actor_id = %actor_id, error = %e, "Actor failed to start");
                return;
            }
            run_actor_loop(&mut actor, rx, shutdown, &mut ctx).await;
        }
    });
    (handle, task)
}

// =============================================================================
// Actor Loop
// =============================================================================

async fn run_actor_loop<A: Actor>(
    actor: &mut A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    ctx: &mut ActorContext,
) {
    debug!(actor_id = %ctx.actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(actor_id = %ctx.actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %ctx.actor_id, "Actor mailbox closed");
                    break;
                };
                ctx.messages_processed += 1;

                match actor.handle(msg, ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(actor_id = %ctx.actor_id, "Actor requested stop");
                        break;
                    }
                    Err(ActorError::Permanent(reason)) => {
                        error!(actor_id = %ctx.actor_id, error = %reason, "Actor failed");
                        break;
                    }
                    Err(e) => {
                        error!(actor_id = %ctx.actor_id, error = %e, "Actor error");
                    }
                }
            }
        }
    }

    actor.on_stop(ctx).await;

    info!(
        actor_id = %ctx.actor_id,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );
}

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    enum CounterMessage {
        Add(u64),
        Echo,
        Get(oneshot::Sender<u64>),
        Fail,
        Stop,
    }

    struct Counter {
        total: u64,
        me: WeakActorHandle<CounterMessage>,
        stopped: Option<oneshot::Sender<u64>>,
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&mut self, msg: CounterMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
            match msg {
                CounterMessage::Add(n) => self.total += n,
                CounterMessage::Echo => self.me.try_send(CounterMessage::Add(1))?,
                CounterMessage::Get(reply) => {
                    let _ = reply.send(self.total);
                }
                CounterMessage::Fail => return Err(ActorError::Permanent("boom".into())),
                CounterMessage::Stop => return Ok(false),
            }
            Ok(true)
        }

        async fn on_stop(&mut self, ctx: &mut ActorContext) {
            if let Some(stopped) = self.stopped.take() {
                let _ = stopped.send(ctx.messages_processed);
            }
        }
    }

    fn start() -> (ActorHandle<CounterMessage>, JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn(
            |me| Counter {
                total: 0,
                me,
                stopped: None,
            },
            8,
            shutdown_rx,
        );
        (handle, task, shutdown_tx)
    }

    async fn total(handle: &ActorHandle<CounterMessage>) -> u64 {
        let (tx, rx) = oneshot::channel();
        handle.send(CounterMessage::Get(tx)).await.unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_messages_are_processed_in_order() {
        let (handle, _task, _shutdown) = start();
        handle.send(CounterMessage::Add(2)).await.unwrap();
        handle.send(CounterMessage::Echo).await.unwrap();
        handle.send(CounterMessage::Add(3)).await.unwrap();
        total(&handle).await;
        // Echo's own message is queued before the first Get is handled.
        assert_eq!(total(&handle).await, 6);
        assert!(handle.actor_id().starts_with("counter_"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (handle, task, shutdown) = start();
        shutdown.send(true).unwrap();
        task.await.unwrap();
        assert!(matches!(handle.send(CounterMessage::Add(1)).await, Err(ActorError::ActorStopped)));
    }

    #[tokio::test]
    async fn test_permanent_error_and_stop_end_the_actor() {
        let (handle, task, _shutdown) = start();
        handle.send(CounterMessage::Fail).await.unwrap();
        task.await.unwrap();

        let (handle, task, _shutdown) = start();
        handle.send(CounterMessage::Stop).await.unwrap();
        task.await.unwrap();
        assert!(handle.try_send(CounterMessage::Add(1)).is_err());
    }

    #[tokio::test]
    async fn test_on_stop_sees_processed_count() {
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn(
            |me| Counter {
                total: 0,
                me,
                stopped: Some(stopped_tx),
            },
            8,
            shutdown_rx,
        );
        handle.send(CounterMessage::Add(1)).await.unwrap();
        handle.send(CounterMessage::Stop).await.unwrap();
        task.await.unwrap();
        assert_eq!(stopped_rx.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_mailbox() {
        let (handle, task, _shutdown) = start();
        drop(handle);
        task.await.unwrap();
    }
}
