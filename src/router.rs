//! Process-wide message bus between agents
//!
//! The router owns a single FIFO queue and one dispatcher task. Senders
//! return as soon as their message is enqueued; handlers run on the
//! dispatcher, never in the caller's context. Delivery is best-effort and
//! at-most-once: a destination with no registered handler at dispatch time
//! drops the message with a warning. Agents never hold references to each
//! other; this bus is the only cross-agent channel.

use crate::data::AgentData;
use crate::domain_types::{AgentId, MessageId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination of a message: one agent or every registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    /// A single agent
    Agent(AgentId),
    /// Fanout to all registered agents except the sender
    Broadcast,
}

/// A payload directed from one agent to another (or all)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Sending agent
    pub from: AgentId,
    /// Destination
    pub to: Destination,
    /// Free-form type tag interpreted by the receiving handler
    pub message_type: String,
    /// Message payload
    pub payload: AgentData,
    /// Enqueue time
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Builds a direct message
    pub fn direct(
        from: AgentId,
        to: AgentId,
        message_type: impl Into<String>,
        payload: AgentData,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            from,
            to: Destination::Agent(to),
            message_type: message_type.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Builds a broadcast message
    pub fn broadcast(from: AgentId, message_type: impl Into<String>, payload: AgentData) -> Self {
        Self {
            id: MessageId::generate(),
            from,
            to: Destination::Broadcast,
            message_type: message_type.into(),
            payload,
            sent_at: Utc::now(),
        }
    }
}

/// Inbox handler invoked on the dispatcher task
pub type MessageHandler = Arc<dyn Fn(AgentMessage) + Send + Sync>;

/// Router delivery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Messages currently waiting in the queue
    pub queue_depth: usize,
    /// Registered handlers
    pub registered_agents: usize,
    /// Deliveries that reached a handler
    pub delivered: u64,
    /// Messages dropped for lack of a handler
    pub dropped: u64,
}

struct RouterShared {
    handlers: DashMap<AgentId, MessageHandler>,
    queue_depth: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RouterShared {
    /// Invoked on the dispatcher; the handler reference is cloned out of the
    /// map so no registry lock is held while user code runs.
    fn dispatch(&self, message: AgentMessage) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        match message.to {
            Destination::Agent(agent_id) => {
                let handler = self.handlers.get(&agent_id).map(|entry| Arc::clone(&entry));
                match handler {
                    Some(handler) => {
                        handler(message);
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            agent_id = %agent_id,
                            message_id = %message.id,
                            "dropping message: no handler registered for destination"
                        );
                    }
                }
            }
            Destination::Broadcast => {
                // membership is observed at dispatch time, not at send time
                let recipients: Vec<(AgentId, MessageHandler)> = self
                    .handlers
                    .iter()
                    .filter(|entry| *entry.key() != message.from)
                    .map(|entry| (*entry.key(), Arc::clone(entry.value())))
                    .collect();
                for (agent_id, handler) in recipients {
                    let mut delivery = message.clone();
                    delivery.to = Destination::Agent(agent_id);
                    handler(delivery);
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// The process-wide message bus
pub struct MessageRouter {
    shared: Arc<RouterShared>,
    sender: mpsc::UnboundedSender<AgentMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<AgentMessage>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl MessageRouter {
    /// Creates a router with the default 5 s drain timeout
    pub fn new() -> Self {
        Self::with_drain_timeout(Duration::from_secs(5))
    }

    /// Creates a router draining for at most `drain_timeout` on stop
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(RouterShared {
                handlers: DashMap::new(),
                queue_depth: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            dispatcher: Mutex::new(None),
            shutdown: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Registers an inbox handler; re-registration replaces with a warning
    pub fn register(&self, agent_id: AgentId, handler: MessageHandler) {
        if self.shared.handlers.insert(agent_id, handler).is_some() {
            warn!(agent_id = %agent_id, "replacing previously registered message handler");
        }
        debug!(agent_id = %agent_id, "registered message handler");
    }

    /// Removes an agent's inbox handler
    pub fn unregister(&self, agent_id: AgentId) {
        if self.shared.handlers.remove(&agent_id).is_some() {
            debug!(agent_id = %agent_id, "unregistered message handler");
        }
    }

    /// Whether a handler is registered for `agent_id`
    pub fn is_registered(&self, agent_id: AgentId) -> bool {
        self.shared.handlers.contains_key(&agent_id)
    }

    /// Enqueues a message for delivery; never blocks the sender
    pub fn route(&self, message: AgentMessage) {
        if self.shutdown.is_cancelled() {
            warn!(message_id = %message.id, "router stopped, dropping message");
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(message).is_err() {
            // receiver gone: dispatcher already shut down
            self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Enqueues a broadcast; fanout happens at dispatch time
    pub fn broadcast(&self, message: AgentMessage) {
        debug_assert!(matches!(message.to, Destination::Broadcast));
        self.route(message);
    }

    /// Launches the dispatcher task
    ///
    /// A second call after the dispatcher was taken is a no-op with a warn.
    pub fn start(&self) {
        let Some(mut receiver) = self.receiver.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
        else {
            warn!("message router already started");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.clone();
        let drain_timeout = self.drain_timeout;

        let handle = tokio::spawn(async move {
            info!("message router dispatcher started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        // best-effort drain of already-enqueued messages
                        let deadline = tokio::time::Instant::now() + drain_timeout;
                        while let Ok(message) = receiver.try_recv() {
                            shared.dispatch(message);
                            if tokio::time::Instant::now() >= deadline {
                                warn!("drain timeout expired with messages still queued");
                                break;
                            }
                        }
                        break;
                    }
                    message = receiver.recv() => {
                        match message {
                            Some(message) => shared.dispatch(message),
                            None => break,
                        }
                    }
                }
            }
            info!("message router dispatcher stopped");
        });

        *self.dispatcher.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Signals shutdown, drains best-effort, and joins the dispatcher
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.drain_timeout + Duration::from_secs(1), handle)
                .await
                .is_err()
            {
                warn!("message router dispatcher did not stop within the grace period");
            }
        }
    }

    /// Current delivery statistics, including queue depth for backpressure
    /// detection
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            queue_depth: self.shared.queue_depth.load(Ordering::Relaxed),
            registered_agents: self.shared.handlers.len(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collecting_handler() -> (MessageHandler, Arc<StdMutex<Vec<AgentMessage>>>) {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: MessageHandler = Arc::new(move |message| {
            sink.lock().unwrap().push(message);
        });
        (handler, received)
    }

    async fn settle(router: &MessageRouter) {
        for _ in 0..50 {
            if router.stats().queue_depth == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // one extra yield so the final handler invocation completes
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn direct_delivery_reaches_the_registered_handler() {
        let router = MessageRouter::new();
        router.start();

        let sender = AgentId::generate();
        let receiver = AgentId::generate();
        let (handler, received) = collecting_handler();
        router.register(receiver, handler);

        router.route(AgentMessage::direct(
            sender,
            receiver,
            "ping",
            AgentData::new().with("n", 1),
        ));
        settle(&router).await;

        let messages = received.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, sender);
        assert_eq!(messages[0].message_type, "ping");
        router.stop().await;
    }

    #[tokio::test]
    async fn per_sender_receiver_order_is_preserved() {
        let router = MessageRouter::new();
        router.start();

        let sender = AgentId::generate();
        let receiver = AgentId::generate();
        let (handler, received) = collecting_handler();
        router.register(receiver, handler);

        for i in 0..20 {
            router.route(AgentMessage::direct(
                sender,
                receiver,
                "seq",
                AgentData::new().with("n", i),
            ));
        }
        settle(&router).await;

        let messages = received.lock().unwrap();
        let observed: Vec<i64> = messages
            .iter()
            .map(|m| m.payload.get_int("n").unwrap())
            .collect();
        assert_eq!(observed, (0..20).collect::<Vec<i64>>());
        router.stop().await;
    }

    #[tokio::test]
    async fn broadcast_excludes_the_sender() {
        let router = MessageRouter::new();
        router.start();

        let a = AgentId::generate();
        let b = AgentId::generate();
        let c = AgentId::generate();
        let (handler_a, received_a) = collecting_handler();
        let (handler_b, received_b) = collecting_handler();
        let (handler_c, received_c) = collecting_handler();
        router.register(a, handler_a);
        router.register(b, handler_b);
        router.register(c, handler_c);

        router.broadcast(AgentMessage::broadcast(a, "ping", AgentData::new()));
        settle(&router).await;

        assert_eq!(received_a.lock().unwrap().len(), 0);
        assert_eq!(received_b.lock().unwrap().len(), 1);
        assert_eq!(received_c.lock().unwrap().len(), 1);
        assert_eq!(received_b.lock().unwrap()[0].from, a);
        router.stop().await;
    }

    #[tokio::test]
    async fn missing_handler_drops_without_error() {
        let router = MessageRouter::new();
        router.start();

        let sender = AgentId::generate();
        let ghost = AgentId::generate();
        router.route(AgentMessage::direct(sender, ghost, "ping", AgentData::new()));
        settle(&router).await;

        assert_eq!(router.stats().dropped, 1);
        assert_eq!(router.stats().delivered, 0);
        router.stop().await;
    }

    #[tokio::test]
    async fn unregistered_agent_receives_nothing_after_removal() {
        let router = MessageRouter::new();
        router.start();

        let sender = AgentId::generate();
        let receiver = AgentId::generate();
        let (handler, received) = collecting_handler();
        router.register(receiver, handler);
        router.unregister(receiver);

        router.route(AgentMessage::direct(sender, receiver, "ping", AgentData::new()));
        settle(&router).await;

        assert!(received.lock().unwrap().is_empty());
        assert_eq!(router.stats().dropped, 1);
        router.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_already_enqueued_messages() {
        let router = MessageRouter::new();

        let sender = AgentId::generate();
        let receiver = AgentId::generate();
        let (handler, received) = collecting_handler();
        router.register(receiver, handler);

        // enqueue before the dispatcher starts, then start and stop
        for _ in 0..5 {
            router.route(AgentMessage::direct(sender, receiver, "x", AgentData::new()));
        }
        router.start();
        router.stop().await;

        assert_eq!(received.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn routing_after_stop_drops_with_warning() {
        let router = MessageRouter::new();
        router.start();
        router.stop().await;

        let before = router.stats().dropped;
        router.route(AgentMessage::direct(
            AgentId::generate(),
            AgentId::generate(),
            "late",
            AgentData::new(),
        ));
        assert_eq!(router.stats().dropped, before + 1);
    }
}
