//! In-memory broker for testing and single-process runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    BrokerError, ConsumeResult, LocalTransactionState, Message, MessageBroker, MessageExt,
    MessageHandler, MessageId, Result, TransactionChecker,
};

/// Prefix of the broker-level dead-letter topic for a consumer group.
pub const DLQ_TOPIC_PREFIX: &str = "%DLQ%";

/// Tuning knobs for [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    /// Maximum number of messages handed to a handler at once.
    pub batch_size: usize,
    /// Delay before a batch returned with `RetryLater` is redelivered.
    pub retry_delay: Duration,
    /// Redeliveries after which the broker moves a message to `%DLQ%<group>`.
    pub max_reconsume_times: u32,
    /// Age after which an unresolved half-message is checked.
    pub check_after: Duration,
    /// Number of visible messages kept for inspection; older ones are dropped.
    pub retain_messages: usize,
    /// How long the final state of a resolved half-message stays queryable.
    pub resolved_ttl: Duration,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            retry_delay: Duration::from_secs(10),
            max_reconsume_times: 16,
            check_after: Duration::from_secs(60),
            retain_messages: 10_000,
            resolved_ttl: Duration::from_secs(600),
        }
    }
}

struct Subscription {
    topic: String,
    group: String,
    handler: Arc<dyn MessageHandler>,
}

struct Delivery {
    subscription: usize,
    message: MessageExt,
    deliver_at: Instant,
}

struct HalfMessage {
    message: MessageExt,
    stored_at: Instant,
    checks: u32,
}

#[derive(Default)]
struct BrokerState {
    /// The most recent visible messages, in publication order.
    log: VecDeque<MessageExt>,
    retain_messages: usize,
    resolved_ttl: Duration,
    /// Delayed messages that are not visible yet.
    scheduled: Vec<(Instant, MessageExt)>,
    /// Outstanding deliveries to subscriptions.
    deliveries: Vec<Delivery>,
    halves: HashMap<MessageId, HalfMessage>,
    resolved: HashMap<MessageId, (LocalTransactionState, Instant)>,
    subscriptions: Vec<Subscription>,
    failing_topics: HashSet<String>,
}

impl BrokerState {
    fn new(config: &InMemoryBrokerConfig) -> Self {
        Self {
            retain_messages: config.retain_messages,
            resolved_ttl: config.resolved_ttl,
            ..Self::default()
        }
    }

    fn check_send(&self, topic: &str) -> Result<()> {
        if self.failing_topics.contains(topic) {
            return Err(BrokerError::SendFailed {
                topic: topic.to_string(),
                reason: "simulated send failure".to_string(),
            });
        }
        Ok(())
    }

    fn publish(&mut self, message: MessageExt, now: Instant) {
        metrics::counter!("broker_messages_published_total", "topic" => message.topic().to_string())
            .increment(1);
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            if subscription.topic == message.topic() {
                self.deliveries.push(Delivery {
                    subscription: index,
                    message: message.clone(),
                    deliver_at: now,
                });
            }
        }
        if self.retain_messages == 0 {
            return;
        }
        while self.log.len() >= self.retain_messages {
            self.log.pop_front();
        }
        self.log.push_back(message);
    }

    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.scheduled = pending;
        for (_, message) in due {
            self.publish(message, now);
        }
    }

    fn resolve(&mut self, msg_id: MessageId, state: LocalTransactionState, now: Instant) {
        let ttl = self.resolved_ttl;
        self.resolved.retain(|_, (_, at)| now.duration_since(*at) < ttl);
        match state {
            LocalTransactionState::Unknown => {}
            LocalTransactionState::Commit => {
                if let Some(half) = self.halves.remove(&msg_id) {
                    self.publish(half.message, now);
                    self.resolved.insert(msg_id, (state, now));
                }
            }
            LocalTransactionState::Rollback => {
                if self.halves.remove(&msg_id).is_some() {
                    self.resolved.insert(msg_id, (state, now));
                }
            }
        }
    }
}

/// A batch taken out of the delivery queue for one subscription.
struct Batch {
    subscription: usize,
    group: String,
    handler: Arc<dyn MessageHandler>,
    messages: Vec<MessageExt>,
}

/// In-memory broker implementing [`MessageBroker`] plus consumer delivery.
///
/// Features:
/// - Thread-safe (can be shared across tasks via `Clone`)
/// - Delayed delivery driven by `tokio::time`, so paused-clock tests work
/// - Consumer groups receive every message published after they subscribe
/// - `RetryLater` redelivers with an incremented counter, up to a bound
/// - Half-messages stay invisible until committed, and are checked once stale
/// - Only the last `retain_messages` visible messages are kept for inspection
///
/// Nothing is delivered on its own: call [`InMemoryBroker::pump`] or run
/// [`InMemoryBroker::run`] in a task.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    config: InMemoryBrokerConfig,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_config(InMemoryBrokerConfig::default())
    }
}

impl InMemoryBroker {
    /// Creates a broker with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker with custom settings.
    pub fn with_config(config: InMemoryBrokerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(&config))),
            config,
        }
    }

    pub fn config(&self) -> &InMemoryBrokerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a consumer group handler for a topic.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let topic = topic.into();
        let group = group.into();
        tracing::info!(%topic, %group, "consumer subscribed");
        self.lock().subscriptions.push(Subscription {
            topic,
            group,
            handler,
        });
    }

    /// Makes sends to `topic` fail (or succeed again).
    pub fn fail_sends_to(&self, topic: impl Into<String>, fail: bool) {
        let topic = topic.into();
        let mut state = self.lock();
        if fail {
            state.failing_topics.insert(topic);
        } else {
            state.failing_topics.remove(&topic);
        }
    }

    /// Delivers every due message to its subscribers.
    ///
    /// Returns the number of messages handed to handlers.
    pub async fn pump(&self) -> usize {
        let batches = self.take_due_batches(Instant::now());
        let mut delivered = 0;

        for batch in batches {
            delivered += batch.messages.len();
            let result = batch.handler.consume(&batch.messages).await;
            if result == ConsumeResult::RetryLater {
                self.requeue(batch);
            }
        }
        delivered
    }

    fn take_due_batches(&self, now: Instant) -> Vec<Batch> {
        let mut state = self.lock();
        state.promote_due(now);

        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut state.deliveries)
            .into_iter()
            .partition(|d| d.deliver_at <= now);
        state.deliveries = later;

        let batch_size = self.config.batch_size.max(1);
        let mut batches: Vec<Batch> = Vec::new();
        for delivery in due {
            if let Some(batch) = batches.last_mut()
                && batch.subscription == delivery.subscription
                && batch.messages.len() < batch_size
            {
                batch.messages.push(delivery.message);
                continue;
            }
            let subscription = &state.subscriptions[delivery.subscription];
            batches.push(Batch {
                subscription: delivery.subscription,
                group: subscription.group.clone(),
                handler: Arc::clone(&subscription.handler),
                messages: vec![delivery.message],
            });
        }
        batches
    }

    fn requeue(&self, batch: Batch) {
        let now = Instant::now();
        let mut state = self.lock();
        for message in batch.messages {
            let reconsume_times = message.reconsume_times + 1;
            if reconsume_times > self.config.max_reconsume_times {
                tracing::warn!(
                    msg_id = %message.msg_id,
                    group = %batch.group,
                    reconsume_times,
                    "redelivery limit reached, moving to broker dead-letter topic"
                );
                let dlq = Message {
                    topic: format!("{DLQ_TOPIC_PREFIX}{}", batch.group),
                    ..message.message
                };
                state.publish(MessageExt::new(dlq), now);
                continue;
            }
            state.deliveries.push(Delivery {
                subscription: batch.subscription,
                message: message.with_reconsume_times(reconsume_times),
                deliver_at: now + self.config.retry_delay,
            });
        }
    }

    /// Asks `checker` about half-messages older than the check threshold.
    ///
    /// Returns the number of half-messages resolved by this round.
    pub async fn check_unresolved(&self, checker: &dyn TransactionChecker) -> usize {
        let now = Instant::now();
        let stale: Vec<MessageExt> = {
            let state = self.lock();
            state
                .halves
                .values()
                .filter(|half| half.stored_at + self.config.check_after <= now)
                .map(|half| half.message.clone())
                .collect()
        };

        let mut resolved = 0;
        for message in stale {
            let state = checker.check_local_transaction(&message).await;
            tracing::info!(msg_id = %message.msg_id, %state, "half-message checked");

            let mut guard = self.lock();
            if let Some(half) = guard.halves.get_mut(&message.msg_id) {
                half.checks += 1;
            }
            if state != LocalTransactionState::Unknown {
                guard.resolve(message.msg_id, state, Instant::now());
                resolved += 1;
            }
        }
        resolved
    }

    /// Pumps deliveries and checks half-messages until `shutdown` flips to true.
    pub async fn run(
        &self,
        poll_interval: Duration,
        checker: Arc<dyn TransactionChecker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pump().await;
                    self.check_unresolved(checker.as_ref()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("broker loop stopped");
    }

    /// Returns the retained visible messages published to `topic`.
    pub fn messages(&self, topic: &str) -> Vec<MessageExt> {
        self.lock()
            .log
            .iter()
            .filter(|m| m.topic() == topic)
            .cloned()
            .collect()
    }

    /// Returns the number of retained visible messages published to `topic`.
    pub fn message_count(&self, topic: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|m| m.topic() == topic)
            .count()
    }

    /// Returns the number of delayed messages not yet visible.
    pub fn scheduled_count(&self) -> usize {
        self.lock().scheduled.len()
    }

    /// Returns the number of deliveries waiting for a handler.
    pub fn pending_delivery_count(&self) -> usize {
        self.lock().deliveries.len()
    }

    /// Returns the number of unresolved half-messages.
    pub fn half_message_count(&self) -> usize {
        self.lock().halves.len()
    }

    /// Returns how often an unresolved half-message has been checked.
    pub fn check_count(&self, msg_id: MessageId) -> Option<u32> {
        self.lock().halves.get(&msg_id).map(|half| half.checks)
    }

    /// Returns the final state of a half-message, or `None` while unresolved
    /// or once the state is older than `resolved_ttl`.
    pub fn transaction_state(&self, msg_id: MessageId) -> Option<LocalTransactionState> {
        let ttl = self.config.resolved_ttl;
        self.lock()
            .resolved
            .get(&msg_id)
            .filter(|(_, at)| at.elapsed() < ttl)
            .map(|(state, _)| *state)
    }

    /// Returns the number of resolved half-message states still held.
    pub fn resolved_count(&self) -> usize {
        self.lock().resolved.len()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, message: Message) -> Result<MessageId> {
        let mut state = self.lock();
        state.check_send(&message.topic)?;
        let ext = MessageExt::new(message);
        let msg_id = ext.msg_id;
        state.publish(ext, Instant::now());
        Ok(msg_id)
    }

    async fn send_delayed(&self, message: Message, delay: Duration) -> Result<MessageId> {
        let mut state = self.lock();
        state.check_send(&message.topic)?;
        let ext = MessageExt::new(message);
        let msg_id = ext.msg_id;
        state.scheduled.push((Instant::now() + delay, ext));
        Ok(msg_id)
    }

    async fn send_half(&self, message: Message) -> Result<MessageId> {
        let mut state = self.lock();
        state.check_send(&message.topic)?;
        let ext = MessageExt::new(message);
        let msg_id = ext.msg_id;
        state.halves.insert(
            msg_id,
            HalfMessage {
                message: ext,
                stored_at: Instant::now(),
                checks: 0,
            },
        );
        Ok(msg_id)
    }

    async fn end_transaction(
        &self,
        msg_id: MessageId,
        state: LocalTransactionState,
    ) -> Result<()> {
        let mut guard = self.lock();
        if !guard.halves.contains_key(&msg_id) {
            return Err(BrokerError::UnknownTransaction(msg_id));
        }
        guard.resolve(msg_id, state, Instant::now());
        Ok(())
    }
}
