use std::time::Duration;

use async_trait::async_trait;

use crate::{BrokerError, ConsumeResult, LocalTransactionState, Message, MessageExt, MessageId, Result};

/// Core trait for message broker clients.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Sends a message that is visible to consumers immediately.
    async fn send(&self, message: Message) -> Result<MessageId>;

    /// Sends a message that becomes visible after `delay`.
    async fn send_delayed(&self, message: Message, delay: Duration) -> Result<MessageId>;

    /// Stores a half-message that stays invisible until the transaction ends.
    async fn send_half(&self, message: Message) -> Result<MessageId>;

    /// Reports the local transaction outcome for a half-message.
    ///
    /// `Commit` publishes the message, `Rollback` discards it, and `Unknown`
    /// leaves it for a later status check.
    async fn end_transaction(&self, msg_id: MessageId, state: LocalTransactionState)
    -> Result<()>;
}

/// Answers the broker's status inquiry for an unresolved half-message.
#[async_trait]
pub trait TransactionChecker: Send + Sync {
    async fn check_local_transaction(&self, message: &MessageExt) -> LocalTransactionState;
}

/// Runs the local transaction bound to a half-message.
#[async_trait]
pub trait TransactionListener: TransactionChecker {
    async fn execute_local_transaction(&self, message: &Message) -> LocalTransactionState;
}

/// Consumer-group callback invoked with a batch of delivered messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn consume(&self, messages: &[MessageExt]) -> ConsumeResult;
}

/// Result of a transactional send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSendResult {
    pub msg_id: MessageId,
    /// State returned by the local transaction.
    pub state: LocalTransactionState,
    /// Whether the broker acknowledged the reported state.
    pub acknowledged: bool,
}

/// Extension trait providing the transactional send protocol.
#[async_trait]
pub trait MessageBrokerExt: MessageBroker {
    /// Sends a half-message, runs the local transaction, and reports its outcome.
    ///
    /// The half-message send and the outcome report are each bounded by
    /// `send_timeout`; the local transaction is not. A failure to report the
    /// outcome is not an error: the half-message stays unresolved and the
    /// broker will call the listener's status check.
    async fn send_in_transaction(
        &self,
        message: Message,
        listener: &dyn TransactionListener,
        send_timeout: Duration,
    ) -> Result<TransactionSendResult> {
        let msg_id = tokio::time::timeout(send_timeout, self.send_half(message.clone()))
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "send_half",
                after: send_timeout,
            })??;

        let state = listener.execute_local_transaction(&message).await;

        let ended = tokio::time::timeout(send_timeout, self.end_transaction(msg_id, state)).await;
        let acknowledged = match ended {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(%msg_id, %state, error = %e, "end transaction failed, awaiting check");
                false
            }
            Err(_) => {
                tracing::warn!(%msg_id, %state, "end transaction timed out, awaiting check");
                false
            }
        };

        Ok(TransactionSendResult {
            msg_id,
            state,
            acknowledged,
        })
    }
}

// Blanket implementation for all MessageBroker implementations
impl<T: MessageBroker + ?Sized> MessageBrokerExt for T {}
