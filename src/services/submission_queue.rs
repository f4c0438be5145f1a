//! Ordered, at-least-once queue of pending exam submissions.
//!
//! Messages move through `visible -> claimed -> deleted`. A claim hides the message
//! for the visibility timeout and bumps its dequeue count; a message whose claim is
//! never confirmed by a delete comes back with a non-zero count.

mod envelope;
mod redis_queue;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

pub(crate) use envelope::{decode_submission, encode_submission, MessageEncoding};
pub(crate) use redis_queue::RedisSubmissionQueue;

#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("queue '{0}' does not exist")]
    NotFound(String),
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("message {0} is no longer in the queue")]
    MessageNotFound(String),
    #[error("claim on message {0} was superseded by a later claim")]
    ReceiptMismatch(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("visibility timeout of {0}s runs past the supported clock range")]
    VisibilityOverflow(i64),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Where a visible message stands with respect to earlier consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryState {
    /// Never handed to a consumer.
    Pending,
    /// Handed out before without a confirmed delete; the outcome of that attempt is unknown.
    Stalled { claims: u32 },
}

impl DeliveryState {
    pub(crate) fn from_dequeue_count(count: u32) -> Self {
        match count {
            0 => Self::Pending,
            claims => Self::Stalled { claims },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PeekedMessage {
    pub(crate) id: String,
    pub(crate) dequeue_count: u32,
    pub(crate) inserted_at: OffsetDateTime,
}

impl PeekedMessage {
    pub(crate) fn delivery_state(&self) -> DeliveryState {
        DeliveryState::from_dequeue_count(self.dequeue_count)
    }
}

/// A message this consumer holds; only the holder of `pop_receipt` may delete it.
#[derive(Debug, Clone)]
pub(crate) struct ClaimedMessage {
    pub(crate) id: String,
    pub(crate) pop_receipt: String,
    pub(crate) dequeue_count: u32,
    pub(crate) body: String,
    pub(crate) inserted_at: OffsetDateTime,
}

impl ClaimedMessage {
    /// State the message was in right before this claim.
    pub(crate) fn prior_state(&self) -> DeliveryState {
        DeliveryState::from_dequeue_count(self.dequeue_count.saturating_sub(1))
    }
}

#[async_trait]
pub(crate) trait SubmissionQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self) -> Result<bool, QueueError>;

    /// Returns `true` when the queue was created by this call.
    async fn create_if_missing(&self) -> Result<bool, QueueError>;

    /// Appends a message and returns its id.
    async fn send(&self, body: String) -> Result<String, QueueError>;

    /// Looks at the next visible message without claiming it.
    async fn peek(&self) -> Result<Option<PeekedMessage>, QueueError>;

    /// Claims the next visible message.
    async fn receive(&self) -> Result<Option<ClaimedMessage>, QueueError>;

    async fn delete(&self, message: &ClaimedMessage) -> Result<(), QueueError>;

    /// Messages currently stored, visible or not.
    async fn len(&self) -> Result<u64, QueueError>;
}
