use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{ClaimedMessage, PeekedMessage, QueueError, SubmissionQueue};
use crate::core::redis::RedisHandle;
use crate::core::time::{format_offset, now_utc, unix_millis};

const KEY_NAMESPACE: &str = "exam-ingest:queue";

const SEND_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return false
    end
    local seq = redis.call("INCR", KEYS[2])
    local id = string.format("%020d", seq)
    redis.call("HSET", ARGV[1] .. id,
        "body", ARGV[2],
        "dequeue_count", 0,
        "inserted_at", ARGV[3],
        "pop_receipt", "")
    redis.call("ZADD", KEYS[3], ARGV[3], id)
    return id
"#;

const PEEK_SCRIPT: &str = r#"
    while true do
        local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, 1)
        if #ids == 0 then
            return false
        end
        local id = ids[1]
        local fields = redis.call("HMGET", ARGV[2] .. id, "body", "dequeue_count", "inserted_at")
        if fields[1] then
            return {id, tonumber(fields[2]), fields[1], tonumber(fields[3])}
        end
        redis.call("ZREM", KEYS[1], id)
    end
"#;

const RECEIVE_SCRIPT: &str = r#"
    while true do
        local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, 1)
        if #ids == 0 then
            return false
        end
        local id = ids[1]
        local key = ARGV[2] .. id
        if redis.call("EXISTS", key) == 1 then
            local count = redis.call("HINCRBY", key, "dequeue_count", 1)
            redis.call("HSET", key, "pop_receipt", ARGV[4])
            redis.call("ZADD", KEYS[1], ARGV[3], id)
            local fields = redis.call("HMGET", key, "body", "inserted_at")
            return {id, count, fields[1], tonumber(fields[2])}
        end
        redis.call("ZREM", KEYS[1], id)
    end
"#;

const DELETE_SCRIPT: &str = r#"
    local receipt = redis.call("HGET", KEYS[2], "pop_receipt")
    if not receipt then
        return 0
    end
    if receipt ~= ARGV[2] then
        return -1
    end
    redis.call("ZREM", KEYS[1], ARGV[1])
    redis.call("DEL", KEYS[2])
    return 1
"#;

type MessageRow = (String, i64, String, i64);

/// Submission queue stored in Redis.
///
/// Layout per queue: a marker key proving the queue exists, a sequence counter for
/// message ids, a sorted set of ids scored by the time they become visible, and one
/// hash per message with its body and delivery metadata.
#[derive(Clone)]
pub(crate) struct RedisSubmissionQueue {
    redis: RedisHandle,
    name: String,
    visibility_timeout: Duration,
}

impl RedisSubmissionQueue {
    pub(crate) fn new(
        redis: RedisHandle,
        name: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Self {
        Self { redis, name: name.into(), visibility_timeout }
    }

    fn marker_key(&self) -> String {
        format!("{KEY_NAMESPACE}:{}", self.name)
    }

    fn sequence_key(&self) -> String {
        format!("{KEY_NAMESPACE}:{}:seq", self.name)
    }

    fn visibility_key(&self) -> String {
        format!("{KEY_NAMESPACE}:{}:visible", self.name)
    }

    fn message_prefix(&self) -> String {
        format!("{KEY_NAMESPACE}:{}:msg:", self.name)
    }

    fn message_key(&self, id: &str) -> String {
        format!("{}{id}", self.message_prefix())
    }
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// When a message claimed at `now` becomes visible again.
fn visible_until(now: OffsetDateTime, timeout: Duration) -> Result<OffsetDateTime, QueueError> {
    now.checked_add(timeout).ok_or(QueueError::VisibilityOverflow(timeout.whole_seconds()))
}

fn from_millis(value: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[async_trait]
impl SubmissionQueue for RedisSubmissionQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        let mut conn = self.redis.connection().await?;
        let exists: bool = conn.exists(self.marker_key()).await?;
        Ok(exists)
    }

    async fn create_if_missing(&self) -> Result<bool, QueueError> {
        let mut conn = self.redis.connection().await?;
        let created: bool = conn.set_nx(self.marker_key(), format_offset(now_utc())).await?;
        if created {
            tracing::info!(queue = %self.name, "Created submission queue");
        }
        Ok(created)
    }

    async fn send(&self, body: String) -> Result<String, QueueError> {
        let mut conn = self.redis.connection().await?;
        let now = unix_millis(now_utc());

        let id: Option<String> = Script::new(SEND_SCRIPT)
            .key(self.marker_key())
            .key(self.sequence_key())
            .key(self.visibility_key())
            .arg(self.message_prefix())
            .arg(body)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        id.ok_or_else(|| QueueError::NotFound(self.name.clone()))
    }

    async fn peek(&self) -> Result<Option<PeekedMessage>, QueueError> {
        let mut conn = self.redis.connection().await?;
        let now = unix_millis(now_utc());

        let row: Option<MessageRow> = Script::new(PEEK_SCRIPT)
            .key(self.visibility_key())
            .arg(now)
            .arg(self.message_prefix())
            .invoke_async(&mut conn)
            .await?;

        Ok(row.map(|(id, dequeue_count, _body, inserted_at)| PeekedMessage {
            id,
            dequeue_count: to_count(dequeue_count),
            inserted_at: from_millis(inserted_at),
        }))
    }

    async fn receive(&self) -> Result<Option<ClaimedMessage>, QueueError> {
        let now = now_utc();
        let visible_again = unix_millis(visible_until(now, self.visibility_timeout)?);
        let mut conn = self.redis.connection().await?;
        let pop_receipt = Uuid::new_v4().to_string();

        let row: Option<MessageRow> = Script::new(RECEIVE_SCRIPT)
            .key(self.visibility_key())
            .arg(unix_millis(now))
            .arg(self.message_prefix())
            .arg(visible_again)
            .arg(&pop_receipt)
            .invoke_async(&mut conn)
            .await?;

        Ok(row.map(|(id, dequeue_count, body, inserted_at)| ClaimedMessage {
            id,
            pop_receipt,
            dequeue_count: to_count(dequeue_count),
            body,
            inserted_at: from_millis(inserted_at),
        }))
    }

    async fn delete(&self, message: &ClaimedMessage) -> Result<(), QueueError> {
        let mut conn = self.redis.connection().await?;

        let outcome: i64 = Script::new(DELETE_SCRIPT)
            .key(self.visibility_key())
            .key(self.message_key(&message.id))
            .arg(&message.id)
            .arg(&message.pop_receipt)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(()),
            -1 => Err(QueueError::ReceiptMismatch(message.id.clone())),
            _ => Err(QueueError::MessageNotFound(message.id.clone())),
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.connection().await?;
        let count: u64 = conn.zcard(self.visibility_key()).await?;
        Ok(count)
    }
}
