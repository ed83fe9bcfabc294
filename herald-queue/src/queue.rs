use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use herald_common::internal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{QueueError, Result},
    retry::RetryPolicy,
    store::{SnapshotLock, SnapshotStore},
    types::{MessageId, MessageStatus, Payload, QueueStats, QueuedMessage},
};

/// Where a queue lives and how it retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Snapshot file. There is no default location.
    pub path: PathBuf,

    /// Attempts before a message is dead-lettered, unless overridden per
    /// message.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; each later retry doubles it.
    ///
    /// Default: 1000 milliseconds
    #[serde(default = "defaults::base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Upper bound on the retry delay.
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Randomizes each retry delay within `±factor` of itself.
    ///
    /// Default: 0.0 (exact doubling)
    #[serde(default)]
    pub retry_jitter_factor: f64,
}

impl QueueConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: defaults::max_attempts(),
            base_retry_delay_ms: defaults::base_retry_delay_ms(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: 0.0,
        }
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
            jitter_factor: self.retry_jitter_factor,
        }
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_retry_delay_ms() -> u64 {
        1000
    }

    pub const fn max_retry_delay_secs() -> u64 {
        86_400
    }
}

/// The persisted set of messages and the only place their status changes.
///
/// Every mutating call writes the snapshot before returning. If that write
/// fails the in-memory change has already happened and the error is
/// returned; the next successful write carries it to disk.
///
/// A writable queue holds an exclusive lock on its snapshot for as long as it
/// is open, so two processes can never overwrite each other's changes.
pub struct DurableQueue {
    messages: BTreeMap<MessageId, QueuedMessage>,
    store: SnapshotStore,
    /// `None` for a read-only queue.
    lock: Option<SnapshotLock>,
    max_attempts: u32,
    policy: RetryPolicy,
    ids: ulid::Generator,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("path", &self.store.path())
            .field("messages", &self.messages.len())
            .field("read_only", &self.lock.is_none())
            .field("max_attempts", &self.max_attempts)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    /// Opens the queue stored at `config.path` and locks it. No snapshot is
    /// written until the first mutation.
    ///
    /// Messages left `processing` by a previous process are returned to
    /// `pending`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Locked` if another process has the queue open,
    /// and an error if an existing snapshot cannot be read or parsed. A
    /// corrupt snapshot is never replaced by an empty queue.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        let store = SnapshotStore::new(&config.path);
        let lock = store.lock()?;
        Self::load(config, store, Some(lock))
    }

    /// Opens the queue at `config.path` for inspection, without taking the
    /// lock. Statuses are shown as stored, and every mutation fails with
    /// `QueueError::ReadOnly`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub fn open_read_only(config: &QueueConfig) -> Result<Self> {
        Self::load(config, SnapshotStore::new(&config.path), None)
    }

    fn load(
        config: &QueueConfig,
        store: SnapshotStore,
        lock: Option<SnapshotLock>,
    ) -> Result<Self> {
        let mut messages = BTreeMap::new();
        let mut recovered = 0;

        for (id, mut message) in store.load()? {
            if lock.is_some() && message.status == MessageStatus::Processing {
                message.status = MessageStatus::Pending;
                recovered += 1;
            }
            message.id = id;
            messages.insert(id, message);
        }

        if recovered > 0 {
            internal!(
                level = INFO,
                "Returned {recovered} interrupted messages to pending"
            );
        }

        Ok(Self {
            messages,
            store,
            lock,
            max_attempts: config.max_attempts.max(1),
            policy: config.retry_policy(),
            ids: ulid::Generator::new(),
        })
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.lock.is_none()
    }

    fn writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(QueueError::ReadOnly);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.messages)
    }

    fn next_id(&mut self) -> MessageId {
        self.ids
            .generate()
            .map_or_else(|_| MessageId::generate(), MessageId::new)
    }

    /// Queues `payload` for delivery.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidPayload` for payloads that can never be
    /// delivered or a zero attempt limit, and a storage error if the
    /// snapshot cannot be written.
    pub fn add(&mut self, payload: Payload, max_attempts: Option<u32>) -> Result<MessageId> {
        self.writable()?;
        payload.validate()?;

        let max_attempts = max_attempts.unwrap_or(self.max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidPayload(
                "max attempts must be at least 1".to_string(),
            ));
        }

        let id = self.next_id();
        let message = QueuedMessage {
            id,
            payload,
            status: MessageStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            last_attempt_at: None,
            next_retry_at: None,
            completed_at: None,
            error: None,
        };

        internal!(level = DEBUG, "Queued {} message {id}", message.kind());

        self.messages.insert(id, message);
        self.persist()?;
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&QueuedMessage> {
        self.messages.get(id)
    }

    #[must_use]
    pub fn status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.messages.get(id).map(|message| message.status)
    }

    /// Every message, oldest first, optionally restricted to one status.
    #[must_use]
    pub fn get_all(&self, status: Option<MessageStatus>) -> Vec<QueuedMessage> {
        self.messages
            .values()
            .filter(|message| status.is_none_or(|status| message.status == status))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<QueuedMessage> {
        self.get_all(Some(MessageStatus::Dead))
    }

    /// The oldest message that may be attempted now.
    #[must_use]
    pub fn get_next_pending(&self) -> Option<QueuedMessage> {
        self.next_eligible(Utc::now()).cloned()
    }

    fn next_eligible(&self, now: DateTime<Utc>) -> Option<&QueuedMessage> {
        self.messages.values().find(|message| message.is_eligible(now))
    }

    /// `true` while any message is waiting or in flight, including ones whose
    /// retry time has not yet come.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.messages.values().any(|message| {
            matches!(
                message.status,
                MessageStatus::Pending | MessageStatus::Processing
            )
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for message in self.messages.values() {
            stats.count(message.status);
        }
        stats
    }

    /// Claims a pending message for an attempt.
    ///
    /// Returns `Ok(false)` if the message is unknown or not pending.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn mark_processing(&mut self, id: &MessageId) -> Result<bool> {
        self.writable()?;
        let Some(message) = self.messages.get_mut(id) else {
            return Ok(false);
        };

        if message.status != MessageStatus::Pending {
            return Ok(false);
        }

        message.status = MessageStatus::Processing;
        message.last_attempt_at = Some(Utc::now());

        self.persist()?;
        Ok(true)
    }

    /// Records a successful delivery. Marking a sent message again changes
    /// nothing.
    ///
    /// Returns `Ok(false)` if the message is unknown.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn mark_sent(&mut self, id: &MessageId) -> Result<bool> {
        self.writable()?;
        let Some(message) = self.messages.get_mut(id) else {
            return Ok(false);
        };

        if message.status == MessageStatus::Sent {
            return Ok(true);
        }

        message.status = MessageStatus::Sent;
        message.completed_at = Some(Utc::now());
        message.next_retry_at = None;
        message.error = None;

        self.persist()?;
        Ok(true)
    }

    /// Records a failed attempt.
    ///
    /// The message is dead-lettered once it has used all of its attempts;
    /// otherwise it returns to pending with its next retry pushed out by the
    /// backoff policy. Returns `Ok(false)` if the message is unknown or
    /// already sent or dead.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn mark_failed(&mut self, id: &MessageId, error: impl Into<String>) -> Result<bool> {
        self.writable()?;
        let policy = self.policy;
        let Some(message) = self.messages.get_mut(id) else {
            return Ok(false);
        };

        if message.status.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now();
        message.attempts = message.attempts.saturating_add(1).min(message.max_attempts);
        message.error = Some(error.into());

        if message.attempts >= message.max_attempts {
            message.status = MessageStatus::Dead;
            message.completed_at = Some(now);
            message.next_retry_at = None;

            internal!(
                level = WARN,
                "Message {id} is dead after {} attempts",
                message.attempts
            );
        } else {
            message.status = MessageStatus::Pending;
            message.next_retry_at = Some(policy.next_retry_at(message.attempts, now));
        }

        self.persist()?;
        Ok(true)
    }

    /// Revives a dead message with a fresh set of attempts.
    ///
    /// Returns `Ok(false)` if the message is unknown or not dead.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn retry(&mut self, id: &MessageId) -> Result<bool> {
        self.writable()?;
        let Some(message) = self.messages.get_mut(id) else {
            return Ok(false);
        };

        if message.status != MessageStatus::Dead {
            return Ok(false);
        }

        message.status = MessageStatus::Pending;
        message.attempts = 0;
        message.error = None;
        message.next_retry_at = None;
        message.completed_at = None;

        self.persist()?;
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn remove(&mut self, id: &MessageId) -> Result<bool> {
        self.writable()?;
        if self.messages.remove(id).is_none() {
            return Ok(false);
        }

        self.persist()?;
        Ok(true)
    }

    /// Removes every message, or every message with `status`, returning how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot cannot be written.
    pub fn clear(&mut self, status: Option<MessageStatus>) -> Result<usize> {
        self.writable()?;
        let before = self.messages.len();

        match status {
            Some(status) => self.messages.retain(|_, message| message.status != status),
            None => self.messages.clear(),
        }

        self.persist()?;
        Ok(before - self.messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatPayload;

    fn chat(text: &str) -> Payload {
        Payload::Chat(ChatPayload {
            bot_token: "123:abc".to_string(),
            chat_id: "42".to_string(),
            text: Some(text.to_string()),
            photo: None,
            document: None,
        })
    }

    #[test]
    fn test_ids_are_created_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(&QueueConfig::new(dir.path().join("q.json"))).unwrap();

        let ids: Vec<_> = (0..20)
            .map(|i| queue.add(chat(&format!("m{i}")), None).unwrap())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let listed: Vec<_> = queue.get_all(None).into_iter().map(|m| m.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_eligibility_respects_retry_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(&QueueConfig::new(dir.path().join("q.json"))).unwrap();
        let id = queue.add(chat("hello"), Some(5)).unwrap();

        queue.mark_processing(&id).unwrap();
        queue.mark_failed(&id, "boom").unwrap();

        let retry_at = queue.get(&id).unwrap().next_retry_at.unwrap();
        assert!(queue.next_eligible(retry_at - chrono::TimeDelta::milliseconds(1)).is_none());
        assert_eq!(queue.next_eligible(retry_at).map(|m| m.id), Some(id));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(&QueueConfig::new(dir.path().join("q.json"))).unwrap();

        assert!(matches!(
            queue.add(chat("hello"), Some(0)),
            Err(QueueError::InvalidPayload(_))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_read_only_queue_refuses_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::new(dir.path().join("q.json"));
        let mut queue = DurableQueue::open(&config).unwrap();
        let id = queue.add(chat("hello"), None).unwrap();

        let mut inspect = DurableQueue::open_read_only(&config).unwrap();
        assert!(inspect.is_read_only());
        assert_eq!(inspect.len(), 1);
        assert!(matches!(inspect.remove(&id), Err(QueueError::ReadOnly)));
        assert!(matches!(
            inspect.add(chat("again"), None),
            Err(QueueError::ReadOnly)
        ));
        assert_eq!(inspect.len(), 1);
    }

    #[test]
    fn test_config_defaults_from_ron_like_json() {
        let config: QueueConfig = serde_json::from_str(r#"{"path":"/tmp/q.json"}"#).unwrap();
        assert_eq!(config, QueueConfig::new("/tmp/q.json"));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }
}
