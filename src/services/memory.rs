//! In-process stand-ins for the pipeline's stores, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::config::DrainPolicy;
use crate::core::time::now_utc;
use crate::db::models::{CourseThreshold, GradedExam};
use crate::services::course_lookup::{CourseLookup, LookupError};
use crate::services::drain_lock::{DrainLock, LockError};
use crate::services::partitioning::PartitionStrategy;
use crate::services::pipeline::ExamPipeline;
use crate::services::result_store::{sort_by_grading_time, ResultFilter, ResultStore, StoreError};
use crate::services::submission_queue::{
    ClaimedMessage, PeekedMessage, QueueError, SubmissionQueue,
};

struct StoredMessage {
    id: String,
    body: String,
    dequeue_count: u32,
    invisible: bool,
    pop_receipt: Option<String>,
    inserted_at: OffsetDateTime,
}

#[derive(Default)]
struct QueueState {
    exists: bool,
    next_id: u64,
    send_attempts: usize,
    failing_sends: HashSet<usize>,
    failing_deletes: usize,
    messages: Vec<StoredMessage>,
}

pub(crate) struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub(crate) fn new(name: &str) -> Self {
        let state = QueueState { exists: true, ..QueueState::default() };
        Self { name: name.to_string(), state: Mutex::new(state) }
    }

    pub(crate) fn missing(name: &str) -> Self {
        Self { name: name.to_string(), state: Mutex::new(QueueState::default()) }
    }

    /// Makes the send attempts at these zero-based positions fail.
    pub(crate) fn fail_sends_at(&self, attempts: &[usize]) {
        self.state.lock().unwrap().failing_sends.extend(attempts.iter().copied());
    }

    pub(crate) fn fail_next_deletes(&self, count: usize) {
        self.state.lock().unwrap().failing_deletes = count;
    }

    /// Lets every outstanding claim time out.
    pub(crate) fn expire_claims(&self) {
        for message in &mut self.state.lock().unwrap().messages {
            message.invisible = false;
        }
    }

    /// Appends a raw body, bypassing the envelope encoder.
    pub(crate) fn push_raw(&self, body: &str) -> String {
        let mut state = self.state.lock().unwrap();
        push_message(&mut state, body.to_string())
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.iter().map(|m| m.body.clone()).collect()
    }

    pub(crate) fn dequeue_counts(&self) -> Vec<u32> {
        self.state.lock().unwrap().messages.iter().map(|m| m.dequeue_count).collect()
    }

    pub(crate) fn visible_len(&self) -> usize {
        self.state.lock().unwrap().messages.iter().filter(|m| !m.invisible).count()
    }
}

fn push_message(state: &mut QueueState, body: String) -> String {
    state.next_id += 1;
    let id = format!("{:020}", state.next_id);
    state.messages.push(StoredMessage {
        id: id.clone(),
        body,
        dequeue_count: 0,
        invisible: false,
        pop_receipt: None,
        inserted_at: now_utc(),
    });
    id
}

#[async_trait]
impl SubmissionQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        Ok(self.state.lock().unwrap().exists)
    }

    async fn create_if_missing(&self) -> Result<bool, QueueError> {
        let mut state = self.state.lock().unwrap();
        let created = !state.exists;
        state.exists = true;
        Ok(created)
    }

    async fn send(&self, body: String) -> Result<String, QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.exists {
            return Err(QueueError::NotFound(self.name.clone()));
        }
        let attempt = state.send_attempts;
        state.send_attempts += 1;
        if state.failing_sends.contains(&attempt) {
            return Err(QueueError::Backend(format!("send attempt {attempt} rejected")));
        }
        Ok(push_message(&mut state, body))
    }

    async fn peek(&self) -> Result<Option<PeekedMessage>, QueueError> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.iter().find(|m| !m.invisible).map(|m| PeekedMessage {
            id: m.id.clone(),
            dequeue_count: m.dequeue_count,
            inserted_at: m.inserted_at,
        }))
    }

    async fn receive(&self) -> Result<Option<ClaimedMessage>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let Some(message) = state.messages.iter_mut().find(|m| !m.invisible) else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        message.invisible = true;
        message.dequeue_count += 1;
        message.pop_receipt = Some(receipt.clone());

        Ok(Some(ClaimedMessage {
            id: message.id.clone(),
            pop_receipt: receipt,
            dequeue_count: message.dequeue_count,
            body: message.body.clone(),
            inserted_at: message.inserted_at,
        }))
    }

    async fn delete(&self, claimed: &ClaimedMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(QueueError::Backend("delete rejected".to_string()));
        }

        let Some(position) = state.messages.iter().position(|m| m.id == claimed.id) else {
            return Err(QueueError::MessageNotFound(claimed.id.clone()));
        };
        if state.messages[position].pop_receipt.as_deref() != Some(claimed.pop_receipt.as_str()) {
            return Err(QueueError::ReceiptMismatch(claimed.id.clone()));
        }
        state.messages.remove(position);
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().unwrap().messages.len() as u64)
    }
}

#[derive(Default)]
pub(crate) struct MemoryResultStore {
    records: Mutex<Vec<GradedExam>>,
    failing_upserts: Mutex<usize>,
}

impl MemoryResultStore {
    pub(crate) fn fail_upserts(&self, count: usize) {
        *self.failing_upserts.lock().unwrap() = count;
    }

    pub(crate) fn records(&self) -> Vec<GradedExam> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, exam: &GradedExam) -> Result<(), StoreError> {
        {
            let mut failing = self.failing_upserts.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::Backend("upsert rejected".to_string()));
            }
        }

        let mut records = self.records.lock().unwrap();
        let existing = records
            .iter()
            .position(|r| r.partition_key == exam.partition_key && r.row_key == exam.row_key);
        match existing {
            Some(index) => records[index] = exam.clone(),
            None => records.push(exam.clone()),
        }
        Ok(())
    }

    async fn get(&self, row_key: &str) -> Result<Option<GradedExam>, StoreError> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.row_key == row_key).cloned())
    }

    async fn query(
        &self,
        partition_key: &str,
        filter: ResultFilter,
    ) -> Result<Vec<GradedExam>, StoreError> {
        let mut exams: Vec<GradedExam> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.partition_key == partition_key && filter.matches(r))
            .cloned()
            .collect();
        sort_by_grading_time(&mut exams);
        Ok(exams)
    }
}

pub(crate) struct StaticCourseLookup {
    thresholds: HashMap<i32, i32>,
    unavailable: bool,
}

impl StaticCourseLookup {
    pub(crate) fn new(thresholds: &[(i32, i32)]) -> Self {
        Self { thresholds: thresholds.iter().copied().collect(), unavailable: false }
    }

    pub(crate) fn unavailable() -> Self {
        Self { thresholds: HashMap::new(), unavailable: true }
    }
}

#[async_trait]
impl CourseLookup for StaticCourseLookup {
    async fn resolve_threshold(&self, course_id: i32) -> Result<CourseThreshold, LookupError> {
        if self.unavailable {
            return Err(LookupError::Database(sqlx::Error::PoolTimedOut));
        }
        self.thresholds
            .get(&course_id)
            .map(|&threshold| CourseThreshold { course_id, threshold })
            .ok_or(LookupError::NotFound(course_id))
    }
}

#[derive(Default)]
pub(crate) struct MemoryDrainLock {
    holder: Mutex<Option<String>>,
}

impl MemoryDrainLock {
    pub(crate) fn held() -> Self {
        Self { holder: Mutex::new(Some("elsewhere".to_string())) }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.holder.lock().unwrap().is_some()
    }
}

#[async_trait]
impl DrainLock for MemoryDrainLock {
    async fn try_acquire(&self) -> Result<Option<String>, LockError> {
        let mut holder = self.holder.lock().unwrap();
        if holder.is_some() {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        *holder = Some(token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &str) -> Result<bool, LockError> {
        let mut holder = self.holder.lock().unwrap();
        if holder.as_deref() == Some(token) {
            *holder = None;
            return Ok(true);
        }
        Ok(false)
    }
}

/// A pipeline wired to in-memory stores, with handles kept for assertions.
pub(crate) struct MemoryPipeline {
    pub(crate) queue: Arc<MemoryQueue>,
    pub(crate) dead_letter: Arc<MemoryQueue>,
    pub(crate) results: Arc<MemoryResultStore>,
    pub(crate) lock: Arc<MemoryDrainLock>,
    pub(crate) pipeline: ExamPipeline,
}

pub(crate) struct MemoryPipelineBuilder {
    courses: Arc<dyn CourseLookup>,
    lock: Arc<MemoryDrainLock>,
    partitions: PartitionStrategy,
    policy: DrainPolicy,
}

impl MemoryPipeline {
    pub(crate) fn builder(thresholds: &[(i32, i32)]) -> MemoryPipelineBuilder {
        MemoryPipelineBuilder {
            courses: Arc::new(StaticCourseLookup::new(thresholds)),
            lock: Arc::new(MemoryDrainLock::default()),
            partitions: PartitionStrategy::Fixed("studentId".to_string()),
            policy: DrainPolicy::Halt,
        }
    }

    pub(crate) fn new(thresholds: &[(i32, i32)]) -> Self {
        Self::builder(thresholds).build()
    }
}

impl MemoryPipelineBuilder {
    pub(crate) fn courses(mut self, courses: impl CourseLookup + 'static) -> Self {
        self.courses = Arc::new(courses);
        self
    }

    pub(crate) fn lock(mut self, lock: MemoryDrainLock) -> Self {
        self.lock = Arc::new(lock);
        self
    }

    pub(crate) fn partitions(mut self, partitions: PartitionStrategy) -> Self {
        self.partitions = partitions;
        self
    }

    pub(crate) fn policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn build(self) -> MemoryPipeline {
        let queue = Arc::new(MemoryQueue::new("exams"));
        let dead_letter = Arc::new(MemoryQueue::new("exams-poison"));
        let results = Arc::new(MemoryResultStore::default());

        let pipeline = ExamPipeline::new(
            queue.clone(),
            dead_letter.clone(),
            self.courses,
            results.clone(),
            self.lock.clone(),
            self.partitions,
            self.policy,
        );

        MemoryPipeline { queue, dead_letter, results, lock: self.lock, pipeline }
    }
}
