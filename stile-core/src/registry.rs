use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::task::{Task, TaskId, TaskOutcome, TaskRequest, TaskState};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Concurrency-safe in-memory task store, sharded to keep reader/writer
/// contention per key. Constructed per process (or per test); no global
/// state.
#[derive(Debug)]
pub struct TaskRegistry {
    shards: Vec<RwLock<HashMap<TaskId, Task>>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, id: &TaskId) -> &RwLock<HashMap<TaskId, Task>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Allocates a new task in `queued` state and returns a snapshot of it.
    /// Uuid v4 identifiers never collide within a registry lifetime.
    pub fn create(&self, request: TaskRequest) -> Task {
        let task = Task::new(request);
        let snapshot = task.clone();
        self.shard(&task.id).write().unwrap().insert(task.id, task);
        snapshot
    }

    /// Read-only snapshot; safe alongside concurrent mutations of other keys.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.shard(&id).read().unwrap().get(&id).cloned()
    }

    /// Moves a task from `queued` to `processing`. Called once by the worker
    /// that dequeued it.
    pub fn begin(&self, id: TaskId) -> RegistryResult<()> {
        let mut shard = self.shard(&id).write().unwrap();
        let task = shard.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if task.state != TaskState::Queued {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.state,
                to: TaskState::Processing,
            });
        }
        task.state = TaskState::Processing;
        Ok(())
    }

    /// Moves a task from `processing` to its terminal state, attaching the
    /// result or error payload. Finishing an already-terminal task is a
    /// programming error and is refused.
    pub fn finish(&self, id: TaskId, outcome: TaskOutcome) -> RegistryResult<()> {
        let target = match &outcome {
            TaskOutcome::Solved { .. } => TaskState::Ready,
            TaskOutcome::Failed { .. } => TaskState::Fail,
        };
        let mut shard = self.shard(&id).write().unwrap();
        let task = shard.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if task.state.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.state,
                to: target,
            });
        }
        task.apply_outcome(outcome);
        Ok(())
    }

    /// Drops a task outright. Used when admission fails after creation, so
    /// no unreachable `queued` entry outlives its request.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        self.shard(&id).write().unwrap().remove(&id)
    }

    /// Removes terminal tasks whose completion precedes the cutoff.
    /// Non-terminal tasks are never evicted regardless of age.
    pub fn evict(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().unwrap();
            let before = shard.len();
            shard.retain(|_, task| {
                !(task.state.is_terminal()
                    && task
                        .completed_at
                        .map(|completed| completed < cutoff)
                        .unwrap_or(false))
            });
            removed += before - shard.len();
        }
        if removed > 0 {
            debug!(removed, "evicted expired tasks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
