use std::{collections::HashMap, fmt, future::Future};

use shared::{
    domain::{CorrelationId, FilterLocalId, ObjRef},
    execution::ExecutionResult,
    filters::AttributeElement,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;
use uuid::Uuid;

use crate::backend::BackendError;

/// Logical key of a background load; a newer load for the same key replaces the older one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Execution(ObjRef),
    Elements(FilterLocalId),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(widget_ref) => write!(f, "execution of widget {widget_ref}"),
            Self::Elements(local_id) => write!(f, "elements of filter {local_id}"),
        }
    }
}

#[derive(Debug)]
pub enum TaskOutput {
    Execution(Result<ExecutionResult, BackendError>),
    Elements(Result<Vec<AttributeElement>, BackendError>),
}

#[derive(Debug)]
pub struct TaskCompletion {
    pub key: TaskKey,
    pub request_id: Uuid,
    pub output: TaskOutput,
}

/// A load that was cancelled before it could report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersededTask {
    pub key: TaskKey,
    pub correlation_id: Option<CorrelationId>,
    pub command_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTask {
    pub correlation_id: Option<CorrelationId>,
    pub command_type: &'static str,
}

struct PendingTask {
    request_id: Uuid,
    correlation_id: Option<CorrelationId>,
    command_type: &'static str,
    handle: JoinHandle<()>,
}

/// Background loads owned by the engine, at most one per [`TaskKey`].
pub struct TaskRegistry {
    completions: mpsc::UnboundedSender<TaskCompletion>,
    pending: HashMap<TaskKey, PendingTask>,
}

impl TaskRegistry {
    pub fn new(completions: mpsc::UnboundedSender<TaskCompletion>) -> Self {
        Self {
            completions,
            pending: HashMap::new(),
        }
    }

    /// Runs `work` in the background, cancelling whatever was running under `key`.
    pub fn spawn<F>(
        &mut self,
        key: TaskKey,
        correlation_id: Option<CorrelationId>,
        command_type: &'static str,
        work: F,
    ) -> (Uuid, Option<SupersededTask>)
    where
        F: Future<Output = TaskOutput> + Send + 'static,
    {
        let superseded = self.cancel(&key);
        let request_id = Uuid::new_v4();
        let completions = self.completions.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let output = work.await;
            let completion = TaskCompletion {
                key: task_key,
                request_id,
                output,
            };
            if completions.send(completion).is_err() {
                debug!("engine gone; dropping background result request_id={}", request_id);
            }
        });
        self.pending.insert(
            key,
            PendingTask {
                request_id,
                correlation_id,
                command_type,
                handle,
            },
        );
        (request_id, superseded)
    }

    pub fn cancel(&mut self, key: &TaskKey) -> Option<SupersededTask> {
        let task = self.pending.remove(key)?;
        task.handle.abort();
        debug!("background load superseded key={} request_id={}", key, task.request_id);
        Some(SupersededTask {
            key: key.clone(),
            correlation_id: task.correlation_id,
            command_type: task.command_type,
        })
    }

    pub fn cancel_where(&mut self, matches: impl Fn(&TaskKey) -> bool) -> Vec<SupersededTask> {
        let keys: Vec<TaskKey> = self.pending.keys().filter(|key| matches(key)).cloned().collect();
        keys.iter().filter_map(|key| self.cancel(key)).collect()
    }

    /// Claims the pending entry for a completion; `None` when the completion is stale.
    pub fn finish(&mut self, key: &TaskKey, request_id: Uuid) -> Option<FinishedTask> {
        if self.pending.get(key)?.request_id != request_id {
            return None;
        }
        let task = self.pending.remove(key)?;
        Some(FinishedTask {
            correlation_id: task.correlation_id,
            command_type: task.command_type,
        })
    }

    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn abort_all(&mut self) {
        for (_, task) in self.pending.drain() {
            task.handle.abort();
        }
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.abort_all();
    }
}
