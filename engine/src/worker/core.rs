//! Worker: a live binding of one agent to one LLM provider
//!
//! The worker is the sole owner of its status transitions. `execute_task`
//! flips the status to `Working` before dispatching to the transport and back
//! to `Idle` (or `Error`) afterwards, always under the worker's own lock, so
//! pool statistics never read a half-applied transition.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::transport::TaskTransport;
use sdk::types::{Agent, ConnectionParams, Task, TaskResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Action name sent to LLM transports
pub const COMPLETE_ACTION: &str = "complete";

/// Runtime status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Working => write!(f, "working"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub persona_name: Option<String>,
    pub provider_id: String,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug)]
struct WorkerState {
    status: WorkerStatus,
    current_task: Option<String>,
    last_active: DateTime<Utc>,
}

/// An agent bound to a provider transport
pub struct Worker {
    id: String,
    agent: Agent,
    provider: ConnectionParams,
    transport: Arc<dyn TaskTransport>,
    state: RwLock<WorkerState>,
    started_at: DateTime<Utc>,
    /// Fired by `stop()`; aborts any in-flight task
    shutdown: CancellationToken,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("agent_id", &self.agent.id)
            .field("provider_id", &self.provider.provider_id)
            .field("status", &self.status())
            .finish()
    }
}

impl Worker {
    /// Create a worker in the `Idle` state
    pub fn new(
        id: impl Into<String>,
        agent: Agent,
        provider: ConnectionParams,
        transport: Arc<dyn TaskTransport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent,
            provider,
            transport,
            state: RwLock::new(WorkerState {
                status: WorkerStatus::Idle,
                current_task: None,
                last_active: now,
            }),
            started_at: now,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider.provider_id
    }

    /// Mark the worker ready to receive tasks
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.write_state();
        match state.status {
            WorkerStatus::Working => return Err(EngineError::WorkerBusy(self.id.clone())),
            WorkerStatus::Stopped => {
                return Err(EngineError::WorkerNotFound(self.agent.id.clone()))
            }
            WorkerStatus::Idle | WorkerStatus::Error => {}
        }
        state.status = WorkerStatus::Idle;
        state.last_active = Utc::now();

        tracing::info!(
            "Worker {} started for agent {} using provider {}",
            self.id,
            self.agent.name,
            self.provider.name
        );
        Ok(())
    }

    /// Stop the worker and abort any in-flight task
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut state = self.write_state();
        state.status = WorkerStatus::Stopped;
        state.current_task = None;
        tracing::info!("Worker {} stopped", self.id);
    }

    pub fn status(&self) -> WorkerStatus {
        self.read_state().status
    }

    pub fn info(&self) -> WorkerInfo {
        let state = self.read_state();
        WorkerInfo {
            id: self.id.clone(),
            agent_id: self.agent.id.clone(),
            agent_name: self.agent.name.clone(),
            persona_name: self.agent.persona_name().map(String::from),
            provider_id: self.provider.provider_id.clone(),
            status: state.status,
            current_task: state.current_task.clone(),
            started_at: self.started_at,
            last_active: state.last_active,
        }
    }

    /// Execute a task on the bound transport
    ///
    /// Only one task runs at a time: a `Working` worker rejects with
    /// `WorkerBusy`. A worker in `Error` accepts the next task.
    ///
    /// On success the worker returns to `Idle`; on transport failure it moves
    /// to `Error`. Cancellation (via `cancel`, via `stop()`, or by dropping the
    /// returned future) aborts the transport call and returns the worker to
    /// `Idle`, never leaving it `Working`.
    pub async fn execute_task(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<TaskResult, EngineError> {
        let mut transition = self.begin(task)?;
        let request = task.to_request(COMPLETE_ACTION);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = self.shutdown.cancelled() => Err(EngineError::Cancelled),
            outcome = self.transport.execute_task(&request) => outcome,
        };

        match outcome {
            Ok(outcome) => {
                transition.finish(WorkerStatus::Idle);
                Ok(TaskResult {
                    task_id: task.id.clone(),
                    worker_id: self.id.clone(),
                    agent_id: self.agent.id.clone(),
                    response: outcome.output,
                    tokens_used: outcome.tokens_used,
                    completed_at: Utc::now(),
                    success: true,
                    error: None,
                })
            }
            Err(EngineError::Cancelled) => {
                tracing::info!("Worker {} task {} cancelled", self.id, task.id);
                transition.finish(WorkerStatus::Idle);
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                tracing::warn!("Worker {} task {} failed: {}", self.id, task.id, e);
                transition.finish(WorkerStatus::Error);
                Err(e)
            }
        }
    }

    fn begin(&self, task: &Task) -> Result<Transition<'_>, EngineError> {
        let mut state = self.write_state();
        match state.status {
            WorkerStatus::Working => return Err(EngineError::WorkerBusy(self.id.clone())),
            WorkerStatus::Stopped => {
                return Err(EngineError::WorkerNotFound(self.agent.id.clone()))
            }
            WorkerStatus::Idle | WorkerStatus::Error => {}
        }
        state.status = WorkerStatus::Working;
        state.current_task = Some(task.id.clone());
        state.last_active = Utc::now();
        Ok(Transition {
            worker: self,
            finished: false,
        })
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, WorkerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, WorkerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Leaves `Working` exactly once, even if the task future is dropped
struct Transition<'a> {
    worker: &'a Worker,
    finished: bool,
}

impl Transition<'_> {
    fn finish(&mut self, next: WorkerStatus) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut state = self.worker.write_state();
        // stop() wins over a late completion
        if state.status == WorkerStatus::Stopped {
            return;
        }
        state.status = next;
        state.current_task = None;
        state.last_active = Utc::now();
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.finish(WorkerStatus::Idle);
    }
}
