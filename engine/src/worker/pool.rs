//! Worker Pool
//!
//! Hands out at most one live worker per agent under a hard capacity ceiling
//! and routes task execution to the right worker.

use super::core::{Worker, WorkerInfo, WorkerStatus};
use crate::provider::{ProviderDirectory, TransportConnector};
use crate::registry::{Registry, RegistryError};
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::{Agent, Task, TaskResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Snapshot of pool occupancy, computed on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub working_workers: usize,
    pub error_workers: usize,
    pub stopped_workers: usize,
    pub max_workers: usize,
}

/// Registry of workers keyed by agent ID
pub struct WorkerPool {
    workers: Registry<Worker>,
    directory: Arc<dyn ProviderDirectory>,
    connector: Arc<dyn TransportConnector>,
    max_workers: usize,
    sequence: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        directory: Arc<dyn ProviderDirectory>,
        connector: Arc<dyn TransportConnector>,
        max_workers: usize,
    ) -> Self {
        tracing::info!("Initializing WorkerPool (max_workers={})", max_workers);
        Self {
            workers: Registry::new("worker", Some(max_workers)),
            directory,
            connector,
            max_workers,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Create and start a worker binding `agent` to `provider_id`
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` if the pool already holds `max_workers` workers
    /// - `DuplicateWorker` if the agent already has a live worker
    /// - `ProviderNotFound` if the directory cannot resolve `provider_id`
    ///
    /// The pool is unchanged on any error.
    pub fn spawn_worker(
        &self,
        agent: &Agent,
        provider_id: &str,
    ) -> Result<Arc<Worker>, EngineError> {
        let worker = self
            .workers
            .insert_with(&agent.id, || {
                let params = self.directory.resolve(provider_id)?;
                let transport = self.connector.connect(agent, &params)?;
                let worker = Worker::new(
                    self.next_worker_id(&agent.id),
                    agent.clone(),
                    params,
                    transport,
                );
                worker.start()?;
                Ok(worker)
            })
            .map_err(|e| worker_error(e, &agent.id))?;

        tracing::info!("Spawned worker {} for agent {}", worker.id(), agent.name);
        Ok(worker)
    }

    /// Stop the worker for `agent_id` and remove it from the pool
    pub async fn stop_worker(&self, agent_id: &str) -> Result<(), EngineError> {
        self.workers
            .remove_with(agent_id, |worker| async move {
                worker.stop();
                Ok(())
            })
            .await
            .map_err(|e| worker_error(e, agent_id))?;

        tracing::info!("Stopped worker for agent {}", agent_id);
        Ok(())
    }

    pub fn get_worker(&self, agent_id: &str) -> Result<Arc<Worker>, EngineError> {
        self.workers
            .get(agent_id)
            .ok_or_else(|| EngineError::WorkerNotFound(agent_id.to_string()))
    }

    pub fn list_workers(&self) -> Vec<Arc<Worker>> {
        self.workers.values()
    }

    pub fn get_idle_workers(&self) -> Vec<Arc<Worker>> {
        self.workers
            .values()
            .into_iter()
            .filter(|w| w.status() == WorkerStatus::Idle)
            .collect()
    }

    pub fn worker_infos(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .workers
            .values()
            .iter()
            .map(|w| w.info())
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    /// Execute `task` on the worker bound to `agent_id`
    ///
    /// The registry lock is only held for the lookup. Transport failures are
    /// returned as-is; the pool never retries.
    pub async fn execute_task(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        agent_id: &str,
    ) -> Result<TaskResult, EngineError> {
        let worker = self.get_worker(agent_id)?;
        worker.execute_task(cancel, task).await
    }

    /// Consistent snapshot of worker counts by status
    pub fn get_pool_stats(&self) -> PoolStats {
        let max_workers = self.max_workers;
        self.workers
            .inspect(|workers| {
                let mut stats = PoolStats {
                    total_workers: workers.len(),
                    max_workers,
                    ..Default::default()
                };
                for worker in workers.values() {
                    match worker.status() {
                        WorkerStatus::Idle => stats.idle_workers += 1,
                        WorkerStatus::Working => stats.working_workers += 1,
                        WorkerStatus::Error => stats.error_workers += 1,
                        WorkerStatus::Stopped => stats.stopped_workers += 1,
                    }
                }
                stats
            })
    }

    /// Stop and remove every worker
    pub async fn stop_all(&self) {
        let result = self
            .workers
            .drain_with(|workers| async move {
                for worker in workers {
                    worker.stop();
                }
                Ok(())
            })
            .await;

        match result {
            Ok(stopped) => tracing::info!("Stopped all {} workers in pool", stopped.len()),
            Err(e) => tracing::error!("Failed to stop workers: {}", e),
        }
    }

    fn next_worker_id(&self, agent_id: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "worker-{}-{}-{}",
            agent_id,
            Utc::now().timestamp_millis(),
            seq
        )
    }
}

fn worker_error(err: RegistryError, agent_id: &str) -> EngineError {
    match err {
        RegistryError::AtCapacity { max } => EngineError::CapacityExceeded { max },
        RegistryError::Duplicate(_) => EngineError::DuplicateWorker(agent_id.to_string()),
        RegistryError::NotFound(_) => EngineError::WorkerNotFound(agent_id.to_string()),
        RegistryError::Resource(e) => e,
    }
}
