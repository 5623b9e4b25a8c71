//! Two-phase deletion of entity subtrees.
//!
//! [`Engine::mark_for_deletion`] records, in one transaction, every entity
//! below the given roots in the hierarchical object tree (deepest first) as
//! a pending purge task. [`Engine::purge`] then deletes them in bounded
//! batches, persisting progress and a heartbeat with each batch, so a task
//! abandoned by a crashed worker can be found with
//! [`Engine::orphaned_purge_tasks`] and claimed by exactly one other worker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use eav_store::{PurgeStatus, PurgeTaskRow, Transaction};
use eav_types::{EntityId, PurgeTaskId};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

/// Reported after every purge batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurgeProgress {
    pub task: PurgeTaskId,
    pub processed: u64,
    pub total: u64,
}

fn unavailable(task: &PurgeTaskRow) -> EngineError {
    EngineError::PurgeTaskUnavailable {
        task: task.id,
        status: task.status,
        worker: task.worker.clone(),
    }
}

impl Engine {
    // ---- Mark ----

    /// Record the subtrees under `roots` for deletion. Nothing is deleted yet.
    pub async fn mark_for_deletion(&self, roots: &[EntityId]) -> EngineResult<PurgeTaskRow> {
        let mut tx = self.inner.backend.begin().await?;
        let task = match self.mark_in(tx.as_mut(), roots).await {
            Ok(task) => task,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed mark");
                }
                return Err(e);
            }
        };
        tx.commit().await?;
        info!(task = %task.id, roots = roots.len(), entities = task.total, "marked for deletion");
        Ok(task)
    }

    async fn mark_in(
        &self,
        tx: &mut dyn Transaction,
        roots: &[EntityId],
    ) -> EngineResult<PurgeTaskRow> {
        let found: HashSet<EntityId> = tx
            .lock_objects(roots)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if let Some(missing) = roots.iter().find(|id| !found.contains(id)) {
            return Err(EngineError::NotFound(*missing));
        }

        let mut seen = HashSet::new();
        let mut all = Vec::new();
        let mut frontier: Vec<EntityId> =
            roots.iter().copied().filter(|id| seen.insert(*id)).collect();
        while !frontier.is_empty() {
            all.extend(&frontier);
            frontier = tx
                .child_objects(&frontier)
                .await?
                .into_iter()
                .filter(|id| seen.insert(*id))
                .collect();
        }

        let parents: HashMap<EntityId, EntityId> = tx
            .lock_objects(&all)
            .await?
            .into_iter()
            .filter_map(|row| row.header.parent_id.map(|p| (row.id, p)))
            .filter(|(_, parent)| seen.contains(parent))
            .collect();
        let depth = |id: EntityId| {
            let mut depth = 0usize;
            let mut at = id;
            while let Some(parent) = parents.get(&at) {
                depth += 1;
                at = *parent;
                if depth > parents.len() {
                    break;
                }
            }
            depth
        };
        let mut pending = all;
        pending.sort_by_key(|id| std::cmp::Reverse(depth(*id)));

        let now = Utc::now();
        let task = PurgeTaskRow {
            id: PurgeTaskId::new(self.inner.backend.next_id().await?),
            roots: roots.to_vec(),
            total: pending.len() as u64,
            pending,
            processed: 0,
            status: PurgeStatus::Pending,
            worker: None,
            heartbeat: now,
            created: now,
        };
        tx.insert_purge_task(&task).await?;
        Ok(task)
    }

    // ---- Claim ----

    /// Pending tasks and running tasks whose heartbeat went stale.
    pub async fn orphaned_purge_tasks(&self) -> EngineResult<Vec<PurgeTaskRow>> {
        let now = Utc::now();
        let stale_after = self.inner.config.purge_stale_after();
        Ok(self
            .inner
            .backend
            .purge_tasks()
            .await?
            .into_iter()
            .filter(|task| task.is_orphaned(now, stale_after))
            .collect())
    }

    /// Atomically take over an orphaned task. `None` if it is finished or
    /// held by a live worker.
    pub async fn claim_purge_task(
        &self,
        id: PurgeTaskId,
        worker: &str,
    ) -> EngineResult<Option<PurgeTaskRow>> {
        let mut tx = self.inner.backend.begin().await?;
        let mut task = tx
            .purge_task(id)
            .await?
            .ok_or(EngineError::PurgeTaskNotFound(id))?;
        let now = Utc::now();
        if !task.is_orphaned(now, self.inner.config.purge_stale_after()) {
            tx.rollback().await?;
            return Ok(None);
        }
        let previous = task.worker.replace(worker.to_string());
        task.status = PurgeStatus::Running;
        task.heartbeat = now;
        tx.update_purge_task(&task).await?;
        tx.commit().await?;
        info!(task = %id, worker, previous = ?previous, "claimed purge task");
        Ok(Some(task))
    }

    // ---- Purge ----

    /// Delete a marked task's entities in batches.
    ///
    /// The task is claimed first unless `worker` already holds it. `progress`
    /// runs after every committed batch; `cancel` is checked between batches
    /// and stops the task as [`PurgeStatus::Cancelled`].
    pub async fn purge<F>(
        &self,
        id: PurgeTaskId,
        worker: &str,
        mut progress: F,
        cancel: &AtomicBool,
    ) -> EngineResult<PurgeTaskRow>
    where
        F: FnMut(PurgeProgress) + Send,
    {
        let current = self
            .inner
            .backend
            .purge_task(id)
            .await?
            .ok_or(EngineError::PurgeTaskNotFound(id))?;
        let held = current.status == PurgeStatus::Running
            && current.worker.as_deref() == Some(worker);
        let mut task = if held {
            current
        } else {
            self.claim_purge_task(id, worker)
                .await?
                .ok_or_else(|| unavailable(&current))?
        };

        let domain = &self.inner.config.cache_domain;
        let batch_size = self.inner.config.purge_batch_size;
        while !task.pending.is_empty() {
            if cancel.load(Ordering::Acquire) {
                task.status = PurgeStatus::Cancelled;
                self.finish_task(&task).await?;
                info!(task = %id, processed = task.processed, "purge cancelled");
                return Ok(task);
            }
            let batch: Vec<EntityId> =
                task.pending[..batch_size.min(task.pending.len())].to_vec();
            let mut tx = self.inner.backend.begin().await?;
            match self.purge_batch(tx.as_mut(), &mut task, &batch, worker).await {
                Ok(values) => {
                    tx.commit().await?;
                    debug!(task = %id, entities = batch.len(), values, "purged batch");
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "rollback after failed purge batch");
                    }
                    return Err(e);
                }
            }
            self.inner.cache.invalidate_many(domain, &batch)?;
            progress(PurgeProgress {
                task: id,
                processed: task.processed,
                total: task.total,
            });
        }

        task.status = PurgeStatus::Completed;
        self.finish_task(&task).await?;
        info!(task = %id, worker, total = task.total, "purge completed");
        Ok(task)
    }

    /// Claim and run every orphaned task.
    pub async fn resume_orphaned_purges<F>(
        &self,
        worker: &str,
        mut progress: F,
        cancel: &AtomicBool,
    ) -> EngineResult<Vec<PurgeTaskRow>>
    where
        F: FnMut(PurgeProgress) + Send,
    {
        let mut done = Vec::new();
        for task in self.orphaned_purge_tasks().await? {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            match self.purge(task.id, worker, &mut progress, cancel).await {
                Ok(task) => done.push(task),
                Err(EngineError::PurgeTaskUnavailable { task, .. }) => {
                    debug!(task = %task, "purge task taken by another worker");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    async fn purge_batch(
        &self,
        tx: &mut dyn Transaction,
        task: &mut PurgeTaskRow,
        batch: &[EntityId],
        worker: &str,
    ) -> EngineResult<u64> {
        let current = tx
            .purge_task(task.id)
            .await?
            .ok_or(EngineError::PurgeTaskNotFound(task.id))?;
        if current.status != PurgeStatus::Running || current.worker.as_deref() != Some(worker) {
            return Err(unavailable(&current));
        }
        let present: Vec<EntityId> = tx
            .lock_objects(batch)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        let values = tx.delete_object_values(batch).await?;
        if !present.is_empty() {
            tx.delete_objects(&present).await?;
        }
        task.pending.drain(..batch.len());
        task.processed += batch.len() as u64;
        task.heartbeat = Utc::now();
        tx.update_purge_task(task).await?;
        Ok(values)
    }

    async fn finish_task(&self, task: &PurgeTaskRow) -> EngineResult<()> {
        let mut tx = self.inner.backend.begin().await?;
        tx.update_purge_task(task).await?;
        tx.commit().await?;
        Ok(())
    }
}
