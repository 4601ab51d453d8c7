//! Ordered in-memory store of transfer tasks.
//!
//! The registry is the only place task fields change. Every mutation is
//! published to subscribers as a [`ManagerEvent`], so observers never
//! hold a private copy that could diverge from the store.

use tokio::sync::broadcast;
use tracing::{debug, warn};
use crate::errors::{Result, TransferError};
use super::task::TransferTask;
use super::types::{ManagerEvent, TaskId, TaskStatus, TaskUpdate, TransferStats};

#[derive(Default)]
pub struct Registry {
    /// Insertion order is list order
    tasks: Vec<TransferTask>,
    event_tx: Option<broadcast::Sender<ManagerEvent>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(event_tx: broadcast::Sender<ManagerEvent>) -> Self {
        Self {
            tasks: Vec::new(),
            event_tx: Some(event_tx),
        }
    }

    pub fn add(&mut self, task: TransferTask) -> Result<()> {
        if self.get(&task.id).is_some() {
            return Err(TransferError::DuplicateTask(task.id));
        }

        self.emit(ManagerEvent::TaskAdded(task.clone()));
        self.tasks.push(task);
        Ok(())
    }

    /// Merge `update` into the task with `id`.
    ///
    /// Returns `None` when the id is unknown (the task may have been
    /// cancelled while its transfer was still reporting) or when the
    /// update asks for a transition the state machine forbids.
    pub fn update(&mut self, id: &TaskId, update: TaskUpdate) -> Option<&TransferTask> {
        let Some(index) = self.position(id) else {
            debug!(task = %id, "Update for unknown task ignored");
            return None;
        };

        let task = &mut self.tasks[index];
        let status = update.status.unwrap_or(task.status);
        if !TransferTask::is_valid_transition(task.status, status) {
            warn!(task = %id, from = ?task.status, to = ?status, "Rejected invalid transition");
            return None;
        }

        task.status = status;
        if let Some(progress) = update.progress {
            task.progress = progress;
        }
        if let Some(speed) = update.speed {
            task.speed = speed;
        }
        if let Some(eta) = update.estimated_time_left {
            task.estimated_time_left = eta;
        }
        if let Some(error) = update.error {
            task.error = error;
        }
        if let Some(kind) = update.error_kind {
            task.error_kind = kind;
        }

        // progress is 100 exactly when completed
        task.progress = match status {
            TaskStatus::Completed => 100,
            _ => task.progress.min(99),
        };
        if status != TaskStatus::Active {
            task.speed = None;
            task.estimated_time_left = None;
        }
        if status != TaskStatus::Error {
            task.error = None;
            task.error_kind = None;
        }

        let snapshot = task.clone();
        self.emit(ManagerEvent::TaskUpdated(snapshot));

        self.tasks.get(index)
    }

    pub fn get(&self, id: &TaskId) -> Option<&TransferTask> {
        self.tasks.iter().find(|task| task.id == *id)
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<TransferTask> {
        let index = self.position(id)?;
        let task = self.tasks.remove(index);
        self.emit(ManagerEvent::TaskRemoved(task.id.clone()));

        Some(task)
    }

    pub fn remove_where<F>(&mut self, predicate: F) -> Vec<TransferTask>
    where
        F: Fn(&TransferTask) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| predicate(task));
        self.tasks = kept;

        for task in &removed {
            self.emit(ManagerEvent::TaskRemoved(task.id.clone()));
        }

        removed
    }

    pub fn list(&self) -> &[TransferTask] {
        &self.tasks
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TransferTask) -> bool,
    {
        self.tasks.iter().filter(|task| predicate(task)).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            total: self.tasks.len(),
            active: self.count_where(|task| matches!(task.status, TaskStatus::Pending | TaskStatus::Active)),
            completed: self.count_where(|task| task.status == TaskStatus::Completed),
            failed: self.count_where(|task| task.status == TaskStatus::Error),
            total_speed: self.tasks
                .iter()
                .filter(|task| task.status == TaskStatus::Active)
                .filter_map(|task| task.speed)
                .sum(),
        }
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == *id)
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(event_tx) = &self.event_tx {
            // no subscribers is fine
            let _ = event_tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use super::*;
    use crate::transfer::TransferSource;

    fn task(name: &str) -> TransferTask {
        TransferTask::new(
            TransferSource::Upload {
                file: PathBuf::from(name),
                destination: "/".to_string(),
            },
            1024,
        )
    }

    fn active(registry: &mut Registry, id: &TaskId) {
        registry.update(id, TaskUpdate::status(TaskStatus::Active)).unwrap();
    }

    #[test]
    fn test_add_keeps_insertion_order() {
        let mut registry = Registry::new();
        let names = ["c.txt", "a.txt", "b.txt"];
        for name in names {
            registry.add(task(name)).unwrap();
        }

        let listed: Vec<_> = registry.list().iter().map(|task| task.name.as_str()).collect();
        assert_eq!(listed, names);
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut registry = Registry::new();
        let first = task("a.txt");
        registry.add(first.clone()).unwrap();

        let err = registry.add(first).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateTask(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut registry = Registry::new();
        let result = registry.update(&TaskId::from("missing"), TaskUpdate::status(TaskStatus::Active));
        assert!(result.is_none());
    }

    #[test]
    fn test_leaving_active_clears_rates() {
        let mut registry = Registry::new();
        let task = task("a.txt");
        let id = task.id.clone();
        registry.add(task).unwrap();
        active(&mut registry, &id);

        let update = TaskUpdate::default().with_progress(40).with_rates(Some(2.5), Some(3.0));
        let task = registry.update(&id, update).unwrap();
        assert_eq!(task.speed, Some(2.5));
        assert_eq!(task.estimated_time_left, Some(3.0));

        let task = registry.update(&id, TaskUpdate::status(TaskStatus::Paused)).unwrap();
        assert_eq!(task.progress, 40);
        assert!(task.speed.is_none());
        assert!(task.estimated_time_left.is_none());
    }

    #[test]
    fn test_progress_hundred_only_when_completed() {
        let mut registry = Registry::new();
        let task = task("a.txt");
        let id = task.id.clone();
        registry.add(task).unwrap();
        active(&mut registry, &id);

        let task = registry.update(&id, TaskUpdate::default().with_progress(100)).unwrap();
        assert_eq!(task.progress, 99);

        let task = registry.update(&id, TaskUpdate::status(TaskStatus::Completed)).unwrap();
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut registry = Registry::new();
        let task = task("a.txt");
        let id = task.id.clone();
        registry.add(task).unwrap();

        assert!(registry.update(&id, TaskUpdate::status(TaskStatus::Completed)).is_none());
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_error_field_only_in_error_state() {
        let mut registry = Registry::new();
        let task = task("a.txt");
        let id = task.id.clone();
        registry.add(task).unwrap();
        active(&mut registry, &id);

        let update = TaskUpdate::status(TaskStatus::Error).with_error(&TransferError::Timeout);
        let task = registry.update(&id, update).unwrap();
        assert_eq!(task.error.as_deref(), Some("Request timed out"));

        let task = registry.update(&id, TaskUpdate::status(TaskStatus::Pending).clear_error()).unwrap();
        assert!(task.error.is_none());
        assert!(task.error_kind.is_none());
    }

    #[test]
    fn test_remove_where_and_counts() {
        let mut registry = Registry::new();
        let ids: Vec<_> = (0..4)
            .map(|i| {
                let task = task(&format!("{i}.txt"));
                let id = task.id.clone();
                registry.add(task).unwrap();
                active(&mut registry, &id);
                id
            })
            .collect();

        registry.update(&ids[0], TaskUpdate::status(TaskStatus::Completed));
        registry.update(&ids[2], TaskUpdate::status(TaskStatus::Completed));
        registry.update(&ids[3], TaskUpdate::status(TaskStatus::Paused));
        assert_eq!(registry.count_where(|task| task.status == TaskStatus::Completed), 2);

        let removed = registry.remove_where(|task| task.status == TaskStatus::Completed);
        assert_eq!(removed.len(), 2);

        let remaining: Vec<_> = registry.list().iter().map(|task| task.id.clone()).collect();
        assert_eq!(remaining, vec![ids[1].clone(), ids[3].clone()]);
    }

    #[test]
    fn test_stats() {
        let mut registry = Registry::new();
        for i in 0..3 {
            let task = task(&format!("{i}.txt"));
            let id = task.id.clone();
            registry.add(task).unwrap();
            if i > 0 {
                active(&mut registry, &id);
                registry.update(&id, TaskUpdate::default().with_rates(Some(1.5), None));
            }
        }

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.total_speed, 3.0);
    }

    #[tokio::test]
    async fn test_mutations_are_published() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut registry = Registry::with_events(event_tx);
        let task = task("a.txt");
        let id = task.id.clone();

        registry.add(task).unwrap();
        active(&mut registry, &id);
        registry.remove(&id);

        assert!(matches!(event_rx.recv().await.unwrap(), ManagerEvent::TaskAdded(t) if t.id == id));
        match event_rx.recv().await.unwrap() {
            ManagerEvent::TaskUpdated(task) => assert_eq!(task.status, TaskStatus::Active),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(event_rx.recv().await.unwrap(), ManagerEvent::TaskRemoved(removed) if removed == id));
    }
}
