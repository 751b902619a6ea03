//! Owns the receiving side of every worker channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use super::{TaskEvent, TaskId, TaskKind, TaskOutcome, TaskProgress, TaskReport};

struct Running {
    kind: TaskKind,
    cancel: Arc<AtomicBool>,
    events: mpsc::Receiver<TaskEvent>,
    progress: TaskProgress,
    started_at: Instant,
}

/// Tasks stay listed until a poll has seen their `Finished` event, so a
/// worker that already exited still counts as busy until then.
#[derive(Default)]
pub struct TaskManager {
    next_id: u64,
    running: BTreeMap<TaskId, Running>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new id, the sender for the worker, and its cancel flag.
    pub fn register(
        &mut self,
        kind: TaskKind,
    ) -> (TaskId, mpsc::Sender<TaskEvent>, Arc<AtomicBool>) {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        tracing::info!(task = id.0, kind = %kind, "Task started");
        self.running.insert(
            id,
            Running {
                kind,
                cancel: cancel.clone(),
                events: rx,
                progress: TaskProgress::default(),
                started_at: Instant::now(),
            },
        );
        (id, tx, cancel)
    }

    /// False when the task is unknown or already reported.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.running.get(&id) {
            Some(task) => {
                task.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        for task in self.running.values() {
            task.cancel.store(true, Ordering::SeqCst);
        }
        self.running.len()
    }

    /// Drain every channel. Returns the tasks that finished, oldest first.
    pub fn poll(&mut self) -> Vec<TaskReport> {
        let mut finished = Vec::new();
        for (id, task) in self.running.iter_mut() {
            loop {
                match task.events.try_recv() {
                    Ok(event) => {
                        if let Some(outcome) = task.progress.apply(event) {
                            finished.push((*id, outcome));
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        finished.push((
                            *id,
                            TaskOutcome::Failed("worker stopped without reporting a result".into()),
                        ));
                        break;
                    }
                }
            }
        }

        finished
            .into_iter()
            .filter_map(|(id, outcome)| {
                let task = self.running.remove(&id)?;
                let elapsed = task.started_at.elapsed();
                match &outcome {
                    TaskOutcome::Failed(error) => tracing::warn!(
                        task = id.0,
                        kind = %task.kind,
                        error = %error,
                        "Task failed"
                    ),
                    _ => tracing::info!(
                        task = id.0,
                        kind = %task.kind,
                        failed_items = task.progress.failed,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Task finished"
                    ),
                }
                Some(TaskReport {
                    id,
                    kind: task.kind,
                    outcome,
                    progress: task.progress,
                    elapsed,
                })
            })
            .collect()
    }

    pub fn progress(&self, id: TaskId) -> Option<&TaskProgress> {
        self.running.get(&id).map(|task| &task.progress)
    }

    pub fn is_busy(&self) -> bool {
        !self.running.is_empty()
    }
}
