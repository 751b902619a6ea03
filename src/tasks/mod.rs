//! Background work for long-running library operations.
//!
//! Imports, roll EXIF writes and batch roll deletes run on worker threads.
//! A worker sends [`TaskEvent`]s and finishes with exactly one
//! [`TaskEvent::Finished`]; the [`TaskManager`] folds the events into
//! progress whenever the caller polls.

mod manager;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use manager::TaskManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

/// The operation a task runs, with its subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Import { source: PathBuf },
    RollExifWrite { roll_id: i64 },
    RollExifClear { roll_id: i64 },
    DeleteRolls { roll_ids: Vec<i64> },
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Import { source } => write!(f, "import of {}", source.display()),
            TaskKind::RollExifWrite { roll_id } => write!(f, "EXIF write for roll {roll_id}"),
            TaskKind::RollExifClear { roll_id } => write!(f, "EXIF clear for roll {roll_id}"),
            TaskKind::DeleteRolls { roll_ids } => write!(f, "delete of {} rolls", roll_ids.len()),
        }
    }
}

/// Sent by a worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started { total: usize },
    /// One item done; `error` marks a per-item failure.
    Item {
        current: usize,
        total: usize,
        item: String,
        error: Option<String>,
    },
    Finished(TaskOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(String),
    /// Stopped early; items finished before the stop are kept.
    Cancelled(String),
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TaskOutcome::Completed(m) | TaskOutcome::Cancelled(m) | TaskOutcome::Failed(m) => m,
        }
    }
}

/// Where a running task is, including how many items failed so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub item: Option<String>,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl TaskProgress {
    fn apply(&mut self, event: TaskEvent) -> Option<TaskOutcome> {
        match event {
            TaskEvent::Started { total } => self.total = total,
            TaskEvent::Item {
                current,
                total,
                item,
                error,
            } => {
                self.current = current;
                self.total = total;
                self.item = Some(item);
                if error.is_some() {
                    self.failed += 1;
                    self.last_error = error;
                }
            }
            TaskEvent::Finished(outcome) => return Some(outcome),
        }
        None
    }
}

/// A finished task, handed out once by [`TaskManager::poll`].
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: TaskId,
    pub kind: TaskKind,
    pub outcome: TaskOutcome,
    pub progress: TaskProgress,
    pub elapsed: Duration,
}

/// What a caller gets back from a `spawn_*` call.
pub struct TaskHandle {
    pub id: TaskId,
    pub cancel_flag: Arc<AtomicBool>,
    pub thread: JoinHandle<()>,
}

impl TaskHandle {
    /// The worker stops at its next item boundary.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker thread to finish.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!(task = self.id.0, "Background task panicked");
        }
    }
}
