//! Ordered in-memory collection of install tasks.
//!
//! Every mutation goes through a named operation so the transitions stay
//! synchronous and testable; async callers hold the store behind a mutex.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    clamp_progress, non_empty_error, parse_timestamp, InstallTask, PollHealth, StatusReport,
    TaskStatus,
};

/// Client-side placeholder id, shown until the backend assigns the real one.
pub fn provisional_task_id(now_millis: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("task_{now_millis}_{}", &suffix[..9])
}

#[derive(Clone, Debug)]
struct TaskEntry {
    task: InstallTask,
    renamed: bool,
    issued_poll_seq: u64,
    last_poll_seq: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// Another entry already carried the server id; the placeholder was dropped.
    Merged,
    AlreadyRenamed,
    NotFound,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Updated { status: TaskStatus, terminal: bool },
    /// The task reached a terminal status earlier; nothing changed.
    Frozen,
    /// A newer poll result was applied already.
    Stale,
    Missing,
}

#[derive(Default, Debug)]
pub struct TaskStore {
    entries: Vec<TaskEntry>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&InstallTask> {
        self.position(id).map(|idx| &self.entries[idx].task)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &InstallTask> {
        self.entries.iter().map(|entry| &entry.task)
    }

    pub fn snapshot(&self) -> Vec<InstallTask> {
        self.tasks().cloned().collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.tasks()
            .filter(|task| !task.is_terminal())
            .map(|task| task.id.clone())
            .collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.task.id == id)
    }

    /// Appends a freshly created task; display order is insertion order.
    pub fn insert_pending(&mut self, task: InstallTask) {
        self.entries.push(TaskEntry {
            task,
            renamed: false,
            issued_poll_seq: 0,
            last_poll_seq: 0,
        });
    }

    /// Replaces a provisional id with the server-assigned one, keeping position.
    pub fn rename(&mut self, provisional_id: &str, server_id: &str) -> RenameOutcome {
        let Some(idx) = self.position(provisional_id) else {
            return RenameOutcome::NotFound;
        };
        if self.entries[idx].renamed {
            return RenameOutcome::AlreadyRenamed;
        }
        if provisional_id != server_id {
            if let Some(existing) = self.position(server_id) {
                if existing != idx {
                    self.entries.remove(idx);
                    return RenameOutcome::Merged;
                }
            }
        }
        let entry = &mut self.entries[idx];
        entry.task.id = server_id.to_string();
        entry.renamed = true;
        RenameOutcome::Renamed
    }

    pub fn mark_failed(&mut self, id: &str, message: Option<String>, now: DateTime<Utc>) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let task = &mut self.entries[idx].task;
        if task.is_terminal() {
            return false;
        }
        task.status = TaskStatus::Failed;
        task.error = Some(non_empty_error(message));
        task.end_time = Some(now);
        true
    }

    /// Reserves the sequence number for a status request about to be sent.
    /// Numbers keep increasing across pollers, so a restarted poller never
    /// collides with results from its predecessor.
    pub fn begin_poll(&mut self, id: &str) -> Option<u64> {
        let idx = self.position(id)?;
        let entry = &mut self.entries[idx];
        entry.issued_poll_seq += 1;
        Some(entry.issued_poll_seq)
    }

    /// Applies one poll result.
    ///
    /// `seq` comes from [`TaskStore::begin_poll`]; a result older than the
    /// last applied one is discarded. Progress never
    /// moves backwards and terminal tasks are never touched again.
    pub fn apply_status(
        &mut self,
        id: &str,
        seq: u64,
        report: &StatusReport,
        now: DateTime<Utc>,
    ) -> PollOutcome {
        let Some(idx) = self.position(id) else {
            return PollOutcome::Missing;
        };
        let entry = &mut self.entries[idx];
        if entry.task.is_terminal() {
            return PollOutcome::Frozen;
        }
        if seq <= entry.last_poll_seq {
            return PollOutcome::Stale;
        }
        entry.last_poll_seq = seq;

        let task = &mut entry.task;
        let status = report.status.clone();
        let terminal = status.is_terminal();
        task.progress = task.progress.max(clamp_progress(report.progress));
        task.error = if status == TaskStatus::Failed {
            Some(non_empty_error(report.error.clone()))
        } else {
            None
        };
        task.end_time = if terminal {
            Some(
                report
                    .end_time
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or(now),
            )
        } else {
            None
        };
        task.status = status.clone();
        if terminal {
            task.poll_health = PollHealth::Idle;
        }
        PollOutcome::Updated { status, terminal }
    }

    /// Optimistic local cancel after the backend accepted the request.
    pub fn mark_cancelled(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let task = &mut self.entries[idx].task;
        if task.is_terminal() {
            return false;
        }
        task.status = TaskStatus::Cancelled;
        task.error = None;
        task.end_time = Some(now);
        task.poll_health = PollHealth::Idle;
        true
    }

    pub fn set_poll_health(&mut self, id: &str, health: PollHealth) {
        if let Some(idx) = self.position(id) {
            let task = &mut self.entries[idx].task;
            if task.is_terminal() && health != PollHealth::Idle {
                return;
            }
            task.poll_health = health;
        }
    }

    /// Adds tasks already known to the backend. Ids present in the store are
    /// skipped; returns the ids of the seeded tasks that still need polling.
    pub fn seed(&mut self, tasks: Vec<InstallTask>) -> Vec<String> {
        let mut active = Vec::new();
        for task in tasks {
            if task.id.trim().is_empty() || self.position(&task.id).is_some() {
                continue;
            }
            if !task.is_terminal() {
                active.push(task.id.clone());
            }
            self.entries.push(TaskEntry {
                task,
                renamed: true,
                issued_poll_seq: 0,
                last_poll_seq: 0,
            });
        }
        active
    }
}
