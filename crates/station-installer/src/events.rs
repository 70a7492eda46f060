use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::model::TaskStatus;

pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstallerEvent {
    TaskUpdated {
        task_id: String,
        status: TaskStatus,
        progress: f64,
    },
    TaskRenamed {
        from: String,
        to: String,
    },
    Notification {
        task_id: Option<String>,
        level: NotificationLevel,
        message: String,
    },
}

impl InstallerEvent {
    pub fn notification(task_id: Option<&str>, level: NotificationLevel, message: String) -> Self {
        InstallerEvent::Notification {
            task_id: task_id.map(str::to_string),
            level,
            message,
        }
    }

    fn updated_task(&self) -> Option<&str> {
        match self {
            InstallerEvent::TaskUpdated { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct EventSender {
    inner: Arc<EventQueue>,
}

/// Bounded queue between pollers and whatever renders task state.
///
/// Updates for the same task coalesce into the newest one; when full, updates
/// are shed before notifications so outcome messages are never lost to
/// progress chatter.
pub struct EventQueue {
    queue: Mutex<VecDeque<InstallerEvent>>,
    notify: mpsc::Sender<()>,
    max_len: usize,
}

impl EventQueue {
    pub fn new(max_len: usize) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (notify, notify_rx) = mpsc::channel(1);
        (
            Arc::new(Self {
                queue: Mutex::new(VecDeque::new()),
                notify,
                max_len: max_len.max(1),
            }),
            notify_rx,
        )
    }

    pub fn sender(self: &Arc<Self>) -> EventSender {
        EventSender {
            inner: Arc::clone(self),
        }
    }

    pub fn drain(&self) -> Vec<InstallerEvent> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }

    fn push(&self, event: InstallerEvent) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let was_empty = queue.is_empty();
        let Some(event) = coalesce(&mut queue, event) else {
            return false;
        };
        if !make_room(&mut queue, &event, self.max_len) {
            return false;
        }
        queue.push_back(event);
        if was_empty {
            let _ = self.notify.try_send(());
        }
        true
    }
}

/// Overwrites a queued update for the same task in place. Returns the event
/// when it still has to be appended.
fn coalesce(
    queue: &mut VecDeque<InstallerEvent>,
    event: InstallerEvent,
) -> Option<InstallerEvent> {
    let Some(task_id) = event.updated_task() else {
        return Some(event);
    };
    match queue
        .iter()
        .position(|queued| queued.updated_task() == Some(task_id))
    {
        Some(pos) => {
            queue[pos] = event;
            None
        }
        None => Some(event),
    }
}

/// Frees one slot for `incoming` when the queue is full. The oldest update
/// goes first; with only notifications queued, an incoming update is
/// refused and an incoming notification evicts the oldest one.
fn make_room(
    queue: &mut VecDeque<InstallerEvent>,
    incoming: &InstallerEvent,
    max_len: usize,
) -> bool {
    if queue.len() < max_len {
        return true;
    }
    let victim = queue
        .iter()
        .position(|queued| queued.updated_task().is_some())
        .or_else(|| incoming.updated_task().is_none().then_some(0));
    match victim {
        Some(pos) => {
            queue.remove(pos);
            true
        }
        None => false,
    }
}

impl EventSender {
    pub fn send(&self, event: InstallerEvent) {
        self.inner.push(event);
    }
}
