// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The per-task-type pending queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use quarry_agent_types::{TaskPriority, TaskRequest};

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<TaskRequest>,
    shutdown: bool,
}

/// An ordered queue of pending task requests for one task type.
///
/// Insertion order defines the base ordering; workers may ask for a
/// priority-matching entry first. A single mutex guards the deque, with a
/// condition variable for blocking consumers. Dedup is the registry's job,
/// not the queue's.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    task_ready: Condvar,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> TaskQueue {
        TaskQueue::default()
    }

    /// Appends a task to the tail and wakes one waiting worker.
    ///
    /// Never blocks and never fails; there is no "queue full" condition,
    /// since master-side redelivery is the flow control mechanism.
    pub fn push(&self, task: TaskRequest) {
        let mut state = self.state.lock().expect("task queue lock poisoned");
        state.tasks.push_back(task);
        drop(state);
        self.task_ready.notify_one();
    }

    /// Blocks until a task is available, then removes and returns it.
    ///
    /// When `want` is set, the oldest task of that priority is preferred;
    /// with no match the oldest task of any priority is taken, so normal
    /// tasks are never starved outright. Returns `None` once the queue has
    /// shut down and drained; the caller should exit.
    pub fn pop(&self, want: Option<TaskPriority>) -> Option<TaskRequest> {
        let mut state = self.state.lock().expect("task queue lock poisoned");
        // Re-check the predicate after every wake: condvar wakes may be
        // spurious.
        while state.tasks.is_empty() {
            if state.shutdown {
                return None;
            }
            state = self
                .task_ready
                .wait(state)
                .expect("task queue lock poisoned");
        }
        let index = match want {
            Some(priority) => next_task_index(&state.tasks, priority),
            None => 0,
        };
        state.tasks.remove(index)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.state.lock().expect("task queue lock poisoned").tasks.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the queue as shut down and wakes all waiting workers.
    ///
    /// Already-queued tasks are still handed out; `pop` returns `None` only
    /// once the queue is empty.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("task queue lock poisoned");
        state.shutdown = true;
        drop(state);
        self.task_ready.notify_all();
    }
}

/// Index of the oldest task with the wanted priority, falling back to the
/// front of the queue (oldest of any priority) when none matches.
///
/// The scan is stable: equal-priority entries keep insertion order.
fn next_task_index(tasks: &VecDeque<TaskRequest>, want: TaskPriority) -> usize {
    tasks
        .iter()
        .position(|task| task.priority == want)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quarry_agent_types::{DropTabletReq, TaskPayload};

    use super::*;

    fn task(signature: i64, priority: TaskPriority) -> TaskRequest {
        TaskRequest {
            signature,
            user: "u1".into(),
            priority,
            payload: TaskPayload::DropTablet(DropTabletReq {
                tablet_id: signature,
                schema_hash: 0,
            }),
        }
    }

    #[test]
    fn high_priority_head_of_line_with_fifo_fallback() {
        let queue = TaskQueue::new();
        queue.push(task(1, TaskPriority::Normal));
        queue.push(task(2, TaskPriority::Normal));
        queue.push(task(3, TaskPriority::High));

        // A worker wanting High jumps to s3.
        let first = queue.pop(Some(TaskPriority::High)).unwrap();
        assert_eq!(first.signature, 3);
        // No High task left: fall back to the oldest of any priority.
        let second = queue.pop(Some(TaskPriority::High)).unwrap();
        assert_eq!(second.signature, 1);
        let third = queue.pop(Some(TaskPriority::High)).unwrap();
        assert_eq!(third.signature, 2);
    }

    #[test]
    fn no_preference_is_fifo() {
        let queue = TaskQueue::new();
        queue.push(task(1, TaskPriority::Normal));
        queue.push(task(2, TaskPriority::High));
        assert_eq!(queue.pop(None).unwrap().signature, 1);
        assert_eq!(queue.pop(None).unwrap().signature, 2);
    }

    #[test]
    fn equal_priority_keeps_insertion_order() {
        let queue = TaskQueue::new();
        queue.push(task(1, TaskPriority::High));
        queue.push(task(2, TaskPriority::High));
        assert_eq!(queue.pop(Some(TaskPriority::High)).unwrap().signature, 1);
        assert_eq!(queue.pop(Some(TaskPriority::High)).unwrap().signature, 2);
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop(None))
        };
        // Give the consumer a chance to block on the condvar.
        std::thread::sleep(Duration::from_millis(50));
        queue.push(task(9, TaskPriority::Normal));
        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.signature, 9);
    }

    #[test]
    fn shutdown_wakes_blocked_workers() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop(Some(TaskPriority::High)))
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn shutdown_drains_queued_tasks_first() {
        let queue = TaskQueue::new();
        queue.push(task(1, TaskPriority::Normal));
        queue.shutdown();
        assert_eq!(queue.pop(None).unwrap().signature, 1);
        assert!(queue.pop(None).is_none());
    }
}
