//! Background executor for CPU-bound work (opus encode/decode).
//!
//! A single worker keeps the main loop responsive while preserving
//! submission order and bounded peak memory. `wait_for_completion` is the
//! barrier the state machine uses before applying side effects: it returns
//! only when the queue is empty and no task is in flight.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

type Task = Box<dyn FnOnce() + Send>;

/// Outstanding-task high-water mark; past this, submissions are logged.
const ACTIVE_TASKS_WARN: usize = 30;

struct Queue {
    tasks: Vec<Task>,
    /// Submitted but not yet completed (queued + running).
    active: usize,
    running: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    cond: Condvar,
}

pub struct BackgroundTask {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                tasks: Vec::new(),
                active: 0,
                running: true,
            }),
            cond: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("background_task".into())
            .spawn(move || worker_loop(worker_inner))
            .expect("failed to spawn background worker");

        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// Queue a task. Tasks run on the worker in submission order.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.active >= ACTIVE_TASKS_WARN {
            warn!(active = queue.active, "background task backlog");
        }
        queue.active += 1;
        queue.tasks.push(Box::new(task));
        self.inner.cond.notify_all();
    }

    /// Block until every scheduled task has completed.
    pub fn wait_for_completion(&self) {
        let queue = self.inner.queue.lock().unwrap();
        let _unused = self
            .inner
            .cond
            .wait_while(queue, |q| !q.tasks.is_empty() || q.active > 0)
            .unwrap();
    }
}

impl Default for BackgroundTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.running = false;
            self.inner.cond.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    info!("background task worker started");
    loop {
        let batch = {
            let queue = inner.queue.lock().unwrap();
            let mut queue = inner
                .cond
                .wait_while(queue, |q| q.tasks.is_empty() && q.running)
                .unwrap();
            if queue.tasks.is_empty() && !queue.running {
                return;
            }
            std::mem::take(&mut queue.tasks)
        };

        for task in batch {
            task();
            let mut queue = inner.queue.lock().unwrap();
            queue.active -= 1;
            if queue.tasks.is_empty() && queue.active == 0 {
                inner.cond.notify_all();
            }
        }
    }
}
