//! # Worker Pool
//!
//! Bounded task group backed by a rendezvous channel: with capacity `N`
//! there are `N` worker threads and `submit` blocks until one is free,
//! which is the back-pressure the orchestrator relies on. Cancellation
//! drains queued tasks without running them; running tasks observe the
//! shared flag themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, bounded};
use thiserror::Error;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("task group is closed")]
    Closed,
}

pub struct TaskGroup {
    tx: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl TaskGroup {
    /// Create a group running at most `capacity` tasks at once.
    pub fn limited(cancel: Arc<AtomicBool>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<Task>(0);

        let mut handles = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let rx = rx.clone();
            let cancel = Arc::clone(&cancel);
            handles.push(std::thread::spawn(move || {
                for task in rx {
                    if cancel.load(Ordering::Relaxed) {
                        continue;
                    }
                    task();
                }
            }));
        }

        Self {
            tx: Some(tx),
            handles,
            cancel,
        }
    }

    /// Submit a task, blocking while every worker is busy. Tasks must not
    /// submit back into their own group.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(PoolError::Closed)?;
        tx.send(Box::new(task)).map_err(|_| PoolError::Closed)
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Close the group and block until every submitted task has finished.
    pub fn wait(mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn runs_all_submitted_tasks() {
        let cancel = Arc::new(AtomicBool::new(false));
        let group = TaskGroup::limited(Arc::clone(&cancel), 4);
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            group
                .submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .expect("submit");
        }
        group.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn submit_blocks_when_full_bounding_concurrency() {
        let cancel = Arc::new(AtomicBool::new(false));
        let group = TaskGroup::limited(Arc::clone(&cancel), 2);
        let running = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            group
                .submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
        group.wait();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn cancellation_skips_queued_tasks() {
        let cancel = Arc::new(AtomicBool::new(false));
        let group = TaskGroup::limited(Arc::clone(&cancel), 1);
        let counter = Arc::new(AtomicU64::new(0));

        let gate = Arc::new(AtomicBool::new(false));
        {
            let gate = Arc::clone(&gate);
            group
                .submit(move || {
                    while !gate.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
                .expect("submit");
        }
        cancel.store(true, Ordering::Relaxed);
        let opener = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                gate.store(true, Ordering::Relaxed);
            })
        };
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            group
                .submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .expect("submit");
        }
        group.wait();
        let _ = opener.join();
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
