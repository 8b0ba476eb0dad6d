//! Fixed pool of worker threads consuming boxed tasks from a shared
//! channel. Dropping the pool closes the channel; workers finish whatever
//! is queued and are joined.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use tracing::warn;

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(thread_num: usize) -> io::Result<Self> {
        debug_assert!(thread_num > 0);
        let (sender, receiver) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(thread_num);
        for i in 0..thread_num {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })?;
            workers.push(handle);
        }
        Ok(ThreadPool {
            sender: Some(sender),
            workers,
        })
    }

    /// Submission never blocks the caller; the queue is only bounded in
    /// practice by the connection cap.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(task)).is_err() {
                warn!("worker pool is shut down, task dropped");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit.
        self.sender = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
