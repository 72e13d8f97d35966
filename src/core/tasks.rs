//! Background execution of blocking backend calls
//!
//! The UI thread never waits on the network. Jobs run on a tokio blocking
//! pool and their results come back through a channel that the UI drains
//! once per frame.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Callback that asks the UI to redraw
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Runs jobs off the UI thread and collects their messages
pub struct TaskRunner<M> {
    runtime: Option<Runtime>,
    tx: UnboundedSender<M>,
    rx: UnboundedReceiver<M>,
    waker: Option<Waker>,
}

impl<M: Send + 'static> TaskRunner<M> {
    pub fn new(waker: Option<Waker>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(8)
            .thread_name("cosmic-docs-worker")
            .build()
            .context("Failed to start background runtime")?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime: Some(runtime),
            tx,
            rx,
            waker,
        })
    }

    /// Run `job` on the blocking pool and deliver its message
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() -> M + Send + 'static,
    {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let tx = self.tx.clone();
        let waker = self.waker.clone();
        runtime.spawn_blocking(move || {
            if tx.send(job()).is_err() {
                tracing::debug!("Task finished after the UI went away");
                return;
            }
            if let Some(waker) = waker {
                waker();
            }
        });
    }

    /// Sender for messages produced outside spawned jobs, e.g. listeners
    pub fn sender(&self) -> UnboundedSender<M> {
        self.tx.clone()
    }

    pub fn waker(&self) -> Option<Waker> {
        self.waker.clone()
    }

    /// Take every message that has arrived so far
    pub fn drain(&mut self) -> Vec<M> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Block until the next message arrives
    #[cfg(test)]
    pub fn recv_blocking(&mut self) -> Option<M> {
        self.rx.blocking_recv()
    }
}

impl<M> Drop for TaskRunner<M> {
    fn drop(&mut self) {
        // Do not wait for in-flight requests when the window closes
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_spawned_job_delivers_message() {
        let mut runner: TaskRunner<u32> = TaskRunner::new(None).unwrap();
        runner.spawn(|| 7);
        assert_eq!(runner.recv_blocking(), Some(7));
        assert!(runner.drain().is_empty());
    }

    #[test]
    fn test_waker_called_after_delivery() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let waker: Waker = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut runner: TaskRunner<&'static str> = TaskRunner::new(Some(waker)).unwrap();
        runner.spawn(|| "done");
        assert_eq!(runner.recv_blocking(), Some("done"));
        // The waker runs right after the send; give the pool a moment
        for _ in 0..100 {
            if wakes.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sender_messages_are_drained_in_order() {
        let mut runner: TaskRunner<u8> = TaskRunner::new(None).unwrap();
        let sender = runner.sender();
        sender.send(1).unwrap();
        sender.send(2).unwrap();
        assert_eq!(runner.drain(), vec![1, 2]);
    }
}
