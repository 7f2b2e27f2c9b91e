use std::{
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};

use log::{debug, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool running dispatched commands off the receiver loop.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    pub fn new(name: &str, size: usize) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::channel();

        let receiver = Arc::new(Mutex::new(receiver));
        let sender = Some(sender);

        for i in 0..size {
            match Worker::new(name, i, Arc::clone(&receiver)) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!("failed to spawn {name} worker {i}: {e}"),
            }
        }

        Self { workers, sender }
    }

    /// Queues `f`; if no worker could be spawned it runs on the calling thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers.is_empty() {
            f();
            return;
        }
        let job = Box::new(f);
        if let Some(Err(mpsc::SendError(job))) = self.sender.as_ref().map(|s| s.send(job)) {
            job();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // the last handle may be dropped from inside a job
            if worker.thread.thread().id() == current {
                continue;
            }
            debug!("shutting down worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(
        name: &str,
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                loop {
                    let msg = receiver
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .recv();
                    match msg {
                        Ok(job) => job(),
                        Err(_) => {
                            debug!("worker {id} disconnected");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { id, thread })
    }
}
