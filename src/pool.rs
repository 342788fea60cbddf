//! Bounded worker pool that runs message callbacks off the dispatcher thread.

use {
    crate::misc::{default_pool_size, LOCK_POISON},
    std::{
        sync::{
            mpsc::{channel, Receiver, Sender},
            Arc, Mutex,
        },
        thread::{Builder, JoinHandle},
    },
    tracing::{debug, warn},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named OS threads fed over an mpsc channel.
///
/// Sized at twice the available parallelism by default. There is no per-job timeout: a callback
/// that never returns occupies one worker for the life of the process.
pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new() -> std::io::Result<Self> { Self::with_size(default_pool_size()) }

    pub fn with_size(size: usize) -> std::io::Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = Builder::new()
                .name(format!("msgpipe-worker-{n}"))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(handle);
        }
        Ok(Self { sender: Mutex::new(Some(sender)), workers: Mutex::new(workers) })
    }

    /// Submits a job. Jobs submitted after shutdown are dropped with a logged diagnostic rather
    /// than panicking, since session handlers may race transport shutdown.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let sender = self.sender.lock().expect(LOCK_POISON);
        match &*sender {
            Some(tx) => {
                if tx.send(Box::new(job)).is_err() {
                    warn!("worker pool hung up, dropping job");
                }
            }
            None => debug!("job submitted after worker pool shutdown, dropping"),
        }
    }

    /// Stops accepting new jobs, lets in-flight ones finish and joins the workers. Idempotent.
    pub fn shutdown(&self) {
        drop(self.sender.lock().expect(LOCK_POISON).take());
        let workers = std::mem::take(&mut *self.workers.lock().expect(LOCK_POISON));
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) { self.shutdown(); }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // The lock must not be held while the job runs, or the pool degrades to one thread.
        let job = match receiver.lock().expect(LOCK_POISON).recv() {
            Ok(job) => job,
            Err(_) => break,
        };
        job();
    }
}
