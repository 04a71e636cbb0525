//! Single-worker, run-to-completion task queue.
//!
//! Each pipeline owns its mutable state on one dedicated thread. Public entry points
//! push closures onto a FIFO channel and return immediately; the worker runs them one at a
//! time against the state, so no locking is needed inside a pipeline. Errors returned by a
//! task are logged and forwarded to the error listener.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::PipelineError;

type Task<S> = Box<dyn FnOnce(&mut S) -> Result<(), PipelineError> + Send>;

enum Command<S> {
    Run(Task<S>),
    Shutdown,
}

pub struct PipelineWorker<S> {
    name: String,
    tx: Sender<Command<S>>,
    errors: Receiver<PipelineError>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> PipelineWorker<S> {
    /// Spawn the worker thread, moving `state` onto it.
    ///
    /// `queue_capacity == 0` gives an unbounded queue; otherwise `submit` blocks while the
    /// queue is full.
    pub fn spawn(name: &str, state: S, queue_capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = if queue_capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(queue_capacity)
        };
        let (err_tx, err_rx) = crossbeam_channel::unbounded();

        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("cadence-{name}"))
            .spawn(move || worker_loop(&thread_name, state, &rx, &err_tx))?;
        log::info!("Pipeline worker '{name}' started");

        Ok(Self {
            name: name.to_string(),
            tx,
            errors: err_rx,
            thread_handle: Some(handle),
        })
    }

    /// Enqueue a task. Returns as soon as the task is queued.
    pub fn submit<F>(&self, task: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut S) -> Result<(), PipelineError> + Send + 'static,
    {
        self.tx
            .send(Command::Run(Box::new(task)))
            .map_err(|_| PipelineError::WorkerClosed)
    }

    /// Run `f` on the worker after every previously queued task and wait for its result.
    pub fn call<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.submit(move |state| {
            let _ = reply_tx.send(f(state));
            Ok(())
        })?;
        reply_rx.recv().map_err(|_| PipelineError::WorkerClosed)
    }

    /// Block until every task queued so far has run.
    pub fn sync(&self) -> Result<(), PipelineError> {
        self.call(|_| ())
    }

    /// A cloneable sender for collaborators that need to queue tasks themselves,
    /// e.g. a downstream consumer granting capacity from inside a task.
    ///
    /// With a bounded queue, submitting from the worker thread itself can deadlock once
    /// the queue is full.
    pub fn submitter(&self) -> Submitter<S> {
        Submitter {
            tx: self.tx.clone(),
        }
    }

    /// Fatal errors raised by tasks, in the order they occurred.
    pub fn errors(&self) -> &Receiver<PipelineError> {
        &self.errors
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct Submitter<S> {
    tx: Sender<Command<S>>,
}

impl<S> Clone for Submitter<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> Submitter<S> {
    pub fn submit<F>(&self, task: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut S) -> Result<(), PipelineError> + Send + 'static,
    {
        self.tx
            .send(Command::Run(Box::new(task)))
            .map_err(|_| PipelineError::WorkerClosed)
    }
}

impl<S> Drop for PipelineWorker<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Pipeline worker '{}' panicked", self.name);
            }
        }
    }
}

fn worker_loop<S>(
    name: &str,
    mut state: S,
    rx: &Receiver<Command<S>>,
    err_tx: &Sender<PipelineError>,
) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Run(task) => {
                if let Err(e) = task(&mut state) {
                    log::error!("Pipeline worker '{name}': {e}");
                    let _ = err_tx.send(e);
                }
            }
            Command::Shutdown => break,
        }
    }
    log::info!("Pipeline worker '{name}' shutting down");
}
