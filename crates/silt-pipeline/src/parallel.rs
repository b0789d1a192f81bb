//! Parallel execution of a middle stage.
//!
//! One producer (the caller's thread) feeds batches of items to N worker
//! threads and forwards their output batches downstream. Each worker cycles
//! through three states:
//!
//! * `Idle`: waiting for input from the producer,
//! * `Processing`: running the stage over its batch,
//! * `Outputting`: holding a full output batch for the producer.
//!
//! All coordination happens under a single mutex with one producer condition
//! variable and one condition variable per worker. The producer serves
//! workers in lowest-index-first order. Order is preserved within a batch
//! but not across workers, so the driver suits order-insensitive stages.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use silt_common::{Result, SiltError};

use crate::pipe::{MiddleStage, PipeSegment, StageFactory};

type In<F> = <<F as StageFactory>::Stage as MiddleStage>::In;
type Out<F> = <<F as StageFactory>::Stage as MiddleStage>::Out;

/// Worker count and batch size of a parallel section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelOptions {
    /// Number of worker threads.
    pub workers: usize,
    /// Items per input and output batch.
    pub buf_size: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            buf_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Processing,
    Outputting,
}

struct WorkerSlot<I, O> {
    state: WorkerState,
    input: Option<Vec<I>>,
    output: Option<Vec<O>>,
    /// True when the held output ends its batch; consuming it idles the
    /// worker instead of resuming it.
    batch_done: bool,
    dead: bool,
}

struct Inner<I, O> {
    workers: Vec<WorkerSlot<I, O>>,
    done: bool,
    running_workers: usize,
}

struct SharedState<I, O> {
    buf_size: usize,
    inner: Mutex<Inner<I, O>>,
    producer: Condvar,
    worker: Vec<Condvar>,
}

fn first_ready<I, O>(inner: &Inner<I, O>) -> Option<usize> {
    inner
        .workers
        .iter()
        .position(|w| !w.dead && w.state != WorkerState::Processing)
}

fn first_outputting<I, O>(inner: &Inner<I, O>) -> Option<usize> {
    inner
        .workers
        .iter()
        .position(|w| !w.dead && w.state == WorkerState::Outputting)
}

fn any_processing<I, O>(inner: &Inner<I, O>) -> bool {
    inner
        .workers
        .iter()
        .any(|w| !w.dead && w.state == WorkerState::Processing)
}

fn all_dead<I, O>(inner: &Inner<I, O>) -> bool {
    inner.workers.iter().all(|w| w.dead)
}

/// Decrements the running-worker count when the worker exits, normally or
/// by panic, and releases its slot so the producer never waits on a corpse.
struct RunningGuard<'a, I, O> {
    shared: &'a SharedState<I, O>,
    id: usize,
}

impl<I, O> Drop for RunningGuard<'_, I, O> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        let slot = &mut inner.workers[self.id];
        slot.dead = true;
        slot.state = WorkerState::Idle;
        slot.input = None;
        slot.output = None;
        inner.running_workers -= 1;
        self.shared.producer.notify_one();
    }
}

fn worker_loop<S: MiddleStage>(shared: Arc<SharedState<S::In, S::Out>>, id: usize, mut stage: S) {
    let _guard = RunningGuard {
        shared: &shared,
        id,
    };

    loop {
        let batch = {
            let mut inner = shared.inner.lock();
            loop {
                if inner.done {
                    tracing::debug!(worker = id, "done signal received");
                    return;
                }
                if inner.workers[id].state == WorkerState::Processing {
                    if let Some(batch) = inner.workers[id].input.take() {
                        break batch;
                    }
                }
                shared.worker[id].wait(&mut inner);
            }
        };

        tracing::debug!(worker = id, items = batch.len(), "processing batch");
        let state: &SharedState<S::In, S::Out> = &shared;
        let mut out_buf: Vec<S::Out> = Vec::with_capacity(state.buf_size);
        {
            let mut sink = |item: S::Out| {
                assert!(
                    out_buf.len() < state.buf_size,
                    "buffer overrun in parallel worker {id}"
                );
                out_buf.push(item);
                if out_buf.len() == state.buf_size {
                    flush_output(state, id, &mut out_buf, false);
                }
            };
            for item in batch {
                stage.push(item, &mut sink);
            }
            stage.end_batch(&mut sink);
        }
        flush_output(state, id, &mut out_buf, true);
    }
}

/// Hands the worker's output batch to the producer and waits until it is
/// consumed. Ending a batch with no output skips the transfer and idles the
/// worker directly.
fn flush_output<I, O>(shared: &SharedState<I, O>, id: usize, buf: &mut Vec<O>, batch_done: bool) {
    let mut inner = shared.inner.lock();
    if buf.is_empty() {
        if batch_done {
            inner.workers[id].state = WorkerState::Idle;
            shared.producer.notify_one();
        }
        return;
    }

    inner.workers[id].batch_done = batch_done;
    inner.workers[id].output = Some(std::mem::take(buf));
    inner.workers[id].state = WorkerState::Outputting;
    tracing::debug!(worker = id, batch_done, "output ready");
    shared.producer.notify_one();

    while inner.workers[id].state == WorkerState::Outputting {
        if inner.done {
            // Cancelled mid-flush. Reclaim the batch; a further push will
            // trip the overrun assertion.
            if let Some(batch) = inner.workers[id].output.take() {
                *buf = batch;
            }
            return;
        }
        shared.worker[id].wait(&mut inner);
    }
}

/// Runs a middle stage on worker threads between the caller and a
/// downstream segment.
pub struct Parallel<F, D>
where
    F: StageFactory,
    D: PipeSegment<Item = Out<F>>,
{
    options: ParallelOptions,
    factory: F,
    dest: Option<D>,
    shared: Option<Arc<SharedState<In<F>, Out<F>>>>,
    handles: Vec<JoinHandle<()>>,
    staging: Vec<In<F>>,
    remaining: u64,
    started: bool,
    finished: bool,
}

impl<F, D> Parallel<F, D>
where
    F: StageFactory,
    In<F>: 'static,
    Out<F>: 'static,
    D: PipeSegment<Item = Out<F>>,
{
    /// Creates a driver with default options.
    pub fn new(factory: F, dest: D) -> Self {
        Self::with_options(ParallelOptions::default(), factory, dest)
    }

    /// Creates a driver with explicit worker count and batch size.
    pub fn with_options(options: ParallelOptions, factory: F, dest: D) -> Self {
        assert!(options.workers >= 1, "need at least 1 worker");
        assert!(options.buf_size >= 1, "batches need at least 1 item");
        Self {
            options,
            factory,
            dest: Some(dest),
            shared: None,
            handles: Vec::new(),
            staging: Vec::new(),
            remaining: 0,
            started: false,
            finished: false,
        }
    }

    /// Spawns the workers. `items` announces how many items will be pushed:
    /// pushing more is fatal, pushing fewer is finished by
    /// [`end`](Parallel::end).
    pub fn begin(&mut self, items: u64) -> Result<()> {
        assert!(!self.started, "begin called twice");
        self.started = true;
        self.remaining = items;
        self.staging = Vec::with_capacity(self.options.buf_size);

        let shared = Arc::new(SharedState {
            buf_size: self.options.buf_size,
            inner: Mutex::new(Inner {
                workers: (0..self.options.workers)
                    .map(|_| WorkerSlot {
                        state: WorkerState::Idle,
                        input: None,
                        output: None,
                        batch_done: false,
                        dead: false,
                    })
                    .collect(),
                done: false,
                running_workers: self.options.workers,
            }),
            producer: Condvar::new(),
            worker: (0..self.options.workers).map(|_| Condvar::new()).collect(),
        });

        for id in 0..self.options.workers {
            let stage = self.factory.build();
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("silt-worker-{id}"))
                .spawn(move || worker_loop(shared, id, stage))?;
            self.handles.push(handle);
        }
        self.shared = Some(shared);

        if let Some(dest) = self.dest.as_mut() {
            dest.begin();
        }
        Ok(())
    }

    /// Pushes one item. The push that exhausts the announced item count
    /// drains and stops the workers before returning.
    ///
    /// # Panics
    ///
    /// Panics when called before `begin` or with more items than announced.
    pub fn push(&mut self, item: In<F>) {
        assert!(self.started, "push before begin");
        assert!(self.remaining > 0, "received more items than announced");

        self.staging.push(item);
        self.remaining -= 1;
        if self.staging.len() < self.options.buf_size && self.remaining > 0 {
            return;
        }

        self.dispatch();
        if self.remaining == 0 {
            self.finish_stream();
        }
    }

    /// Finishes the stream: flushes staged items, drains and joins the
    /// workers, surfaces any worker panic, and ends the downstream segment.
    pub fn end(&mut self) -> Result<()> {
        assert!(self.started, "end before begin");
        if !self.finished {
            self.dispatch();
            self.finish_stream();
        }

        let mut failure = None;
        for handle in self.handles.drain(..) {
            if let Err(panic) = handle.join() {
                failure = Some(SiltError::WorkerPanic(panic_message(&panic)));
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        if let Some(dest) = self.dest.as_mut() {
            dest.end();
        }
        Ok(())
    }

    /// Returns the downstream segment. Call after [`end`](Parallel::end).
    pub fn into_dest(mut self) -> D {
        assert!(self.finished, "into_dest before the stream is finished");
        self.dest.take().expect("destination already taken")
    }

    /// Hands staged items to workers, consuming finished output batches
    /// along the way. Serves the lowest-index non-processing worker first.
    fn dispatch(&mut self) {
        if self.staging.is_empty() {
            return;
        }
        let shared = Arc::clone(self.shared.as_ref().expect("not started"));
        let mut inner = shared.inner.lock();

        while !self.staging.is_empty() {
            let idx = loop {
                if all_dead(&inner) {
                    // Every worker died; drop the batch and let end() surface
                    // the panic.
                    self.staging.clear();
                    return;
                }
                match first_ready(&inner) {
                    Some(idx) => break idx,
                    None => shared.producer.wait(&mut inner),
                }
            };
            match inner.workers[idx].state {
                WorkerState::Idle => {
                    let batch = std::mem::replace(
                        &mut self.staging,
                        Vec::with_capacity(self.options.buf_size),
                    );
                    tracing::debug!(worker = idx, items = batch.len(), "dispatching batch");
                    inner.workers[idx].input = Some(batch);
                    inner.workers[idx].state = WorkerState::Processing;
                    shared.worker[idx].notify_one();
                }
                WorkerState::Outputting => self.consume(&mut inner, &shared, idx),
                WorkerState::Processing => unreachable!("ready worker is processing"),
            }
        }
    }

    /// Pushes a worker's output batch downstream, then idles the worker or
    /// resumes it when it is still mid-batch.
    fn consume(
        &mut self,
        inner: &mut Inner<In<F>, Out<F>>,
        shared: &SharedState<In<F>, Out<F>>,
        idx: usize,
    ) {
        let batch = inner.workers[idx]
            .output
            .take()
            .expect("outputting worker without output");
        if let Some(dest) = self.dest.as_mut() {
            for item in batch {
                dest.push(item);
            }
        }
        inner.workers[idx].state = if inner.workers[idx].batch_done {
            WorkerState::Idle
        } else {
            WorkerState::Processing
        };
        shared.worker[idx].notify_one();
    }

    /// Consumes every outstanding output batch, waits for in-flight batches
    /// to finish, then stops and drains the workers.
    fn finish_stream(&mut self) {
        let shared = Arc::clone(self.shared.as_ref().expect("not started"));
        let mut inner = shared.inner.lock();

        loop {
            if let Some(idx) = first_outputting(&inner) {
                self.consume(&mut inner, &shared, idx);
            } else if any_processing(&inner) {
                shared.producer.wait(&mut inner);
            } else {
                break;
            }
        }

        tracing::debug!("all items handled; stopping workers");
        inner.done = true;
        for cv in &shared.worker {
            cv.notify_all();
        }
        while inner.running_workers > 0 {
            shared.producer.wait(&mut inner);
        }
        drop(inner);
        self.finished = true;
    }
}

impl<F, D> Drop for Parallel<F, D>
where
    F: StageFactory,
    D: PipeSegment<Item = Out<F>>,
{
    fn drop(&mut self) {
        if self.started && !self.finished {
            if let Some(shared) = &self.shared {
                let mut inner = shared.inner.lock();
                inner.done = true;
                for cv in &shared.worker {
                    cv.notify_all();
                }
            }
            for handle in self.handles.drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("parallel worker panicked during shutdown");
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
