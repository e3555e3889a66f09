/*!
 * Verification Queue
 *
 * Single worker thread that runs verification jobs in FIFO order, one
 * bytecode segment at a time. Each job ends with exactly one terminal
 * callback (`on_complete` or `on_error`), delivered through the caller's
 * dispatch context rather than on the worker.
 *
 * Jobs with a deadline are also registered with a watchdog thread. Whichever
 * of the worker and the watchdog takes the handler out of the job's slot
 * first delivers the terminal callback; the other finds the slot empty.
 */

use super::container::{DexEntry, SymbolExtractor};
use super::dex::DexSymbols;
use crate::core::dispatch::CallbackExecutor;
use crate::core::errors::{SandboxError, SandboxResult};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-job verification logic
pub trait VerificationHandler: Send + 'static {
    /// Check the symbols of one segment; `false` stops the job
    fn verify(&mut self, segment: &DexEntry, symbols: &DexSymbols) -> bool;

    /// Every segment was checked; `passed` is false if one was rejected
    fn on_complete(self: Box<Self>, passed: bool);

    /// The job could not finish (I/O, parse error, timeout, cancellation)
    fn on_error(self: Box<Self>, error: SandboxError);
}

/// Options for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Deadline measured from enqueue; a job still queued or parsing when
    /// it passes ends with `Timeout` at that moment
    pub timeout: Option<Duration>,
}

impl JobOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Handle to a queued job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation; takes effect before the next segment
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Result channel for one job
pub struct VerificationTicket<T> {
    job: JobHandle,
    receiver: flume::Receiver<SandboxResult<T>>,
}

impl<T> VerificationTicket<T> {
    pub fn new(job: JobHandle, receiver: flume::Receiver<SandboxResult<T>>) -> Self {
        Self { job, receiver }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Block until the job ends
    pub fn wait(self) -> SandboxResult<T> {
        self.receiver.recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Block until the job ends or `timeout` elapses; on timeout the job is cancelled
    pub fn wait_timeout(self, timeout: Duration) -> SandboxResult<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => {
                self.job.cancel();
                Err(SandboxError::Timeout(format!(
                    "verification job {} did not finish within {:?}",
                    self.job.id, timeout
                )))
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(dropped()),
        }
    }

    pub async fn recv_async(self) -> SandboxResult<T> {
        self.receiver
            .recv_async()
            .await
            .unwrap_or_else(|_| Err(dropped()))
    }
}

fn dropped() -> SandboxError {
    SandboxError::Internal("verification job ended without a result".to_string())
}

/// Holds the handler until one side claims the terminal callback
type HandlerSlot = Arc<Mutex<Option<Box<dyn VerificationHandler>>>>;

struct Job {
    handle: JobHandle,
    container: PathBuf,
    label: String,
    slot: HandlerSlot,
    deadline: Option<Instant>,
}

enum Outcome {
    Complete(bool),
    Error(SandboxError),
}

/// Deadline registered with the watchdog
struct Expiry {
    at: Instant,
    job: Uuid,
    slot: HandlerSlot,
}

impl PartialEq for Expiry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.job == other.job
    }
}

impl Eq for Expiry {}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap, so the earliest deadline must compare greatest
        other.at.cmp(&self.at).then_with(|| self.job.cmp(&other.job))
    }
}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// FIFO verification worker
pub struct VerificationQueue {
    sender: Mutex<Option<flume::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    deadlines: Mutex<Option<flume::Sender<Expiry>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    executor: Arc<dyn CallbackExecutor>,
    pending: Arc<AtomicUsize>,
}

impl VerificationQueue {
    /// Start the worker; terminal callbacks run on `executor`
    pub fn new(executor: Arc<dyn CallbackExecutor>) -> SandboxResult<Self> {
        Self::with_extractor(SymbolExtractor::new(), executor)
    }

    pub fn with_extractor(
        extractor: SymbolExtractor,
        executor: Arc<dyn CallbackExecutor>,
    ) -> SandboxResult<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_executor = Arc::clone(&executor);
        let worker_pending = Arc::clone(&pending);
        let worker = std::thread::Builder::new()
            .name("dex-verifier".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    run_job(&extractor, worker_executor.as_ref(), job);
                    worker_pending.fetch_sub(1, Ordering::AcqRel);
                }
                debug!("Verification worker exiting");
            })
            .map_err(|e| {
                SandboxError::Internal(format!("failed to start verification worker: {}", e))
            })?;

        let (deadlines, expiries) = flume::unbounded::<Expiry>();
        let watchdog_executor = Arc::clone(&executor);
        let watchdog = std::thread::Builder::new()
            .name("dex-verifier-deadline".to_string())
            .spawn(move || run_watchdog(&expiries, watchdog_executor.as_ref()))
            .map_err(|e| {
                SandboxError::Internal(format!("failed to start verification watchdog: {}", e))
            })?;

        info!("Verification queue started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            deadlines: Mutex::new(Some(deadlines)),
            watchdog: Mutex::new(Some(watchdog)),
            executor,
            pending,
        })
    }

    /// Queue a job with default options
    pub fn queue_job(
        &self,
        container: impl Into<PathBuf>,
        label: impl Into<String>,
        handler: Box<dyn VerificationHandler>,
    ) -> JobHandle {
        self.queue_job_with(container, label, handler, JobOptions::default())
    }

    pub fn queue_job_with(
        &self,
        container: impl Into<PathBuf>,
        label: impl Into<String>,
        handler: Box<dyn VerificationHandler>,
        options: JobOptions,
    ) -> JobHandle {
        let handle = JobHandle::new();
        let slot: HandlerSlot = Arc::new(Mutex::new(Some(handler)));
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let job = Job {
            handle: handle.clone(),
            container: container.into(),
            label: label.into(),
            slot: Arc::clone(&slot),
            deadline,
        };

        debug!(job = %handle.id, label = %job.label, "Queueing verification job");
        self.pending.fetch_add(1, Ordering::AcqRel);

        let sender = self.sender.lock().clone();
        let rejected = match sender {
            Some(sender) => sender.send(job).err().map(|flume::SendError(job)| job),
            None => Some(job),
        };
        if let Some(job) = rejected {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(job = %handle.id, "Verification queue is shut down, rejecting job");
            if let Some(handler) = job.slot.lock().take() {
                deliver(
                    self.executor.as_ref(),
                    handler,
                    Outcome::Error(SandboxError::IllegalState(
                        "verification queue is shut down".to_string(),
                    )),
                );
            }
            return handle;
        }

        if let Some(at) = deadline {
            let registered = self.deadlines.lock().as_ref().is_some_and(|deadlines| {
                deadlines
                    .send(Expiry {
                        at,
                        job: handle.id,
                        slot,
                    })
                    .is_ok()
            });
            if !registered {
                debug!(job = %handle.id, "Watchdog stopped, deadline checked by worker only");
            }
        }
        handle
    }

    /// Jobs queued or running
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, finish the queued ones and join the worker
    pub fn shutdown(&self) {
        self.sender.lock().take();
        join("worker", self.worker.lock().take());
        // Deadlines stay armed while the worker drains the queue
        self.deadlines.lock().take();
        join("watchdog", self.watchdog.lock().take());
    }
}

impl Drop for VerificationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn join(name: &str, thread: Option<JoinHandle<()>>) {
    if let Some(thread) = thread {
        if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
            warn!(thread = name, "Verification thread panicked");
        }
    }
}

fn run_watchdog(expiries: &flume::Receiver<Expiry>, executor: &dyn CallbackExecutor) {
    let mut armed: BinaryHeap<Expiry> = BinaryHeap::new();
    loop {
        let received = match armed.peek() {
            Some(next) => expiries.recv_deadline(next.at),
            None => expiries
                .recv()
                .map_err(|_| flume::RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(expiry) => armed.push(expiry),
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while armed.peek().is_some_and(|next| next.at <= now) {
            if let Some(expiry) = armed.pop() {
                expire(expiry, executor);
            }
        }
    }
    debug!(armed = armed.len(), "Verification watchdog exiting");
}

fn expire(expiry: Expiry, executor: &dyn CallbackExecutor) {
    // A locked slot means the worker is inside `verify`; it checks the
    // deadline itself once that segment returns
    let Some(mut slot) = expiry.slot.try_lock() else {
        return;
    };
    let Some(handler) = slot.take() else {
        return;
    };
    drop(slot);

    warn!(job = %expiry.job, "Verification job deadline passed");
    deliver(
        executor,
        handler,
        Outcome::Error(SandboxError::Timeout(format!(
            "verification job {} exceeded its deadline",
            expiry.job
        ))),
    );
}

fn run_job(extractor: &SymbolExtractor, executor: &dyn CallbackExecutor, job: Job) {
    let Job {
        handle,
        container,
        label,
        slot,
        deadline,
    } = job;
    let started = Instant::now();

    if slot.lock().is_none() {
        debug!(job = %handle.id, label = %label, "Skipping expired verification job");
        return;
    }

    let Some(outcome) = verify_segments(extractor, &handle, &container, deadline, &slot) else {
        debug!(job = %handle.id, label = %label, "Verification job expired while running");
        return;
    };
    let Some(handler) = slot.lock().take() else {
        debug!(job = %handle.id, label = %label, "Verification job expired while running");
        return;
    };
    match &outcome {
        Outcome::Complete(true) => info!(
            job = %handle.id,
            label = %label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Verification passed"
        ),
        Outcome::Complete(false) => warn!(
            job = %handle.id,
            label = %label,
            "Verification rejected module"
        ),
        Outcome::Error(e) => warn!(
            job = %handle.id,
            label = %label,
            error = %e,
            "Verification job failed"
        ),
    }
    deliver(executor, handler, outcome);
}

fn verify_segments(
    extractor: &SymbolExtractor,
    handle: &JobHandle,
    container: &std::path::Path,
    deadline: Option<Instant>,
    slot: &Mutex<Option<Box<dyn VerificationHandler>>>,
) -> Option<Outcome> {
    let check_live = || -> SandboxResult<()> {
        if handle.is_cancelled() {
            return Err(SandboxError::Cancelled(format!(
                "verification job {} cancelled",
                handle.id
            )));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SandboxError::Timeout(format!(
                "verification job {} exceeded its deadline",
                handle.id
            )));
        }
        Ok(())
    };

    if let Err(e) = check_live() {
        return Some(Outcome::Error(e));
    }
    let segments = match extractor.get_segments(container) {
        Ok(segments) => segments,
        Err(e) => return Some(Outcome::Error(e)),
    };

    for segment in &segments {
        if let Err(e) = check_live() {
            return Some(Outcome::Error(e));
        }
        let mut symbols = DexSymbols::new();
        if let Err(e) = extractor.load_symbols(segment, &mut symbols) {
            return Some(Outcome::Error(e));
        }
        let mut guard = slot.lock();
        let handler = guard.as_mut()?;
        if !handler.verify(segment, &symbols) {
            debug!(job = %handle.id, segment = %segment, "Segment rejected");
            return Some(Outcome::Complete(false));
        }
    }
    Some(Outcome::Complete(true))
}

fn deliver(executor: &dyn CallbackExecutor, handler: Box<dyn VerificationHandler>, outcome: Outcome) {
    executor.execute(Box::new(move || match outcome {
        Outcome::Complete(passed) => handler.on_complete(passed),
        Outcome::Error(e) => handler.on_error(e),
    }));
}
