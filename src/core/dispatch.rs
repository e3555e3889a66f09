/*!
 * Callback Dispatch Contexts
 *
 * Terminal callbacks (verification verdicts, load results) are never run on
 * the thread that produced them. Callers choose where they run by handing a
 * `CallbackExecutor` to the component that emits them.
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use super::errors::{SandboxError, SandboxResult};

/// Unit of work posted to a dispatch context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A place to run callbacks
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Message-loop thread that runs posted tasks in FIFO order
pub struct HandlerThread {
    name: String,
    sender: Mutex<Option<flume::Sender<Task>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl HandlerThread {
    /// Start a named handler thread
    pub fn spawn(name: impl Into<String>) -> SandboxResult<Arc<Self>> {
        let name = name.into();
        let (sender, receiver) = flume::unbounded::<Task>();

        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .map_err(|e| SandboxError::Internal(format!("failed to start {}: {}", name, e)))?;

        debug!(thread = %name, "Handler thread started");
        Ok(Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            join: Mutex::new(Some(join)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting tasks, drain what is queued and join the thread
    pub fn quit(&self) {
        self.sender.lock().take();
        if let Some(join) = self.join.lock().take() {
            if join.thread().id() != std::thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

impl CallbackExecutor for HandlerThread {
    fn execute(&self, task: Task) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                if let Err(flume::SendError(task)) = sender.send(task) {
                    warn!(thread = %self.name, "Handler thread gone, running callback inline");
                    task();
                }
            }
            None => {
                warn!(thread = %self.name, "Handler thread quit, running callback inline");
                task();
            }
        }
    }
}

impl Drop for HandlerThread {
    fn drop(&mut self) {
        self.quit();
    }
}

/// Runs callbacks on a Tokio runtime's blocking pool
#[derive(Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling task
    pub fn current() -> SandboxResult<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| SandboxError::Internal(format!("no tokio runtime: {}", e)))
    }
}

impl CallbackExecutor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}
