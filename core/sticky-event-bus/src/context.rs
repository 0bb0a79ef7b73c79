//! Execution contexts that run handler callbacks
//!
//! The bus only ever calls [`ExecutionContext::submit`]: hand over a job and
//! forget about it. Nothing flows back. Contexts themselves promise no
//! ordering; each subscription reaches its context through a [`Lane`], which
//! runs that subscription's jobs one at a time in submission order.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use flume::{unbounded, Receiver, Sender};
use tracing::{trace, warn};

use crate::error::HandlerError;

/// Unit of work handed to a context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Destination a handler callback runs on
pub trait ExecutionContext: Send + Sync + 'static {
    /// Run `job` on this context (fire-and-forget)
    fn submit(&self, job: Job);

    /// Name used in logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Runs the job on the submitting thread before `submit` returns
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl ExecutionContext for Immediate {
    #[inline]
    fn submit(&self, job: Job) {
        job();
    }

    fn name(&self) -> &'static str {
        "immediate"
    }
}

/// Spawns one OS thread per submitted job
#[derive(Debug, Clone, Copy, Default)]
pub struct NewThread;

impl ExecutionContext for NewThread {
    fn submit(&self, job: Job) {
        if let Err(e) = thread::Builder::new()
            .name("sticky-bus-job".to_string())
            .spawn(job)
        {
            warn!("Failed to spawn delivery thread: {}", e);
        }
    }

    fn name(&self) -> &'static str {
        "new_thread"
    }
}

/// Single dedicated worker thread fed through an unbounded queue
///
/// Jobs run one at a time in submission order, which makes this the natural
/// stand-in for a UI or "main" thread. The worker exits once the context is
/// dropped and its queue drains.
pub struct Serial {
    name: &'static str,
    sender: Sender<Job>,
}

impl Serial {
    /// Start the worker thread
    pub fn new(name: &'static str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
            trace!("Serial context drained");
        })?;
        Ok(Self { name, sender })
    }

    /// Jobs waiting to run
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

impl ExecutionContext for Serial {
    fn submit(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(context = self.name, "Serial worker gone, dropping job");
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serial")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs jobs on a Tokio runtime
///
/// Computation jobs go through `spawn`, IO jobs through `spawn_blocking` so a
/// handler that blocks does not stall the async workers.
#[derive(Debug, Clone)]
pub struct TokioContext {
    handle: tokio::runtime::Handle,
    blocking: bool,
}

impl TokioContext {
    /// Context for short, CPU-bound handlers
    pub fn computation(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            blocking: false,
        }
    }

    /// Context for handlers that may block
    pub fn io(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            blocking: true,
        }
    }

    /// Computation context on the current runtime, if there is one
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(Self::computation)
    }
}

impl ExecutionContext for TokioContext {
    fn submit(&self, job: Job) {
        if self.blocking {
            drop(self.handle.spawn_blocking(job));
        } else {
            drop(self.handle.spawn(async move { job() }));
        }
    }

    fn name(&self) -> &'static str {
        if self.blocking {
            "tokio_io"
        } else {
            "tokio_computation"
        }
    }
}

/// Scheduler names a binding layer may declare on a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheduler {
    Default,
    Main,
    Io,
    NewThread,
    Computation,
    Trampoline,
}

impl Scheduler {
    /// Parse from string: "main", "io", "new_thread", ...
    ///
    /// Unknown names map to `Default`, which delivers on the publishing thread.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "main" => Scheduler::Main,
            "io" => Scheduler::Io,
            "new_thread" | "newthread" => Scheduler::NewThread,
            "computation" => Scheduler::Computation,
            "trampoline" => Scheduler::Trampoline,
            _ => Scheduler::Default,
        }
    }
}

/// Maps [`Scheduler`] names to concrete contexts
#[derive(Clone)]
pub struct ContextSet {
    main: Arc<dyn ExecutionContext>,
    io: Arc<dyn ExecutionContext>,
    computation: Arc<dyn ExecutionContext>,
    new_thread: Arc<dyn ExecutionContext>,
    immediate: Arc<dyn ExecutionContext>,
}

impl ContextSet {
    /// Everything runs on the publishing thread except `NewThread`
    pub fn new() -> Self {
        let immediate: Arc<dyn ExecutionContext> = Arc::new(Immediate);
        Self {
            main: Arc::clone(&immediate),
            io: Arc::clone(&immediate),
            computation: Arc::clone(&immediate),
            new_thread: Arc::new(NewThread),
            immediate,
        }
    }

    /// Route `Main` to the given context
    pub fn with_main(mut self, main: Arc<dyn ExecutionContext>) -> Self {
        self.main = main;
        self
    }

    /// Route `Io` and `Computation` to a Tokio runtime
    pub fn with_tokio(mut self, handle: tokio::runtime::Handle) -> Self {
        self.io = Arc::new(TokioContext::io(handle.clone()));
        self.computation = Arc::new(TokioContext::computation(handle));
        self
    }

    pub fn resolve(&self, scheduler: Scheduler) -> Arc<dyn ExecutionContext> {
        match scheduler {
            Scheduler::Main => Arc::clone(&self.main),
            Scheduler::Io => Arc::clone(&self.io),
            Scheduler::Computation => Arc::clone(&self.computation),
            Scheduler::NewThread => Arc::clone(&self.new_thread),
            Scheduler::Default | Scheduler::Trampoline => Arc::clone(&self.immediate),
        }
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSet")
            .field("main", &self.main.name())
            .field("io", &self.io.name())
            .field("computation", &self.computation.name())
            .field("new_thread", &self.new_thread.name())
            .finish()
    }
}

/// Ordered lane onto a shared context
///
/// Jobs submitted through one lane run one at a time in submission order,
/// whatever the underlying context does with them: the lane queues jobs and
/// keeps at most one drain job scheduled on the context. Different lanes on
/// the same context still run concurrently.
pub(crate) struct Lane {
    state: Arc<LaneState>,
}

struct LaneState {
    context: Arc<dyn ExecutionContext>,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    /// Jobs queued and not yet finished
    pending: AtomicUsize,
}

impl Lane {
    pub(crate) fn new(context: Arc<dyn ExecutionContext>) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        Self {
            state: Arc::new(LaneState {
                context,
                sender,
                receiver,
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn submit(&self, job: Job) {
        let state = &self.state;
        // The receiver is owned by the lane itself
        if state.sender.send(job).is_err() {
            return;
        }
        if state.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            let state = Arc::clone(state);
            self.state.context.submit(Box::new(move || state.drain()));
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.state.context.name()
    }

    /// Jobs queued or running
    pub(crate) fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }
}

impl LaneState {
    fn drain(&self) {
        loop {
            match self.receiver.try_recv() {
                Ok(job) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                        warn!(context = self.context.name(), "{}", HandlerError::from_panic(panic));
                    }
                }
                // Every counted job was sent first; a miss here is transient
                Err(_) => {
                    std::hint::spin_loop();
                    continue;
                }
            }
            if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }
}
