//! Write-through persistence middleware.
//!
//! A middleware is a spawned worker task that subscribes to one store's
//! change channel and writes qualifying mutations to the server. What
//! counts as qualifying, and how a batch is written, is supplied by a
//! [`SyncTarget`]; the worker itself owns scheduling:
//!
//! - changes are folded into the target's pending state as they arrive;
//! - the [`Debouncer`] decides when the pending state is written, so a
//!   burst of mutations produces one write with the final state;
//! - at most one write is in flight, on its own task, and a write keeps
//!   running when the middleware is disabled or reconfigured;
//! - every batch is tagged with its project; a write checks the
//!   [`Fence`] before each request and a report for a project that is no
//!   longer configured is dropped.
//!
//! Callers talk to the worker through a [`Middleware`] handle.

pub mod canvas;
pub mod chat;

use std::future::Future;
use std::time::Duration;

use adcanvas_core::EntityId;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::debounce::{Debouncer, Phase};
use crate::error::PersistenceError;
use crate::events::{Resource, SyncEvent};

pub use canvas::CanvasTarget;
pub use chat::ChatTarget;

/// Default debounce window for chat writes.
pub const CHAT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default debounce window for canvas writes.
pub const CANVAS_DEBOUNCE: Duration = Duration::from_millis(100);

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// How long [`Middleware::shutdown`] waits for the worker to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fence
// ---------------------------------------------------------------------------

/// Read side of the active-project channel.
///
/// Writes check the fence before every request and skip requests for a
/// project that is no longer active.
#[derive(Debug, Clone)]
pub struct Fence {
    active: watch::Receiver<Option<EntityId>>,
}

impl Fence {
    pub fn new(active: watch::Receiver<Option<EntityId>>) -> Self {
        Self { active }
    }

    pub fn is_active(&self, project_id: EntityId) -> bool {
        *self.active.borrow() == Some(project_id)
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Result of applying a write report.
#[derive(Debug, Default)]
pub struct Applied {
    pub events: Vec<SyncEvent>,
    /// The report left new pending work that should be written.
    pub reschedule: bool,
}

/// The resource-specific half of a middleware.
pub trait SyncTarget: Send + 'static {
    type Change: Clone + Send + 'static;
    type Batch: Send + 'static;
    type Report: Send + 'static;

    const RESOURCE: Resource;

    /// Fold a store change into pending state. Returns `true` when the
    /// change should (re)start the debounce window. With `enabled` false
    /// the target updates what it knows about the server but queues
    /// nothing.
    fn record(&mut self, change: &Self::Change, enabled: bool) -> bool;

    /// The change channel lagged and changes were lost. Rebuild pending
    /// state from the store; returns `true` if anything is pending.
    fn resync(&mut self) -> impl Future<Output = bool> + Send;

    fn has_pending(&self) -> bool;

    /// Move pending state into a batch for `project_id`. `None` when
    /// there is nothing to write.
    fn take_batch(&mut self, project_id: EntityId) -> impl Future<Output = Option<Self::Batch>> + Send;

    /// Perform the writes of `batch`. The returned future runs on its own
    /// task and must not depend on the target.
    fn write(&self, project_id: EntityId, batch: Self::Batch, fence: Fence) -> BoxFuture<'static, Self::Report>;

    /// Fold the outcome of a write into the target's state.
    fn apply(&mut self, project_id: EntityId, report: Self::Report) -> impl Future<Output = Applied> + Send;

    /// Forget all pending and server-side knowledge (project switch).
    fn reset(&mut self);

    /// Entities whose last write failed.
    fn unsaved(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Configuration of one middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareConfig {
    pub project_id: Option<EntityId>,
    pub debounce: Duration,
    pub enabled: bool,
}

impl MiddlewareConfig {
    pub fn chat(project_id: Option<EntityId>) -> Self {
        Self {
            project_id,
            debounce: CHAT_DEBOUNCE,
            enabled: false,
        }
    }

    pub fn canvas(project_id: Option<EntityId>) -> Self {
        Self {
            project_id,
            debounce: CANVAS_DEBOUNCE,
            enabled: false,
        }
    }
}

/// Snapshot of a worker's state.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareStatus {
    pub config: MiddlewareConfig,
    pub phase: Phase,
    pub writing: bool,
    pub unsaved: usize,
}

enum Command {
    Enable(oneshot::Sender<()>),
    Disable(oneshot::Sender<()>),
    Reconfigure(MiddlewareConfig, oneshot::Sender<()>),
    Flush(oneshot::Sender<()>),
    Status(oneshot::Sender<MiddlewareStatus>),
}

/// Handle to a running middleware worker.
pub struct Middleware {
    resource: Resource,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Middleware {
    /// Spawn a worker for `target` listening on `changes`.
    ///
    /// The worker stops when `cancel` is cancelled, when
    /// [`shutdown`](Self::shutdown) is called, or when the store is
    /// dropped.
    pub fn spawn<T: SyncTarget>(
        target: T,
        changes: broadcast::Receiver<T::Change>,
        config: MiddlewareConfig,
        fence: Fence,
        events: broadcast::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker = Worker {
            target,
            debouncer: Debouncer::new(config.debounce),
            config,
            fence,
            events,
            in_flight: None,
            flush_waiters: Vec::new(),
        };
        let task = tokio::spawn(worker.run(changes, commands_rx, cancel.clone()));
        Self {
            resource: T::RESOURCE,
            commands: commands_tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Start writing through. Pending changes recorded while enabled
    /// earlier are scheduled.
    pub async fn enable(&self) -> Result<(), PersistenceError> {
        self.request(Command::Enable).await
    }

    /// Stop scheduling writes. A write already in flight completes.
    pub async fn disable(&self) -> Result<(), PersistenceError> {
        self.request(Command::Disable).await
    }

    /// Replace the configuration. A new project id resets the debounce
    /// timer and everything the target knew about the old project.
    pub async fn reconfigure(&self, config: MiddlewareConfig) -> Result<(), PersistenceError> {
        self.request(|ack| Command::Reconfigure(config, ack)).await
    }

    /// Write pending changes now and wait until nothing is pending or in
    /// flight.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.request(Command::Flush).await
    }

    pub async fn status(&self) -> Result<MiddlewareStatus, PersistenceError> {
        self.request(Command::Status).await
    }

    /// Stop the worker. A write in flight is detached, not aborted.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!(resource = ?self.resource, "Middleware worker did not stop in time");
            }
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, PersistenceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| PersistenceError::WorkerGone)?;
        rx.await.map_err(|_| PersistenceError::WorkerGone)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct InFlight<R> {
    project_id: EntityId,
    handle: JoinHandle<R>,
}

struct Worker<T: SyncTarget> {
    target: T,
    config: MiddlewareConfig,
    debouncer: Debouncer,
    fence: Fence,
    events: broadcast::Sender<SyncEvent>,
    in_flight: Option<InFlight<T::Report>>,
    flush_waiters: Vec<oneshot::Sender<()>>,
}

/// Resolves when the in-flight write finishes; never resolves if there
/// is none.
async fn join_in_flight<R>(in_flight: &mut Option<InFlight<R>>) -> (EntityId, Result<R, JoinError>) {
    match in_flight {
        Some(write) => (write.project_id, (&mut write.handle).await),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T: SyncTarget> Worker<T> {
    async fn run(
        mut self,
        mut changes: broadcast::Receiver<T::Change>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        tracing::debug!(resource = ?T::RESOURCE, "Middleware worker started");

        loop {
            let deadline = if self.in_flight.is_none() {
                self.debouncer.deadline()
            } else {
                None
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                change = changes.recv() => match change {
                    Ok(change) => self.on_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => self.on_lagged(skipped).await,
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },

                (project_id, report) = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_write_done(project_id, report).await;
                }

                () = sleep_until(deadline) => self.start_write().await,
            }
        }

        tracing::debug!(resource = ?T::RESOURCE, "Middleware worker stopped");
    }

    fn is_active(&self) -> bool {
        self.config.enabled && self.config.project_id.is_some()
    }

    fn on_change(&mut self, change: &T::Change) {
        let active = self.is_active();
        if self.target.record(change, active) && active {
            self.debouncer.on_mutation(Instant::now());
        }
    }

    async fn on_lagged(&mut self, skipped: u64) {
        tracing::warn!(
            resource = ?T::RESOURCE,
            skipped,
            "Store change channel lagged, resynchronising from store",
        );
        if self.target.resync().await && self.is_active() {
            self.debouncer.on_mutation(Instant::now());
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enable(ack) => {
                self.set_enabled(true);
                let _ = ack.send(());
            }
            Command::Disable(ack) => {
                self.set_enabled(false);
                let _ = ack.send(());
            }
            Command::Reconfigure(config, ack) => {
                if config.project_id != self.config.project_id {
                    tracing::info!(
                        resource = ?T::RESOURCE,
                        from = ?self.config.project_id,
                        to = ?config.project_id,
                        "Middleware switching project",
                    );
                    self.target.reset();
                    self.debouncer.cancel_pending();
                }
                self.debouncer.set_window(config.debounce);
                let enabled = config.enabled;
                self.config = config;
                self.set_enabled(enabled);
                let _ = ack.send(());
            }
            Command::Flush(ack) => {
                if self.is_active() && (self.target.has_pending() || self.debouncer.deadline().is_some()) {
                    self.debouncer.expedite(Instant::now());
                }
                self.flush_waiters.push(ack);
                self.notify_if_settled();
            }
            Command::Status(ack) => {
                let _ = ack.send(MiddlewareStatus {
                    config: self.config.clone(),
                    phase: self.debouncer.phase(),
                    writing: self.in_flight.is_some(),
                    unsaved: self.target.unsaved(),
                });
            }
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        if !self.is_active() {
            self.debouncer.cancel_pending();
            self.notify_if_settled();
        } else if self.target.has_pending() && self.debouncer.deadline().is_none() {
            self.debouncer.on_mutation(Instant::now());
        }
    }

    async fn start_write(&mut self) {
        let Some(project_id) = self.config.project_id.filter(|_| self.config.enabled) else {
            self.debouncer.cancel_pending();
            self.notify_if_settled();
            return;
        };

        match self.target.take_batch(project_id).await {
            Some(batch) => {
                self.debouncer.begin_write();
                let write = self.target.write(project_id, batch, self.fence.clone());
                self.in_flight = Some(InFlight {
                    project_id,
                    handle: tokio::spawn(write),
                });
            }
            None => {
                self.debouncer.cancel_pending();
                self.notify_if_settled();
            }
        }
    }

    async fn on_write_done(&mut self, project_id: EntityId, report: Result<T::Report, JoinError>) {
        self.debouncer.complete_write();

        match report {
            Ok(report) if self.config.project_id == Some(project_id) => {
                let applied = self.target.apply(project_id, report).await;
                for event in applied.events {
                    let _ = self.events.send(event);
                }
                if applied.reschedule && self.is_active() && self.debouncer.deadline().is_none() {
                    self.debouncer.on_mutation(Instant::now());
                }
            }
            Ok(_) => {
                tracing::info!(
                    resource = ?T::RESOURCE,
                    project_id = %project_id,
                    "Dropping result of write for inactive project",
                );
                let _ = self.events.send(SyncEvent::StaleWriteDropped {
                    project_id,
                    resource: T::RESOURCE,
                });
            }
            Err(e) => {
                tracing::error!(resource = ?T::RESOURCE, error = %e, "Write task failed");
            }
        }

        if !self.flush_waiters.is_empty() && self.debouncer.deadline().is_some() {
            self.debouncer.expedite(Instant::now());
        }
        self.notify_if_settled();
    }

    /// Release flush waiters once nothing is scheduled or in flight.
    fn notify_if_settled(&mut self) {
        if self.in_flight.is_some() || self.debouncer.deadline().is_some() {
            return;
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}
