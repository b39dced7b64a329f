//! The transport-agnostic dev loop.
//!
//! [`DevLoop`] owns the [`Compiler`] and drives it through
//! `Idle → Building → Serving → Rebuilding → Serving`. File changes arrive
//! on a channel, are debounced, and trigger a rebuild on the blocking pool.
//! Changes that arrive while a rebuild runs supersede it; its result is
//! dropped and the next rebuild covers every path seen so far.
//!
//! After each rebuild the loop compares the new build with the last good
//! one and pushes the result to every client through the
//! [`NotificationHub`]. The HTTP side only ever reads [`DevSnapshot`]s.

mod hub;
mod message;
mod plan;

pub use hub::{NotificationHub, Subscription};
pub use message::{ErrorReport, HotMessage, ModuleUpdate};
pub use plan::{plan_update, UpdatePlan};

use crate::cancel::CancelToken;
use crate::compiler::{BuildResult, Compiler};
use crate::config::Config;
use crate::emit::BuildOutput;
use crate::error::{BuildError, Error};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Pending change batches before `notify` waits.
const CHANGE_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevState {
    Idle,
    Building,
    Serving,
    Rebuilding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevOptions {
    /// Quiet period that ends a burst of file events.
    pub debounce: Duration,
    /// Per-client notification queue length.
    pub client_queue: usize,
    /// Push updates to clients.
    pub hot: bool,
}

impl DevOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.dev_server.debounce_ms),
            client_queue: config.dev_server.client_queue,
            hot: config.dev_server.hot,
        }
    }
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            client_queue: 64,
            hot: true,
        }
    }
}

/// What the server currently serves.
#[derive(Debug, Clone, Default)]
pub struct DevSnapshot {
    /// Last good output; a partial one until the first good build.
    pub output: Option<Arc<BuildOutput>>,
    /// Errors of the last build, empty when it succeeded.
    pub errors: Vec<ErrorReport>,
    /// Builds finished so far, superseded ones excluded.
    pub builds: u64,
}

/// Cloneable access to a running [`DevLoop`].
#[derive(Debug, Clone)]
pub struct DevHandle {
    hub: Arc<NotificationHub>,
    state: watch::Receiver<DevState>,
    snapshot: watch::Receiver<DevSnapshot>,
    changes: mpsc::Sender<Vec<PathBuf>>,
    hot: bool,
}

impl DevHandle {
    /// Connect a client. A client joining while the build is broken gets
    /// the current errors right after `connected`.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let errors = self.snapshot.borrow().errors.clone();
        let greeting = (!errors.is_empty()).then_some(HotMessage::Errors { errors });
        self.hub.subscribe_with(greeting)
    }

    pub fn unsubscribe(&self, client: u64) {
        self.hub.unsubscribe(client);
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    #[must_use]
    pub fn hot(&self) -> bool {
        self.hot
    }

    #[must_use]
    pub fn state(&self) -> DevState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn snapshot(&self) -> DevSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn output(&self) -> Option<Arc<BuildOutput>> {
        self.snapshot.borrow().output.clone()
    }

    /// Report changed paths. Returns `false` once the loop has stopped.
    pub async fn notify(&self, paths: Vec<PathBuf>) -> bool {
        self.changes.send(paths).await.is_ok()
    }

    /// Sender for watchers running outside the runtime (`blocking_send`).
    #[must_use]
    pub fn changes(&self) -> mpsc::Sender<Vec<PathBuf>> {
        self.changes.clone()
    }

    /// Wait until at least `count` builds have finished.
    pub async fn wait_for_builds(&self, count: u64) -> Option<DevSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(|s| s.builds >= count).await.ok()?;
        Some(snapshot.clone())
    }

    /// Wait until the loop reaches `state`. `false` if it stopped first.
    pub async fn wait_for_state(&self, state: DevState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| *s == state).await.is_ok();
        reached
    }
}

#[derive(Debug)]
pub struct DevLoop {
    compiler: Arc<Mutex<Compiler>>,
    options: DevOptions,
    cancel: CancelToken,
    hub: Arc<NotificationHub>,
    changes: mpsc::Receiver<Vec<PathBuf>>,
    state: watch::Sender<DevState>,
    snapshot: watch::Sender<DevSnapshot>,
    last_good: Option<BuildResult>,
    /// Errors of the last failed build, until a good one replaces them.
    last_bad: Option<Vec<ErrorReport>>,
    builds: u64,
}

impl DevLoop {
    #[must_use]
    pub fn new(compiler: Compiler, options: DevOptions) -> (Self, DevHandle) {
        let hub = Arc::new(NotificationHub::new(options.client_queue));
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_QUEUE);
        let (state_tx, state_rx) = watch::channel(DevState::Idle);
        let (snapshot_tx, snapshot_rx) = watch::channel(DevSnapshot::default());

        let handle = DevHandle {
            hub: Arc::clone(&hub),
            state: state_rx,
            snapshot: snapshot_rx,
            changes: changes_tx,
            hot: options.hot,
        };
        let dev = Self {
            compiler: Arc::new(Mutex::new(compiler)),
            options,
            cancel: CancelToken::new(),
            hub,
            changes: changes_rx,
            state: state_tx,
            snapshot: snapshot_tx,
            last_good: None,
            last_bad: None,
            builds: 0,
        };
        (dev, handle)
    }

    /// Build once, then rebuild on every change until every handle (and
    /// every watcher sender) is dropped. Build failures go to clients.
    pub async fn run(mut self) {
        self.set_state(DevState::Building);
        let compiler = Arc::clone(&self.compiler);
        let initial = tokio::task::spawn_blocking(move || compiler.lock().unwrap().build())
            .await
            .unwrap_or_else(|e| Err(Error::other(format!("build task failed: {e}"))));
        self.finish(initial);
        self.set_state(DevState::Serving);

        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        let mut closed = false;
        loop {
            if pending.is_empty() {
                if closed {
                    break;
                }
                match self.changes.recv().await {
                    Some(paths) => pending.extend(paths),
                    None => break,
                }
            }
            if !closed {
                closed = self.debounce(&mut pending).await;
            }

            self.set_state(DevState::Rebuilding);
            let changed: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
            let generation = self.cancel.supersede();
            debug!(changed = changed.len(), generation, "rebuilding");

            let compiler = Arc::clone(&self.compiler);
            let cancel = self.cancel.clone();
            let paths = changed.clone();
            let task = tokio::task::spawn_blocking(move || {
                compiler.lock().unwrap().rebuild(&paths, &cancel, generation)
            });
            tokio::pin!(task);

            let joined = loop {
                tokio::select! {
                    joined = &mut task => break joined,
                    event = self.changes.recv(), if !closed => match event {
                        Some(paths) => {
                            self.cancel.supersede();
                            pending.extend(paths);
                        }
                        None => closed = true,
                    },
                }
            };
            let result =
                joined.unwrap_or_else(|e| Err(Error::other(format!("rebuild task failed: {e}"))));

            match result {
                Err(Error::Build(BuildError::Cancelled)) => {
                    debug!(generation, "rebuild superseded");
                    pending.extend(changed);
                }
                _ if self.cancel.is_stale(generation) => {
                    debug!(generation, "discarding stale rebuild");
                    pending.extend(changed);
                }
                result => self.finish(result),
            }
            if pending.is_empty() {
                self.set_state(DevState::Serving);
            }
        }

        self.set_state(DevState::Idle);
        info!("dev loop stopped");
    }

    /// Collect events until the channel stays quiet for the debounce
    /// window. Returns `true` if the channel closed.
    async fn debounce(&mut self, pending: &mut BTreeSet<PathBuf>) -> bool {
        loop {
            match tokio::time::timeout(self.options.debounce, self.changes.recv()).await {
                Ok(Some(paths)) => pending.extend(paths),
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    fn finish(&mut self, result: Result<BuildResult, Error>) {
        self.builds += 1;
        match result {
            Ok(result) if result.is_ok() => {
                let recovered = self.last_bad.take().is_some();
                let message = match &self.last_good {
                    Some(previous) => {
                        let options = self.compiler.lock().unwrap().emit_options().clone();
                        match plan_update(previous, &result, &options) {
                            UpdatePlan::Nothing => recovered.then_some(HotMessage::Ok),
                            UpdatePlan::Update(updates) => Some(HotMessage::Update { updates }),
                            UpdatePlan::FullReload(reason) => Some(HotMessage::FullReload { reason }),
                        }
                    }
                    None => recovered.then(|| HotMessage::full_reload("build recovered")),
                };
                self.publish(Some(Arc::clone(&result.output)), Vec::new());
                self.last_good = Some(result);
                if let Some(message) = message {
                    self.send(&message);
                }
            }
            Ok(result) => {
                let reports: Vec<ErrorReport> = result.errors.iter().map(ErrorReport::from).collect();
                let output = match &self.last_good {
                    Some(good) => Some(Arc::clone(&good.output)),
                    None => Some(Arc::clone(&result.output)),
                };
                self.fail(output, reports);
            }
            Err(err) => {
                error!(code = err.code(), "{err}");
                let output = self.last_good.as_ref().map(|good| Arc::clone(&good.output));
                self.fail(output, vec![ErrorReport::from(&err)]);
            }
        }
    }

    fn fail(&mut self, output: Option<Arc<BuildOutput>>, reports: Vec<ErrorReport>) {
        self.publish(output, reports.clone());
        self.last_bad = Some(reports.clone());
        self.send(&HotMessage::Errors { errors: reports });
    }

    fn publish(&self, output: Option<Arc<BuildOutput>>, errors: Vec<ErrorReport>) {
        let builds = self.builds;
        self.snapshot.send_replace(DevSnapshot {
            output,
            errors,
            builds,
        });
    }

    fn send(&self, message: &HotMessage) {
        if self.options.hot {
            self.hub.broadcast(message);
        }
    }

    fn set_state(&self, state: DevState) {
        if *self.state.borrow() != state {
            debug!(?state, "dev state");
            self.state.send_replace(state);
        }
    }
}
