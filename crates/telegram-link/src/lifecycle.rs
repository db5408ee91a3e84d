//! Supervises the long-poll loop on its own OS thread.
//!
//! The host calls [`BotConnection::start`] and [`BotConnection::stop`]
//! synchronously; both block for at most the timeout they are given. The poll
//! loop runs on a dedicated thread with a single-threaded runtime, so a stalled
//! network call can never occupy the host's own control thread.

use core::time::Duration;
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use bridge_core::InboundHandler;
use thiserror::Error;
use tokio::runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{TransportError, Update};

const RETRY_DELAY: Duration = Duration::from_secs(3);
const THREAD_NAME: &str = "telegram-poll";

/// Network half the lifecycle drives. [`crate::TelegramApi`] is the real one.
#[async_trait]
pub trait PollingClient: Send + Sync {
    /// Confirms the credential and endpoint; returns the bot's username.
    async fn connect(&self) -> Result<String, TransportError>;

    /// Fetches updates from `offset` on, acknowledging everything before it.
    async fn poll(&self, offset: i64) -> Result<Vec<Update>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("polling task is already active ({0:?})")]
    AlreadyActive(ConnectionState),
    #[error("no connection within {0:?}")]
    StartupTimeout(Duration),
    #[error("connection failed: {0}")]
    StartupFailed(String),
    #[error("building the polling runtime")]
    Runtime(#[source] std::io::Error),
    #[error("spawning the polling thread")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The task exited within the bound.
    Stopped,
    /// The task did not exit in time and was left to finish on its own.
    Abandoned,
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    exited: bool,
    failure: Option<String>,
}

#[derive(Debug)]
struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn new(state: ConnectionState) -> Self {
        Self {
            status: Mutex::new(Status {
                state,
                exited: state != ConnectionState::Starting,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Status)) {
        let mut guard = self.lock();
        f(&mut *guard);
        drop(guard);
        self.changed.notify_all();
    }

    /// Blocks while `pending` holds, up to `timeout`.
    fn wait_while(
        &self,
        timeout: Duration,
        pending: impl FnMut(&mut Status) -> bool,
    ) -> MutexGuard<'_, Status> {
        let (guard, _) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, pending)
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }
}

/// Owns at most one polling task at a time.
pub struct BotConnection {
    client: Arc<dyn PollingClient>,
    handler: Arc<dyn InboundHandler>,
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
    thread: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for BotConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BotConnection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BotConnection {
    #[must_use]
    pub fn new(client: Arc<dyn PollingClient>, handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            client,
            handler,
            shared: Arc::new(Shared::new(ConnectionState::Created)),
            cancel: None,
            thread: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Spawns the polling task. With `wait_for_connection`, blocks until the
    /// transport confirms the connection, the connection fails, or `timeout`
    /// elapses; a timed-out task is cancelled before returning.
    ///
    /// # Errors
    ///
    /// See [`LifecycleError`]. After a startup failure the state is `Error`.
    pub fn start(
        &mut self,
        wait_for_connection: bool,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let state = self.state();
        if matches!(
            state,
            ConnectionState::Starting | ConnectionState::Running | ConnectionState::Stopping
        ) {
            return Err(LifecycleError::AlreadyActive(state));
        }

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(LifecycleError::Runtime)?;

        // Fresh status per task: a task abandoned by an earlier stop() keeps
        // reporting into its own copy.
        self.shared = Arc::new(Shared::new(ConnectionState::Starting));

        let cancel = CancellationToken::new();
        let task = poll_task(
            Arc::clone(&self.client),
            Arc::clone(&self.handler),
            Arc::clone(&self.shared),
            cancel.clone(),
        );
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || {
                rt.block_on(task);
                shared.update(|s| {
                    s.exited = true;
                    if matches!(s.state, ConnectionState::Starting | ConnectionState::Running) {
                        s.state = ConnectionState::Error;
                    }
                });
                debug!("Polling thread exited");
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.update(|s| {
                    s.state = ConnectionState::Error;
                    s.exited = true;
                });
                return Err(LifecycleError::Spawn(e));
            }
        };
        self.thread = Some(handle);
        self.cancel = Some(cancel);

        if !wait_for_connection {
            return Ok(());
        }

        let status = self
            .shared
            .wait_while(timeout, |s| s.state == ConnectionState::Starting);
        let (state, failure) = (status.state, status.failure.clone());
        drop(status);
        match state {
            ConnectionState::Running => Ok(()),
            ConnectionState::Starting => {
                warn!(?timeout, "Connection not confirmed in time; cancelling");
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                self.shared.update(|s| s.state = ConnectionState::Error);
                Err(LifecycleError::StartupTimeout(timeout))
            }
            ConnectionState::Error
            | ConnectionState::Created
            | ConnectionState::Stopping
            | ConnectionState::Stopped => Err(LifecycleError::StartupFailed(
                failure.unwrap_or_else(|| "polling task exited".to_owned()),
            )),
        }
    }

    /// Cancels the polling task and waits up to `timeout` for it to exit.
    /// Returns within the bound even if the task never observes the signal.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let state = self.state();
        if !matches!(state, ConnectionState::Starting | ConnectionState::Running) {
            return StopOutcome::NotRunning;
        }
        self.shared.update(|s| s.state = ConnectionState::Stopping);
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        let exited = self.shared.wait_while(timeout, |s| !s.exited).exited;
        let outcome = if exited {
            if let Some(handle) = self.thread.take()
                && handle.join().is_err()
            {
                error!("Polling thread panicked");
            }
            StopOutcome::Stopped
        } else {
            warn!(?timeout, "Polling task did not stop in time; abandoning it");
            self.thread = None;
            StopOutcome::Abandoned
        };
        self.shared.update(|s| s.state = ConnectionState::Stopped);
        info!(?outcome, "Bot connection stopped");
        outcome
    }
}

impl Drop for BotConnection {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

async fn poll_task(
    client: Arc<dyn PollingClient>,
    handler: Arc<dyn InboundHandler>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let username = loop {
        let attempt = tokio::select! {
            () = cancel.cancelled() => return,
            res = client.connect() => res,
        };
        match attempt {
            Ok(username) => break username,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Bot API rejected the connection");
                shared.update(|s| {
                    s.state = ConnectionState::Error;
                    s.failure = Some(e.to_string());
                });
                return;
            }
            Err(e) => warn!(error = %e, "Connection attempt failed; retrying"),
        }
        if !backoff(&cancel).await {
            return;
        }
    };

    shared.update(|s| {
        if s.state == ConnectionState::Starting {
            s.state = ConnectionState::Running;
        }
    });
    info!(username = %username, "Connected to the Bot API");
    handler.on_connected(&username).await;

    let mut offset = 0_i64;
    loop {
        let batch = tokio::select! {
            () = cancel.cancelled() => break,
            res = client.poll(offset) => res,
        };
        match batch {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(event) = update.into_event() {
                        handler.on_event(event).await;
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Bot API revoked the connection; polling stops");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Polling failed; retrying");
                if !backoff(&cancel).await {
                    break;
                }
            }
        }
    }
    debug!("Poll loop finished");
}

/// Sleeps before a retry. Returns `false` when cancelled meanwhile.
async fn backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(RETRY_DELAY) => true,
    }
}
