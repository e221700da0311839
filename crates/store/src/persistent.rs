//! Disk-backed wrapper around [`KeyValueStore`].
//!
//! The store lives on a worker task that owns it exclusively; the public
//! handle only sends messages. Requests are enqueued when the method is
//! called (not when the returned future is first polled), so calls are
//! applied in the order they were made.
//!
//! Mutations are persisted with a debounce: the first mutation after an idle
//! period arms a timer, and every mutation that arrives before it fires is
//! written out by the same disk write. Each mutation's future resolves with
//! the outcome of the write that persisted it.

use crate::error::{ErrorKind, Result, SharedError};
use crate::kv::{CacheEntry, KeyValueStore};
use crate::session::UserSession;
use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use trove_storage::{DiskCacheHandle, EncryptedDiskCache, KeychainHandle};

const GLOBAL_SCOPE: &str = "global";

/// Tuning for a [`PersistentStore`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Weight limit, `0` for unbounded.
    pub max_weight: u64,
    /// Delay between the first unsaved mutation and the disk write.
    pub debounce: Duration,
    /// Write to disk after every mutation instead of batching.
    pub batch_writes_disabled: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { max_weight: 0, debounce: Duration::from_millis(50), batch_writes_disabled: false }
    }
}

type Outcome<T> = std::result::Result<T, SharedError>;
type Reply<T> = oneshot::Sender<T>;
type Completion = Box<dyn FnOnce(Outcome<()>) + Send>;

enum Command {
    Store { key: String, data: Bytes, ttl_seconds: u64, weight: u64, reply: Reply<Outcome<()>> },
    Fetch { key: String, reply: Reply<Option<Bytes>> },
    FetchAll { reply: Reply<Vec<(String, CacheEntry)>> },
    Exists { key: String, reply: Reply<bool> },
    Remove { key: String, reply: Reply<Outcome<bool>> },
    RemoveAll { reply: Reply<Outcome<()>> },
    SetUserSession { session: Option<UserSession>, reply: Reply<Outcome<()>> },
    SetBatchWritesDisabled { disabled: bool, reply: Reply<Outcome<()>> },
    Flush { reply: Reply<Outcome<()>> },
}

/// Session-scoped, optionally encrypted, debounced persistent store.
///
/// The store file is `<scope>/<name>` in the root disk cache, where the
/// scope is `global` without a session and the user id otherwise. When a
/// keychain is supplied, the file is encrypted at rest.
///
/// Must be created inside a tokio runtime. Dropping the handle lets the
/// worker write any pending mutations and exit.
pub struct PersistentStore {
    sender: mpsc::UnboundedSender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl PersistentStore {
    pub fn new(
        name: impl AsRef<Path>,
        root: DiskCacheHandle,
        session: Option<UserSession>,
        keychain: Option<KeychainHandle>,
        options: StoreOptions,
    ) -> Result<Self> {
        let name = name.as_ref().to_path_buf();
        let disk = active_disk_cache(&root, session.as_ref(), keychain.as_ref())?;
        let worker = Worker {
            name,
            root,
            keychain,
            session,
            disk,
            store: KeyValueStore::new(options.max_weight),
            debounce: options.debounce,
            batch_writes_disabled: options.batch_writes_disabled,
            dirty: false,
            deadline: None,
            pending: Vec::new(),
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker.run(receiver));
        Ok(Self { sender, worker: Some(worker) })
    }

    fn send(&self, command: Command) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn store(
        &self,
        key: &str,
        data: Bytes,
        ttl_seconds: u64,
        weight: u64,
    ) -> impl Future<Output = Outcome<()>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::Store { key: key.to_string(), data, ttl_seconds, weight, reply });
        written(sent, response)
    }

    pub fn fetch(&self, key: &str) -> impl Future<Output = Outcome<Option<Bytes>>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::Fetch { key: key.to_string(), reply });
        answered(sent, response)
    }

    /// Live entries, oldest first.
    pub fn fetch_all(&self) -> impl Future<Output = Outcome<Vec<(String, CacheEntry)>>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::FetchAll { reply });
        answered(sent, response)
    }

    pub fn exists(&self, key: &str) -> impl Future<Output = Outcome<bool>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::Exists { key: key.to_string(), reply });
        answered(sent, response)
    }

    pub fn remove(&self, key: &str) -> impl Future<Output = Outcome<bool>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::Remove { key: key.to_string(), reply });
        written(sent, response)
    }

    pub fn remove_all(&self) -> impl Future<Output = Outcome<()>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::RemoveAll { reply });
        written(sent, response)
    }

    /// Switch to another user's scope. Pending writes go to the old scope
    /// first. Setting the session that is already active does nothing.
    pub fn set_user_session(&self, session: Option<UserSession>) -> impl Future<Output = Outcome<()>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::SetUserSession { session, reply });
        written(sent, response)
    }

    pub fn set_batch_writes_disabled(&self, disabled: bool) -> impl Future<Output = Outcome<()>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::SetBatchWritesDisabled { disabled, reply });
        written(sent, response)
    }

    /// Write pending mutations now instead of waiting for the debounce.
    pub fn flush(&self) -> impl Future<Output = Outcome<()>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(Command::Flush { reply });
        written(sent, response)
    }

    /// Write pending mutations and wait for the worker to exit.
    pub async fn close(mut self) -> Outcome<()> {
        let flushed = self.flush().await;
        let worker = self.worker.take();
        drop(self);
        if let Some(worker) = worker
            && let Err(err) = worker.await
        {
            tracing::error!(error = %err, "Store worker panicked");
        }
        flushed
    }
}

fn closed() -> SharedError {
    Arc::new(exn::Exn::from(ErrorKind::Closed))
}

async fn answered<T>(sent: bool, response: oneshot::Receiver<T>) -> Outcome<T> {
    if !sent {
        return Err(closed());
    }
    response.await.map_err(|_| closed())
}

async fn written<T>(sent: bool, response: oneshot::Receiver<Outcome<T>>) -> Outcome<T> {
    answered(sent, response).await?
}

fn active_disk_cache(
    root: &DiskCacheHandle,
    session: Option<&UserSession>,
    keychain: Option<&KeychainHandle>,
) -> Result<DiskCacheHandle> {
    let scope = match session {
        Some(session) if !session.is_valid_scope() => {
            exn::bail!(ErrorKind::InvalidSession(session.user_id().to_string()))
        },
        Some(session) => session.user_id(),
        None => GLOBAL_SCOPE,
    };
    let scoped = root.scoped(Path::new(scope), false).map_err(|e| e.raise(ErrorKind::Storage))?;
    Ok(match keychain {
        Some(keychain) => Arc::new(EncryptedDiskCache::new(scoped, Arc::clone(keychain))),
        None => scoped,
    })
}

struct Worker {
    name: PathBuf,
    root: DiskCacheHandle,
    keychain: Option<KeychainHandle>,
    session: Option<UserSession>,
    disk: DiskCacheHandle,
    store: KeyValueStore,
    debounce: Duration,
    batch_writes_disabled: bool,
    /// In-memory state differs from what was last written.
    dirty: bool,
    deadline: Option<Instant>,
    pending: Vec<Completion>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        self.populate().await;
        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    // Failures are logged and delivered to the pending mutations.
                    let _ = self.flush().await;
                },
            }
        }
        if self.dirty
            && let Err(err) = self.flush().await
        {
            tracing::warn!(name = %self.name.display(), error = ?err, "Unsaved store changes lost on shutdown");
        }
        tracing::debug!(name = %self.name.display(), "Store worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Store { key, data, ttl_seconds, weight, reply } => {
                self.store.store(key, data, ttl_seconds, weight);
                self.mutated(Box::new(move |outcome| {
                    let _ = reply.send(outcome);
                }))
                .await;
            },
            Command::Fetch { key, reply } => {
                let _ = reply.send(self.store.fetch(&key));
            },
            Command::FetchAll { reply } => {
                let _ = reply.send(self.store.fetch_all());
            },
            Command::Exists { key, reply } => {
                let _ = reply.send(self.store.exists(&key));
            },
            Command::Remove { key, reply } => {
                if !self.store.remove(&key) {
                    let _ = reply.send(Ok(false));
                    return;
                }
                self.mutated(Box::new(move |outcome| {
                    let _ = reply.send(outcome.map(|()| true));
                }))
                .await;
            },
            Command::RemoveAll { reply } => {
                self.store.remove_all();
                self.mutated(Box::new(move |outcome| {
                    let _ = reply.send(outcome);
                }))
                .await;
            },
            Command::SetUserSession { session, reply } => {
                let _ = reply.send(self.switch_session(session).await);
            },
            Command::SetBatchWritesDisabled { disabled, reply } => {
                self.batch_writes_disabled = disabled;
                let outcome = match disabled && self.dirty {
                    true => self.flush().await,
                    false => Ok(()),
                };
                let _ = reply.send(outcome);
            },
            Command::Flush { reply } => {
                let outcome = match self.dirty {
                    true => self.flush().await,
                    false => Ok(()),
                };
                let _ = reply.send(outcome);
            },
        }
    }

    async fn mutated(&mut self, completion: Completion) {
        self.dirty = true;
        self.pending.push(completion);
        if self.batch_writes_disabled {
            // The outcome reaches the caller through its completion.
            let _ = self.flush().await;
        } else if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Write the current state and complete every pending mutation with the
    /// outcome.
    async fn flush(&mut self) -> Outcome<()> {
        self.deadline = None;
        let outcome = self.write().await.map_err(Arc::new);
        match &outcome {
            Ok(()) => self.dirty = false,
            Err(err) => {
                tracing::error!(name = %self.name.display(), error = ?err, "Failed to persist store");
                // Still dirty, so try again after another debounce period.
                self.deadline = Some(Instant::now() + self.debounce);
            },
        }
        for completion in std::mem::take(&mut self.pending) {
            completion(outcome.clone());
        }
        outcome
    }

    async fn write(&mut self) -> Result<()> {
        let data = self.store.serialize()?;
        let bytes = data.len();
        self.disk.store(&self.name, Bytes::from(data)).await.map_err(|e| e.raise(ErrorKind::Storage))?;
        tracing::debug!(name = %self.name.display(), bytes, entries = self.store.len(), "Persisted store");
        Ok(())
    }

    async fn populate(&mut self) {
        let data = match self.disk.load(&self.name).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => {
                tracing::debug!(name = %self.name.display(), "No persisted store, starting cold");
                return;
            },
            Err(err) => {
                tracing::warn!(name = %self.name.display(), error = ?err, "Failed to load persisted store, starting cold");
                return;
            },
        };
        match self.store.populate(data) {
            Ok(()) => tracing::debug!(name = %self.name.display(), entries = self.store.len(), "Restored store"),
            Err(err) => tracing::warn!(name = %self.name.display(), error = ?err, "Discarding unreadable store"),
        }
    }

    async fn switch_session(&mut self, session: Option<UserSession>) -> Outcome<()> {
        if session == self.session {
            return Ok(());
        }
        let disk = active_disk_cache(&self.root, session.as_ref(), self.keychain.as_ref()).map_err(Arc::new)?;
        if self.dirty
            && let Err(err) = self.flush().await
        {
            // The old session's data stays in the old scope even if this fails.
            tracing::warn!(name = %self.name.display(), error = ?err, "Dropping unsaved changes of previous session");
        }
        tracing::info!(
            from = ?self.session.as_ref().map(UserSession::user_id),
            to = ?session.as_ref().map(UserSession::user_id),
            "Switching store session"
        );
        self.store.remove_all();
        self.dirty = false;
        self.deadline = None;
        self.session = session;
        self.disk = disk;
        self.populate().await;
        Ok(())
    }
}
