use crate::error::{Error, ErrorKind, Result, SharedError};
use crate::handler::{AnyValue, Erased, ErasedHandler, ItemHandler};
use crate::http::{HttpClientHandle, HttpRequest};
use crate::memory::ItemCache;
use crate::record::Record;
use crate::sha256_hex;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use derive_more::Display;
use exn::ResultExt;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use trove_storage::DiskCacheHandle;

/// How long a loaded item stays strongly cached after its last access.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(30);

const FILE_SCHEME: &str = "file://";
const DATA_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Disk cache path the downloaded item is stored under.
    pub local_filename: String,
    pub url: String,
    /// Lowercase or uppercase hex SHA-256 of the downloaded body.
    pub expected_hash: Option<String>,
}

impl DownloadRequest {
    pub fn new(local_filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            local_filename: local_filename.into(),
            url: url.into(),
            expected_hash: None,
        }
    }

    /// An empty hash means "don't check".
    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        self.expected_hash = (!hash.is_empty()).then_some(hash);
        self
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    #[display("memory")]
    Memory,
    #[display("disk cache")]
    DiskCache,
    #[display("network")]
    Network,
}

/// A loaded item and where it came from.
pub struct Loaded<T> {
    pub value: Arc<T>,
    pub source: LoadSource,
}

impl<T> Clone for Loaded<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            source: self.source,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Loaded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loaded")
            .field("value", &self.value)
            .field("source", &self.source)
            .finish()
    }
}

type Delivery = std::result::Result<(AnyValue, LoadSource), SharedError>;

struct Resolved {
    value: AnyValue,
    source: LoadSource,
    digest: Option<String>,
}

struct State {
    /// Requesters waiting on the in-flight download of each URL.
    tasks: HashMap<String, Vec<oneshot::Sender<Delivery>>>,
    items: ItemCache,
}

struct Inner {
    disk: DiskCacheHandle,
    http: HttpClientHandle,
    state: Mutex<State>,
    disk_writes: Mutex<JoinSet<()>>,
}

/// Deduplicating downloader.
///
/// At most one download runs per URL; every concurrent request for that URL
/// receives the same outcome. Downloads run on their own task, so dropping a
/// requester's future never cancels the download for the others.
#[derive(Clone)]
pub struct RemoteDownloader {
    inner: Arc<Inner>,
}

impl RemoteDownloader {
    pub fn new(disk: DiskCacheHandle, http: HttpClientHandle) -> Self {
        Self::with_memory_ttl(disk, http, DEFAULT_MEMORY_TTL)
    }

    pub fn with_memory_ttl(disk: DiskCacheHandle, http: HttpClientHandle, memory_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                disk,
                http,
                state: Mutex::new(State {
                    tasks: HashMap::new(),
                    items: ItemCache::new(memory_ttl),
                }),
                disk_writes: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn disk_cache(&self) -> &DiskCacheHandle {
        &self.inner.disk
    }

    /// Load `request.url`, from memory, the disk cache or the network.
    #[tracing::instrument(level = "debug", skip_all, fields(url = %request.url, handler = handler.description()))]
    pub async fn enqueue<H: ItemHandler>(
        &self,
        request: DownloadRequest,
        handler: Arc<H>,
    ) -> std::result::Result<Loaded<H::Output>, SharedError> {
        let url = request.url.clone();
        let receiver = {
            let mut state = self.inner.lock_state();
            let now = Instant::now();
            state.items.sweep(now);
            if let Some(value) = state.items.get(&url, request.expected_hash.as_deref(), now) {
                drop(state);
                tracing::debug!("Serving item from memory");
                return downcast(&url, value, LoadSource::Memory);
            }
            let (sender, receiver) = oneshot::channel();
            match state.tasks.entry(url.clone()) {
                Entry::Occupied(mut waiters) => {
                    tracing::debug!("Joining in-flight download");
                    waiters.get_mut().push(sender);
                },
                Entry::Vacant(slot) => {
                    slot.insert(vec![sender]);
                    let inner = Arc::clone(&self.inner);
                    let handler: Arc<dyn ErasedHandler> = Arc::new(Erased(handler));
                    tokio::spawn(inner.run(request, handler));
                },
            }
            receiver
        };
        let (value, source) = receiver
            .await
            .map_err(|_| Arc::new(Error::from(ErrorKind::Cancelled(url.clone()))))??;
        downcast(&url, value, source)
    }

    /// Forget the in-memory item for `url`. Returns whether one was cached.
    pub fn remove_item(&self, url: &str) -> bool {
        self.inner.lock_state().items.remove(url)
    }

    /// Number of URLs with a download in flight.
    pub fn pending_downloads(&self) -> usize {
        self.inner.lock_state().tasks.len()
    }

    /// Wait until every disk cache write started so far has finished.
    pub async fn wait_for_disk_writes(&self) {
        let mut writes = std::mem::take(&mut *self.inner.disk_writes.lock().unwrap_or_else(PoisonError::into_inner));
        while writes.join_next().await.is_some() {}
    }
}

impl fmt::Debug for RemoteDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDownloader").finish_non_exhaustive()
    }
}

fn downcast<T: Send + Sync + 'static>(
    url: &str,
    value: AnyValue,
    source: LoadSource,
) -> std::result::Result<Loaded<T>, SharedError> {
    match value.downcast::<T>() {
        Ok(value) => Ok(Loaded { value, source }),
        Err(_) => Err(Arc::new(ErrorKind::TypeMismatch(url.to_string()).into())),
    }
}

fn verify(expected_hash: Option<&str>, data: &[u8]) -> Result<String> {
    let actual = sha256_hex(data);
    if let Some(expected) = expected_hash
        && !expected.eq_ignore_ascii_case(&actual)
    {
        exn::bail!(ErrorKind::Integrity {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}

fn decode_data_url(url: &str) -> Result<Bytes> {
    let Some((_, payload)) = url.split_once(BASE64_MARKER) else {
        exn::bail!(ErrorKind::InvalidUrl("data URL is not base64 encoded".to_string()));
    };
    let decoded = BASE64
        .decode(payload)
        .or_raise(|| ErrorKind::InvalidUrl("invalid base64 in data URL".to_string()))?;
    Ok(Bytes::from(decoded))
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, request: DownloadRequest, handler: Arc<dyn ErasedHandler>) {
        let started = Instant::now();
        let outcome = self.resolve(&request, handler.as_ref()).await;
        let waiters = {
            let mut state = self.lock_state();
            if let Ok(resolved) = &outcome {
                state
                    .items
                    .insert(&request.url, Arc::clone(&resolved.value), resolved.digest.clone(), Instant::now());
            }
            state.tasks.remove(&request.url).unwrap_or_default()
        };
        let delivery = match outcome {
            Ok(resolved) => {
                tracing::debug!(
                    url = %request.url,
                    source = %resolved.source,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    requesters = waiters.len(),
                    "Loaded {}",
                    handler.description(),
                );
                Ok((resolved.value, resolved.source))
            },
            Err(err) => {
                tracing::error!(url = %request.url, error = ?err, "Failed to load {}", handler.description());
                Err(Arc::new(err))
            },
        };
        for waiter in waiters {
            // A requester that went away no longer needs the result.
            let _ = waiter.send(delivery.clone());
        }
    }

    async fn resolve(&self, request: &DownloadRequest, handler: &dyn ErasedHandler) -> Result<Resolved> {
        let url = request.url.as_str();
        if url.starts_with(FILE_SCHEME) {
            let data = self
                .disk
                .load_absolute_url(url)
                .await
                .map_err(|err| err.raise(ErrorKind::Storage))?;
            return self.transform_local(request, handler, data).await;
        }
        if url.starts_with(DATA_SCHEME) {
            let data = decode_data_url(url)?;
            return self.transform_local(request, handler, data).await;
        }
        if let Some(resolved) = self.load_from_disk_cache(request, handler).await {
            return Ok(resolved);
        }
        self.download(request, handler).await
    }

    async fn transform_local(
        &self,
        request: &DownloadRequest,
        handler: &dyn ErasedHandler,
        data: Bytes,
    ) -> Result<Resolved> {
        let digest = verify(request.expected_hash.as_deref(), &data)?;
        let value = handler
            .transform(&request.local_filename, data)
            .await
            .map_err(|err| err.raise(ErrorKind::Transform(handler.description().to_string())))?;
        Ok(Resolved {
            value,
            source: LoadSource::DiskCache,
            digest: Some(digest),
        })
    }

    /// Any problem with the cached record is logged and treated as a miss.
    async fn load_from_disk_cache(&self, request: &DownloadRequest, handler: &dyn ErasedHandler) -> Option<Resolved> {
        let path = Path::new(&request.local_filename);
        let bytes = match self.disk.load(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = ?err, "Failed to read cached item");
                return None;
            },
        };
        let record = match Record::decode(bytes) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = ?err, "Ignoring corrupt cached item");
                return None;
            },
        };
        if !record.matches(&request.url, request.expected_hash.as_deref()) {
            tracing::info!(path = %path.display(), cached_url = %record.url, "Cached item is stale");
            return None;
        }
        match handler.transform(&request.local_filename, record.data).await {
            Ok(value) => Some(Resolved {
                value,
                source: LoadSource::DiskCache,
                digest: Some(record.sha256),
            }),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = ?err, "Failed to transform cached item");
                None
            },
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(url = %request.url))]
    async fn download(&self, request: &DownloadRequest, handler: &dyn ErasedHandler) -> Result<Resolved> {
        tracing::info!("Downloading {}", handler.description());
        let response = self.http.perform_request(HttpRequest::get(&request.url)).await?;
        if !response.is_success() {
            exn::bail!(ErrorKind::Network(format!(
                "{} answered with status {}",
                request.url, response.status_code
            )));
        }
        if response.body.is_empty() {
            exn::bail!(ErrorKind::Network(format!("{} answered with an empty body", request.url)));
        }
        let digest = verify(request.expected_hash.as_deref(), &response.body)?;
        let description = handler.description().to_string();
        let data = handler
            .preprocess(&request.local_filename, response.body)
            .await
            .map_err(|err| err.raise(ErrorKind::Preprocess(description.clone())))?;
        let record = Record {
            url: request.url.clone(),
            sha256: digest.clone(),
            data: data.clone(),
        };
        self.store_in_disk_cache(&request.local_filename, record);
        let value = handler
            .transform(&request.local_filename, data)
            .await
            .map_err(|err| err.raise(ErrorKind::Transform(description)))?;
        Ok(Resolved {
            value,
            source: LoadSource::Network,
            digest: Some(digest),
        })
    }

    fn store_in_disk_cache(&self, local_filename: &str, record: Record) {
        let disk = Arc::clone(&self.disk);
        let path = local_filename.to_string();
        let write = async move {
            let bytes = match record.encode() {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(path = %path, error = ?err, "Failed to encode cached item");
                    return;
                },
            };
            if let Err(err) = disk.store(Path::new(&path), Bytes::from(bytes)).await {
                tracing::warn!(path = %path, error = ?err, "Failed to store item in disk cache");
            }
        };
        let mut writes = self.disk_writes.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished writes so the set does not grow without bound.
        while writes.try_join_next().is_some() {}
        writes.spawn(write);
    }
}
