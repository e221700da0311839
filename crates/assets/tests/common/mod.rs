#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use trove_assets::{
    AssetDownloader, AssetKey, AssetLoadObserver, AssetLoadObserverHandle, AssetLoader, AssetLoaderFactory,
    AssetLocation, BytesAsset, ErrorKind, LoadOutcome, LoadSpecs, LoadUpdates, LoadedAssetHandle, OutputType, Result,
};

/// Loader answering with `url|widthxheight` unless told to fail.
pub struct MockAssetLoader {
    schemes: Vec<String>,
    output_type: OutputType,
    failures: Mutex<HashMap<String, ErrorKind>>,
    loads: AtomicUsize,
    active: Arc<AtomicUsize>,
    gate: watch::Sender<bool>,
    updates: Mutex<Vec<LoadUpdates>>,
}

struct ActiveLoad(Arc<AtomicUsize>);

impl Drop for ActiveLoad {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockAssetLoader {
    pub fn new(schemes: &[&str], output_type: OutputType) -> Arc<Self> {
        Arc::new(Self {
            schemes: schemes.iter().map(|scheme| scheme.to_string()).collect(),
            output_type,
            failures: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            gate: watch::Sender::new(true),
            updates: Mutex::new(Vec::new()),
        })
    }

    /// Loads block until [`MockAssetLoader::release`].
    pub fn held(schemes: &[&str], output_type: OutputType) -> Arc<Self> {
        let loader = Self::new(schemes, output_type);
        loader.gate.send_replace(false);
        loader
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn fail(&self, url: &str, kind: ErrorKind) {
        self.failures.lock().unwrap().insert(url.to_string(), kind);
    }

    pub fn succeed(&self, url: &str) {
        self.failures.lock().unwrap().remove(url);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Replaces the result of every load made so far. Returns how many loads
    /// were still consumed.
    pub fn publish(&self, content: &'static [u8]) -> usize {
        let updates = self.updates.lock().unwrap();
        updates
            .iter()
            .filter(|sink| sink.publish(Ok(Arc::new(BytesAsset(Bytes::from_static(content))))))
            .count()
    }

    pub fn content(location: &str, specs: &LoadSpecs) -> Bytes {
        Bytes::from(format!("{location}|{}x{}", specs.width, specs.height))
    }
}

#[async_trait]
impl AssetLoader for MockAssetLoader {
    fn schemes(&self) -> Vec<String> {
        self.schemes.clone()
    }

    fn output_type(&self) -> OutputType {
        self.output_type
    }

    async fn load(&self, location: &AssetLocation, specs: &LoadSpecs) -> Result<LoadedAssetHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveLoad(Arc::clone(&self.active));
        let _ = self.gate.subscribe().wait_for(|open| *open).await;
        let failure = self.failures.lock().unwrap().get(&location.url).cloned();
        match failure {
            Some(kind) => Err(kind.into()),
            None => Ok(Arc::new(BytesAsset(Self::content(&location.url, specs)))),
        }
    }

    async fn load_with_updates(
        &self,
        location: &AssetLocation,
        specs: &LoadSpecs,
        updates: LoadUpdates,
    ) -> Result<LoadedAssetHandle> {
        self.updates.lock().unwrap().push(updates);
        self.load(location, specs).await
    }
}

/// Builds loaders that download the raw bytes and hand them back unchanged.
pub struct PassThroughFactory(pub OutputType);

struct PassThroughLoader {
    scheme: String,
    output_type: OutputType,
    downloader: Arc<dyn AssetDownloader>,
}

impl AssetLoaderFactory for PassThroughFactory {
    fn output_type(&self) -> OutputType {
        self.0
    }

    fn create(&self, scheme: &str, downloader: Arc<dyn AssetDownloader>) -> Arc<dyn AssetLoader> {
        Arc::new(PassThroughLoader {
            scheme: scheme.to_string(),
            output_type: self.0,
            downloader,
        })
    }
}

#[async_trait]
impl AssetLoader for PassThroughLoader {
    fn schemes(&self) -> Vec<String> {
        vec![self.scheme.clone()]
    }

    fn output_type(&self) -> OutputType {
        self.output_type
    }

    async fn load(&self, location: &AssetLocation, _specs: &LoadSpecs) -> Result<LoadedAssetHandle> {
        let bytes = self.downloader.download(&location.url).await?;
        Ok(Arc::new(BytesAsset(bytes)))
    }
}

/// Observer forwarding every notification to a channel.
pub struct RecordingObserver {
    sender: mpsc::UnboundedSender<(AssetKey, LoadOutcome)>,
}

impl AssetLoadObserver for RecordingObserver {
    fn on_load(&self, key: &AssetKey, outcome: LoadOutcome) {
        let _ = self.sender.send((key.clone(), outcome));
    }
}

pub struct Recorder {
    pub observer: AssetLoadObserverHandle,
    receiver: mpsc::UnboundedReceiver<(AssetKey, LoadOutcome)>,
}

impl Recorder {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            observer: Arc::new(RecordingObserver { sender }),
            receiver,
        }
    }

    pub async fn next(&mut self) -> LoadOutcome {
        let (_, outcome) = tokio::time::timeout(Duration::from_secs(5), self.receiver.recv())
            .await
            .expect("no notification in time")
            .expect("observer dropped");
        outcome
    }

    pub async fn next_bytes(&mut self) -> Bytes {
        self.next().await.expect("load failed").bytes().expect("no bytes")
    }

    pub async fn next_error(&mut self) -> ErrorKind {
        let err = self.next().await.expect_err("load succeeded");
        (**err).clone()
    }

    /// Lets spawned tasks run, then asserts nothing else was delivered.
    pub async fn assert_quiet(&mut self) {
        settle().await;
        assert!(self.receiver.try_recv().is_err(), "unexpected notification");
    }
}

pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
