mod common;

use bytes::Bytes;
use common::{MockAssetLoader, PassThroughFactory, Recorder, settle};
use std::sync::Arc;
use trove_archive::ArchiveBuilder;
use trove_assets::{
    AssetKey, AssetLoaderManager, AssetLocation, AssetState, AssetsManager, ConsumerState, ErrorKind,
    LocalAssetResolver, LoadSpecs, OutputType,
};
use trove_download::{MockHttpClient, RemoteDownloader};
use trove_module::{Artifact, Manifest, ModuleManager};
use trove_storage::MemoryDiskCache;

const LOGO: &str = "https://cdn.example.com/logo.png";
const RESOURCES_URL: &str = "https://cdn.example.com/home/res.zst";

fn image(width: u32, height: u32) -> LoadSpecs {
    LoadSpecs::new(OutputType::Image).with_size(width, height)
}

fn manager_with(loader: &Arc<MockAssetLoader>) -> AssetsManager {
    let loaders = Arc::new(AssetLoaderManager::new());
    loaders.register_asset_loader(loader.clone());
    AssetsManager::builder(loaders).build()
}

struct BundledAssets;

impl LocalAssetResolver for BundledAssets {
    fn resolve_local_asset(&self, module: &str, path: &str) -> Option<AssetLocation> {
        (module == "app").then(|| AssetLocation::new(format!("file:///bundle/{path}"), true))
    }
}

#[tokio::test]
async fn identical_specs_share_one_load() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));

    let expected = MockAssetLoader::content(LOGO, &image(10, 10));
    assert_eq!(first.next_bytes().await, expected);
    assert_eq!(second.next_bytes().await, expected);
    assert_eq!(loader.loads(), 1);

    let snapshot = manager.snapshot(&key).unwrap();
    assert_eq!(snapshot.state, AssetState::Ready(AssetLocation::new(LOGO, false)));
    assert_eq!(snapshot.loads, 1);
    assert!(snapshot.consumers.iter().all(|consumer| consumer.state == ConsumerState::Loaded && consumer.notified));
    first.assert_quiet().await;
}

#[tokio::test]
async fn differing_specs_load_independently() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut small, mut large) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, small.observer.clone(), image(10, 10));
    manager.add_asset_load_observer(&key, large.observer.clone(), image(20, 20));

    assert_eq!(small.next_bytes().await, MockAssetLoader::content(LOGO, &image(10, 10)));
    assert_eq!(large.next_bytes().await, MockAssetLoader::content(LOGO, &image(20, 20)));
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn new_specs_trigger_a_new_load() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let asset = manager.get_asset(AssetKey::url(LOGO));
    let mut recorder = Recorder::new();

    asset.add_load_observer(recorder.observer.clone(), image(10, 10));
    recorder.next_bytes().await;
    asset.update_load_observer_specs(&recorder.observer, image(30, 30));

    assert_eq!(recorder.next_bytes().await, MockAssetLoader::content(LOGO, &image(30, 30)));
    assert_eq!(loader.loads(), 2);
    assert_eq!(manager.snapshot(asset.key()).unwrap().loads, 1);
}

#[tokio::test]
async fn url_asset_is_forgotten_when_unobserved() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let mut recorder = Recorder::new();

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));
    recorder.next_bytes().await;
    manager.remove_asset_load_observer(&key, &recorder.observer);

    assert!(manager.snapshot(&key).is_none());
    assert!(manager.get_resolved_asset_location(&key).is_none());
}

#[tokio::test]
async fn local_asset_keeps_its_location_when_unobserved() {
    let loader = MockAssetLoader::new(&["file"], OutputType::Image);
    let loaders = Arc::new(AssetLoaderManager::new());
    loaders.register_asset_loader(loader.clone());
    let manager = AssetsManager::builder(loaders).local_resolver(Arc::new(BundledAssets)).build();
    let key = AssetKey::bundle("app", "logo.png");
    let mut recorder = Recorder::new();

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));
    assert_eq!(
        recorder.next_bytes().await,
        MockAssetLoader::content("file:///bundle/logo.png", &image(10, 10))
    );
    manager.remove_asset_load_observer(&key, &recorder.observer);

    let snapshot = manager.snapshot(&key).unwrap();
    assert_eq!(snapshot.state, AssetState::Ready(AssetLocation::new("file:///bundle/logo.png", true)));
    assert!(snapshot.consumers.is_empty());
    assert_eq!(snapshot.loads, 0);
}

#[tokio::test]
async fn unknown_local_asset_fails_permanently() {
    let loader = MockAssetLoader::new(&["file"], OutputType::Image);
    let loaders = Arc::new(AssetLoaderManager::new());
    loaders.register_asset_loader(loader.clone());
    let manager = AssetsManager::builder(loaders).local_resolver(Arc::new(BundledAssets)).build();
    let key = AssetKey::bundle("other", "logo.png");
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    assert_eq!(first.next_error().await, ErrorKind::NotFound("other:logo.png".to_string()));
    assert_eq!(manager.snapshot(&key).unwrap().state, AssetState::FailedPermanently);

    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    assert_eq!(second.next_error().await, ErrorKind::NotFound("other:logo.png".to_string()));
    assert_eq!(loader.loads(), 0);
}

#[tokio::test]
async fn removing_last_observer_cancels_load() {
    let loader = MockAssetLoader::held(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let mut recorder = Recorder::new();

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));
    settle().await;
    assert_eq!(loader.active(), 1);

    manager.remove_asset_load_observer(&key, &recorder.observer);
    settle().await;
    assert_eq!(loader.active(), 0);
    loader.release();
    recorder.assert_quiet().await;
}

#[tokio::test]
async fn load_continues_while_another_observer_remains() {
    let loader = MockAssetLoader::held(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut leaving, mut staying) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, leaving.observer.clone(), image(10, 10));
    manager.add_asset_load_observer(&key, staying.observer.clone(), image(10, 10));
    settle().await;
    manager.remove_asset_load_observer(&key, &leaving.observer);
    loader.release();

    staying.next_bytes().await;
    leaving.assert_quiet().await;
    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn pausing_collapses_observer_churn() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    first.next_bytes().await;

    manager.begin_pause_updates();
    manager.remove_asset_load_observer(&key, &first.observer);
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    manager.flush_updates();
    second.assert_quiet().await;
    manager.end_pause_updates();

    second.next_bytes().await;
    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn observer_churn_without_pause_reloads() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    first.next_bytes().await;
    manager.remove_asset_load_observer(&key, &first.observer);
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));

    second.next_bytes().await;
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn overriding_location_delivers_new_result() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let mut recorder = Recorder::new();
    let replacement = AssetLocation::new("https://cdn.example.com/logo-v2.png", false);

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));
    recorder.next_bytes().await;
    manager.set_resolved_asset_location(&key, replacement.clone());

    assert_eq!(recorder.next_bytes().await, MockAssetLoader::content(&replacement.url, &image(10, 10)));
    assert_eq!(manager.get_resolved_asset_location(&key), Some(replacement));
}

#[tokio::test]
async fn overriding_location_during_resolve() {
    let loader = MockAssetLoader::new(&["file"], OutputType::Image);
    let loaders = Arc::new(AssetLoaderManager::new());
    loaders.register_asset_loader(loader.clone());
    let manager = AssetsManager::builder(loaders).local_resolver(Arc::new(BundledAssets)).build();
    let key = AssetKey::bundle("app", "logo.png");
    let mut recorder = Recorder::new();
    let replacement = AssetLocation::new("file:///override/logo.png", true);

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));
    assert_eq!(manager.snapshot(&key).unwrap().state, AssetState::ResolvingLocation);
    manager.set_resolved_asset_location(&key, replacement.clone());

    assert_eq!(recorder.next_bytes().await, MockAssetLoader::content(&replacement.url, &image(10, 10)));
    recorder.assert_quiet().await;
    assert_eq!(manager.get_resolved_asset_location(&key), Some(replacement));
}

#[tokio::test]
async fn missing_loader_fails_consumer() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Bytes);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let mut recorder = Recorder::new();

    manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));

    assert_eq!(recorder.next_error().await, ErrorKind::NoLoader("https as image".to_string()));
    assert_eq!(loader.loads(), 0);
}

#[tokio::test]
async fn retryable_load_failure_is_not_reused() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    loader.fail(LOGO, ErrorKind::Network("offline".to_string()));
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    assert!(first.next_error().await.is_retryable());

    loader.succeed(LOGO);
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    second.next_bytes().await;
    assert_eq!(loader.loads(), 2);
    first.assert_quiet().await;
}

#[tokio::test]
async fn permanent_load_failure_is_shared() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    loader.fail(LOGO, ErrorKind::Load("corrupt".to_string()));
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    first.next_error().await;
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));

    assert_eq!(second.next_error().await, ErrorKind::Load("corrupt".to_string()));
    assert_eq!(loader.loads(), 1);
}

struct ModuleFixture {
    http: Arc<MockHttpClient>,
    loader: Arc<MockAssetLoader>,
    manager: AssetsManager,
}

impl ModuleFixture {
    fn new() -> Self {
        let disk = Arc::new(MemoryDiskCache::new());
        let http = Arc::new(MockHttpClient::new());
        let modules = Arc::new(ModuleManager::new(RemoteDownloader::new(disk, http.clone()), 1.0));
        modules.register_manifest(
            "home",
            Manifest::new(Artifact::new("https://cdn.example.com/home/v1.zst", ""))
                .with_asset(1.0, Artifact::new(RESOURCES_URL, "")),
        );
        let loader = MockAssetLoader::new(&["file"], OutputType::Image);
        let loaders = Arc::new(AssetLoaderManager::new());
        loaders.register_asset_loader(loader.clone());
        let manager = AssetsManager::builder(loaders)
            .module_manager(modules)
            .local_resolver(Arc::new(BundledAssets))
            .build();
        Self { http, loader, manager }
    }

    fn serve_resources(&self) {
        let mut builder = ArchiveBuilder::new();
        builder.add_entry("images/close-button@1x.png", b"png".to_vec()).unwrap();
        self.http.respond(RESOURCES_URL, 200, builder.build_compressed().unwrap());
    }
}

#[tokio::test]
async fn bundle_asset_loads_from_module_resources() {
    let fixture = ModuleFixture::new();
    fixture.serve_resources();
    let key = AssetKey::bundle("home", "close_button");
    let mut recorder = Recorder::new();

    fixture.manager.add_asset_load_observer(&key, recorder.observer.clone(), image(10, 10));

    let url = "file:///resources-home.dir/images/close-button@1x.png";
    assert_eq!(recorder.next_bytes().await, MockAssetLoader::content(url, &image(10, 10)));
    assert_eq!(fixture.manager.get_resolved_asset_location(&key), Some(AssetLocation::new(url, true)));
}

#[tokio::test]
async fn missing_resource_fails_permanently() {
    let fixture = ModuleFixture::new();
    fixture.serve_resources();
    let key = AssetKey::bundle("home", "missing");
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    fixture.manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    assert_eq!(first.next_error().await, ErrorKind::NotFound("home:missing".to_string()));

    fixture.manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    second.next_error().await;
    assert_eq!(fixture.http.request_count(RESOURCES_URL), 1);
    assert_eq!(fixture.manager.snapshot(&key).unwrap().state, AssetState::FailedPermanently);
}

#[tokio::test]
async fn network_resolve_failure_is_retried_for_new_observers() {
    let fixture = ModuleFixture::new();
    fixture.http.respond(RESOURCES_URL, 503, Vec::new());
    let key = AssetKey::bundle("home", "close_button");
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    fixture.manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    let err = first.next_error().await;
    assert!(matches!(err, ErrorKind::Network(_)));
    assert_eq!(fixture.manager.snapshot(&key).unwrap().state, AssetState::FailedRetryable);

    fixture.serve_resources();
    fixture.manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    second.next_bytes().await;
    assert_eq!(fixture.http.request_count(RESOURCES_URL), 2);
    assert_eq!(fixture.loader.loads(), 1);

    let snapshot = fixture.manager.snapshot(&key).unwrap();
    let states: Vec<_> = snapshot.consumers.iter().map(|consumer| consumer.state).collect();
    assert_eq!(states, [ConsumerState::Failed, ConsumerState::Loaded]);
    first.assert_quiet().await;
}

#[tokio::test]
async fn loader_can_publish_newer_results() {
    let loader = MockAssetLoader::new(&["https"], OutputType::Image);
    let manager = manager_with(&loader);
    let key = AssetKey::url(LOGO);
    let (mut first, mut second) = (Recorder::new(), Recorder::new());

    manager.add_asset_load_observer(&key, first.observer.clone(), image(10, 10));
    assert_eq!(first.next_bytes().await, MockAssetLoader::content(LOGO, &image(10, 10)));

    assert_eq!(loader.publish(b"second"), 1);
    assert_eq!(first.next_bytes().await, Bytes::from_static(b"second"));

    // A consumer joining the shared load gets the newest result only.
    manager.add_asset_load_observer(&key, second.observer.clone(), image(10, 10));
    assert_eq!(second.next_bytes().await, Bytes::from_static(b"second"));
    first.assert_quiet().await;
    second.assert_quiet().await;
    assert_eq!(loader.loads(), 1);

    manager.remove_asset_load_observer(&key, &first.observer);
    manager.remove_asset_load_observer(&key, &second.observer);
    settle().await;
    assert_eq!(loader.publish(b"third"), 0);
}

#[tokio::test]
async fn bytes_asset_loads_as_bytes() {
    let manager = AssetsManager::builder(Arc::new(AssetLoaderManager::new())).build();
    let content = Bytes::from_static(b"This is the image content");
    let asset = manager.create_asset_with_bytes(content.clone());
    let mut recorder = Recorder::new();

    asset.add_load_observer(recorder.observer.clone(), LoadSpecs::new(OutputType::Bytes));

    assert_eq!(recorder.next_bytes().await, content);
    let location = asset.resolved_location().unwrap();
    assert!(location.is_local);
    assert_eq!(location.scheme(), "bytes");
}

#[tokio::test]
async fn bytes_asset_loads_through_a_factory_for_other_outputs() {
    let loaders = Arc::new(AssetLoaderManager::new());
    loaders.register_asset_loader_factory(Arc::new(PassThroughFactory(OutputType::Image)));
    let manager = AssetsManager::builder(loaders).build();
    let content = Bytes::from_static(b"This is the image content");
    let asset = manager.create_asset_with_bytes(content.clone());
    let mut recorder = Recorder::new();

    asset.add_load_observer(recorder.observer.clone(), image(10, 10));

    assert_eq!(recorder.next_bytes().await, content);
}

#[tokio::test]
async fn bytes_asset_content_is_released_with_its_handle() {
    let manager = AssetsManager::builder(Arc::new(AssetLoaderManager::new())).build();
    let asset = manager.create_asset_with_bytes(Bytes::from_static(b"content"));
    let key = asset.key().clone();
    drop(asset);
    let mut recorder = Recorder::new();

    manager.add_asset_load_observer(&key, recorder.observer.clone(), LoadSpecs::new(OutputType::Bytes));

    assert_eq!(recorder.next_error().await, ErrorKind::NotFound(key.to_string()));
    manager.remove_asset_load_observer(&key, &recorder.observer);
    assert!(manager.snapshot(&key).is_none());
}
