use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use trove_archive::{Archive, ArchiveBuilder};
use trove_download::{ErrorKind as DownloadErrorKind, LoadSource, MockHttpClient, RemoteDownloader, sha256_hex};
use trove_module::{Artifact, ErrorKind, Manifest, ModuleManager};
use trove_storage::{DiskCache, MemoryDiskCache};

const MODULE_URL: &str = "https://cdn.example.com/home/v1.zst";

struct Fixture {
    disk: Arc<MemoryDiskCache>,
    http: Arc<MockHttpClient>,
    downloader: RemoteDownloader,
    manager: ModuleManager,
}

impl Fixture {
    fn new(device_density: f64) -> Self {
        let disk = Arc::new(MemoryDiskCache::new());
        let http = Arc::new(MockHttpClient::new());
        Self::with(disk, http, device_density)
    }

    /// Same disk and network, empty memory cache.
    fn restart(&self) -> Self {
        Self::with(self.disk.clone(), self.http.clone(), self.manager.device_density())
    }

    fn with(disk: Arc<MemoryDiskCache>, http: Arc<MockHttpClient>, device_density: f64) -> Self {
        let downloader = RemoteDownloader::new(disk.clone(), http.clone());
        let manager = ModuleManager::new(downloader.clone(), device_density);
        Self { disk, http, downloader, manager }
    }
}

fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = ArchiveBuilder::new();
    for (path, data) in entries {
        builder.add_entry(*path, data.as_bytes().to_vec()).unwrap();
    }
    builder.build_compressed().unwrap()
}

fn module_archive() -> Vec<u8> {
    archive(&[("index.js", "export default 1;"), ("strings.json", "{}")])
}

#[tokio::test]
async fn unknown_module_has_no_manifest() {
    let fixture = Fixture::new(1.0);
    let err = fixture.manager.load_module("home").await.unwrap_err();
    assert_eq!(*err, ErrorKind::ManifestNotFound("home".to_string()));
    assert!(!err.is_retryable());
    let err = fixture.manager.load_resources("home").await.unwrap_err();
    assert_eq!(*err, ErrorKind::ManifestNotFound("home".to_string()));
}

#[tokio::test]
async fn loads_and_decompresses_module() {
    let fixture = Fixture::new(1.0);
    let body = module_archive();
    fixture.http.respond(MODULE_URL, 200, body.clone());
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, sha256_hex(&body))));

    let loaded = fixture.manager.load_module("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::Network);
    assert_eq!(loaded.value.entry_str("index.js").unwrap(), Some("export default 1;"));

    // The record keeps the module compressed.
    fixture.downloader.wait_for_disk_writes().await;
    let record = Archive::parse(fixture.disk.load(Path::new("module-home")).await.unwrap()).unwrap();
    assert_eq!(record.require("data").unwrap().data, Bytes::from(body));
}

#[tokio::test]
async fn module_is_served_from_disk_after_restart() {
    let fixture = Fixture::new(1.0);
    fixture.http.respond(MODULE_URL, 200, module_archive());
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    fixture.manager.load_module("home").await.unwrap();
    fixture.downloader.wait_for_disk_writes().await;

    let restarted = fixture.restart();
    restarted.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    let loaded = restarted.manager.load_module("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::DiskCache);
    assert_eq!(loaded.value.len(), 2);
    assert_eq!(fixture.http.total_requests(), 1);
}

#[tokio::test]
async fn new_manifest_url_forces_download() {
    let fixture = Fixture::new(1.0);
    let v2 = "https://cdn.example.com/home/v2.zst";
    fixture.http.respond(MODULE_URL, 200, module_archive());
    fixture.http.respond(v2, 200, archive(&[("index.js", "export default 2;")]));
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    fixture.manager.load_module("home").await.unwrap();
    fixture.downloader.wait_for_disk_writes().await;

    let restarted = fixture.restart();
    restarted.manager.register_manifest("home", Manifest::new(Artifact::new(v2, "")));
    let loaded = restarted.manager.load_module("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::Network);
    assert_eq!(loaded.value.entry_str("index.js").unwrap(), Some("export default 2;"));
    assert_eq!(fixture.http.request_count(v2), 1);
}

#[tokio::test]
async fn wrong_digest_fails_integrity_check() {
    let fixture = Fixture::new(1.0);
    fixture.http.respond(MODULE_URL, 200, module_archive());
    fixture
        .manager
        .register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, sha256_hex(b"tampered"))));
    let err = fixture.manager.load_module("home").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Download { kind: DownloadErrorKind::Integrity { .. }, .. }), "{err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn network_failures_are_retryable() {
    let fixture = Fixture::new(1.0);
    fixture.http.respond(MODULE_URL, 500, "oops");
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    let err = fixture.manager.load_module("home").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn uncompressed_modules_load_when_decompression_is_disabled() {
    let fixture = Fixture::new(1.0);
    let mut builder = ArchiveBuilder::new();
    builder.add_entry("index.js", b"raw".to_vec()).unwrap();
    fixture.http.respond(MODULE_URL, 200, builder.build().unwrap());
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    fixture.manager.set_decompression_disabled(true);
    let loaded = fixture.manager.load_module("home").await.unwrap();
    assert_eq!(loaded.value.entry_str("index.js").unwrap(), Some("raw"));
}

#[tokio::test]
async fn compressed_modules_fail_when_decompression_is_disabled() {
    let fixture = Fixture::new(1.0);
    fixture.http.respond(MODULE_URL, 200, module_archive());
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    fixture.manager.set_decompression_disabled(true);
    let err = fixture.manager.load_module("home").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Download { kind: DownloadErrorKind::Transform(_), .. }), "{err:?}");
}

fn resources_manifest() -> Manifest {
    Manifest::new(Artifact::new(MODULE_URL, ""))
        .with_asset(1.0, Artifact::new("https://cdn.example.com/home/res@1x.zst", ""))
        .with_asset(2.0, Artifact::new("https://cdn.example.com/home/res@2x.zst", ""))
        .with_asset(3.0, Artifact::new("https://cdn.example.com/home/res@3x.zst", ""))
}

#[tokio::test]
async fn extracts_resources_for_closest_density() {
    let fixture = Fixture::new(2.4);
    fixture.http.respond(
        "https://cdn.example.com/home/res@2x.zst",
        200,
        archive(&[("images/close-button@2x.png", "png"), ("fonts/body.ttf", "ttf")]),
    );
    fixture.manager.register_manifest("home", resources_manifest());

    let loaded = fixture.manager.load_resources("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::Network);
    let resources = &loaded.value;
    assert_eq!(resources.len(), 4);
    let url = resources.get("close_button").unwrap();
    assert_eq!(url, "file:///resources-home.dir/images/close-button@2x.png");
    assert_eq!(resources.get("images/close-button@2x.png"), Some(url));
    assert_eq!(resources.get("body"), Some("file:///resources-home.dir/fonts/body.ttf"));
    assert_eq!(fixture.disk.load_absolute_url(url).await.unwrap(), Bytes::from_static(b"png"));
    assert_eq!(fixture.http.total_requests(), 1);
}

#[tokio::test]
async fn manifest_without_assets_has_empty_resources() {
    let fixture = Fixture::new(2.0);
    fixture.manager.register_manifest("home", Manifest::new(Artifact::new(MODULE_URL, "")));
    let loaded = fixture.manager.load_resources("home").await.unwrap();
    assert!(loaded.value.is_empty());
    assert_eq!(fixture.http.total_requests(), 0);
}

#[tokio::test]
async fn extracted_resources_survive_restart() {
    let fixture = Fixture::new(1.0);
    fixture
        .http
        .respond("https://cdn.example.com/home/res@1x.zst", 200, archive(&[("logo.png", "png")]));
    fixture.manager.register_manifest("home", resources_manifest());
    fixture.manager.load_resources("home").await.unwrap();
    fixture.downloader.wait_for_disk_writes().await;

    let restarted = fixture.restart();
    restarted.manager.register_manifest("home", resources_manifest());
    let loaded = restarted.manager.load_resources("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::DiskCache);
    assert_eq!(loaded.value.get("logo"), Some("file:///resources-home.dir/logo.png"));
    assert_eq!(fixture.http.total_requests(), 1);
}

#[tokio::test]
async fn missing_extracted_file_triggers_download() {
    let fixture = Fixture::new(1.0);
    fixture
        .http
        .respond("https://cdn.example.com/home/res@1x.zst", 200, archive(&[("logo.png", "png")]));
    fixture.manager.register_manifest("home", resources_manifest());
    fixture.manager.load_resources("home").await.unwrap();
    fixture.downloader.wait_for_disk_writes().await;
    fixture.disk.remove(Path::new("resources-home.dir/logo.png")).await.unwrap();

    let restarted = fixture.restart();
    restarted.manager.register_manifest("home", resources_manifest());
    let loaded = restarted.manager.load_resources("home").await.unwrap();
    assert_eq!(loaded.source, LoadSource::Network);
    assert!(fixture.disk.exists(Path::new("resources-home.dir/logo.png")).await.unwrap());
}

#[tokio::test]
async fn new_resources_replace_stale_files() {
    let fixture = Fixture::new(1.0);
    let v2 = "https://cdn.example.com/home/res@1x-v2.zst";
    fixture
        .http
        .respond("https://cdn.example.com/home/res@1x.zst", 200, archive(&[("old.png", "old")]));
    fixture.http.respond(v2, 200, archive(&[("new.png", "new")]));
    fixture.manager.register_manifest("home", resources_manifest());
    fixture.manager.load_resources("home").await.unwrap();
    fixture.downloader.wait_for_disk_writes().await;

    fixture.manager.register_manifest(
        "home",
        Manifest::new(Artifact::new(MODULE_URL, "")).with_asset(1.0, Artifact::new(v2, "")),
    );
    let loaded = fixture.manager.load_resources("home").await.unwrap();
    assert_eq!(loaded.value.get("new"), Some("file:///resources-home.dir/new.png"));
    assert!(loaded.value.get("old").is_none());
    assert!(!fixture.disk.exists(Path::new("resources-home.dir/old.png")).await.unwrap());
}
