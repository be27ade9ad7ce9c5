//! Integration tests for the download engine and the document assembler.
//!
//! Every test runs against [`MockTiles`], an in-process [`TileSource`] that
//! parses the IIIF region out of each URL and answers with a generated PNG
//! of exactly that size. Individual tiles can be made to fail through a
//! rule closure. Work directories live in a `TempDir`.

use async_trait::async_trait;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tilebook::pipeline::stitch::PageContext;
use tilebook::{
    build_document_with, download_with_source, page_stream, BatchStatus, Catalog, CatalogEntry,
    DocumentEncoder, DownloadConfig, DownloadProgressCallback, MediaCategory,
    PageKey, PageOutcome, PageRange, PdfEncoder, TileBookError, TileResponse, TileSource,
    WorkDir, WorkMetadata,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// `(url, earlier hits on this url)` → forced response, or `None` to serve
/// the tile.
type Rule = Box<dyn Fn(&str, usize) -> Option<TileResponse> + Send + Sync>;

struct MockTiles {
    requests: AtomicUsize,
    hits: Mutex<HashMap<String, usize>>,
    rule: Rule,
}

impl MockTiles {
    fn serving() -> Arc<Self> {
        Self::with_rule(|_, _| None)
    }

    fn with_rule(rule: impl Fn(&str, usize) -> Option<TileResponse> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            hits: Mutex::new(HashMap::new()),
            rule: Box::new(rule),
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// `.../<x>,<y>,<w>,<h>/full/0/native.jpg` → `(w, h)`.
fn region_size(url: &str) -> (u32, u32) {
    let region = url.rsplit('/').nth(3).expect("region segment");
    let parts: Vec<u32> = region.split(',').map(|p| p.parse().unwrap()).collect();
    (parts[2], parts[3])
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 60, 30])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[async_trait]
impl TileSource for MockTiles {
    async fn fetch(&self, url: &str) -> TileResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut hits = self.hits.lock().unwrap();
            let n = hits.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n - 1
        };
        if let Some(forced) = (self.rule)(url, seen) {
            return forced;
        }
        let (w, h) = region_size(url);
        TileResponse::Body(png(w, h))
    }
}

fn catalog(category: MediaCategory, restricted: bool, pages: &[(&str, u32, u32)]) -> Catalog {
    Catalog {
        media_id: "digibok_2008040300039".into(),
        category,
        access: "norge".into(),
        restricted,
        title: Some("Sult".into()),
        pages: pages
            .iter()
            .map(|(key, width, height)| CatalogEntry {
                key: key.parse().unwrap(),
                width: *width,
                height: *height,
                tile_source: format!("https://tiles.test/iiif/URN:NBN:no-nb_digibok_2008040300039_{key}"),
            })
            .collect(),
    }
}

fn small_book(keys: &[&'static str]) -> Catalog {
    let pages: Vec<(&str, u32, u32)> = keys.iter().map(|k| (*k, 60, 80)).collect();
    catalog(MediaCategory::Book, false, &pages)
}

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(root: &Path) -> DownloadConfig {
    DownloadConfig::builder()
        .output_root(root)
        .workers(1)
        .build()
        .unwrap()
}

fn sources(root: &Path, catalog: &Catalog) -> PathBuf {
    WorkDir::new(root, &catalog.media_id).sources_dir()
}

#[derive(Default)]
struct RecordingEncoder {
    pages: Mutex<Vec<String>>,
}

impl DocumentEncoder for RecordingEncoder {
    fn encode(&self, pages: &[PathBuf], output: &Path) -> Result<(), TileBookError> {
        *self.pages.lock().unwrap() = pages
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect();
        std::fs::write(output, b"%PDF-1.5 stub").map_err(|e| TileBookError::io(output, e))
    }
}

struct FailingEncoder;

impl DocumentEncoder for FailingEncoder {
    fn encode(&self, _pages: &[PathBuf], output: &Path) -> Result<(), TileBookError> {
        std::fs::write(output, b"half").ok();
        Err(TileBookError::EncodeFailed {
            path: output.to_path_buf(),
            detail: "disk full".into(),
        })
    }
}

#[derive(Default)]
struct EventCounter {
    starts: AtomicUsize,
    completes: AtomicUsize,
    retries: AtomicUsize,
    urls: AtomicUsize,
    tile_errors: AtomicUsize,
    batch_completes: AtomicUsize,
}

impl DownloadProgressCallback for EventCounter {
    fn on_page_start(&self, _page: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }
    fn on_tile_url(&self, _page: &str, _url: &str) {
        self.urls.fetch_add(1, Ordering::SeqCst);
    }
    fn on_tile_error(&self, _page: &str, _column: u32, _row: u32, _error: &str) {
        self.tile_errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_retry(&self, _page: &str, _attempt: u32, _fetched: usize, _expected: usize) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page: &str, _outcome: &PageOutcome) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _completed: usize, _total: usize) {
        self.batch_completes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fetch and stitch ─────────────────────────────────────────────────────────

#[tokio::test]
async fn book_page_takes_twelve_tile_requests() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 3000, 4000)]);
    let mock = MockTiles::serving();

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!(mock.requests(), 12);
    assert_eq!(report.status, BatchStatus::Downloaded);
    assert_eq!((report.saved, report.recovered), (1, 0));
    assert_eq!(report.tiles_fetched, 12);

    let page = sources(tmp.path(), &cat).join("0001.jpg");
    assert_eq!(image::image_dimensions(&page).unwrap(), (3000, 4000));
}

#[tokio::test]
async fn missing_tile_triggers_one_full_retry() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 3000, 4000)]);
    // Column 1, row 2 fails on the first pass only.
    let mock = MockTiles::with_rule(|url, seen| {
        (url.contains("/1024,2048,1024,1024/") && seen == 0).then(|| TileResponse::Status(500))
    });

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!(mock.requests(), 24);
    assert_eq!((report.saved, report.recovered), (1, 1));
    assert!(sources(tmp.path(), &cat).join("0001.jpg").exists());
}

#[tokio::test]
async fn page_still_incomplete_after_retry_is_not_written() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 3000, 4000), ("2", 100, 100)]);
    let mock = MockTiles::with_rule(|url, _| {
        (url.contains("_1/") && url.contains("/2048,3072,")).then(|| TileResponse::BrokenBody("reset".into()))
    });

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!(report.incomplete, 1);
    assert_eq!(report.saved, 1, "the sibling page is unaffected");
    assert_eq!(mock.requests(), 24 + 1);
    assert!(!sources(tmp.path(), &cat).join("0001.jpg").exists());
    assert!(sources(tmp.path(), &cat).join("0002.jpg").exists());
}

#[tokio::test]
async fn attempts_are_configurable() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 2000, 100)]);
    let mock = MockTiles::with_rule(|url, seen| {
        (url.contains("/1024,0,") && seen < 2).then(|| TileResponse::Status(502))
    });
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .workers(1)
        .max_page_attempts(3)
        .build()
        .unwrap();

    let report = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();
    // Two tiles per attempt; the second tile arrives on the third attempt.
    assert_eq!(mock.requests(), 6);
    assert_eq!((report.saved, report.recovered), (1, 1));
}

#[tokio::test]
async fn retry_that_returns_no_tiles_is_still_incomplete() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 2000, 100)]);
    // First pass: only the right-hand tile fails. Second pass: everything fails.
    let mock = MockTiles::with_rule(|url, seen| {
        (url.contains("/1024,0,") || seen >= 1).then(|| TileResponse::Status(500))
    });

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!(mock.requests(), 4);
    assert_eq!(
        (report.saved, report.empty, report.incomplete),
        (0, 0, 1)
    );
    assert_eq!(report.missing(), 1);
    assert!(!sources(tmp.path(), &cat).join("0001.jpg").exists());
}

#[tokio::test]
async fn page_without_any_tile_is_empty() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2"]);
    let mock = MockTiles::with_rule(|url, _| url.contains("_2/").then(|| TileResponse::Status(404)));

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!((report.saved, report.empty), (1, 1));
    assert_eq!(mock.requests(), 2, "an empty page is not retried");
}

#[tokio::test]
async fn undecodable_tile_counts_as_missing() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let mock = MockTiles::with_rule(|_, _| Some(TileResponse::Body(b"<html>oops</html>".to_vec())));

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();

    assert_eq!(report.empty, 1);
    assert_eq!(report.tiles_fetched, 0);
}

#[tokio::test]
async fn incomplete_cover_is_skipped_without_retry() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("C1", 2000, 1000), ("1", 60, 80)]);
    let mock = MockTiles::with_rule(|url, _| {
        (url.contains("_C1/") && url.contains("/1024,0,")).then(|| TileResponse::Status(500))
    });
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .workers(1)
        .include_covers(true)
        .build()
        .unwrap();

    let report = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();

    assert_eq!(report.skipped_incomplete, 1);
    assert_eq!(report.saved, 1);
    assert_eq!(mock.requests(), 2 + 1);
    assert!(!sources(tmp.path(), &cat).join("C1.jpg").exists());
}

#[tokio::test]
async fn covers_are_only_fetched_on_request() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["C1", "1", "2", "C3"]);
    let mock = MockTiles::serving();

    let report = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();
    assert_eq!(report.requested, 2);
    assert_eq!(mock.requests(), 2);
    assert!(!sources(tmp.path(), &cat).join("C1.jpg").exists());
}

#[tokio::test]
async fn resize_scales_saved_page() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, false, &[("1", 1600, 1200)]);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .resize_percent(50)
        .build()
        .unwrap();

    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let page = sources(tmp.path(), &cat).join("0001.jpg");
    assert_eq!(image::image_dimensions(&page).unwrap(), (800, 600));
}

#[tokio::test]
async fn serial_media_use_three_digit_labels() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Newspaper, false, &[("7", 60, 80)]);
    download_with_source(&cat, &config(tmp.path()), MockTiles::serving())
        .await
        .unwrap();
    assert!(sources(tmp.path(), &cat).join("007.jpg").exists());
}

// ── Fatal outcomes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn restricted_work_stops_after_first_denied_tile() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let pages: Vec<(&str, u32, u32)> = ["1", "2", "3", "4", "5"]
        .iter()
        .map(|k| (*k, 2000, 3000))
        .collect();
    let cat = catalog(MediaCategory::Book, true, &pages);
    let mock = MockTiles::with_rule(|_, _| Some(TileResponse::Status(403)));

    let err = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap_err();

    assert_eq!(mock.requests(), 1);
    match err {
        TileBookError::AccessDenied { media_id, access } => {
            assert_eq!(media_id, "digibok_2008040300039");
            assert_eq!(access, "norge");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    assert!(WorkDir::new(tmp.path(), &cat.media_id)
        .scan_artifacts()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn one_denied_page_stops_the_batch() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3", "4", "5"]);
    let mock = MockTiles::with_rule(|url, _| url.contains("_3/").then(|| TileResponse::Status(403)));

    let err = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, TileBookError::AccessDenied { ref access, .. } if access == "norge"));
    assert_eq!(mock.requests(), 3);
    {
        let hits = mock.hits.lock().unwrap();
        assert!(
            !hits.keys().any(|u| u.contains("_4/") || u.contains("_5/")),
            "pages after the denied one were requested"
        );
    }
    let on_disk: Vec<PageKey> = WorkDir::new(tmp.path(), &cat.media_id)
        .scan_artifacts()
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(on_disk.len(), 2);
    assert!(on_disk.contains(&PageKey::Numeric(1)));
    assert!(on_disk.contains(&PageKey::Numeric(2)));
}

#[tokio::test]
async fn restricted_work_uses_small_tiles() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(MediaCategory::Book, true, &[("1", 1024, 1024)]);
    let mock = MockTiles::serving();
    download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap();
    assert_eq!(mock.requests(), 4);
}

#[tokio::test]
async fn unanswered_request_is_connection_timeout() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3"]);
    let mock = MockTiles::with_rule(|url, _| {
        url.contains("_2/").then(|| TileResponse::NoResponse("operation timed out".into()))
    });

    let err = download_with_source(&cat, &config(tmp.path()), mock.clone())
        .await
        .unwrap_err();

    match err {
        TileBookError::ConnectionTimeout { page, url, .. } => {
            assert_eq!(page, "0002");
            assert!(url.contains("_2/"));
        }
        other => panic!("expected ConnectionTimeout, got {other:?}"),
    }
    assert_eq!(mock.requests(), 2, "page 3 is never started");
}

#[tokio::test]
async fn denied_batch_with_parallel_workers_stops_quickly() {
    let tmp = TempDir::new().unwrap();
    let keys: Vec<String> = (1..=40).map(|n| n.to_string()).collect();
    let pages: Vec<(&str, u32, u32)> = keys.iter().map(|k| (k.as_str(), 60, 80)).collect();
    let cat = catalog(MediaCategory::Book, false, &pages);
    let mock = MockTiles::with_rule(|_, _| Some(TileResponse::Status(403)));
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .workers(4)
        .build()
        .unwrap();

    let err = download_with_source(&cat, &cfg, mock.clone()).await.unwrap_err();
    assert!(matches!(err, TileBookError::AccessDenied { .. }));
    assert!(mock.requests() <= 4, "got {} requests", mock.requests());
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_skips_complete_work() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3"]);
    let cfg = config(tmp.path());
    let mock = MockTiles::serving();

    let first = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();
    assert_eq!(first.saved, 3);
    assert_eq!(mock.requests(), 3);

    let second = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();
    assert_eq!(second.status, BatchStatus::SkippedComplete);
    assert_eq!(second.skipped, 3);
    assert_eq!(mock.requests(), 3, "nothing fetched on resume");

    std::fs::remove_file(sources(tmp.path(), &cat).join("0002.jpg")).unwrap();
    let third = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();
    assert_eq!(third.status, BatchStatus::Downloaded);
    assert_eq!((third.saved, third.skipped), (1, 2));
    assert_eq!(mock.requests(), 4);
}

#[tokio::test]
async fn partial_file_does_not_count_as_done() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let dir = sources(tmp.path(), &cat);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("0001.jpg.part"), b"half a jpeg").unwrap();

    let report = download_with_source(&cat, &config(tmp.path()), MockTiles::serving())
        .await
        .unwrap();
    assert_eq!(report.saved, 1);
    assert!(!dir.join("0001.jpg.part").exists());
}

#[tokio::test]
async fn empty_selection_is_success_without_requests() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3"]);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .pages(PageRange::new(Some(50), Some(60)))
        .build()
        .unwrap();
    let mock = MockTiles::serving();

    let report = download_with_source(&cat, &cfg, mock.clone()).await.unwrap();
    assert_eq!(report.status, BatchStatus::Downloaded);
    assert_eq!(report.requested, 0);
    assert_eq!(mock.requests(), 0);
}

#[tokio::test]
async fn page_range_limits_numbered_pages() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3", "4", "5"]);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .pages(PageRange::new(Some(2), Some(4)))
        .build()
        .unwrap();

    let report = download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    assert_eq!(report.saved, 3);
    let mut keys: Vec<PageKey> = WorkDir::new(tmp.path(), &cat.media_id)
        .scan_artifacts()
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    keys.sort_by_key(|k| k.number());
    assert_eq!(keys, vec![PageKey::Numeric(2), PageKey::Numeric(3), PageKey::Numeric(4)]);
}

#[tokio::test]
async fn metadata_written_after_batch() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2"]);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .folder_name("Sult av Hamsun")
        .build()
        .unwrap();

    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let work = WorkDir::new(tmp.path(), "Sult av Hamsun");
    assert_eq!(work.folder(), "Sult_av_Hamsun");
    let meta = WorkMetadata::load(&work).await.unwrap();
    assert_eq!(meta.media_id, "digibok_2008040300039");
    assert_eq!(meta.custom_title.as_deref(), Some("Sult av Hamsun"));
    assert_eq!(meta.pages, 2);
}

// ── Events and streaming ─────────────────────────────────────────────────────

#[tokio::test]
async fn progress_events_follow_the_batch() {
    let tmp = TempDir::new().unwrap();
    let cat = catalog(
        MediaCategory::Book,
        false,
        &[("1", 60, 80), ("2", 60, 80), ("3", 2000, 80)],
    );
    let events = Arc::new(EventCounter::default());
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .echo_urls(true)
        .echo_errors(true)
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let mock = MockTiles::with_rule(|url, seen| {
        (url.contains("_3/") && url.contains("/1024,0,") && seen == 0)
            .then(|| TileResponse::Status(503))
    });

    download_with_source(&cat, &cfg, mock).await.unwrap();

    assert_eq!(events.starts.load(Ordering::SeqCst), 3);
    assert_eq!(events.completes.load(Ordering::SeqCst), 3);
    assert_eq!(events.retries.load(Ordering::SeqCst), 1);
    assert_eq!(events.tile_errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.urls.load(Ordering::SeqCst), 1 + 1 + 2 + 2);
    assert_eq!(events.batch_completes.load(Ordering::SeqCst), 1);
}

#[test]
fn page_stream_reports_every_page() {
    tokio_test::block_on(async {
        let tmp = TempDir::new().unwrap();
        let cat = small_book(&["1", "2", "3", "4"]);
        let cfg = config(tmp.path());
        let work = WorkDir::for_catalog(&cat, &cfg);
        work.ensure_dirs().await.unwrap();
        let ctx = Arc::new(PageContext::new(&cat, &cfg, work, MockTiles::serving()));

        let reports: Vec<_> = page_stream(cat.pages.clone(), ctx, 3).collect().await;
        let mut labels: Vec<String> = reports.iter().map(|r| r.label.clone()).collect();
        labels.sort();
        assert_eq!(labels, ["0001", "0002", "0003", "0004"]);
        assert!(reports.iter().all(|r| r.outcome.is_saved()));
    });
}

#[tokio::test]
async fn cancelled_context_starts_no_page() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2"]);
    let cfg = config(tmp.path());
    let mock = MockTiles::serving();
    let ctx = Arc::new(PageContext::new(
        &cat,
        &cfg,
        WorkDir::for_catalog(&cat, &cfg),
        mock.clone(),
    ));
    ctx.cancel();

    let reports: Vec<_> = page_stream(cat.pages.clone(), ctx, 2).collect().await;
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, PageOutcome::Cancelled)));
    assert_eq!(mock.requests(), 0);
}

// ── Document assembly ────────────────────────────────────────────────────────

const ALL_KEYS: [&str; 8] = ["C3", "10", "I1", "2", "C1", "C2", "1", "I3"];

#[tokio::test]
async fn document_order_with_front_and_back_matter() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&ALL_KEYS);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .include_covers(true)
        .build()
        .unwrap();
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let encoder = Arc::new(RecordingEncoder::default());
    let report = build_document_with(&cat, &cfg, MockTiles::serving(), encoder.clone(), None)
        .await
        .unwrap();

    assert_eq!(
        *encoder.pages.lock().unwrap(),
        ["C1", "I1", "0001", "0002", "0010", "I3", "C2", "C3"]
    );
    assert_eq!(report.pages, 8);
    assert_eq!(
        report.path,
        WorkDir::new(tmp.path(), &cat.media_id).document_path()
    );
    assert!(report.recovered.is_empty());
}

#[tokio::test]
async fn document_order_without_matter() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&ALL_KEYS);
    let with_covers = DownloadConfig::builder()
        .output_root(tmp.path())
        .include_covers(true)
        .build()
        .unwrap();
    download_with_source(&cat, &with_covers, MockTiles::serving())
        .await
        .unwrap();

    let encoder = Arc::new(RecordingEncoder::default());
    build_document_with(
        &cat,
        &config(tmp.path()),
        MockTiles::serving(),
        encoder.clone(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(*encoder.pages.lock().unwrap(), ["0001", "0002", "0010"]);
}

#[tokio::test]
async fn pdf_has_one_page_per_artifact() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let out = tmp.path().join("out").join("sult.pdf");
    let report = build_document_with(
        &cat,
        &cfg,
        MockTiles::serving(),
        Arc::new(PdfEncoder::default()),
        Some(out.clone()),
    )
    .await
    .unwrap();

    assert_eq!(report.path, out);
    let doc = lopdf::Document::load(&out).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[tokio::test]
async fn corrupt_page_is_refetched_once() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2", "3"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    let page2 = sources(tmp.path(), &cat).join("0002.jpg");
    std::fs::write(&page2, b"\xFF\xD8 truncated").unwrap();

    let mock = MockTiles::serving();
    let encoder = Arc::new(RecordingEncoder::default());
    let report = build_document_with(&cat, &cfg, mock.clone(), encoder.clone(), None)
        .await
        .unwrap();

    assert_eq!(report.recovered, vec![PageKey::Numeric(2)]);
    assert_eq!(mock.requests(), 1);
    assert_eq!(image::image_dimensions(&page2).unwrap(), (60, 80));
    assert_eq!(encoder.pages.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn corrupt_page_that_cannot_be_refetched_aborts() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    std::fs::write(sources(tmp.path(), &cat).join("0001.jpg"), b"garbage").unwrap();

    let failing = MockTiles::with_rule(|_, _| Some(TileResponse::Status(500)));
    let encoder = Arc::new(RecordingEncoder::default());
    let err = build_document_with(&cat, &cfg, failing, encoder.clone(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, TileBookError::CorruptArtifact { ref page, .. } if page == "0001"));
    assert!(encoder.pages.lock().unwrap().is_empty(), "encoder never ran");
    assert!(!WorkDir::new(tmp.path(), &cat.media_id).document_path().exists());
}

#[tokio::test]
async fn denied_refetch_reports_access_level() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1", "2"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    std::fs::write(sources(tmp.path(), &cat).join("0001.jpg"), b"garbage").unwrap();

    let denied = MockTiles::with_rule(|_, _| Some(TileResponse::Status(403)));
    let encoder = Arc::new(RecordingEncoder::default());
    let err = build_document_with(&cat, &cfg, denied.clone(), encoder.clone(), None)
        .await
        .unwrap_err();

    match err {
        TileBookError::AccessDenied { media_id, access } => {
            assert_eq!(media_id, "digibok_2008040300039");
            assert_eq!(access, "norge");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    assert_eq!(denied.requests(), 1);
    assert!(encoder.pages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unanswered_refetch_is_connection_timeout() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    std::fs::write(sources(tmp.path(), &cat).join("0001.jpg"), b"garbage").unwrap();

    let silent = MockTiles::with_rule(|_, _| Some(TileResponse::NoResponse("timed out".into())));
    let err = build_document_with(
        &cat,
        &cfg,
        silent,
        Arc::new(RecordingEncoder::default()),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TileBookError::ConnectionTimeout { ref page, .. } if page == "0001"));
}

#[tokio::test]
async fn corrupt_page_missing_from_catalog_aborts() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();
    std::fs::write(sources(tmp.path(), &cat).join("0009.jpg"), b"garbage").unwrap();

    let mock = MockTiles::serving();
    let err = build_document_with(
        &cat,
        &cfg,
        mock.clone(),
        Arc::new(RecordingEncoder::default()),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TileBookError::CorruptArtifact { ref page, .. } if page == "0009"));
    assert_eq!(mock.requests(), 0);
}

#[tokio::test]
async fn no_pages_on_disk_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let err = build_document_with(
        &cat,
        &config(tmp.path()),
        MockTiles::serving(),
        Arc::new(RecordingEncoder::default()),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TileBookError::NoPages { .. }));
}

#[tokio::test]
async fn failed_encoder_leaves_no_document() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["1"]);
    let cfg = config(tmp.path());
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let err = build_document_with(&cat, &cfg, MockTiles::serving(), Arc::new(FailingEncoder), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TileBookError::EncodeFailed { .. }));

    let work = WorkDir::new(tmp.path(), &cat.media_id);
    assert!(!work.document_path().exists());
    assert_eq!(std::fs::read_dir(work.pdf_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn covers_only_document_is_allowed() {
    let tmp = TempDir::new().unwrap();
    let cat = small_book(&["C1", "C3"]);
    let cfg = DownloadConfig::builder()
        .output_root(tmp.path())
        .include_covers(true)
        .build()
        .unwrap();
    download_with_source(&cat, &cfg, MockTiles::serving())
        .await
        .unwrap();

    let encoder = Arc::new(RecordingEncoder::default());
    build_document_with(&cat, &cfg, MockTiles::serving(), encoder.clone(), None)
        .await
        .unwrap();
    assert_eq!(*encoder.pages.lock().unwrap(), ["C1", "C3"]);
}
