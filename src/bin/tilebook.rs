//! CLI binary for tilebook.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `DownloadConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tilebook::{
    build_document, download_work, BatchStatus, Catalog, DownloadConfig, DownloadProgressCallback,
    MediaCategory, PageOutcome, PageRange, ProgressCallback,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live page counter plus one log line per
/// finished page. Pages finish out of order, so lines carry the page label.
///
/// With the bar disabled the same lines go straight to stderr; that keeps
/// `--url` / `--error` echo working under `--no-progress`.
struct CliProgressCallback {
    bar: ProgressBar,
    problems: AtomicUsize,
}

impl CliProgressCallback {
    fn new(show_bar: bool) -> Arc<Self> {
        let bar = if show_bar {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(TICKS),
            );
            bar.set_prefix("Preparing");
            bar.set_message("Checking existing pages…");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        } else {
            ProgressBar::hidden()
        };

        Arc::new(Self {
            bar,
            problems: AtomicUsize::new(0),
        })
    }

    fn line(&self, msg: String) {
        if self.bar.is_hidden() {
            eprintln!("{msg}");
        } else {
            self.bar.println(msg);
        }
    }

    fn activate_bar(&self, total: usize, prefix: &'static str, unit: &str) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>4}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_position(0);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }
}

impl DownloadProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, skipped: usize) {
        self.activate_bar(total, "Downloading", "pages");
        let mut msg = format!("Fetching {total} pages");
        if skipped > 0 {
            msg.push_str(&format!(" ({skipped} already on disk)"));
        }
        self.line(format!("{} {}", cyan("◆"), bold(&msg)));
    }

    fn on_page_start(&self, page: &str) {
        self.bar.set_message(format!("page {page}"));
    }

    fn on_tile_url(&self, page: &str, url: &str) {
        self.line(format!("  {} {}", dim(page), dim(url)));
    }

    fn on_tile_error(&self, page: &str, column: u32, row: u32, error: &str) {
        self.line(format!(
            "  {} Page {page} tile {column},{row}: {}",
            yellow("!"),
            red(error)
        ));
    }

    fn on_page_retry(&self, page: &str, attempt: u32, fetched: usize, expected: usize) {
        self.line(format!(
            "  {} Page {page}  failed ({fetched}/{expected} tiles), retrying {}",
            yellow("↻"),
            dim(&format!("(attempt {attempt})"))
        ));
    }

    fn on_page_complete(&self, page: &str, outcome: &PageOutcome) {
        let mark = match outcome {
            PageOutcome::Saved { .. } => green("✓"),
            PageOutcome::Empty | PageOutcome::SkippedIncomplete { .. } => dim("–"),
            PageOutcome::Cancelled => dim("·"),
            _ => {
                self.problems.fetch_add(1, Ordering::SeqCst);
                red("✗")
            }
        };
        let text = outcome.to_string();
        let text = if outcome.is_saved() { dim(&text) } else { text };
        self.line(format!("  {mark} Page {page:>4}  {text}"));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, completed: usize, total: usize) {
        self.bar.finish_and_clear();
        let problems = self.problems.load(Ordering::SeqCst);
        if problems == 0 {
            eprintln!("{} {completed}/{total} pages done", green("✔"));
        } else {
            eprintln!(
                "{} {completed}/{total} pages done  ({} with problems)",
                cyan("⚠"),
                red(&problems.to_string())
            );
        }
    }

    fn on_document_page(&self, page: &str, index: usize, total: usize) {
        if index == 1 {
            self.activate_bar(total, "Building", "pages");
        }
        self.bar.set_message(format!("page {page}"));
        self.bar.set_position(index as u64);
    }

    fn on_document_complete(&self, path: &Path, pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {pages} pages  →  {}",
            green("✔"),
            bold(&path.display().to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Download every numbered page of a work described by a JSON catalog
  tilebook digibok_2008040300039.json

  # Include covers/inserts, pages 5 to 20, then build the PDF
  tilebook --cover --from 5 --to 20 --pdf catalog.json

  # Catalog from an already-fetched IIIF manifest
  tilebook --manifest --id digibok_2008040300039 --category digibok manifest.json

  # Rebuild the PDF from pages already on disk
  tilebook --pdf-only catalog.json

  # Half-size pages, echo every tile URL and tile error
  tilebook --resize 50 --url --error catalog.json

LAYOUT:
  <output-dir>/<name>/sources/<page>.jpg   one stitched JPEG per page
  <output-dir>/<name>/pdf/<name>.pdf       assembled document
  <output-dir>/<name>/metadata/            last batch metadata

  A page whose JPEG exists is never fetched again; delete it to refetch.

ENVIRONMENT VARIABLES:
  TILEBOOK_OUTPUT       Output root directory
  TILEBOOK_WORKERS      Pages downloaded in parallel
  TILEBOOK_TIMEOUT      Per-tile request timeout in seconds
  TILEBOOK_USER_AGENT   User-Agent header for tile requests
  RUST_LOG              Overrides the log filter
"#;

/// Download tiled scanned works and assemble them into PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "tilebook",
    version,
    about = "Download tiled scanned works page by page and assemble them into PDFs",
    long_about = "Download every page of a scanned work from an IIIF tile service, stitch the \
tiles of each page into one JPEG, resume interrupted runs from the pages already on disk, and \
bind the pages into a single PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Catalog JSON file (or an IIIF manifest with --manifest).
    catalog: PathBuf,

    /// Read CATALOG as an IIIF Presentation 2 manifest.
    #[arg(long, requires = "id")]
    manifest: bool,

    /// Media id for --manifest input.
    #[arg(long)]
    id: Option<String>,

    /// Media category tag for --manifest input (digibok, digavis, digikart, …).
    #[arg(long, default_value = "digibok")]
    category: String,

    /// Treat a --manifest work as restricted (small tiles).
    #[arg(long)]
    restricted: bool,

    /// Root directory for downloaded works.
    #[arg(short, long, env = "TILEBOOK_OUTPUT")]
    output_dir: Option<PathBuf>,

    /// Custom folder name for the work (sanitised).
    #[arg(short, long)]
    name: Option<String>,

    /// Name the work folder after the catalog title.
    #[arg(long, conflicts_with = "name")]
    title: bool,

    /// Also download covers and inserts (C1, I1, I3, C2, C3).
    #[arg(short, long)]
    cover: bool,

    /// First numbered page to download.
    #[arg(long)]
    from: Option<u32>,

    /// Last numbered page to download.
    #[arg(long)]
    to: Option<u32>,

    /// Downscale pages to this percentage (1–100).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    resize: Option<u32>,

    /// JPEG quality for saved pages (1–100).
    #[arg(long, default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Build the PDF after downloading.
    #[arg(long)]
    pdf: bool,

    /// Only build the PDF from pages already on disk.
    #[arg(long, conflicts_with = "pdf")]
    pdf_only: bool,

    /// Write the PDF here instead of <work>/pdf/<name>.pdf.
    #[arg(long)]
    pdf_output: Option<PathBuf>,

    /// Pages downloaded in parallel (default: 2 × CPUs).
    #[arg(short, long, env = "TILEBOOK_WORKERS")]
    workers: Option<usize>,

    /// Per-tile request timeout in seconds.
    #[arg(long, env = "TILEBOOK_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Attempts per numbered page when tiles are missing.
    #[arg(long, default_value_t = 2)]
    attempts: u32,

    /// User-Agent header for tile requests.
    #[arg(long, env = "TILEBOOK_USER_AGENT", default_value = "Mozilla/5.0")]
    user_agent: String,

    /// Print every tile URL as it is requested.
    #[arg(long)]
    url: bool,

    /// Print every failed tile.
    #[arg(long)]
    error: bool,

    /// Print the batch/document report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "TILEBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TILEBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Catalog + config ─────────────────────────────────────────────────
    let catalog = load_catalog(&cli)?;

    let progress_cb: Option<ProgressCallback> = if cli.quiet {
        None
    } else {
        let cb = CliProgressCallback::new(show_progress);
        Some(cb as Arc<dyn DownloadProgressCallback>)
    };
    let config = build_config(&cli, progress_cb)?;

    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {}  {}",
            cyan("◆"),
            bold(catalog.title.as_deref().unwrap_or(&catalog.media_id)),
            dim(&format!(
                "{} · {} pages in catalog",
                catalog.category.tag(),
                catalog.pages.len()
            ))
        );
    }

    // ── Download ─────────────────────────────────────────────────────────
    let batch = if cli.pdf_only {
        None
    } else {
        let report = download_work(&catalog, &config)
            .await
            .with_context(|| format!("Download of {} failed", catalog.media_id))?;

        if !cli.quiet && !cli.json {
            match report.status {
                BatchStatus::SkippedComplete => eprintln!(
                    "{} All {} requested pages are already downloaded",
                    green("✔"),
                    report.requested
                ),
                BatchStatus::Downloaded if report.requested == 0 => {
                    eprintln!("{} Nothing to download", dim("–"))
                }
                BatchStatus::Downloaded => eprintln!(
                    "{}  {} saved  {} skipped  {} missing  {}ms",
                    if report.missing() == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    report.saved,
                    report.skipped,
                    report.missing(),
                    report.duration_ms,
                ),
            }
        }
        Some(report)
    };

    // ── Build document ───────────────────────────────────────────────────
    let document = if cli.pdf || cli.pdf_only {
        let doc = build_document(&catalog, &config, cli.pdf_output.clone())
            .await
            .context("Failed to build document")?;
        Some(doc)
    } else {
        None
    };

    if cli.json {
        let out = serde_json::json!({
            "media_id": catalog.media_id,
            "batch": batch,
            "document": document,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialise report")?
        );
    }

    Ok(())
}

/// Read the catalog named on the command line.
fn load_catalog(cli: &Cli) -> Result<Catalog> {
    if !cli.manifest {
        return Catalog::from_json_file(&cli.catalog)
            .with_context(|| format!("Failed to load catalog {:?}", cli.catalog));
    }

    let text = std::fs::read_to_string(&cli.catalog)
        .with_context(|| format!("Failed to read manifest {:?}", cli.catalog))?;
    let manifest: serde_json::Value =
        serde_json::from_str(&text).context("Manifest is not valid JSON")?;
    let media_id = cli
        .id
        .clone()
        .context("--manifest needs --id")?;

    let mut catalog =
        Catalog::from_iiif_manifest(media_id, MediaCategory::from_tag(&cli.category), &manifest)
            .context("Failed to read manifest")?;
    catalog.restricted = cli.restricted;
    Ok(catalog)
}

/// Map CLI args to `DownloadConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DownloadConfig> {
    let mut builder = DownloadConfig::builder()
        .include_covers(cli.cover)
        .folder_from_title(cli.title)
        .pages(PageRange::new(cli.from, cli.to))
        .jpeg_quality(cli.quality)
        .tile_timeout_secs(cli.timeout)
        .max_page_attempts(cli.attempts)
        .user_agent(cli.user_agent.clone())
        .echo_urls(cli.url)
        .echo_errors(cli.error);

    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_root(dir);
    }
    if let Some(ref name) = cli.name {
        builder = builder.folder_name(name);
    }
    if let Some(percent) = cli.resize {
        builder = builder.resize_percent(percent);
    }
    if let Some(workers) = cli.workers {
        builder = builder.workers(workers);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
