use std::str::FromStr;

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{
    analyzers::{AnalyzerOpts, analyzer_for_opts},
    batch::{BatchOpts, run_batch},
    inputs::resolve_inputs,
    prelude::*,
    ui::Ui,
};

mod analyzers;
mod async_utils;
mod batch;
mod cpu_limit;
mod errors;
mod inputs;
mod pdf;
mod prelude;
mod render;
mod rewriter;
mod rotation;
mod ui;

/// Fix rotated pages in PDF files.
///
/// Writes a corrected copy of each PDF next to the original, named
/// `<name><SUFFIX>.pdf`. The original is never modified.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Strategies:
  - metadata: Reset every page's /Rotate attribute to 0°.
  - ocr: Render each page and use Tesseract to find which way up the text
    reads. Requires `pdftocairo` (poppler-utils) and `tesseract` on PATH.

Options may also be set using FIX_PDF_ROTATION_* environment variables,
which may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// A PDF file, or a directory of PDF files.
    path: PathBuf,

    /// Appended to each file name (before the extension) to name the output.
    #[clap(default_value = "_fixed", value_parser = parse_suffix)]
    suffix: String,

    /// Also process PDFs in subdirectories.
    #[clap(short, long)]
    recursive: bool,

    /// Write an output file even if no pages needed correcting.
    #[clap(long)]
    write_unchanged: bool,

    /// Max number of documents to process at a time. Defaults to the number
    /// of CPUs.
    #[clap(short = 'j', long = "jobs", env = "FIX_PDF_ROTATION_JOBS")]
    job_count: Option<usize>,

    /// Write a JSON report of every document and page to this path.
    #[clap(long, env = "FIX_PDF_ROTATION_REPORT")]
    report: Option<PathBuf>,

    #[clap(flatten)]
    analyzer_opts: AnalyzerOpts,
}

/// Reject suffixes which would make the output overwrite the input.
fn parse_suffix(suffix: &str) -> Result<String> {
    if suffix.is_empty() {
        Err(anyhow!("the output suffix must not be empty"))
    } else if suffix.contains(std::path::is_separator) {
        Err(anyhow!("the output suffix must not contain a path separator"))
    } else {
        Ok(suffix.to_owned())
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Configuration problems are fatal, and we report them before touching any
    // documents.
    let analyzer = analyzer_for_opts(&opts.analyzer_opts).await?;
    let paths = resolve_inputs(&opts.path, opts.recursive)?;

    let batch_opts = BatchOpts {
        suffix: opts.suffix.clone(),
        write_unchanged: opts.write_unchanged,
        jobs: opts.job_count.unwrap_or_else(num_cpus::get),
    };
    let summary = run_batch(&ui, paths, analyzer, &batch_opts).await;
    ui.hide_progress_bars();
    summary.display(&ui);

    if let Some(report_path) = &opts.report {
        summary.write_json(report_path).await?;
        info!(path = %report_path.display(), "Wrote report");
    }

    summary.check_success()
}
