//! Rasterize individual PDF pages using Poppler's `pdftocairo` CLI tool.

use std::sync::LazyLock;

use image::DynamicImage;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

/// Lines on standard error which mean rendering failed, even if `pdftocairo`
/// exited successfully.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about broken cross-reference tables that it successfully
/// repairs. These aren't worth failing over.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Render one page (1-based `page_number`) of a PDF at `dpi`.
///
/// The PNG produced by `pdftocairo` only lives in a temporary directory for
/// the duration of this call. Poppler applies the page's `/Rotate`, so the
/// result is what a viewer would show.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), page = page_number, dpi))]
pub async fn render_page(path: &Path, page_number: usize, dpi: u32) -> Result<DynamicImage> {
    let tmpdir = tempfile::TempDir::with_prefix("render")?;
    let out_prefix = tmpdir.path().join("page");
    let page_arg = page_number.to_string();

    let mut cmd = Command::new("pdftocairo");
    cmd.arg("-png")
        .arg("-singlefile")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(&page_arg)
        .arg("-l")
        .arg(&page_arg)
        .arg(path)
        .arg(&out_prefix)
        .kill_on_drop(true);

    // `pdftocairo` will use _at least_ 100% of a CPU.
    let output = with_cpu_semaphore(|| async {
        cmd.output().await.with_context(|| {
            format!("failed to run pdftocairo on {:?}", path.display())
        })
    })
    .await?;
    check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

    let png_path = out_prefix.with_extension("png");
    let image = spawn_blocking_propagating_panics(move || {
        let image = image::open(&png_path).with_context(|| {
            format!("failed to read rendered page {:?}", png_path.display())
        });
        // Keep the directory alive until we've decoded the PNG.
        drop(tmpdir);
        image
    })
    .await?;
    trace!(width = image.width(), height = image.height(), "Rendered page");
    Ok(image)
}
