//! Text-orientation confidence using the `tesseract` CLI tool.

use std::{io::ErrorKind, time::Duration};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    errors::RotationError,
    prelude::*,
};

use super::ocr::{OrientationScorer, Score};

/// Words shorter than this are mostly OCR noise from rotated text, so we don't
/// count them.
const MIN_WORD_CHARS: usize = 3;

/// Tesseract's TSV `level` for individual words.
const WORD_LEVEL: &str = "5";

/// Scorer wrapping the `tesseract` CLI tool.
///
/// Each call runs its own `tesseract` process, so this can be shared freely.
pub struct TesseractScorer {
    /// Tesseract language code, like `eng`.
    language: String,
    /// How many qualifying words we need before we'll report a confidence.
    min_words: usize,
    /// How long a single `tesseract` run may take.
    timeout: Duration,
}

impl TesseractScorer {
    /// Create a new `tesseract` scorer.
    pub fn new(language: String, min_words: usize, timeout: Duration) -> Self {
        Self {
            language,
            min_words,
            timeout,
        }
    }
}

#[async_trait]
impl OrientationScorer for TesseractScorer {
    #[instrument(level = "trace", skip_all)]
    async fn score(&self, image: &DynamicImage) -> Result<Score> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let image = image.clone();
        let write_path = input_path.clone();
        spawn_blocking_propagating_panics(move || {
            image
                .save_with_format(&write_path, ImageFormat::Png)
                .context("cannot write tesseract input file")
        })
        .await?;

        // Run tesseract with TSV output on stdout. `--psm 3` is automatic page
        // segmentation without its own orientation detection, which is what we
        // want, because we're doing the rotating ourselves.
        let mut cmd = Command::new("tesseract");
        cmd.arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("3")
            .arg("tsv")
            .kill_on_drop(true);
        let timeout = self.timeout;
        let output = with_cpu_semaphore(|| async {
            match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(output) => output.context("cannot run tesseract").map(Some),
                Err(_) => Ok(None),
            }
        })
        .await?;
        let Some(output) = output else {
            warn!(timeout = ?timeout, "tesseract timed out");
            return Ok(Score::TimedOut);
        };
        check_for_command_failure("tesseract", &output, None)?;

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(score_tsv(&tsv, self.min_words))
    }
}

/// Compute a [`Score`] from Tesseract's TSV output.
///
/// We average the confidence of every word with at least [`MIN_WORD_CHARS`]
/// alphanumeric characters. Rotated text tends to come back as short fragments
/// with low confidence, so this separates upright text from the rest quite
/// well.
fn score_tsv(tsv: &str, min_words: usize) -> Score {
    let mut total = 0.0_f32;
    let mut count = 0_usize;
    // The first line is a header.
    for line in tsv.lines().skip(1) {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < 12 || fields[0] != WORD_LEVEL {
            continue;
        }
        let Ok(confidence) = fields[10].trim().parse::<f32>() else {
            continue;
        };
        let alphanumeric = fields[11].chars().filter(|c| c.is_alphanumeric()).count();
        if confidence < 0.0 || alphanumeric < MIN_WORD_CHARS {
            continue;
        }
        total += confidence;
        count += 1;
    }
    if count == 0 || count < min_words {
        Score::NoText
    } else {
        Score::Confidence(total / count as f32)
    }
}

/// Make sure the tools needed for OCR are installed, along with Tesseract
/// data for `language`.
///
/// For the tools themselves, we only check that they run. Their exit codes for
/// `--version` vary between releases.
#[instrument(level = "debug")]
pub async fn check_ocr_tools(language: &str) -> Result<()> {
    check_tool("pdftocairo", "-v").await?;
    let version = check_tool("tesseract", "--version").await?;
    debug!(version = %first_line(&version), "Found tesseract");

    let listing = check_tool("tesseract", "--list-langs").await?;
    let missing = missing_languages(language, &installed_languages(&listing));
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RotationError::OcrUnavailable {
            tool: "tesseract",
            reason: format!("no language data installed for {}", missing.join(", ")),
        }
        .into())
    }
}

/// Run `tool` with `arg`, returning whatever it printed.
///
/// Some tools print version information on stderr, so we fall back to that.
async fn check_tool(tool: &'static str, arg: &str) -> Result<String> {
    match Command::new(tool).arg(arg).output().await {
        Ok(output) => Ok(String::from_utf8_lossy(if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        })
        .into_owned()),
        Err(err) => {
            let reason = if err.kind() == ErrorKind::NotFound {
                "not found on PATH".to_owned()
            } else {
                err.to_string()
            };
            Err(RotationError::OcrUnavailable { tool, reason }.into())
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Parse the output of `tesseract --list-langs`, which is a header line
/// followed by one language code per line.
fn installed_languages(listing: &str) -> Vec<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of"))
        .collect()
}

/// Which parts of a language list like `eng+deu` aren't installed?
fn missing_languages<'a>(language: &'a str, installed: &[&str]) -> Vec<&'a str> {
    language
        .split('+')
        .map(str::trim)
        .filter(|lang| !lang.is_empty() && !installed.contains(lang))
        .collect()
}
