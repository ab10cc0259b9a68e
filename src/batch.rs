//! Run analysis and rewriting over a list of documents.
//!
//! Each document moves through Analyzing → Rewriting → Done, and can fail at
//! either step. A failure is recorded in that document's [`DocumentReport`]
//! and never stops the rest of the batch.

use std::{fmt, sync::Arc};

use futures::{StreamExt as _, TryStreamExt as _, stream};

use crate::{
    analyzers::{OrientationAnalyzer, OrientationDecision},
    pdf::PdfDocument,
    prelude::*,
    rewriter::{copy_unchanged, output_path_for, rewrite_document},
    ui::{ProgressConfig, Ui},
};

/// Options for a batch run.
#[derive(Clone, Debug)]
pub struct BatchOpts {
    /// Appended to each file stem to name the output.
    pub suffix: String,
    /// Write an output file even when no page needed correcting.
    pub write_unchanged: bool,
    /// Max number of documents to process at a time.
    pub jobs: usize,
}

/// Where a document was when it failed.
#[derive(Clone, Copy, Debug)]
enum Stage {
    Naming,
    Analyzing,
    Rewriting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Naming => write!(f, "cannot name output"),
            Stage::Analyzing => write!(f, "analysis failed"),
            Stage::Rewriting => write!(f, "rewrite failed"),
        }
    }
}

/// What happened to a document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// Every page was already upright, or couldn't be judged.
    Unchanged,
    /// At least one page was rotated, and a corrected copy was written.
    Corrected,
    /// Something went wrong.
    Failed { reason: String },
}

/// The result of processing one document.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentReport {
    /// The input document.
    pub path: PathBuf,
    /// The file we wrote, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// What happened.
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
    /// Per-page decisions. Empty if we failed before analysis finished.
    pub pages: Vec<OrientationDecision>,
}

impl DocumentReport {
    fn failed(path: &Path, stage: Stage, err: &anyhow::Error) -> Self {
        Self {
            path: path.to_owned(),
            output: None,
            outcome: DocumentOutcome::Failed {
                reason: format!("{}: {:#}", stage, err),
            },
            pages: vec![],
        }
    }

    /// Pages whose rotation we changed.
    pub fn corrected_pages(&self) -> impl Iterator<Item = &OrientationDecision> {
        self.pages.iter().filter(|d| d.needs_rewrite())
    }

    /// Pages we couldn't judge.
    pub fn inconclusive_pages(&self) -> impl Iterator<Item = &OrientationDecision> {
        self.pages.iter().filter(|d| d.is_inconclusive())
    }

    /// Describe this report for a human.
    fn display(&self, ui: &Ui) {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy());
        ui.display_message("📄", &format!("Processing: {}", name));
        for decision in self.corrected_pages() {
            ui.display_message(
                "  ",
                &format!(
                    "Page {}: correcting rotation from {} to {}",
                    decision.page_index + 1,
                    decision.current,
                    decision.target
                ),
            );
        }
        for decision in self.inconclusive_pages() {
            ui.display_message(
                "  ",
                &format!(
                    "Page {}: orientation inconclusive ({})",
                    decision.page_index + 1,
                    decision.inconclusive.as_deref().unwrap_or_default()
                ),
            );
        }
        match (&self.outcome, &self.output) {
            (DocumentOutcome::Corrected, Some(output)) => {
                let pages = self
                    .corrected_pages()
                    .map(|d| (d.page_index + 1).to_string())
                    .collect::<Vec<_>>();
                ui.display_message(
                    "  ✓",
                    &format!("Fixed {} page(s): [{}]", pages.len(), pages.join(", ")),
                );
                ui.display_message("  ✓", &format!("Saved to: {}", output.display()));
            }
            (DocumentOutcome::Unchanged, output) => {
                ui.display_message("  ℹ", "No rotation corrections needed");
                if let Some(output) = output {
                    ui.display_message("  ✓", &format!("Copied to: {}", output.display()));
                }
            }
            (DocumentOutcome::Failed { reason }, _) => {
                ui.display_message("  ✗", &format!("Error processing file: {}", reason));
            }
            (DocumentOutcome::Corrected, None) => {}
        }
    }
}

/// Totals for a batch run, plus every document's report.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub corrected: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub documents: Vec<DocumentReport>,
}

impl RunSummary {
    /// Add a document's report to our totals.
    fn record(&mut self, report: DocumentReport) {
        self.processed += 1;
        match report.outcome {
            DocumentOutcome::Unchanged => self.unchanged += 1,
            DocumentOutcome::Corrected => self.corrected += 1,
            DocumentOutcome::Failed { .. } => self.failed += 1,
        }
        self.documents.push(report);
    }

    /// Print our totals.
    pub fn display(&self, ui: &Ui) {
        ui.display_message(
            "📊",
            &format!(
                "Summary: processed {} file(s), corrected {}, unchanged {}, failed {}",
                self.processed, self.corrected, self.unchanged, self.failed
            ),
        );
    }

    /// Fail if any document failed.
    pub fn check_success(&self) -> Result<()> {
        if self.failed > 0 {
            Err(anyhow!(
                "{} of {} document(s) failed",
                self.failed,
                self.processed
            ))
        } else {
            Ok(())
        }
    }

    /// Write this summary as JSON.
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("failed to serialize report")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write report to {:?}", path.display()))
    }
}

/// Process every document in `paths`.
///
/// Documents run concurrently, but reports come back in input order.
#[instrument(level = "debug", skip_all, fields(documents = paths.len(), jobs = opts.jobs))]
pub async fn run_batch(
    ui: &Ui,
    paths: Vec<PathBuf>,
    analyzer: Arc<dyn OrientationAnalyzer>,
    opts: &BatchOpts,
) -> RunSummary {
    ui.display_message("🔎", &format!("Found {} PDF file(s)", paths.len()));
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Checking rotation",
            done_msg: "Checked rotation",
        },
        paths.len() as u64,
    );

    let mut reports = stream::iter(paths)
        .map(|path| {
            let analyzer = analyzer.clone();
            async move { process_document(&path, analyzer, opts).await }
        })
        .buffered(opts.jobs.max(1));

    let mut summary = RunSummary::default();
    while let Some(report) = reports.next().await {
        pb.inc(1);
        report.display(ui);
        summary.record(report);
    }
    pb.finish_using_style();
    summary
}

/// Analyze one document and write a corrected copy if needed.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn process_document(
    path: &Path,
    analyzer: Arc<dyn OrientationAnalyzer>,
    opts: &BatchOpts,
) -> DocumentReport {
    let output = match output_path_for(path, &opts.suffix) {
        Ok(output) => output,
        Err(err) => return DocumentReport::failed(path, Stage::Naming, &err),
    };

    // Analyzing.
    let (doc, pages) = match analyze_document(path, analyzer).await {
        Ok(analyzed) => analyzed,
        Err(err) => {
            warn!(path = %path.display(), "Could not analyze document: {:#}", err);
            return DocumentReport::failed(path, Stage::Analyzing, &err);
        }
    };

    // Rewriting.
    let needs_rewrite = pages.iter().any(|d| d.needs_rewrite());
    let result = if needs_rewrite {
        rewrite_document(doc, &pages, &output)
            .await
            .map(|_| (DocumentOutcome::Corrected, Some(output)))
    } else if opts.write_unchanged {
        copy_unchanged(path, &output)
            .await
            .map(|()| (DocumentOutcome::Unchanged, Some(output)))
    } else {
        Ok((DocumentOutcome::Unchanged, None))
    };

    match result {
        Ok((outcome, output)) => DocumentReport {
            path: path.to_owned(),
            output,
            outcome,
            pages,
        },
        Err(err) => {
            warn!(path = %path.display(), "Could not write document: {:#}", err);
            DocumentReport {
                pages,
                ..DocumentReport::failed(path, Stage::Rewriting, &err)
            }
        }
    }
}

/// Open a document and decide on a rotation for each page.
///
/// Pages are analyzed concurrently. Any external tools they run are throttled
/// by [`crate::cpu_limit::with_cpu_semaphore`].
async fn analyze_document(
    path: &Path,
    analyzer: Arc<dyn OrientationAnalyzer>,
) -> Result<(PdfDocument, Vec<OrientationDecision>)> {
    let doc = PdfDocument::open(path).await?;
    let pages = doc.pages().to_vec();
    let decisions = stream::iter(pages)
        .map(|page| {
            let analyzer = analyzer.clone();
            async move {
                analyzer
                    .analyze_page(path, &page)
                    .await
                    .with_context(|| format!("page {}", page.number()))
            }
        })
        .buffered(num_cpus::get())
        .try_collect::<Vec<_>>()
        .await?;
    Ok((doc, decisions))
}
