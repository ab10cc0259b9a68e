//! Page orientation analysis.
//!
//! An [`OrientationAnalyzer`] looks at one page and decides which rotation the
//! page _should_ have. We have two:
//!
//! - [`metadata::MetadataAnalyzer`] trusts nothing but the page's `/Rotate`
//!   attribute, and always wants it to be 0°.
//! - [`ocr::OcrAnalyzer`] renders the page and asks an OCR engine which way up
//!   the text reads. This catches scans that were placed sideways on an
//!   unrotated page.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::{Args, ValueEnum};

use crate::{pdf::PdfPage, prelude::*, rotation::Rotation};

use self::{metadata::MetadataAnalyzer, ocr::OcrAnalyzer, tesseract::TesseractScorer};

pub mod metadata;
pub mod ocr;
pub mod tesseract;

/// What we decided about a single page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrientationDecision {
    /// Zero-based page index.
    pub page_index: usize,
    /// The page's rotation before we touch it.
    pub current: Rotation,
    /// The rotation the page should have.
    pub target: Rotation,
    /// If we couldn't tell which way up the page is, why not. Inconclusive
    /// pages always keep their current rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inconclusive: Option<String>,
}

impl OrientationDecision {
    /// A decision to change `page` to `target`.
    pub fn new(page: &PdfPage, target: Rotation) -> Self {
        Self {
            page_index: page.index,
            current: page.rotation,
            target,
            inconclusive: None,
        }
    }

    /// A decision to leave `page` alone because we couldn't tell.
    pub fn inconclusive(page: &PdfPage, reason: impl Into<String>) -> Self {
        Self {
            page_index: page.index,
            current: page.rotation,
            target: page.rotation,
            inconclusive: Some(reason.into()),
        }
    }

    /// Does this page need its rotation changed?
    pub fn needs_rewrite(&self) -> bool {
        self.current != self.target
    }

    /// Were we unable to decide?
    pub fn is_inconclusive(&self) -> bool {
        self.inconclusive.is_some()
    }
}

/// Interface to page orientation strategies.
#[async_trait]
pub trait OrientationAnalyzer: Send + Sync + 'static {
    /// Decide on a target rotation for `page` of the document at `path`.
    ///
    /// Implementations must not modify the document.
    async fn analyze_page(&self, path: &Path, page: &PdfPage) -> Result<OrientationDecision>;
}

/// How should we decide which way up a page is?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Reset any `/Rotate` attribute to 0°.
    #[default]
    Metadata,
    /// Render each page and use OCR to find the rotation where text reads
    /// upright.
    Ocr,
}

/// Options controlling page analysis.
#[derive(Args, Clone, Debug)]
pub struct AnalyzerOpts {
    /// How to detect rotated pages.
    #[clap(long, value_enum, default_value = "metadata", env = "FIX_PDF_ROTATION_STRATEGY")]
    pub strategy: Strategy,

    /// The DPI used to render pages for OCR.
    #[clap(long, default_value = "150", env = "FIX_PDF_ROTATION_DPI")]
    pub dpi: u32,

    /// Minimum mean word confidence (0-100) before OCR will accept a
    /// rotation.
    #[clap(long, default_value = "60.0", env = "FIX_PDF_ROTATION_MIN_CONFIDENCE")]
    pub min_confidence: f32,

    /// Minimum number of recognizable words before OCR will score a
    /// rotation at all.
    #[clap(long, default_value = "3", env = "FIX_PDF_ROTATION_MIN_WORDS")]
    pub min_words: usize,

    /// Seconds to allow each OCR call before treating the page as
    /// inconclusive.
    #[clap(long, default_value = "60", env = "FIX_PDF_ROTATION_OCR_TIMEOUT")]
    pub ocr_timeout: u64,

    /// Tesseract language to use for OCR.
    #[clap(long, default_value = "eng", env = "FIX_PDF_ROTATION_OCR_LANGUAGE")]
    pub ocr_language: String,
}

impl Default for AnalyzerOpts {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            dpi: 150,
            min_confidence: 60.0,
            min_words: 3,
            ocr_timeout: 60,
            ocr_language: "eng".to_owned(),
        }
    }
}

impl AnalyzerOpts {
    /// Check for obviously bad values.
    fn validate(&self) -> Result<()> {
        if self.dpi == 0 {
            return Err(anyhow!("--dpi must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "--min-confidence must be between 0 and 100, got {}",
                self.min_confidence
            ));
        }
        if self.ocr_timeout == 0 {
            return Err(anyhow!("--ocr-timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Build the analyzer selected by `opts`.
///
/// For OCR, this checks that the external tools and language data are
/// installed, so that a missing dependency is reported once, before we start
/// work.
#[instrument(level = "debug", skip_all, fields(strategy = ?opts.strategy))]
pub async fn analyzer_for_opts(opts: &AnalyzerOpts) -> Result<Arc<dyn OrientationAnalyzer>> {
    opts.validate()?;
    match opts.strategy {
        Strategy::Metadata => Ok(Arc::new(MetadataAnalyzer)),
        Strategy::Ocr => {
            tesseract::check_ocr_tools(&opts.ocr_language).await?;
            let scorer = TesseractScorer::new(
                opts.ocr_language.clone(),
                opts.min_words,
                Duration::from_secs(opts.ocr_timeout),
            );
            Ok(Arc::new(OcrAnalyzer::new(
                Arc::new(scorer),
                opts.dpi,
                opts.min_confidence,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rotation: Rotation) -> PdfPage {
        PdfPage {
            index: 3,
            object_id: (7, 0),
            rotation,
        }
    }

    #[test]
    fn needs_rewrite_compares_rotations() {
        assert!(OrientationDecision::new(&page(Rotation::Deg90), Rotation::Deg0).needs_rewrite());
        assert!(!OrientationDecision::new(&page(Rotation::Deg0), Rotation::Deg0).needs_rewrite());
    }

    #[test]
    fn inconclusive_keeps_current_rotation() {
        let decision = OrientationDecision::inconclusive(&page(Rotation::Deg180), "no text");
        assert_eq!(decision.target, Rotation::Deg180);
        assert!(decision.is_inconclusive());
        assert!(!decision.needs_rewrite());
    }

    #[test]
    fn validate_rejects_bad_options() {
        let opts = AnalyzerOpts {
            min_confidence: 150.0,
            ..AnalyzerOpts::default()
        };
        assert!(opts.validate().is_err());
        let opts = AnalyzerOpts {
            dpi: 0,
            ..AnalyzerOpts::default()
        };
        assert!(opts.validate().is_err());
        assert!(AnalyzerOpts::default().validate().is_ok());
    }

    #[tokio::test]
    async fn metadata_strategy_needs_no_external_tools() -> Result<()> {
        let analyzer = analyzer_for_opts(&AnalyzerOpts::default()).await?;
        let decision = analyzer
            .analyze_page(Path::new("unused.pdf"), &page(Rotation::Deg270))
            .await?;
        assert_eq!(decision.target, Rotation::Deg0);
        Ok(())
    }
}
