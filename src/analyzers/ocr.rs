//! Orientation from OCR.
//!
//! We render the page as a viewer would show it, then try it at each of the
//! four quarter-turns. Whichever turn makes the text most legible wins, as long
//! as it's legible enough. If nothing is legible (photos, blank pages, tables of
//! numbers), we leave the page alone rather than guess.

use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;

use crate::{
    async_utils::spawn_blocking_propagating_panics, pdf::PdfPage, prelude::*,
    render::render_page, rotation::Rotation,
};

use super::{OrientationAnalyzer, OrientationDecision};

/// How legible an image is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Score {
    /// Text was found, with this confidence (0-100).
    Confidence(f32),
    /// No recognizable text.
    NoText,
    /// The OCR engine ran out of time.
    TimedOut,
}

impl Score {
    /// The confidence, if we have one.
    fn confidence(self) -> Option<f32> {
        match self {
            Score::Confidence(confidence) => Some(confidence),
            Score::NoText | Score::TimedOut => None,
        }
    }
}

/// Interface to text-orientation confidence engines.
///
/// A single scorer is shared by every page of every document, so it must be
/// safe to call concurrently.
#[async_trait]
pub trait OrientationScorer: Send + Sync + 'static {
    /// How legible is the text in `image`, read without any further rotation?
    async fn score(&self, image: &DynamicImage) -> Result<Score>;
}

/// Orientation analyzer which renders pages and scores each rotation.
pub struct OcrAnalyzer {
    /// Our OCR engine.
    scorer: Arc<dyn OrientationScorer>,
    /// Render resolution.
    dpi: u32,
    /// The lowest confidence we'll act on.
    min_confidence: f32,
}

impl OcrAnalyzer {
    /// Create a new OCR analyzer.
    pub fn new(scorer: Arc<dyn OrientationScorer>, dpi: u32, min_confidence: f32) -> Self {
        Self {
            scorer,
            dpi,
            min_confidence,
        }
    }

    /// Decide on a rotation for `page`, given how it currently renders.
    #[instrument(level = "debug", skip_all, fields(page = page.number()))]
    async fn analyze_image(
        &self,
        page: &PdfPage,
        image: DynamicImage,
    ) -> Result<OrientationDecision> {
        let image = Arc::new(image);
        let mut scores = Vec::with_capacity(Rotation::ALL.len());
        for candidate in Rotation::ALL {
            let source = image.clone();
            let rotated =
                spawn_blocking_propagating_panics(move || rotate_image(&source, candidate))
                    .await;
            let score = self.scorer.score(&rotated).await?;
            trace!(candidate = %candidate, ?score, "Scored candidate rotation");
            scores.push((candidate, score));
            if score == Score::TimedOut {
                // No point scoring the rest.
                break;
            }
        }
        Ok(decide(page, &scores, self.min_confidence))
    }
}

#[async_trait]
impl OrientationAnalyzer for OcrAnalyzer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), page = page.number()))]
    async fn analyze_page(&self, path: &Path, page: &PdfPage) -> Result<OrientationDecision> {
        let image = render_page(path, page.number(), self.dpi).await?;
        self.analyze_image(page, image).await
    }
}

/// Rotate `image` clockwise by `rotation`.
fn rotate_image(image: &DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => image.rotate90(),
        Rotation::Deg180 => image.rotate180(),
        Rotation::Deg270 => image.rotate270(),
    }
}

/// Pick the best rotation from `scores`, which are indexed by the extra
/// clockwise turn applied to the rendered page.
///
/// Only scores of at least `min_confidence` count. Ties go to the earlier
/// candidate, and candidates are listed upright-first, so an upright page is
/// never turned to a rotation that merely scores the same.
pub fn select_rotation(scores: &[(Rotation, Score)], min_confidence: f32) -> Option<Rotation> {
    let mut best: Option<(Rotation, f32)> = None;
    for &(candidate, score) in scores {
        let Some(confidence) = score.confidence() else {
            continue;
        };
        if confidence < min_confidence {
            continue;
        }
        if best.is_none_or(|(_, best_confidence)| confidence > best_confidence) {
            best = Some((candidate, confidence));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Turn candidate scores into a decision for `page`.
///
/// A timeout on any candidate makes the whole page inconclusive, because the
/// missing score might have been the winner.
fn decide(page: &PdfPage, scores: &[(Rotation, Score)], min_confidence: f32) -> OrientationDecision {
    let reason = if scores.iter().any(|(_, score)| *score == Score::TimedOut) {
        "OCR timed out".to_owned()
    } else if let Some(turn) = select_rotation(scores, min_confidence) {
        let decision = OrientationDecision::new(page, page.rotation.then(turn));
        if decision.needs_rewrite() {
            debug!(
                page = page.number(),
                current = %decision.current,
                target = %decision.target,
                "OCR found a rotated page"
            );
        }
        return decision;
    } else if scores.iter().all(|(_, score)| score.confidence().is_none()) {
        "no recognizable text".to_owned()
    } else {
        let best = scores
            .iter()
            .filter_map(|(_, score)| score.confidence())
            .fold(0.0_f32, f32::max);
        format!(
            "best OCR confidence {:.1} is below the minimum of {:.1}",
            best, min_confidence
        )
    };
    info!(page = page.number(), reason = %reason, "Page orientation is inconclusive");
    OrientationDecision::inconclusive(page, reason)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{
        analyzers::tesseract::TesseractScorer,
        pdf::{PdfDocument, test_pdfs},
    };

    /// Marker pixel colour for [`CornerScorer`].
    const MARK: Rgb<u8> = Rgb([255, 0, 0]);

    fn page(rotation: Rotation) -> PdfPage {
        PdfPage {
            index: 0,
            object_id: (1, 0),
            rotation,
        }
    }

    /// A landscape test image with a marker in its top-left corner.
    fn marked_image() -> DynamicImage {
        let mut image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        image.put_pixel(0, 0, MARK);
        DynamicImage::ImageRgb8(image)
    }

    /// Which clockwise turn of [`marked_image`] is this?
    fn turn_of(image: &DynamicImage) -> Rotation {
        let image = image.to_rgb8();
        let (w, h) = image.dimensions();
        if *image.get_pixel(0, 0) == MARK {
            Rotation::Deg0
        } else if *image.get_pixel(w - 1, 0) == MARK {
            Rotation::Deg90
        } else if *image.get_pixel(w - 1, h - 1) == MARK {
            Rotation::Deg180
        } else {
            Rotation::Deg270
        }
    }

    /// A fake OCR engine which scores each turn of [`marked_image`] from a
    /// table.
    struct CornerScorer {
        scores: [Score; 4],
    }

    #[async_trait]
    impl OrientationScorer for CornerScorer {
        async fn score(&self, image: &DynamicImage) -> Result<Score> {
            Ok(self.scores[usize::from(turn_of(image).degrees() / 90)])
        }
    }

    fn analyzer(scores: [Score; 4]) -> OcrAnalyzer {
        OcrAnalyzer::new(Arc::new(CornerScorer { scores }), 150, 60.0)
    }

    fn scored(values: [Score; 4]) -> Vec<(Rotation, Score)> {
        Rotation::ALL.into_iter().zip(values).collect()
    }

    #[test]
    fn rotate_image_turns_clockwise() {
        let image = marked_image();
        for rotation in Rotation::ALL {
            assert_eq!(turn_of(&rotate_image(&image, rotation)), rotation);
        }
    }

    #[test]
    fn select_rotation_prefers_highest_confidence() {
        use Score::*;
        let scores = scored([Confidence(70.0), Confidence(92.0), NoText, Confidence(65.0)]);
        assert_eq!(select_rotation(&scores, 60.0), Some(Rotation::Deg90));
    }

    #[test]
    fn select_rotation_breaks_ties_towards_upright() {
        use Score::*;
        let scores = scored([Confidence(88.0), NoText, Confidence(88.0), NoText]);
        assert_eq!(select_rotation(&scores, 60.0), Some(Rotation::Deg0));
    }

    #[test]
    fn select_rotation_ignores_scores_below_threshold() {
        use Score::*;
        let scores = scored([Confidence(40.0), Confidence(59.9), NoText, TimedOut]);
        assert_eq!(select_rotation(&scores, 60.0), None);
    }

    #[test]
    fn decide_explains_inconclusive_pages() {
        use Score::*;
        let page = page(Rotation::Deg0);

        let decision = decide(&page, &scored([NoText; 4]), 60.0);
        assert_eq!(decision.inconclusive.as_deref(), Some("no recognizable text"));

        let decision = decide(&page, &scored([TimedOut; 4]), 60.0);
        assert_eq!(decision.inconclusive.as_deref(), Some("OCR timed out"));

        let decision = decide(&page, &scored([Confidence(30.0), NoText, NoText, NoText]), 60.0);
        assert!(decision.inconclusive.unwrap().contains("30.0"));
    }

    #[test]
    fn one_timeout_makes_page_inconclusive() {
        use Score::*;
        let page = page(Rotation::Deg0);
        let decision = decide(&page, &scored([TimedOut, NoText, Confidence(70.0), NoText]), 60.0);
        assert_eq!(decision.inconclusive.as_deref(), Some("OCR timed out"));
        assert_eq!(decision.target, Rotation::Deg0);
        assert!(!decision.needs_rewrite());
    }

    #[tokio::test]
    async fn sideways_content_is_turned_upright() -> Result<()> {
        use Score::*;
        let analyzer = analyzer([Confidence(20.0), NoText, NoText, Confidence(91.0)]);
        let decision = analyzer
            .analyze_image(&page(Rotation::Deg0), marked_image())
            .await?;
        assert_eq!(decision.target, Rotation::Deg270);
        assert!(decision.needs_rewrite());
        Ok(())
    }

    #[tokio::test]
    async fn turn_is_added_to_existing_rotation() -> Result<()> {
        use Score::*;
        let analyzer = analyzer([NoText, NoText, Confidence(85.0), NoText]);
        let decision = analyzer
            .analyze_image(&page(Rotation::Deg90), marked_image())
            .await?;
        assert_eq!(decision.current, Rotation::Deg90);
        assert_eq!(decision.target, Rotation::Deg270);
        Ok(())
    }

    #[tokio::test]
    async fn upright_rendering_keeps_declared_rotation() -> Result<()> {
        use Score::*;
        let analyzer = analyzer([Confidence(95.0), NoText, NoText, NoText]);
        let decision = analyzer
            .analyze_image(&page(Rotation::Deg180), marked_image())
            .await?;
        assert_eq!(decision.target, Rotation::Deg180);
        assert!(!decision.needs_rewrite());
        Ok(())
    }

    #[tokio::test]
    async fn textless_page_is_inconclusive() -> Result<()> {
        let analyzer = analyzer([Score::NoText; 4]);
        let decision = analyzer
            .analyze_image(&page(Rotation::Deg90), marked_image())
            .await?;
        assert!(decision.is_inconclusive());
        assert_eq!(decision.target, Rotation::Deg90);
        Ok(())
    }

    #[tokio::test]
    async fn equal_confidence_at_0_and_180_resolves_to_0() -> Result<()> {
        use Score::*;
        let analyzer = analyzer([Confidence(75.0), NoText, Confidence(75.0), NoText]);
        let decision = analyzer
            .analyze_image(&page(Rotation::Deg0), marked_image())
            .await?;
        assert_eq!(decision.target, Rotation::Deg0);
        assert!(!decision.is_inconclusive());
        Ok(())
    }

    /// Lines of ordinary prose, enough for Tesseract to be confident.
    const PROSE: &[&str] = &[
        "The quick brown fox jumps over the lazy dog.",
        "Please find enclosed the signed agreement.",
        "Payment is due within thirty days of receipt.",
        "Contact our office with any further questions.",
        "This document was scanned from the original.",
        "All pages should read from top to bottom.",
    ];

    /// A content stream drawing [`PROSE`] through the matrix `cm`.
    fn prose_content(cm: &str) -> Vec<u8> {
        let mut content = format!("q {} cm BT /F1 18 Tf 26 TL 0 0 Td", cm);
        for line in PROSE {
            content.push_str(&format!(" ({}) Tj T*", line));
        }
        content.push_str(" ET Q");
        content.into_bytes()
    }

    /// Run real OCR on the first page of a one-page PDF drawing `content`.
    async fn analyze_with_tesseract(content: &[u8]) -> Result<OrientationDecision> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("scan.pdf");
        test_pdfs::write_with_content(&path, &[None], None, content);
        let doc = PdfDocument::open(&path).await?;

        let scorer = TesseractScorer::new("eng".to_owned(), 3, Duration::from_secs(60));
        let analyzer = OcrAnalyzer::new(Arc::new(scorer), 150, 60.0);
        analyzer.analyze_page(&path, &doc.pages()[0]).await
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils and tesseract to be installed"]
    async fn tesseract_leaves_upright_text_alone() -> Result<()> {
        let decision = analyze_with_tesseract(&prose_content("1 0 0 1 72 720")).await?;
        assert!(!decision.is_inconclusive(), "{:?}", decision.inconclusive);
        assert_eq!(decision.target, Rotation::Deg0);
        assert!(!decision.needs_rewrite());
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils and tesseract to be installed"]
    async fn tesseract_turns_sideways_text_upright() -> Result<()> {
        // Text turned a quarter-turn clockwise: it reads top to bottom, and
        // successive lines move left.
        let decision = analyze_with_tesseract(&prose_content("0 -1 1 0 540 740")).await?;
        assert!(!decision.is_inconclusive(), "{:?}", decision.inconclusive);
        assert_eq!(decision.current, Rotation::Deg0);
        assert_eq!(decision.target, Rotation::Deg270);
        Ok(())
    }
}
