//! Orientation from `/Rotate` alone.

use async_trait::async_trait;

use crate::{pdf::PdfPage, prelude::*, rotation::Rotation};

use super::{OrientationAnalyzer, OrientationDecision};

/// Treat any non-zero `/Rotate` as a mistake to be undone.
///
/// This is cheap and deterministic, but it can't see pages whose _content_ is
/// sideways.
pub struct MetadataAnalyzer;

#[async_trait]
impl OrientationAnalyzer for MetadataAnalyzer {
    async fn analyze_page(&self, _path: &Path, page: &PdfPage) -> Result<OrientationDecision> {
        if !page.rotation.is_upright() {
            debug!(page = page.number(), current = %page.rotation, "Page has non-zero /Rotate");
        }
        Ok(OrientationDecision::new(page, Rotation::Deg0))
    }
}
