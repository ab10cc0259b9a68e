//! Errors that callers may want to distinguish.
//!
//! Everything else in the program uses [`anyhow::Error`], but these variants
//! can be recovered with [`anyhow::Error::downcast_ref`] when a caller needs to
//! know exactly what went wrong.

use thiserror::Error;

use crate::prelude::*;

/// Errors specific to finding, reading and rewriting PDF documents.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The input path does not exist.
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// A directory was given, but it contains no PDF files.
    #[error("no PDF documents found in {}", .0.display())]
    NoDocumentsFound(PathBuf),

    /// A single file was given, but it doesn't look like a PDF.
    #[error("not a PDF document: {}", .0.display())]
    NotADocument(PathBuf),

    /// The document could not be parsed.
    #[error("cannot parse {}: {reason}", .path.display())]
    CorruptDocument { path: PathBuf, reason: String },

    /// The output could not be written.
    #[error("cannot write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },

    /// The derived output path is the same as the input path.
    #[error("output path {} would overwrite the source document", .0.display())]
    OutputCollision(PathBuf),

    /// OCR was requested, but one of the tools it needs is missing.
    #[error("OCR strategy requested, but `{tool}` is unavailable: {reason}")]
    OcrUnavailable { tool: &'static str, reason: String },
}

impl RotationError {
    /// Build a [`RotationError::CorruptDocument`] from any displayable error.
    pub fn corrupt(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::CorruptDocument {
            path: path.to_owned(),
            reason: err.to_string(),
        }
    }

    /// Build a [`RotationError::Write`] from any displayable error.
    pub fn write(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.to_owned(),
            reason: err.to_string(),
        }
    }
}
