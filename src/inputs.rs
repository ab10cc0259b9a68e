//! Turn a command-line path into the list of PDFs we should process.

use std::fs;

use crate::{errors::RotationError, prelude::*};

/// The MIME type we sniff for when a file lacks a `.pdf` extension.
const PDF_MIME_TYPE: &str = "application/pdf";

/// Resolve `path` to an ordered list of PDF documents.
///
/// A file is returned as-is, as long as it's a PDF. For a directory, we return
/// every `*.pdf` file inside it, sorted by path so that runs are reproducible.
/// Subdirectories are only searched when `recursive` is set.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), recursive))]
pub fn resolve_inputs(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RotationError::PathNotFound(path.to_owned()).into());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to inspect {:?}", path.display()));
        }
    };

    if metadata.is_dir() {
        let mut documents = vec![];
        collect_pdfs(path, recursive, &mut documents)?;
        if documents.is_empty() {
            return Err(RotationError::NoDocumentsFound(path.to_owned()).into());
        }
        documents.sort();
        debug!(count = documents.len(), "Found PDF documents");
        Ok(documents)
    } else if has_pdf_extension(path) || sniffs_as_pdf(path)? {
        Ok(vec![path.to_owned()])
    } else {
        Err(RotationError::NotADocument(path.to_owned()).into())
    }
}

/// Add every PDF in `dir` to `documents`.
fn collect_pdfs(dir: &Path, recursive: bool, documents: &mut Vec<PathBuf>) -> Result<()> {
    let entries = dir
        .read_dir()
        .with_context(|| format!("failed to read directory {:?}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("failed to read entry in directory {:?}", dir.display())
        })?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect {:?}", path.display()))?;
        if file_type.is_dir() {
            if recursive {
                collect_pdfs(&path, recursive, documents)?;
            }
        } else if has_pdf_extension(&path) && path.is_file() {
            documents.push(path);
        }
    }
    Ok(())
}

/// Does this path end in `.pdf`, ignoring case?
fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Does this file's content look like a PDF?
fn sniffs_as_pdf(path: &Path) -> Result<bool> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    Ok(kind.is_some_and(|kind| kind.mime_type() == PDF_MIME_TYPE))
}
