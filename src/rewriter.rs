//! Write corrected documents.
//!
//! All output goes through [`write_atomically`], which writes a temporary file
//! next to the destination and renames it into place. Either the whole file
//! appears, or nothing does. Outputs get the same permissions as their source.

use std::{
    fs,
    io::{BufWriter, Write},
};

use tempfile::NamedTempFile;

use crate::{
    analyzers::OrientationDecision, async_utils::spawn_blocking_propagating_panics,
    errors::RotationError, pdf::PdfDocument, prelude::*,
};

/// Compute the output path for `source`: `<stem><suffix>.<ext>` in the same
/// directory.
///
/// Fails with [`RotationError::OutputCollision`] if that would be the source
/// itself.
pub fn output_path_for(source: &Path, suffix: &str) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .with_context(|| format!("no file name in {:?}", source.display()))?;
    let mut name = stem.to_owned();
    name.push(suffix);
    if let Some(ext) = source.extension() {
        name.push(".");
        name.push(ext);
    }
    let output = source.with_file_name(name);
    if output == source {
        return Err(RotationError::OutputCollision(output).into());
    }
    Ok(output)
}

/// Apply `decisions` to `doc` and write the result to `output`.
///
/// Only `/Rotate` is changed. Returns the number of pages whose rotation
/// changed.
#[instrument(level = "debug", skip_all, fields(path = %doc.path().display(), output = %output.display()))]
pub async fn rewrite_document(
    mut doc: PdfDocument,
    decisions: &[OrientationDecision],
    output: &Path,
) -> Result<usize> {
    let decisions = decisions.to_vec();
    let output = output.to_owned();
    spawn_blocking_propagating_panics(move || {
        let mut changed = 0;
        for decision in decisions.iter().filter(|d| d.needs_rewrite()) {
            doc.set_rotation(decision.page_index, decision.target)?;
            changed += 1;
        }
        let source = doc.path().to_owned();
        write_atomically(&source, &output, |out| doc.save_to(out))?;
        info!(
            output = %output.display(),
            pages = changed,
            "Wrote corrected document"
        );
        Ok(changed)
    })
    .await
}

/// Copy `source` to `output` unmodified, for when the caller asked for output
/// even if nothing needed fixing.
#[instrument(level = "debug", skip_all, fields(path = %source.display(), output = %output.display()))]
pub async fn copy_unchanged(source: &Path, output: &Path) -> Result<()> {
    let source = source.to_owned();
    let output = output.to_owned();
    spawn_blocking_propagating_panics(move || {
        let bytes = fs::read(&source)
            .with_context(|| format!("failed to read {:?}", source.display()))?;
        write_atomically(&source, &output, |out| {
            out.write_all(&bytes).context("failed to copy document")
        })
    })
    .await
}

/// Write `output` by calling `write` on a temporary file in the same directory,
/// then renaming it into place with the permissions of `source`.
fn write_atomically<F>(source: &Path, output: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let permissions = fs::metadata(source)
        .with_context(|| format!("failed to inspect {:?}", source.display()))?
        .permissions();
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| RotationError::write(output, err))?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| RotationError::write(output, err))?;
    }
    // Temporary files are created owner-only.
    tmp.as_file()
        .set_permissions(permissions)
        .map_err(|err| RotationError::write(output, err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| RotationError::write(output, err))?;
    tmp.persist(output)
        .map_err(|err| RotationError::write(output, err.error))?;
    Ok(())
}
