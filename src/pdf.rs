//! The minimal PDF document model we need: pages in order, and each page's
//! `/Rotate` attribute.
//!
//! We use [`lopdf`] to parse and serialize. Rotation is the only thing we ever
//! change, so every other object in the document is carried through as-is.

use std::io::Write;

use lopdf::{Document, Object, ObjectId};

use crate::{
    async_utils::spawn_blocking_propagating_panics, errors::RotationError, prelude::*,
    rotation::Rotation,
};

/// How far up the page tree we'll look for an inherited `/Rotate`. Real page
/// trees are shallow, so this mostly protects us against cyclic `/Parent`
/// links in damaged files.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// A page in a [`PdfDocument`].
#[derive(Clone, Debug)]
pub struct PdfPage {
    /// Zero-based page index.
    pub index: usize,
    /// The page dictionary's object ID.
    pub object_id: ObjectId,
    /// The effective clockwise rotation, including any value inherited from
    /// the page tree.
    pub rotation: Rotation,
}

impl PdfPage {
    /// One-based page number, for humans and for command-line tools.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// A parsed PDF document.
pub struct PdfDocument {
    /// Where we loaded this document from.
    path: PathBuf,
    /// The underlying [`lopdf`] document.
    document: Document,
    /// Our pages, in order.
    pages: Vec<PdfPage>,
}

impl PdfDocument {
    /// Open and parse a PDF on a background thread.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_owned();
        spawn_blocking_propagating_panics(move || Self::open_sync(&path)).await
    }

    /// Open and parse a PDF, blocking the current thread.
    pub fn open_sync(path: &Path) -> Result<Self> {
        let document =
            Document::load(path).map_err(|err| RotationError::corrupt(path, err))?;
        Self::from_document(path.to_owned(), document)
    }

    /// Wrap an already-parsed document.
    fn from_document(path: PathBuf, document: Document) -> Result<Self> {
        let mut pages = vec![];
        for (index, (_, &object_id)) in document.get_pages().iter().enumerate() {
            let rotation = effective_rotation(&document, object_id).map_err(|err| {
                RotationError::corrupt(&path, format!("page {}: {:#}", index + 1, err))
            })?;
            pages.push(PdfPage {
                index,
                object_id,
                rotation,
            });
        }
        debug!(path = %path.display(), pages = pages.len(), "Parsed PDF");
        Ok(Self {
            path,
            document,
            pages,
        })
    }

    /// The path we loaded this document from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Our pages, in order.
    pub fn pages(&self) -> &[PdfPage] {
        &self.pages
    }

    /// Set the `/Rotate` attribute of a page.
    ///
    /// We always write the value onto the page itself, which overrides anything
    /// inherited from the page tree without affecting sibling pages.
    pub fn set_rotation(&mut self, index: usize, rotation: Rotation) -> Result<()> {
        let page = self.pages.get_mut(index).ok_or_else(|| {
            anyhow!("page index {} out of range for {:?}", index, self.path.display())
        })?;
        let dict = self
            .document
            .get_dictionary_mut(page.object_id)
            .with_context(|| format!("page {} is not a dictionary", index + 1))?;
        dict.set("Rotate", Object::Integer(i64::from(rotation.degrees())));
        page.rotation = rotation;
        Ok(())
    }

    /// Serialize the document.
    pub fn save_to<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.document
            .save_to(out)
            .with_context(|| format!("failed to serialize {:?}", self.path.display()))
    }
}

/// Find the effective `/Rotate` of a page, walking up `/Parent` links if the
/// page doesn't set one itself.
fn effective_rotation(document: &Document, page_id: ObjectId) -> Result<Rotation> {
    let mut node_id = page_id;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let dict = document
            .get_dictionary(node_id)
            .with_context(|| format!("page tree node {:?} is not a dictionary", node_id))?;
        if let Ok(value) = dict.get(b"Rotate") {
            return Rotation::from_degrees(rotate_value(document, value)?);
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent_id) => node_id = parent_id,
            Err(_) => return Ok(Rotation::Deg0),
        }
    }
    Err(anyhow!("page tree is too deep or contains a cycle"))
}

/// Read a `/Rotate` value, which is normally an integer but may be written as
/// a whole-numbered real or hidden behind an indirect reference.
fn rotate_value(document: &Document, value: &Object) -> Result<i64> {
    match value {
        Object::Integer(degrees) => Ok(*degrees),
        Object::Real(degrees) if degrees.fract() == 0.0 => Ok(*degrees as i64),
        Object::Reference(id) => {
            let target = document
                .get_object(*id)
                .with_context(|| format!("dangling /Rotate reference {:?}", id))?;
            if matches!(target, Object::Reference(_)) {
                return Err(anyhow!("/Rotate reference points at another reference"));
            }
            rotate_value(document, target)
        }
        other => Err(anyhow!("/Rotate is not a number: {:?}", other)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn rotations(doc: &PdfDocument) -> Vec<u16> {
        doc.pages().iter().map(|p| p.rotation.degrees()).collect()
    }

    #[test]
    fn reads_page_rotations_in_order() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("rotated.pdf");
        test_pdfs::write(&path, &[None, Some(90), Some(180), Some(-90)], None);

        let doc = PdfDocument::open_sync(&path)?;
        assert_eq!(rotations(&doc), vec![0, 90, 180, 270]);
        assert_eq!(doc.pages()[2].number(), 3);
        Ok(())
    }

    #[test]
    fn inherits_rotation_from_page_tree() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("inherited.pdf");
        test_pdfs::write(&path, &[None, Some(0)], Some(270));

        let doc = PdfDocument::open_sync(&path)?;
        assert_eq!(rotations(&doc), vec![270, 0]);
        Ok(())
    }

    #[test]
    fn rejects_invalid_rotation() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("odd.pdf");
        test_pdfs::write(&path, &[Some(45)], None);

        let err = PdfDocument::open_sync(&path).err().expect("should fail");
        assert!(matches!(
            err.downcast_ref::<RotationError>(),
            Some(RotationError::CorruptDocument { .. })
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_a_corrupt_document() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("garbage.pdf");
        std::fs::write(&path, b"this is not a PDF")?;

        let err = PdfDocument::open_sync(&path).err().expect("should fail");
        assert!(matches!(
            err.downcast_ref::<RotationError>(),
            Some(RotationError::CorruptDocument { .. })
        ));
        Ok(())
    }

    #[test]
    fn set_rotation_overrides_inherited_value() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("inherited.pdf");
        test_pdfs::write(&path, &[None, None], Some(90));

        let mut doc = PdfDocument::open_sync(&path)?;
        doc.set_rotation(0, Rotation::Deg0)?;
        let out_path = tmpdir.path().join("out.pdf");
        let mut out = std::fs::File::create(&out_path)?;
        doc.save_to(&mut out)?;
        drop(out);

        let reopened = PdfDocument::open_sync(&out_path)?;
        assert_eq!(rotations(&reopened), vec![0, 90]);
        Ok(())
    }

    #[test]
    fn set_rotation_rejects_bad_index() -> Result<()> {
        let tmpdir = tempfile::TempDir::new()?;
        let path = tmpdir.path().join("one.pdf");
        test_pdfs::write(&path, &[None], None);

        let mut doc = PdfDocument::open_sync(&path)?;
        assert!(doc.set_rotation(1, Rotation::Deg90).is_err());
        Ok(())
    }
}
