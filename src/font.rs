//! Thin wrappers over a loaded font file and its faces.

use std::path::{Path, PathBuf};

use write_fonts::{
    read::{FileRef, FontRef, TableProvider},
    types::{NameId, Tag},
};

use crate::error::Error;

/// File extensions we treat as fonts when expanding directories.
pub const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc", "otc"];

pub fn is_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FONT_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// A font file loaded into memory; may hold one face or a collection.
pub struct FontFile {
    path: PathBuf,
    data: Vec<u8>,
}

impl FontFile {
    pub fn load(path: &Path) -> Result<FontFile, Error> {
        log::info!("Reading font file \"{}\"", path.display());
        let data = std::fs::read(path).map_err(|inner| Error::Load {
            path: path.to_owned(),
            inner,
        })?;
        Ok(FontFile {
            path: path.to_owned(),
            data,
        })
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> FontFile {
        FontFile {
            path: path.to_owned(),
            data,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_collection(&self) -> bool {
        matches!(FileRef::new(&self.data), Ok(FileRef::Collection(_)))
    }

    pub fn num_faces(&self) -> Result<u32, Error> {
        match FileRef::new(&self.data)? {
            FileRef::Font(_) => Ok(1),
            FileRef::Collection(collection) => Ok(collection.len()),
        }
    }

    pub fn face(&self, index: u32) -> Result<Face<'_>, Error> {
        let font = FontRef::from_index(&self.data, index)?;
        Ok(Face {
            file: self,
            font,
            index,
        })
    }

    pub fn faces(&self) -> Result<Vec<Face<'_>>, Error> {
        (0..self.num_faces()?).map(|i| self.face(i)).collect()
    }
}

/// One face of a [`FontFile`].
pub struct Face<'a> {
    file: &'a FontFile,
    font: FontRef<'a>,
    index: u32,
}

impl<'a> Face<'a> {
    pub fn font(&self) -> &FontRef<'a> {
        &self.font
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// The bytes of the whole file, not just this face.
    pub fn file_data(&self) -> &'a [u8] {
        self.file.data()
    }

    pub fn units_per_em(&self) -> Result<u16, Error> {
        Ok(self.font.head()?.units_per_em())
    }

    pub fn num_glyphs(&self) -> Result<u16, Error> {
        Ok(self.font.maxp()?.num_glyphs())
    }

    /// Vertical layout is possible when the face carries vertical metrics.
    pub fn has_vertical_metrics(&self) -> bool {
        self.font.vhea().is_ok() && self.font.vmtx().is_ok()
    }

    pub fn sfnt_version(&self) -> u32 {
        self.font.table_directory.sfnt_version()
    }

    pub fn table_tags(&self) -> Vec<Tag> {
        self.font
            .table_directory
            .table_records()
            .iter()
            .map(|rec| rec.tag())
            .collect()
    }

    pub fn table_data(&self, tag: Tag) -> Option<&'a [u8]> {
        self.font.table_data(tag).map(|data| data.as_bytes())
    }

    /// Prefer the typographic family name (16), fall back to family (1).
    pub fn family_name(&self) -> Option<String> {
        self.name_entry(NameId::new(16))
            .or_else(|| self.name_entry(NameId::new(1)))
    }

    /// A human-readable identifier for log messages.
    pub fn display_name(&self) -> String {
        let name = self
            .name_entry(NameId::new(4))
            .or_else(|| self.family_name())
            .unwrap_or_else(|| self.file.path().display().to_string());
        if self.file.is_collection() {
            format!("{name} ({})", self.index)
        } else {
            name
        }
    }

    fn name_entry(&self, id: NameId) -> Option<String> {
        let name = self.font.name().ok()?;
        let data = name.string_data();
        name.name_record()
            .iter()
            .filter(|rec| rec.name_id() == id)
            .filter_map(|rec| rec.string(data).ok())
            .map(|s| s.chars().collect::<String>())
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestFontBuilder;

    #[test]
    fn load_single_face() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        assert!(!file.is_collection());
        assert_eq!(file.num_faces().unwrap(), 1);
        let face = file.face(0).unwrap();
        assert_eq!(face.units_per_em().unwrap(), 1000);
        assert!(!face.has_vertical_metrics());
    }

    #[test]
    fn font_extension_filter() {
        assert!(is_font_extension(Path::new("a/b/Foo.TTC")));
        assert!(is_font_extension(Path::new("foo.otf")));
        assert!(!is_font_extension(Path::new("foo.woff2")));
        assert!(!is_font_extension(Path::new("foo")));
    }
}
