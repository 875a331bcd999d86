//! The Noto CJK naming convention.
//!
//! Noto CJK families encode the target language in the family name
//! (`Noto Sans CJK JP`, `NotoSerifKR`, ...), and the Mono variants are
//! meant for grid layout where contextual spacing must not apply.

use std::path::{Path, PathBuf};

use crate::{
    error::Error,
    font::{is_font_extension, Face, FontFile},
    language::LanguageTag,
};

/// Derive the language from a Noto family name; `None` for the Mono
/// variants and anything we do not recognize.
pub fn language_from_family(name: &str) -> Option<LanguageTag> {
    if !name.starts_with("Noto") || name.contains("Mono") {
        return None;
    }
    if name.contains("JP") {
        Some(LanguageTag::Jan)
    } else if name.contains("KR") {
        Some(LanguageTag::Kor)
    } else if name.contains("SC") {
        Some(LanguageTag::Zhs)
    } else if name.contains("TC") {
        Some(LanguageTag::Zht)
    } else if name.contains("HK") {
        Some(LanguageTag::Zhh)
    } else {
        None
    }
}

pub fn language_for_face(face: &Face) -> Option<LanguageTag> {
    face.family_name()
        .as_deref()
        .and_then(language_from_family)
}

/// Per-face languages for a whole file; faces without a recognized
/// language are skipped (absent from the map).
pub fn face_languages(font: &FontFile) -> Result<Vec<(u32, LanguageTag)>, Error> {
    let mut result = Vec::new();
    for face in font.faces()? {
        match language_for_face(&face) {
            Some(language) => result.push((face.index(), language)),
            None => log::info!("Face {} \"{}\" skipped", face.index(), face.display_name()),
        }
    }
    Ok(result)
}

/// Is this a Noto CJK font file we should process at all?
pub fn is_noto_cjk_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("Noto") && !name.contains("Mono") && is_font_extension(path)
}

/// Recursively find Noto CJK candidates under a directory.
pub fn expand_dir(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut result = Vec::new();
    walk(dir, &mut result)?;
    result.sort();
    Ok(result)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    for entry in std::fs::read_dir(dir).map_err(|inner| Error::Load {
        path: dir.to_owned(),
        inner,
    })? {
        let path = entry
            .map_err(|inner| Error::Load {
                path: dir.to_owned(),
                inner,
            })?
            .path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if is_noto_cjk_path(&path) {
            out.push(path);
        }
    }
    Ok(())
}
