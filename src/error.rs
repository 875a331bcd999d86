use std::path::PathBuf;

use write_fonts::{read::ReadError, types::Tag};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not read path '{path}': '{inner}'")]
    Load {
        path: PathBuf,
        inner: std::io::Error,
    },
    #[error("could not write '{path}': '{inner}'")]
    Save {
        path: PathBuf,
        inner: std::io::Error,
    },
    #[error("write error: '{0}'")]
    Write(#[from] std::io::Error),
    #[error("could not read font data: '{0}'")]
    FontRead(#[from] ReadError),
    #[error("missing table '{0}'")]
    MissingTable(Tag),
    #[error("'{face}': could not determine the language; pass --language (one of JAN, KOR, ZHS, ZHT)")]
    LanguageAmbiguous { face: String },
    #[error("unknown language tag '{0}'; expected one of JAN, KOR, ZHS, ZHT, ZHH")]
    UnknownLanguage(String),
    #[error("shaper unavailable: {0}")]
    ShaperUnavailable(String),
    #[error("shaper did not respond within {0} seconds")]
    ShaperTimeout(u64),
    #[error("glyph {glyph_id} has a malformed outline: {message}")]
    OutlineMalformed { glyph_id: u32, message: String },
    #[error("could not read outlines: {0}")]
    Outlines(String),
    #[error("could not assemble the output font: {0}")]
    BuildFont(String),
    #[error("generating '{tag}' failed: {message}")]
    DumpTable { tag: Tag, message: String },
    #[error("{failed} of {total} shaping checks failed for '{path}'")]
    TestFailure {
        path: PathBuf,
        failed: usize,
        total: usize,
    },
    #[error("{0} face(s) failed")]
    FacesFailed(usize),
    #[error("cancelled")]
    Cancelled,
}
