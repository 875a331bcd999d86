//! The shaping capability.
//!
//! Classification only ever needs single-code-point queries plus small
//! two-glyph verification runs, so the interface is one call: text in,
//! glyphs with flow-axis advances out. The default binding is
//! rustybuzz, in process; setting `SHAPER` to the path of an
//! `hb-shape`-compatible binary swaps in a child-process shaper, which
//! is how the output of other shaping engines is cross-checked.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use write_fonts::types::Tag;

use crate::{error::Error, font::Face, language::LanguageTag};

pub const FWID: Tag = Tag::new(b"fwid");
pub const VERT: Tag = Tag::new(b"vert");
pub const CHWS: Tag = Tag::new(b"chws");
pub const VCHW: Tag = Tag::new(b"vchw");
pub const HALT: Tag = Tag::new(b"halt");
pub const VHAL: Tag = Tag::new(b"vhal");

const SHAPER_TIMEOUT_SECS: u64 = 30;

/// Flow direction of a shaping request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowDirection {
    #[default]
    Horizontal,
    Vertical,
}

impl FlowDirection {
    pub fn is_vertical(self) -> bool {
        matches!(self, FlowDirection::Vertical)
    }
}

/// One shaping request. Every query shapes under the `hani` script,
/// which covers all of the CJK punctuation we care about.
#[derive(Clone, Debug, Default)]
pub struct ShapeOptions {
    pub direction: FlowDirection,
    pub language: Option<LanguageTag>,
    pub features: Vec<Tag>,
}

impl ShapeOptions {
    /// The standard options for classification queries: `fwid` on so
    /// unified code points (e.g. U+2018) resolve to fullwidth glyphs,
    /// `vert` on in vertical flow.
    pub fn for_candidates(direction: FlowDirection, language: Option<LanguageTag>) -> ShapeOptions {
        let mut features = vec![FWID];
        if direction.is_vertical() {
            features.push(VERT);
        }
        ShapeOptions {
            direction,
            language,
            features,
        }
    }
}

/// One glyph of a shaping result. `advance` and `offset` are measured
/// along the flow axis, with vertical values negated so that a larger
/// advance always means more space consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub glyph_id: u32,
    pub cluster: u32,
    pub advance: i32,
    pub offset: i32,
}

/// The shaping capability consumed by the rest of the pipeline.
pub trait Shape: Send + Sync {
    fn shape(&self, face: &Face, text: &str, options: &ShapeOptions)
        -> Result<Vec<ShapedGlyph>, Error>;
}

/// Pick a shaper from the `SHAPER` environment variable.
pub fn shaper_from_env() -> Arc<dyn Shape> {
    match std::env::var("SHAPER") {
        Ok(value) if !value.is_empty() => {
            let mut parts = value.split(',');
            let program = PathBuf::from(parts.next().unwrap_or_default());
            let shapers: Vec<String> = parts.map(str::to_owned).collect();
            log::debug!("Using external shaper \"{}\"", program.display());
            Arc::new(ToolShaper { program, shapers })
        }
        _ => Arc::new(BuzzShaper),
    }
}

/// In-process shaping via rustybuzz.
pub struct BuzzShaper;

impl Shape for BuzzShaper {
    fn shape(
        &self,
        face: &Face,
        text: &str,
        options: &ShapeOptions,
    ) -> Result<Vec<ShapedGlyph>, Error> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let buzz_face = rustybuzz::Face::from_slice(face.file_data(), face.index())
            .ok_or_else(|| Error::ShaperUnavailable("rustybuzz could not parse face".into()))?;

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.set_direction(match options.direction {
            FlowDirection::Horizontal => rustybuzz::Direction::LeftToRight,
            FlowDirection::Vertical => rustybuzz::Direction::TopToBottom,
        });
        buffer.set_script(rustybuzz::script::HAN);
        if let Some(language) = options.language {
            if let Ok(lang) = rustybuzz::Language::from_str(&language.bcp47_hbot()) {
                buffer.set_language(lang);
            }
        }
        let features: Vec<rustybuzz::Feature> = options
            .features
            .iter()
            .map(|tag| {
                rustybuzz::Feature::new(
                    rustybuzz::ttf_parser::Tag::from_bytes(&tag.to_be_bytes()),
                    1,
                    ..,
                )
            })
            .collect();

        let output = rustybuzz::shape(&buzz_face, &features, buffer);
        let vertical = options.direction.is_vertical();
        let glyphs = output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, pos)| {
                if vertical {
                    ShapedGlyph {
                        glyph_id: info.glyph_id,
                        cluster: info.cluster,
                        advance: -pos.y_advance,
                        offset: -pos.y_offset,
                    }
                } else {
                    ShapedGlyph {
                        glyph_id: info.glyph_id,
                        cluster: info.cluster,
                        advance: pos.x_advance,
                        offset: pos.x_offset,
                    }
                }
            })
            .collect();
        Ok(glyphs)
    }
}

/// Child-process shaping via an `hb-shape`-compatible tool.
pub struct ToolShaper {
    program: PathBuf,
    /// Extra `--shapers` entries, e.g. `coretext`.
    shapers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ToolGlyph {
    g: u32,
    cl: u32,
    #[serde(default)]
    ax: i32,
    #[serde(default)]
    ay: i32,
    #[serde(default)]
    dx: i32,
    #[serde(default)]
    dy: i32,
}

impl Shape for ToolShaper {
    fn shape(
        &self,
        face: &Face,
        text: &str,
        options: &ShapeOptions,
    ) -> Result<Vec<ShapedGlyph>, Error> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let mut command = Command::new(&self.program);
        command.arg("--output-format=json").arg("--no-glyph-names");
        command.arg(format!("--font-file={}", face.path().display()));
        command.arg(format!("--face-index={}", face.index()));
        command.arg("--script=hani");
        if let Some(language) = options.language {
            command.arg(format!("--language={}", language.bcp47_hbot()));
        }
        if options.direction.is_vertical() {
            command.arg("--direction=ttb");
        }
        if !options.features.is_empty() {
            let features: Vec<String> =
                options.features.iter().map(|tag| tag.to_string()).collect();
            command.arg(format!("--features={}", features.join(",")));
        }
        if !self.shapers.is_empty() {
            command.arg(format!("--shapers={}", self.shapers.join(",")));
        }
        let unicodes: Vec<String> = text.chars().map(|ch| format!("{:#x}", ch as u32)).collect();
        command.arg(format!("--unicodes={}", unicodes.join(",")));

        let stdout = run_with_timeout(command, Duration::from_secs(SHAPER_TIMEOUT_SECS))?;
        let line = stdout
            .lines()
            .find(|line| line.starts_with('['))
            .ok_or_else(|| Error::ShaperUnavailable("no glyph line in shaper output".into()))?;
        let glyphs: Vec<ToolGlyph> = serde_json::from_str(line)
            .map_err(|e| Error::ShaperUnavailable(format!("bad shaper output: {e}")))?;

        let vertical = options.direction.is_vertical();
        Ok(glyphs
            .into_iter()
            .map(|g| {
                if vertical {
                    ShapedGlyph {
                        glyph_id: g.g,
                        cluster: g.cl,
                        advance: -g.ay,
                        offset: -g.dy,
                    }
                } else {
                    ShapedGlyph {
                        glyph_id: g.g,
                        cluster: g.cl,
                        advance: g.ax,
                        offset: g.dx,
                    }
                }
            })
            .collect())
    }
}

fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<String, Error> {
    command.stdout(Stdio::piped()).stderr(Stdio::null());
    let mut child = command
        .spawn()
        .map_err(|e| Error::ShaperUnavailable(e.to_string()))?;
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = String::new();
                if let Some(mut pipe) = child.stdout.take() {
                    use std::io::Read;
                    let _ = pipe.read_to_string(&mut stdout);
                }
                if !status.success() {
                    return Err(Error::ShaperUnavailable(format!(
                        "shaper exited with {status}"
                    )));
                }
                return Ok(stdout);
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    return Err(Error::ShaperTimeout(timeout.as_secs()));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(Error::ShaperUnavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontFile;
    use crate::test_util::TestFontBuilder;
    use std::path::Path;

    #[test]
    fn shape_single_codepoints() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        let face = file.face(0).unwrap();
        let shaper = BuzzShaper;
        let options = ShapeOptions::for_candidates(FlowDirection::Horizontal, None);

        let glyphs = shaper.shape(&face, "\u{300C}", &options).unwrap();
        assert_eq!(glyphs.len(), 1);
        assert_ne!(glyphs[0].glyph_id, 0);
        assert_eq!(glyphs[0].advance, 1000);

        // Unmapped code points go to .notdef.
        let glyphs = shaper.shape(&face, "\u{1F600}", &options).unwrap();
        assert_eq!(glyphs[0].glyph_id, 0);
    }

    #[test]
    fn empty_text_shapes_to_nothing() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        let face = file.face(0).unwrap();
        let glyphs = BuzzShaper
            .shape(&face, "", &ShapeOptions::default())
            .unwrap();
        assert!(glyphs.is_empty());
    }
}
