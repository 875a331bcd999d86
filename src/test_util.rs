//! Synthetic fonts for tests: a handful of mapped glyphs with
//! controllable advances and rectangular ink.

use write_fonts::{
    dump_table,
    tables::cmap::Cmap,
    types::{GlyphId, Tag},
};

use crate::ttc::{build_font, FaceTables};

const TT_SFNT_VERSION: u32 = 0x0001_0000;

/// Where a test glyph's rectangular ink sits within its advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InkShape {
    LeftHalf,
    RightHalf,
    Center,
    Full,
    Blank,
}

/// The fixed character set of [`TestFontBuilder::jan_punctuation`];
/// glyph ids are their position here plus one.
const JAN_CHARS: &[(char, InkShape)] = &[
    ('\u{3000}', InkShape::Blank),
    ('\u{3001}', InkShape::LeftHalf),
    ('\u{3002}', InkShape::LeftHalf),
    ('\u{3008}', InkShape::RightHalf),
    ('\u{3009}', InkShape::LeftHalf),
    ('\u{300C}', InkShape::RightHalf),
    ('\u{300D}', InkShape::LeftHalf),
    ('\u{300E}', InkShape::RightHalf),
    ('\u{300F}', InkShape::LeftHalf),
    ('\u{30FB}', InkShape::Center),
    ('\u{FF01}', InkShape::LeftHalf),
    ('\u{FF1A}', InkShape::Center),
    ('\u{FF1B}', InkShape::Center),
    ('\u{FF1F}', InkShape::LeftHalf),
    ('\u{4E00}', InkShape::Full),
];

pub struct TestFontBuilder {
    upem: u16,
    glyphs: Vec<(char, u16, InkShape)>,
    gpos: Option<Vec<u8>>,
    os2_code_pages: Option<u32>,
}

impl TestFontBuilder {
    /// CJK punctuation drawn per the Japanese convention, plus one
    /// ideograph and a narrow Latin capital.
    pub fn jan_punctuation(upem: u16) -> TestFontBuilder {
        let mut glyphs: Vec<(char, u16, InkShape)> = JAN_CHARS
            .iter()
            .map(|(ch, shape)| (*ch, upem, *shape))
            .collect();
        glyphs.push(('A', (upem / 5) * 3, InkShape::Full));
        TestFontBuilder {
            upem,
            glyphs,
            gpos: None,
            os2_code_pages: None,
        }
    }

    /// The same character set, but every glyph's ink fills the cell:
    /// nothing has room for half-width spacing.
    pub fn full_ink(upem: u16) -> TestFontBuilder {
        let mut builder = TestFontBuilder::jan_punctuation(upem);
        for (_, _, shape) in &mut builder.glyphs {
            if *shape != InkShape::Blank {
                *shape = InkShape::Full;
            }
        }
        builder
    }

    /// No CJK coverage at all.
    pub fn latin_only(upem: u16) -> TestFontBuilder {
        let glyphs = ('A'..='E')
            .map(|ch| (ch, (upem / 5) * 3, InkShape::Full))
            .collect();
        TestFontBuilder {
            upem,
            glyphs,
            gpos: None,
            os2_code_pages: None,
        }
    }

    /// Redraw one character's ink, e.g. a centered U+3001 for the
    /// geometry-versus-convention tests.
    pub fn with_shape(mut self, ch: char, shape: InkShape) -> TestFontBuilder {
        for glyph in &mut self.glyphs {
            if glyph.0 == ch {
                glyph.2 = shape;
            }
        }
        self
    }

    pub fn with_gpos(mut self, bytes: Vec<u8>) -> TestFontBuilder {
        self.gpos = Some(bytes);
        self
    }

    pub fn with_os2_code_pages(mut self, bits: u32) -> TestFontBuilder {
        self.os2_code_pages = Some(bits);
        self
    }

    /// The glyph id a character of [`jan_punctuation`] maps to.
    ///
    /// [`jan_punctuation`]: TestFontBuilder::jan_punctuation
    pub fn glyph_id_for(ch: char) -> u16 {
        if ch == 'A' {
            return JAN_CHARS.len() as u16 + 1;
        }
        JAN_CHARS
            .iter()
            .position(|(c, _)| *c == ch)
            .map(|i| i as u16 + 1)
            .unwrap_or_else(|| panic!("{ch:?} is not in the test font"))
    }

    pub fn build(self) -> Vec<u8> {
        let upem = self.upem;
        let num_glyphs = self.glyphs.len() as u16 + 1;

        let mut glyf = Vec::new();
        let mut loca: Vec<u32> = vec![0];
        // glyph 0 is an empty .notdef
        loca.push(glyf.len() as u32);
        for (_, _, shape) in &self.glyphs {
            if let Some((x0, y0, x1, y1)) = rect_for(*shape, upem) {
                glyf.extend_from_slice(&rect_glyph(x0, y0, x1, y1));
            }
            while glyf.len() % 4 != 0 {
                glyf.push(0);
            }
            loca.push(glyf.len() as u32);
        }
        let loca_bytes: Vec<u8> = loca.iter().flat_map(|v| v.to_be_bytes()).collect();

        let mut hmtx = Vec::new();
        hmtx.extend_from_slice(&upem.to_be_bytes()); // .notdef
        hmtx.extend_from_slice(&0i16.to_be_bytes());
        for (_, advance, _) in &self.glyphs {
            hmtx.extend_from_slice(&advance.to_be_bytes());
            hmtx.extend_from_slice(&0i16.to_be_bytes());
        }

        let mappings = self
            .glyphs
            .iter()
            .enumerate()
            .map(|(i, (ch, _, _))| (*ch, GlyphId::new(i as u32 + 1)));
        let cmap = dump_table(&Cmap::from_mappings(mappings).unwrap()).unwrap();

        let mut tables = vec![
            (Tag::new(b"head"), head_table(upem)),
            (Tag::new(b"hhea"), hhea_table(upem, num_glyphs)),
            (Tag::new(b"maxp"), maxp_table(num_glyphs)),
            (Tag::new(b"hmtx"), hmtx),
            (Tag::new(b"loca"), loca_bytes),
            (Tag::new(b"glyf"), glyf),
            (Tag::new(b"cmap"), cmap),
        ];
        if let Some(bits) = self.os2_code_pages {
            tables.push((Tag::new(b"OS/2"), os2_table(bits)));
        }
        if let Some(gpos) = self.gpos {
            tables.push((Tag::new(b"GPOS"), gpos));
        }
        build_font(FaceTables {
            sfnt_version: TT_SFNT_VERSION,
            tables,
        })
        .unwrap()
    }
}

fn rect_for(shape: InkShape, upem: u16) -> Option<(i16, i16, i16, i16)> {
    let u = upem as i32;
    let (x0, x1) = match shape {
        InkShape::LeftHalf => (u / 12, u * 2 / 5),
        InkShape::RightHalf => (u * 3 / 5, u - u / 12),
        InkShape::Center => (u * 3 / 8, u * 5 / 8),
        InkShape::Full => (u / 24, u - u / 24),
        InkShape::Blank => return None,
    };
    // Centered ink is centered on both axes, so the middle test holds
    // in vertical flow too; the rest fill the height.
    let (y0, y1) = match shape {
        InkShape::LeftHalf => (u / 12, u * 2 / 5),
        InkShape::Center => (u * 3 / 8, u * 5 / 8),
        _ => (u / 12, u - u / 12),
    };
    Some((x0 as i16, y0 as i16, x1 as i16, y1 as i16))
}

/// A one-contour rectangle as a simple glyf glyph.
fn rect_glyph(x0: i16, y0: i16, x1: i16, y1: i16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1i16.to_be_bytes()); // numberOfContours
    for v in [x0, y0, x1, y1] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&3u16.to_be_bytes()); // endPtsOfContours
    out.extend_from_slice(&0u16.to_be_bytes()); // instructionLength
    out.extend_from_slice(&[0x01; 4]); // four on-curve points, 16-bit deltas
    for dx in [x0, x1 - x0, 0, -(x1 - x0)] {
        out.extend_from_slice(&dx.to_be_bytes());
    }
    for dy in [y0, 0, y1 - y0, 0] {
        out.extend_from_slice(&dy.to_be_bytes());
    }
    out
}

fn head_table(upem: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // version
    out.extend_from_slice(&0u32.to_be_bytes()); // fontRevision
    out.extend_from_slice(&0u32.to_be_bytes()); // checkSumAdjustment
    out.extend_from_slice(&0x5F0F_3CF5u32.to_be_bytes()); // magicNumber
    out.extend_from_slice(&0x0003u16.to_be_bytes()); // flags
    out.extend_from_slice(&upem.to_be_bytes());
    out.extend_from_slice(&0i64.to_be_bytes()); // created
    out.extend_from_slice(&0i64.to_be_bytes()); // modified
    out.extend_from_slice(&0i16.to_be_bytes()); // xMin
    out.extend_from_slice(&0i16.to_be_bytes()); // yMin
    out.extend_from_slice(&(upem as i16).to_be_bytes()); // xMax
    out.extend_from_slice(&(upem as i16).to_be_bytes()); // yMax
    out.extend_from_slice(&0u16.to_be_bytes()); // macStyle
    out.extend_from_slice(&8u16.to_be_bytes()); // lowestRecPPEM
    out.extend_from_slice(&2i16.to_be_bytes()); // fontDirectionHint
    out.extend_from_slice(&1i16.to_be_bytes()); // indexToLocFormat: long
    out.extend_from_slice(&0i16.to_be_bytes()); // glyphDataFormat
    out
}

fn hhea_table(upem: u16, num_glyphs: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&((upem as i16 / 10) * 8).to_be_bytes()); // ascender
    out.extend_from_slice(&(-(upem as i16 / 10) * 2).to_be_bytes()); // descender
    out.extend_from_slice(&0i16.to_be_bytes()); // lineGap
    out.extend_from_slice(&upem.to_be_bytes()); // advanceWidthMax
    out.extend_from_slice(&0i16.to_be_bytes()); // minLeftSideBearing
    out.extend_from_slice(&0i16.to_be_bytes()); // minRightSideBearing
    out.extend_from_slice(&(upem as i16).to_be_bytes()); // xMaxExtent
    out.extend_from_slice(&1i16.to_be_bytes()); // caretSlopeRise
    out.extend_from_slice(&0i16.to_be_bytes()); // caretSlopeRun
    out.extend_from_slice(&0i16.to_be_bytes()); // caretOffset
    out.extend_from_slice(&[0; 8]); // reserved
    out.extend_from_slice(&0i16.to_be_bytes()); // metricDataFormat
    out.extend_from_slice(&num_glyphs.to_be_bytes()); // numberOfHMetrics
    out
}

fn maxp_table(num_glyphs: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&num_glyphs.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes()); // maxPoints
    out.extend_from_slice(&1u16.to_be_bytes()); // maxContours
    out.extend_from_slice(&[0; 4]); // composite points/contours
    out.extend_from_slice(&2u16.to_be_bytes()); // maxZones
    out.extend_from_slice(&[0; 16]); // remaining limits
    out
}

fn os2_table(code_page_range_1: u32) -> Vec<u8> {
    let mut out = vec![0u8; 86];
    out[0..2].copy_from_slice(&1u16.to_be_bytes()); // version 1
    out[78..82].copy_from_slice(&code_page_range_1.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use write_fonts::read::{FontRef, TableProvider};

    #[test]
    fn synthetic_font_parses() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let font = FontRef::new(&data).unwrap();
        assert_eq!(font.head().unwrap().units_per_em(), 1000);
        assert_eq!(font.maxp().unwrap().num_glyphs(), JAN_CHARS.len() as u16 + 2);
        let cmap = font.cmap().unwrap();
        assert_eq!(
            cmap.map_codepoint(0x3001u32).map(|g| g.to_u32()),
            Some(TestFontBuilder::glyph_id_for('\u{3001}') as u32)
        );
        assert!(cmap.map_codepoint(0x300Au32).is_none());
    }

    #[test]
    fn os2_code_pages_roundtrip() {
        let data = TestFontBuilder::jan_punctuation(1000)
            .with_os2_code_pages(1 << 17)
            .build();
        let font = FontRef::new(&data).unwrap();
        assert_eq!(font.os2().unwrap().ul_code_page_range_1(), Some(1 << 17));
    }
}
