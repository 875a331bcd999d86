//! Ink bounding boxes and half-width tests.
//!
//! The bbox is accumulated from outline segment points including
//! control points, which slightly over-estimates extents at curve
//! bulges; for deciding whether half an em cell is blank that error is
//! well inside the tolerance.

use skrifa::{
    instance::{LocationRef, Size},
    outline::{DrawSettings, OutlineGlyphCollection, OutlinePen},
    GlyphId, MetadataProvider,
};

use crate::{
    classes::PairClass,
    error::Error,
    shape::{FlowDirection, ShapedGlyph},
};

/// Which part of the em cell a glyph's ink occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InkPart {
    Left,
    Right,
    Middle,
    Other,
}

impl InkPart {
    pub fn matches(self, class: PairClass) -> bool {
        matches!(
            (self, class),
            (InkPart::Left, PairClass::Left)
                | (InkPart::Right, PairClass::Right)
                | (InkPart::Middle, PairClass::Middle)
        )
    }
}

/// Classify an ink interval `[min, max]` within the cell `[left, right]`.
///
/// Checked in order left, right, middle, so a degenerate interval that
/// satisfies several tests resolves deterministically.
pub fn compute_ink_part(min: f64, max: f64, left: f64, right: f64, margin: f64) -> InkPart {
    debug_assert!(min <= max);
    debug_assert!(left < right);
    let middle = (left + right) / 2.0;
    if max <= middle + margin {
        return InkPart::Left;
    }
    if min >= middle - margin {
        return InkPart::Right;
    }
    let quarter_left = (left + middle) / 2.0;
    let quarter_right = (right + middle) / 2.0;
    if min >= quarter_left - margin && max <= quarter_right + margin {
        return InkPart::Middle;
    }
    InkPart::Other
}

/// Is the advance within tolerance of the expected fullwidth advance?
pub fn is_fullwidth(advance: i32, em: f64, tolerance: f64) -> bool {
    (advance as f64 - em).abs() <= tolerance
}

/// An axis-aligned ink bounding box in font units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InkBounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Walks glyph outlines to answer the half-width questions.
pub struct InkBoundsAnalyzer<'a> {
    glyphs: OutlineGlyphCollection<'a>,
    margin: f64,
}

impl<'a> InkBoundsAnalyzer<'a> {
    /// `margin` is in font units (typically `tolerance x UPEM`).
    pub fn new(data: &'a [u8], index: u32, margin: f64) -> Result<Self, Error> {
        let font = skrifa::FontRef::from_index(data, index)
            .map_err(|e| Error::Outlines(e.to_string()))?;
        Ok(InkBoundsAnalyzer {
            glyphs: font.outline_glyphs(),
            margin,
        })
    }

    /// The ink bbox, or `None` for a blank glyph.
    pub fn bounds(&self, glyph_id: u32) -> Result<Option<InkBounds>, Error> {
        let glyph = self
            .glyphs
            .get(GlyphId::new(glyph_id))
            .ok_or(Error::OutlineMalformed {
                glyph_id,
                message: "no outline".into(),
            })?;
        let mut pen = BoundsPen::default();
        glyph
            .draw(
                DrawSettings::unhinted(Size::unscaled(), LocationRef::default()),
                &mut pen,
            )
            .map_err(|e| Error::OutlineMalformed {
                glyph_id,
                message: e.to_string(),
            })?;
        Ok(pen.bounds())
    }

    /// Where the ink of a shaped glyph sits along the flow axis, or
    /// `None` for a blank glyph. In vertical flow the interval is
    /// measured downward from the shaped origin.
    pub fn ink_part(
        &self,
        glyph: &ShapedGlyph,
        direction: FlowDirection,
    ) -> Result<Option<InkPart>, Error> {
        let Some(bounds) = self.bounds(glyph.glyph_id)? else {
            return Ok(None);
        };
        if glyph.advance <= 0 {
            return Ok(None);
        }
        let (min, max) = match direction {
            FlowDirection::Horizontal => (bounds.x_min, bounds.x_max),
            FlowDirection::Vertical => (
                glyph.offset as f64 - bounds.y_max,
                glyph.offset as f64 - bounds.y_min,
            ),
        };
        Ok(Some(compute_ink_part(
            min,
            max,
            0.0,
            glyph.advance as f64,
            self.margin,
        )))
    }
}

/// Accumulates a bbox over every point the outline mentions, control
/// points included.
#[derive(Debug, Default)]
struct BoundsPen {
    bounds: Option<InkBounds>,
}

impl BoundsPen {
    fn add(&mut self, x: f32, y: f32) {
        let (x, y) = (x as f64, y as f64);
        match &mut self.bounds {
            Some(b) => {
                b.x_min = b.x_min.min(x);
                b.y_min = b.y_min.min(y);
                b.x_max = b.x_max.max(x);
                b.y_max = b.y_max.max(y);
            }
            None => {
                self.bounds = Some(InkBounds {
                    x_min: x,
                    y_min: y,
                    x_max: x,
                    y_max: y,
                })
            }
        }
    }

    fn bounds(&self) -> Option<InkBounds> {
        self.bounds
    }
}

impl OutlinePen for BoundsPen {
    fn move_to(&mut self, x: f32, y: f32) {
        self.add(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.add(x, y);
    }

    fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
        self.add(cx0, cy0);
        self.add(x, y);
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        self.add(cx0, cy0);
        self.add(cx1, cy1);
        self.add(x, y);
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestFontBuilder;

    #[test]
    fn ink_part_classification() {
        // Ink filling the left half only.
        assert_eq!(compute_ink_part(20.0, 480.0, 0.0, 1000.0, 50.0), InkPart::Left);
        // Right half.
        assert_eq!(
            compute_ink_part(520.0, 980.0, 0.0, 1000.0, 50.0),
            InkPart::Right
        );
        // Centered.
        assert_eq!(
            compute_ink_part(300.0, 700.0, 0.0, 1000.0, 50.0),
            InkPart::Middle
        );
        // Fills the cell.
        assert_eq!(
            compute_ink_part(20.0, 980.0, 0.0, 1000.0, 50.0),
            InkPart::Other
        );
        // The margin rescues slightly-over ink.
        assert_eq!(
            compute_ink_part(0.0, 540.0, 0.0, 1000.0, 50.0),
            InkPart::Left
        );
        assert_eq!(
            compute_ink_part(0.0, 560.0, 0.0, 1000.0, 50.0),
            InkPart::Other
        );
    }

    #[test]
    fn fullwidth_tolerance() {
        assert!(is_fullwidth(1000, 1000.0, 50.0));
        assert!(is_fullwidth(960, 1000.0, 50.0));
        assert!(!is_fullwidth(500, 1000.0, 50.0));
    }

    #[test]
    fn bounds_from_outlines() {
        // jan_punctuation draws U+3001 as a small box in the left-bottom
        // quadrant and U+300C in the right half.
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let analyzer = InkBoundsAnalyzer::new(&data, 0, 50.0).unwrap();

        let comma = TestFontBuilder::glyph_id_for('\u{3001}');
        let bounds = analyzer.bounds(comma as u32).unwrap().unwrap();
        assert!(bounds.x_max <= 500.0);

        let glyph = ShapedGlyph {
            glyph_id: comma as u32,
            cluster: 0,
            advance: 1000,
            offset: 0,
        };
        assert_eq!(
            analyzer
                .ink_part(&glyph, FlowDirection::Horizontal)
                .unwrap(),
            Some(InkPart::Left)
        );
    }

    #[test]
    fn blank_glyph_has_no_ink() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let analyzer = InkBoundsAnalyzer::new(&data, 0, 50.0).unwrap();
        let blank = TestFontBuilder::glyph_id_for('\u{3000}');
        assert_eq!(analyzer.bounds(blank as u32).unwrap(), None);
    }
}
