//! The four-way partition of candidate punctuation glyphs.
//!
//! Every accepted glyph lands in exactly one of Left/Right/Middle; Full
//! is the bucket for fullwidth glyphs whose ink leaves no half to trim.

use std::collections::BTreeMap;
use std::io::Write;

use write_fonts::types::GlyphId16;

use crate::error::Error;

/// Where a glyph's ink sits within its em cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PairClass {
    /// Ink in the left half; the right half is trimmable. E.g. U+3001 in
    /// Japanese.
    Left,
    /// Ink in the right half; opening brackets.
    Right,
    /// Ink centered; e.g. U+30FB.
    Middle,
    /// Fullwidth with no trimmable half; never adjusted.
    Full,
}

impl PairClass {
    pub fn letter(self) -> char {
        match self {
            PairClass::Left => 'L',
            PairClass::Right => 'R',
            PairClass::Middle => 'M',
            PairClass::Full => 'F',
        }
    }

    /// Tie-break priority when one glyph is claimed by several classes.
    fn priority(self) -> u8 {
        match self {
            PairClass::Left => 0,
            PairClass::Right => 1,
            PairClass::Middle => 2,
            PairClass::Full => 3,
        }
    }
}

/// Glyphs of one class, keyed by glyph id; the value is the lowest code
/// point that produced the glyph (kept for shaping tests and logs).
pub type ClassSet = BTreeMap<GlyphId16, char>;

/// The per-face, per-flow-direction classification result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlyphSets {
    pub left: ClassSet,
    pub right: ClassSet,
    pub middle: ClassSet,
    pub full: ClassSet,
}

impl GlyphSets {
    pub fn class(&self, class: PairClass) -> &ClassSet {
        match class {
            PairClass::Left => &self.left,
            PairClass::Right => &self.right,
            PairClass::Middle => &self.middle,
            PairClass::Full => &self.full,
        }
    }

    fn class_mut(&mut self, class: PairClass) -> &mut ClassSet {
        match class {
            PairClass::Left => &mut self.left,
            PairClass::Right => &mut self.right,
            PairClass::Middle => &mut self.middle,
            PairClass::Full => &mut self.full,
        }
    }

    /// Record `ch -> glyph_id` under `class`, keeping the lowest code
    /// point when several map to the same glyph.
    pub fn insert(&mut self, class: PairClass, glyph_id: GlyphId16, ch: char) {
        let set = self.class_mut(class);
        match set.get_mut(&glyph_id) {
            Some(existing) if *existing <= ch => (),
            Some(existing) => *existing = ch,
            None => {
                set.insert(glyph_id, ch);
            }
        }
    }

    /// No glyph may belong to two classes; keep the highest-priority
    /// claim (L over R over M, with F yielding to all).
    pub fn enforce_disjoint(&mut self) {
        let order = [
            PairClass::Left,
            PairClass::Right,
            PairClass::Middle,
            PairClass::Full,
        ];
        for (i, class) in order.iter().enumerate() {
            let claimed: Vec<GlyphId16> = self.class(*class).keys().copied().collect();
            for later in &order[i + 1..] {
                debug_assert!(later.priority() > class.priority());
                let set = self.class_mut(*later);
                for gid in &claimed {
                    set.remove(gid);
                }
            }
        }
    }

    /// The `chws` pair table needs at least one left and one right glyph.
    pub fn has_pairs(&self) -> bool {
        !self.left.is_empty() && !self.right.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty() && self.middle.is_empty()
    }

    /// All adjusted glyphs (L, R and M) in ascending glyph-id order.
    pub fn adjusted_glyphs(&self) -> Vec<GlyphId16> {
        let mut glyphs: Vec<GlyphId16> = self
            .left
            .keys()
            .chain(self.right.keys())
            .chain(self.middle.keys())
            .copied()
            .collect();
        glyphs.sort_unstable();
        glyphs.dedup();
        glyphs
    }

    /// Write the sidecar dump: one glyph id per line, ascending within
    /// each class, prefixed by the class letter (and `v` when vertical).
    pub fn save_glyphs(&self, out: &mut dyn Write, vertical: bool) -> Result<(), Error> {
        let prefix = if vertical { "v" } else { "" };
        for class in [
            PairClass::Left,
            PairClass::Right,
            PairClass::Middle,
            PairClass::Full,
        ] {
            for gid in self.class(class).keys() {
                writeln!(out, "{prefix}{} {}", class.letter(), gid.to_u16())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    #[test]
    fn uniqueness_prefers_left_then_right_then_middle() {
        let mut sets = GlyphSets::default();
        sets.insert(PairClass::Middle, gid(5), '\u{3001}');
        sets.insert(PairClass::Left, gid(5), '\u{3001}');
        sets.insert(PairClass::Right, gid(6), '\u{300C}');
        sets.insert(PairClass::Middle, gid(6), '\u{300C}');
        sets.insert(PairClass::Full, gid(6), '\u{300C}');
        sets.enforce_disjoint();
        assert!(sets.left.contains_key(&gid(5)));
        assert!(!sets.middle.contains_key(&gid(5)));
        assert!(sets.right.contains_key(&gid(6)));
        assert!(!sets.middle.contains_key(&gid(6)));
        assert!(!sets.full.contains_key(&gid(6)));
    }

    #[test]
    fn insert_keeps_lowest_codepoint() {
        let mut sets = GlyphSets::default();
        sets.insert(PairClass::Left, gid(4), '\u{FF0C}');
        sets.insert(PairClass::Left, gid(4), '\u{3001}');
        sets.insert(PairClass::Left, gid(4), '\u{FF0E}');
        assert_eq!(sets.left.get(&gid(4)), Some(&'\u{3001}'));
    }

    #[test]
    fn glyph_dump_format() {
        let mut sets = GlyphSets::default();
        sets.insert(PairClass::Right, gid(3), '\u{300C}');
        sets.insert(PairClass::Left, gid(9), '\u{300D}');
        sets.insert(PairClass::Left, gid(2), '\u{3001}');
        let mut out = Vec::new();
        sets.save_glyphs(&mut out, false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "L 2\nL 9\nR 3\n");

        let mut out = Vec::new();
        sets.save_glyphs(&mut out, true).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("vL 2\n"));
    }

    #[test]
    fn pair_applicability() {
        let mut sets = GlyphSets::default();
        assert!(!sets.has_pairs());
        sets.insert(PairClass::Left, gid(1), 'a');
        assert!(!sets.has_pairs());
        sets.insert(PairClass::Right, gid(2), 'b');
        assert!(sets.has_pairs());
    }
}
