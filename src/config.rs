//! Build configuration: candidate code points and per-face options.
//!
//! The candidate sets follow JLREQ §3.1.2 and CLREQ §3.1.6.1. Which
//! class a code point belongs to depends on the language convention:
//! the fullwidth period and comma sit at the left-bottom of the em in
//! Japanese and Korean but are centered in Traditional Chinese, the
//! colon and semicolon are centered in Japanese but left-aligned in
//! Simplified Chinese, and so on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use write_fonts::types::GlyphId16;

use crate::{classes::PairClass, language::LanguageTag};

/// CJK opening brackets (right-half ink).
pub const CJK_OPENING: &[char] = &[
    '\u{3008}', '\u{300A}', '\u{300C}', '\u{300E}', '\u{3010}', '\u{3014}', '\u{3016}', '\u{3018}',
    '\u{301A}', '\u{301D}', '\u{FF08}', '\u{FF3B}', '\u{FF5B}', '\u{FF5F}',
];

/// CJK closing brackets (left-half ink).
pub const CJK_CLOSING: &[char] = &[
    '\u{3009}', '\u{300B}', '\u{300D}', '\u{300F}', '\u{3011}', '\u{3015}', '\u{3017}', '\u{3019}',
    '\u{301B}', '\u{301E}', '\u{301F}', '\u{FF09}', '\u{FF3D}', '\u{FF5D}', '\u{FF60}',
];

/// Opening quotes; unified code points whose fullwidth forms come from
/// `fwid`.
pub const QUOTES_OPENING: &[char] = &['\u{2018}', '\u{201C}'];

/// Closing quotes.
pub const QUOTES_CLOSING: &[char] = &['\u{2019}', '\u{201D}'];

/// The katakana middle dot.
pub const CJK_MIDDLE: &[char] = &['\u{30FB}'];

/// Fullwidth period and comma: left in JAN/KOR/ZHS, middle in ZHT.
pub const CJK_PERIOD_COMMA: &[char] = &['\u{3001}', '\u{3002}', '\u{FF0C}', '\u{FF0E}'];

/// Fullwidth colon and semicolon: middle in JAN, left in ZHS.
pub const CJK_COLON_SEMICOLON: &[char] = &['\u{FF1A}', '\u{FF1B}'];

/// Fullwidth exclamation and question marks: left only in ZHS.
pub const CJK_EXCLAM_QUESTION: &[char] = &['\u{FF01}', '\u{FF1F}'];

/// How much post-build shaping verification to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestLevel {
    Off,
    #[default]
    Smoke,
    Full,
}

impl From<u8> for TestLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => TestLevel::Off,
            1 => TestLevel::Smoke,
            _ => TestLevel::Full,
        }
    }
}

/// Optional per-candidate hook: reassign or drop a (code point, class)
/// proposal before filtering.
pub type ClassOverride = Arc<dyn Fn(char, PairClass) -> Option<PairClass> + Send + Sync>;

/// Optional hook removing an L x R glyph pair from the pair lookup.
pub type PairFilter = Arc<dyn Fn(GlyphId16, GlyphId16) -> bool + Send + Sync>;

/// Options for one build. A plain value; per-font tweaks are expressed
/// through the function-valued hooks rather than subclassing.
#[derive(Clone)]
pub struct Config {
    /// `None` means auto-detect; see [`crate::language`].
    pub language: Option<LanguageTag>,
    /// Emit `vchw`/`vhal` when the face has vertical metrics.
    pub vertical: bool,
    /// When false, trust the language convention and skip outline
    /// analysis entirely.
    pub use_ink_bounds: bool,
    /// Expected advance of a fullwidth glyph, in ems.
    pub fullwidth_advance_ems: f64,
    /// Tolerance for advance and ink tests, as a fraction of UPEM.
    pub fullwidth_tolerance: f64,
    /// L x R code-point pairs excluded from the pair lookup (only; the
    /// single-positioning lookup is unaffected).
    pub skip_pairs: BTreeSet<(char, char)>,
    pub test_level: TestLevel,
    pub custom_class_overrides: Option<ClassOverride>,
    pub custom_pair_filter: Option<PairFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            language: None,
            vertical: true,
            use_ink_bounds: true,
            fullwidth_advance_ems: 1.0,
            fullwidth_tolerance: 0.05,
            skip_pairs: BTreeSet::new(),
            test_level: TestLevel::default(),
            custom_class_overrides: None,
            custom_pair_filter: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("language", &self.language)
            .field("vertical", &self.vertical)
            .field("use_ink_bounds", &self.use_ink_bounds)
            .field("fullwidth_advance_ems", &self.fullwidth_advance_ems)
            .field("fullwidth_tolerance", &self.fullwidth_tolerance)
            .field("skip_pairs", &self.skip_pairs)
            .field("test_level", &self.test_level)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// A copy with the given language; an explicit language means the
    /// convention, not the geometry, decides classification.
    pub fn with_language(&self, language: Option<LanguageTag>) -> Config {
        let mut clone = self.clone();
        clone.use_ink_bounds = language.is_none();
        clone.language = language;
        clone
    }

    /// The classes a code point can belong to under `language`, or under
    /// any language when `language` is `None` (the auto / ink-bounds
    /// path, where geometry narrows the candidates down).
    pub fn candidate_classes(&self, language: Option<LanguageTag>) -> CandidateClasses {
        let mut candidates = CandidateClasses::default();
        match language.map(LanguageTag::canonical) {
            Some(tag) => candidates.add_language(tag),
            None => {
                for tag in [
                    LanguageTag::Jan,
                    LanguageTag::Kor,
                    LanguageTag::Zhs,
                    LanguageTag::Zht,
                ] {
                    candidates.add_language(tag);
                }
            }
        }
        candidates
    }
}

/// Code point -> the set of classes that claim it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateClasses {
    by_char: BTreeMap<char, BTreeSet<PairClass>>,
}

impl CandidateClasses {
    fn add(&mut self, chars: &[char], class: PairClass) {
        for ch in chars {
            self.by_char.entry(*ch).or_default().insert(class);
        }
    }

    fn add_language(&mut self, tag: LanguageTag) {
        self.add(CJK_CLOSING, PairClass::Left);
        self.add(QUOTES_CLOSING, PairClass::Left);
        self.add(CJK_OPENING, PairClass::Right);
        self.add(QUOTES_OPENING, PairClass::Right);
        self.add(CJK_MIDDLE, PairClass::Middle);
        match tag {
            LanguageTag::Jan | LanguageTag::Kor => {
                self.add(CJK_PERIOD_COMMA, PairClass::Left);
                self.add(CJK_COLON_SEMICOLON, PairClass::Middle);
            }
            LanguageTag::Zhs => {
                self.add(CJK_PERIOD_COMMA, PairClass::Left);
                self.add(CJK_COLON_SEMICOLON, PairClass::Left);
                self.add(CJK_EXCLAM_QUESTION, PairClass::Left);
            }
            LanguageTag::Zht | LanguageTag::Zhh => {
                self.add(CJK_PERIOD_COMMA, PairClass::Middle);
                self.add(CJK_COLON_SEMICOLON, PairClass::Middle);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &BTreeSet<PairClass>)> + '_ {
        self.by_char.iter().map(|(ch, classes)| (*ch, classes))
    }

    pub fn classes_of(&self, ch: char) -> Option<&BTreeSet<PairClass>> {
        self.by_char.get(&ch)
    }

    pub fn len(&self) -> usize {
        self.by_char.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_char.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_comma_language_dichotomy() {
        let config = Config::default();
        let jan = config.candidate_classes(Some(LanguageTag::Jan));
        assert_eq!(
            jan.classes_of('\u{3001}').unwrap().iter().collect::<Vec<_>>(),
            [&PairClass::Left]
        );
        let zht = config.candidate_classes(Some(LanguageTag::Zht));
        assert_eq!(
            zht.classes_of('\u{3001}').unwrap().iter().collect::<Vec<_>>(),
            [&PairClass::Middle]
        );
        let zhh = config.candidate_classes(Some(LanguageTag::Zhh));
        assert_eq!(zht, zhh);
    }

    #[test]
    fn kor_matches_jan_convention() {
        let config = Config::default();
        assert_eq!(
            config.candidate_classes(Some(LanguageTag::Jan)),
            config.candidate_classes(Some(LanguageTag::Kor))
        );
    }

    #[test]
    fn exclam_question_only_in_zhs() {
        let config = Config::default();
        let zhs = config.candidate_classes(Some(LanguageTag::Zhs));
        assert!(zhs.classes_of('\u{FF01}').is_some());
        for tag in [LanguageTag::Jan, LanguageTag::Kor, LanguageTag::Zht] {
            assert!(
                config
                    .candidate_classes(Some(tag))
                    .classes_of('\u{FF01}')
                    .is_none(),
                "{tag}"
            );
        }
    }

    #[test]
    fn auto_mode_takes_the_union() {
        let config = Config::default();
        let auto = config.candidate_classes(None);
        let period = auto.classes_of('\u{3002}').unwrap();
        assert!(period.contains(&PairClass::Left));
        assert!(period.contains(&PairClass::Middle));
        // Brackets are never ambiguous.
        let open = auto.classes_of('\u{300C}').unwrap();
        assert_eq!(open.iter().collect::<Vec<_>>(), [&PairClass::Right]);
    }

    #[test]
    fn explicit_language_disables_ink_bounds() {
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        assert!(!config.use_ink_bounds);
        let auto = config.with_language(None);
        assert!(auto.use_ink_bounds);
    }
}
