//! OpenType language resolution for CJK faces.
//!
//! Punctuation geometry conventions differ between Japanese, Korean,
//! Simplified Chinese and Traditional Chinese; when the caller does not
//! name a language we try to derive one from the OS/2 codepage ranges
//! and the `name` table, per the heuristics below.

use std::str::FromStr;

use write_fonts::read::TableProvider;

use crate::{error::Error, font::Face};

/// An OpenType language system tag this tool understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LanguageTag {
    /// Japanese
    Jan,
    /// Korean
    Kor,
    /// Simplified Chinese
    Zhs,
    /// Traditional Chinese
    Zht,
    /// Traditional Chinese, Hong Kong. Classifies like [`LanguageTag::Zht`].
    Zhh,
}

impl LanguageTag {
    pub fn ot_tag(self) -> &'static str {
        match self {
            LanguageTag::Jan => "JAN",
            LanguageTag::Kor => "KOR",
            LanguageTag::Zhs => "ZHS",
            LanguageTag::Zht => "ZHT",
            LanguageTag::Zhh => "ZHH",
        }
    }

    /// The BCP-47 private-use form HarfBuzz maps back to an OT tag.
    pub fn bcp47_hbot(self) -> String {
        format!("x-hbot{}", self.ot_tag())
    }

    /// ZHH follows Traditional Chinese conventions everywhere we care.
    pub fn canonical(self) -> LanguageTag {
        match self {
            LanguageTag::Zhh => LanguageTag::Zht,
            other => other,
        }
    }
}

impl std::fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ot_tag())
    }
}

impl FromStr for LanguageTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().trim() {
            "JAN" => Ok(LanguageTag::Jan),
            "KOR" => Ok(LanguageTag::Kor),
            "ZHS" => Ok(LanguageTag::Zhs),
            "ZHT" => Ok(LanguageTag::Zht),
            "ZHH" => Ok(LanguageTag::Zhh),
            _ => Err(Error::UnknownLanguage(s.to_owned())),
        }
    }
}

// OS/2 ulCodePageRange1 bits, per the OpenType spec.
const CODE_PAGE_JIS: u32 = 1 << 17;
const CODE_PAGE_CHINESE_SIMPLIFIED: u32 = 1 << 18;
const CODE_PAGE_KOREAN_WANSUNG: u32 = 1 << 19;
const CODE_PAGE_CHINESE_TRADITIONAL: u32 = 1 << 20;
const CODE_PAGE_KOREAN_JOHAB: u32 = 1 << 21;

/// Resolve the language for a face, or fail with [`Error::LanguageAmbiguous`].
///
/// The user-supplied tag always wins. Otherwise we look at which CJK
/// codepages the OS/2 table declares: exactly one covered language is
/// decisive, and a font covering both Japanese and Chinese is accepted
/// as Japanese when the family name says so.
pub fn detect(face: &Face, user: Option<LanguageTag>) -> Result<LanguageTag, Error> {
    if let Some(tag) = user {
        return Ok(tag);
    }
    let code_pages = face
        .font()
        .os2()
        .ok()
        .and_then(|os2| os2.ul_code_page_range_1())
        .unwrap_or_default();
    let family = face.family_name();
    detect_from(code_pages, family.as_deref())
        .ok_or_else(|| Error::LanguageAmbiguous {
            face: face.display_name(),
        })
}

fn detect_from(code_pages: u32, family: Option<&str>) -> Option<LanguageTag> {
    let japanese = code_pages & CODE_PAGE_JIS != 0;
    let korean = code_pages & (CODE_PAGE_KOREAN_WANSUNG | CODE_PAGE_KOREAN_JOHAB) != 0;
    let simplified = code_pages & CODE_PAGE_CHINESE_SIMPLIFIED != 0;
    let traditional = code_pages & CODE_PAGE_CHINESE_TRADITIONAL != 0;

    match (japanese, korean, simplified, traditional) {
        (true, false, false, false) => Some(LanguageTag::Jan),
        (false, true, false, false) => Some(LanguageTag::Kor),
        (false, false, true, false) => Some(LanguageTag::Zhs),
        (false, false, false, true) => Some(LanguageTag::Zht),
        (true, _, _, _) if family.is_some_and(name_says_japanese) => Some(LanguageTag::Jan),
        _ => None,
    }
}

fn name_says_japanese(family: &str) -> bool {
    family.contains("JP") || family.contains("Jp") || family.contains("Japanese")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags() {
        assert_eq!("jan".parse::<LanguageTag>().unwrap(), LanguageTag::Jan);
        assert_eq!("ZHH".parse::<LanguageTag>().unwrap(), LanguageTag::Zhh);
        assert!("JA".parse::<LanguageTag>().is_err());
    }

    #[test]
    fn single_codepage_is_decisive() {
        assert_eq!(detect_from(CODE_PAGE_JIS, None), Some(LanguageTag::Jan));
        assert_eq!(
            detect_from(CODE_PAGE_KOREAN_WANSUNG, None),
            Some(LanguageTag::Kor)
        );
        assert_eq!(
            detect_from(CODE_PAGE_KOREAN_JOHAB, None),
            Some(LanguageTag::Kor)
        );
        assert_eq!(
            detect_from(CODE_PAGE_CHINESE_SIMPLIFIED, None),
            Some(LanguageTag::Zhs)
        );
        assert_eq!(
            detect_from(CODE_PAGE_CHINESE_TRADITIONAL, None),
            Some(LanguageTag::Zht)
        );
    }

    #[test]
    fn japanese_plus_chinese_needs_the_name() {
        let pages = CODE_PAGE_JIS | CODE_PAGE_CHINESE_SIMPLIFIED;
        assert_eq!(detect_from(pages, None), None);
        assert_eq!(
            detect_from(pages, Some("Some Font JP")),
            Some(LanguageTag::Jan)
        );
        assert_eq!(detect_from(pages, Some("Some Font SC")), None);
    }

    #[test]
    fn no_cjk_coverage_is_ambiguous() {
        assert_eq!(detect_from(0, Some("Anything")), None);
    }

    #[test]
    fn zhh_canonicalizes_to_zht() {
        assert_eq!(LanguageTag::Zhh.canonical(), LanguageTag::Zht);
        assert_eq!(LanguageTag::Jan.canonical(), LanguageTag::Jan);
    }
}
