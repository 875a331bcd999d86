//! Candidate discovery and classification.
//!
//! Each candidate code point is shaped through the font (one
//! single-character buffer per query) to find its glyph, then filtered:
//! glyphs that are not fullwidth have no room to trim; when ink-bounds
//! analysis is on, the outline decides which class a glyph really
//! belongs to, and the language convention only picks the shaping
//! localization. With ink bounds off, the convention is the decision.

use std::collections::BTreeMap;

use write_fonts::types::GlyphId16;

use crate::{
    classes::{GlyphSets, PairClass},
    config::{
        CandidateClasses, Config, CJK_CLOSING, CJK_COLON_SEMICOLON, CJK_EXCLAM_QUESTION,
        CJK_OPENING, QUOTES_CLOSING, QUOTES_OPENING,
    },
    error::Error,
    font::Face,
    gpos::{AdjustmentMetrics, PairSkips},
    ink::{is_fullwidth, InkBoundsAnalyzer},
    language::LanguageTag,
    shape::{FlowDirection, Shape, ShapeOptions, ShapedGlyph},
};

/// The classification result for one face.
#[derive(Clone, Debug, Default)]
pub struct ResolvedGlyphs {
    pub horizontal: GlyphSets,
    pub vertical: Option<GlyphSets>,
    /// Every fullwidth candidate that shaped cleanly, horizontal flow.
    pub char_to_glyph: BTreeMap<char, GlyphId16>,
    pub vertical_char_to_glyph: BTreeMap<char, GlyphId16>,
}

impl ResolvedGlyphs {
    /// Neither flow direction produced a usable left/right pairing.
    pub fn is_applicable(&self) -> bool {
        self.horizontal.has_pairs()
            || self
                .vertical
                .as_ref()
                .map(GlyphSets::has_pairs)
                .unwrap_or(false)
    }

    /// Glyph-level skip sets from the configured code-point pairs and
    /// the custom pair filter.
    pub fn pair_skips(&self, config: &Config, vertical: bool) -> PairSkips {
        let (sets, chars) = if vertical {
            match &self.vertical {
                Some(sets) => (sets, &self.vertical_char_to_glyph),
                None => return PairSkips::new(),
            }
        } else {
            (&self.horizontal, &self.char_to_glyph)
        };
        let mut skips = PairSkips::new();
        for (left_ch, right_ch) in &config.skip_pairs {
            if let (Some(left), Some(right)) = (chars.get(left_ch), chars.get(right_ch)) {
                if sets.left.contains_key(left) && sets.right.contains_key(right) {
                    skips.entry(*left).or_default().insert(*right);
                }
            }
        }
        if let Some(filter) = &config.custom_pair_filter {
            for left in sets.left.keys() {
                for right in sets.right.keys() {
                    if !filter(*left, *right) {
                        skips.entry(*left).or_default().insert(*right);
                    }
                }
            }
        }
        skips
    }
}

/// Discover and classify the candidate glyphs of one face.
///
/// `language` must be resolved (not `None`) when `use_ink_bounds` is
/// off; with ink bounds on it only selects shaping localization while
/// the geometry decides membership.
pub fn resolve(
    face: &Face,
    config: &Config,
    language: Option<LanguageTag>,
    vertical: bool,
    shaper: &dyn Shape,
) -> Result<ResolvedGlyphs, Error> {
    if !config.use_ink_bounds && language.is_none() {
        return Err(Error::LanguageAmbiguous {
            face: face.display_name(),
        });
    }
    let metrics = AdjustmentMetrics::new(face.units_per_em()?, config);
    let candidate_language = if config.use_ink_bounds { None } else { language };
    let candidates = config.candidate_classes(candidate_language);
    let analyzer = if config.use_ink_bounds {
        Some(InkBoundsAnalyzer::new(
            face.file_data(),
            face.index(),
            metrics.tolerance,
        )?)
    } else {
        None
    };

    let mut char_to_glyph = BTreeMap::new();
    let horizontal = classify_direction(
        face,
        config,
        language,
        FlowDirection::Horizontal,
        shaper,
        &candidates,
        &metrics,
        analyzer.as_ref(),
        &mut char_to_glyph,
        None,
    )?;
    let mut vertical_char_to_glyph = BTreeMap::new();
    let vertical_sets = if vertical {
        Some(classify_direction(
            face,
            config,
            language,
            FlowDirection::Vertical,
            shaper,
            &candidates,
            &metrics,
            analyzer.as_ref(),
            &mut vertical_char_to_glyph,
            Some(&char_to_glyph),
        )?)
    } else {
        None
    };
    let resolved = ResolvedGlyphs {
        horizontal,
        vertical: vertical_sets,
        char_to_glyph,
        vertical_char_to_glyph,
    };
    log_result(face, &resolved);
    Ok(resolved)
}

#[allow(clippy::too_many_arguments)]
fn classify_direction(
    face: &Face,
    config: &Config,
    language: Option<LanguageTag>,
    direction: FlowDirection,
    shaper: &dyn Shape,
    candidates: &CandidateClasses,
    metrics: &AdjustmentMetrics,
    analyzer: Option<&InkBoundsAnalyzer>,
    char_to_glyph: &mut BTreeMap<char, GlyphId16>,
    horizontal_glyphs: Option<&BTreeMap<char, GlyphId16>>,
) -> Result<GlyphSets, Error> {
    let options = ShapeOptions::for_candidates(direction, language);
    let mut sets = GlyphSets::default();
    let mut buffer = [0u8; 4];
    for (ch, classes) in candidates.iter() {
        // Exclamation and question marks are never adjusted in vertical
        // flow, in any language or classification mode.
        if direction.is_vertical() && CJK_EXCLAM_QUESTION.contains(&ch) {
            continue;
        }
        let text: &str = ch.encode_utf8(&mut buffer);
        let shaped = shaper.shape(face, text, &options)?;
        let Some(glyph) = single_glyph(&shaped) else {
            log::debug!("U+{:04X}: not a single glyph, skipped", ch as u32);
            continue;
        };
        let Ok(glyph_id) = u16::try_from(glyph.glyph_id) else {
            continue;
        };
        let glyph_id = GlyphId16::new(glyph_id);
        if !is_fullwidth(glyph.advance, metrics.em, metrics.tolerance) {
            log::debug!(
                "U+{:04X}: advance {} is not fullwidth, skipped",
                ch as u32,
                glyph.advance
            );
            continue;
        }
        char_to_glyph.insert(ch, glyph_id);

        for class in classes {
            let class = match &config.custom_class_overrides {
                Some(hook) => match hook(ch, *class) {
                    Some(class) => class,
                    None => continue,
                },
                None => *class,
            };
            // Vertical adjustments for brackets and quotes only make
            // sense when the font rotates them: a code point whose
            // vertical shape equals its horizontal one is upright and
            // must keep its spacing. The colon/semicolon get the same
            // gate only under the language convention; with ink bounds
            // on, their geometry alone decides. Period and comma keep
            // their own glyphs in vertical flow.
            if let Some(horizontal) = horizontal_glyphs {
                let needs_vertical_alternate = CJK_OPENING.contains(&ch)
                    || CJK_CLOSING.contains(&ch)
                    || QUOTES_OPENING.contains(&ch)
                    || QUOTES_CLOSING.contains(&ch)
                    || (!config.use_ink_bounds && CJK_COLON_SEMICOLON.contains(&ch));
                if needs_vertical_alternate && horizontal.get(&ch) == Some(&glyph_id) {
                    log::debug!("U+{:04X}: no vertical alternate, skipped", ch as u32);
                    continue;
                }
            }
            match analyzer {
                Some(analyzer) => match analyzer.ink_part(&glyph, direction) {
                    Ok(Some(part)) if part.matches(class) => sets.insert(class, glyph_id, ch),
                    Ok(Some(_)) => sets.insert(PairClass::Full, glyph_id, ch),
                    Ok(None) => (),
                    Err(e) => {
                        log::warn!("U+{:04X}: {e}; excluded", ch as u32);
                        sets.insert(PairClass::Full, glyph_id, ch);
                    }
                },
                None => sets.insert(class, glyph_id, ch),
            }
        }
    }
    sets.enforce_disjoint();
    Ok(sets)
}

fn single_glyph(shaped: &[ShapedGlyph]) -> Option<ShapedGlyph> {
    match shaped {
        [glyph] if glyph.glyph_id != 0 => Some(*glyph),
        _ => None,
    }
}

fn log_result(face: &Face, resolved: &ResolvedGlyphs) {
    let h = &resolved.horizontal;
    match &resolved.vertical {
        Some(v) => log::debug!(
            "\"{}\": {}L {}R {}M {}F, vertical {}L {}R {}M {}F",
            face.display_name(),
            h.left.len(),
            h.right.len(),
            h.middle.len(),
            h.full.len(),
            v.left.len(),
            v.right.len(),
            v.middle.len(),
            v.full.len(),
        ),
        None => log::debug!(
            "\"{}\": {}L {}R {}M {}F",
            face.display_name(),
            h.left.len(),
            h.right.len(),
            h.middle.len(),
            h.full.len(),
        ),
    }
}
