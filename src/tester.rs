//! Post-build verification: reopen the written font and shape pair
//! strings to confirm the new features actually trim the advances.

use std::path::Path;

use write_fonts::types::{GlyphId16, Tag};

use crate::{
    classes::{ClassSet, GlyphSets},
    config::TestLevel,
    error::Error,
    font::{Face, FontFile},
    language::LanguageTag,
    shape::{FlowDirection, Shape, ShapeOptions, CHWS, VCHW},
};

/// How many pairs a smoke run samples from the L x R product.
const SMOKE_PAIR_COUNT: usize = 10;

/// What to verify for one face of the written font.
#[derive(Clone, Debug)]
pub struct FaceTestPlan {
    pub index: u32,
    pub language: Option<LanguageTag>,
    pub horizontal: GlyphSets,
    pub vertical: Option<GlyphSets>,
    /// Expected fullwidth advance in font units.
    pub em: i32,
    pub half_em: i32,
    pub quarter_em: i32,
}

struct PairCheck {
    left: (GlyphId16, char),
    right: (GlyphId16, char),
    /// How much the pair's shaped advance must shrink.
    delta: i32,
}

/// Verify the written font. Failures are reported, never fixed up;
/// the file on disk stays as written either way.
pub fn test_font(
    path: &Path,
    data: &[u8],
    plans: &[FaceTestPlan],
    shaper: &dyn Shape,
    level: TestLevel,
) -> Result<(), Error> {
    if level == TestLevel::Off || plans.is_empty() {
        return Ok(());
    }
    let file = FontFile::from_bytes(path, data.to_vec());
    let mut failed = 0usize;
    let mut total = 0usize;
    for plan in plans {
        let face = file.face(plan.index)?;
        let checks = select_checks(&plan.horizontal, plan.half_em, plan.quarter_em, level);
        total += run_checks(
            &face,
            shaper,
            plan,
            &checks,
            FlowDirection::Horizontal,
            &mut failed,
        )?;
        if let Some(vertical) = &plan.vertical {
            let checks = select_checks(vertical, plan.half_em, plan.quarter_em, level);
            total += run_checks(
                &face,
                shaper,
                plan,
                &checks,
                FlowDirection::Vertical,
                &mut failed,
            )?;
        }
    }
    if failed > 0 {
        return Err(Error::TestFailure {
            path: path.to_owned(),
            failed,
            total,
        });
    }
    log::info!("PASS: \"{}\" {} checks", path.display(), total);
    Ok(())
}

fn pairs_of<'a>(
    a: &'a ClassSet,
    b: &'a ClassSet,
    delta: i32,
) -> impl Iterator<Item = PairCheck> + 'a {
    a.iter().flat_map(move |(lg, lc)| {
        b.iter().map(move |(rg, rc)| PairCheck {
            left: (*lg, *lc),
            right: (*rg, *rc),
            delta,
        })
    })
}

/// The full cartesian product for exhaustive runs; for smoke runs a
/// few representative L x R pairs plus one of each mixed law.
fn select_checks(sets: &GlyphSets, half_em: i32, quarter_em: i32, level: TestLevel) -> Vec<PairCheck> {
    let mut checks = Vec::new();
    match level {
        TestLevel::Off => (),
        TestLevel::Smoke => {
            checks.extend(pairs_of(&sets.left, &sets.right, half_em).take(SMOKE_PAIR_COUNT));
            checks.extend(pairs_of(&sets.left, &sets.middle, quarter_em).take(1));
            checks.extend(pairs_of(&sets.middle, &sets.right, quarter_em).take(1));
            checks.extend(pairs_of(&sets.middle, &sets.middle, quarter_em).take(1));
        }
        TestLevel::Full => {
            checks.extend(pairs_of(&sets.left, &sets.right, half_em));
            checks.extend(pairs_of(&sets.left, &sets.middle, quarter_em));
            checks.extend(pairs_of(&sets.middle, &sets.right, quarter_em));
            checks.extend(pairs_of(&sets.middle, &sets.middle, quarter_em));
        }
    }
    checks
}

fn run_checks(
    face: &Face,
    shaper: &dyn Shape,
    plan: &FaceTestPlan,
    checks: &[PairCheck],
    direction: FlowDirection,
    failed: &mut usize,
) -> Result<usize, Error> {
    let feature = match direction {
        FlowDirection::Horizontal => CHWS,
        FlowDirection::Vertical => VCHW,
    };
    let mut tested = 0usize;
    for check in checks {
        match check_pair(face, shaper, plan, check, direction, feature)? {
            Some(true) => tested += 1,
            Some(false) => {
                tested += 1;
                *failed += 1;
            }
            None => (),
        }
    }
    Ok(tested)
}

fn check_pair(
    face: &Face,
    shaper: &dyn Shape,
    plan: &FaceTestPlan,
    check: &PairCheck,
    direction: FlowDirection,
    feature: Tag,
) -> Result<Option<bool>, Error> {
    let text = format!("{}{}", check.left.1, check.right.1);
    let off_options = ShapeOptions::for_candidates(direction, plan.language);
    let mut on_options = off_options.clone();
    on_options.features.push(feature);

    let off = shaper.shape(face, &text, &off_options)?;
    // Only judge pairs that resolve to the exact glyphs we adjusted,
    // each a clean fullwidth glyph with the feature off.
    let applies = off.len() == 2
        && off[0].glyph_id == check.left.0.to_u16() as u32
        && off[1].glyph_id == check.right.0.to_u16() as u32
        && off.iter().all(|g| g.advance == plan.em);
    if !applies {
        return Ok(None);
    }
    let on = shaper.shape(face, &text, &on_options)?;
    let total: i32 = on.iter().map(|g| g.advance).sum();
    let expected = 2 * plan.em - check.delta;
    if total != expected {
        log::error!(
            "FAIL U+{:04X} U+{:04X}: shaped advance {} != {}",
            check.left.1 as u32,
            check.right.1 as u32,
            total,
            expected
        );
        return Ok(Some(false));
    }
    Ok(Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gpos::{merge_into_gpos, plan_features, AdjustmentMetrics, PairSkips};
    use crate::resolve::resolve;
    use crate::shape::BuzzShaper;
    use crate::test_util::TestFontBuilder;

    fn build_adjusted_font(upem: u16) -> (Vec<u8>, FaceTestPlan) {
        let data = TestFontBuilder::jan_punctuation(upem).build();
        let file = FontFile::from_bytes(Path::new("in.ttf"), data);
        let face = file.face(0).unwrap();
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let resolved = resolve(&face, &config, Some(LanguageTag::Jan), false, &BuzzShaper).unwrap();
        assert!(resolved.is_applicable());
        let metrics = AdjustmentMetrics::new(upem, &config);
        let planned = plan_features(
            &resolved.horizontal,
            None,
            &metrics,
            &PairSkips::new(),
            &PairSkips::new(),
        );
        let (gpos, _) = merge_into_gpos(&face, &planned).unwrap();
        let adjusted = TestFontBuilder::jan_punctuation(upem)
            .with_gpos(gpos.expect("gpos was built"))
            .build();
        let plan = FaceTestPlan {
            index: 0,
            language: Some(LanguageTag::Jan),
            horizontal: resolved.horizontal.clone(),
            vertical: None,
            em: upem as i32,
            half_em: metrics.half_em as i32,
            quarter_em: metrics.quarter_em as i32,
        };
        (adjusted, plan)
    }

    #[test]
    fn applied_features_satisfy_the_advance_law() {
        let (font, plan) = build_adjusted_font(1000);
        test_font(
            Path::new("out.ttf"),
            &font,
            &[plan],
            &BuzzShaper,
            TestLevel::Full,
        )
        .unwrap();
    }

    #[test]
    fn unadjusted_font_fails_the_checks() {
        let (_, plan) = build_adjusted_font(1000);
        // Shape the *original* font with the same expectations: the
        // feature is absent, so every applicable pair must fail.
        let original = TestFontBuilder::jan_punctuation(1000).build();
        let result = test_font(
            Path::new("out.ttf"),
            &original,
            &[plan],
            &BuzzShaper,
            TestLevel::Smoke,
        );
        assert!(matches!(result, Err(Error::TestFailure { .. })));
    }

    #[test]
    fn smoke_level_samples_fewer_pairs() {
        let (_, plan) = build_adjusted_font(1000);
        let full = select_checks(&plan.horizontal, plan.half_em, plan.quarter_em, TestLevel::Full);
        let smoke = select_checks(&plan.horizontal, plan.half_em, plan.quarter_em, TestLevel::Smoke);
        assert!(smoke.len() <= SMOKE_PAIR_COUNT + 3);
        assert!(full.len() > smoke.len());
    }
}
