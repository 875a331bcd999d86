//! GPOS lookup synthesis and merging.
//!
//! The pair adjustments are emitted as one class-based pair-positioning
//! lookup (GPOS type 2, format 2) per flow direction: a dense class
//! matrix stays around 2 KB where per-glyph pairs would explode to tens
//! of thousands of entries for CJK coverage. The unconditional
//! alternates (`halt`/`vhal`) are single-positioning lookups (type 1,
//! format 2).
//!
//! Merging never mutates a parsed table in place: the existing GPOS is
//! decomposed into parts (lookups, features, scripts), the new lookups
//! and feature records are appended, and the table is rebuilt. Lookups
//! are appended at the end of the LookupList, which is what makes the
//! new features apply after any pre-existing `kern` lookups.

use std::collections::{BTreeMap, BTreeSet};

use write_fonts::{
    dump_table,
    from_obj::ToOwnedTable,
    read::{tables::gpos as rgpos, tables::layout as rlayout, TableProvider},
    tables::gpos::{Class1Record, Class2Record, Gpos, PairPos, PositionLookup, SinglePos, ValueRecord},
    tables::layout::{
        Feature, FeatureList, FeatureRecord, FeatureVariations, LangSys, LangSysRecord, Lookup,
        LookupFlag, LookupList, Script, ScriptList, ScriptRecord,
    },
    types::{GlyphId16, Tag},
};

use crate::{
    classes::{GlyphSets, PairClass},
    config::Config,
    error::Error,
    font::Face,
    shape::{CHWS, HALT, VCHW, VHAL},
};

const GPOS: Tag = Tag::new(b"GPOS");
const DFLT_SCRIPT: Tag = Tag::new(b"DFLT");
const NO_REQUIRED_FEATURE: u16 = 0xFFFF;

/// Specific left-glyph x right-glyph pairs excluded from the pair
/// lookup.
pub type PairSkips = BTreeMap<GlyphId16, BTreeSet<GlyphId16>>;

/// The half-em reduction constants for one face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdjustmentMetrics {
    /// Expected fullwidth advance, in font units.
    pub em: f64,
    pub half_em: i16,
    pub quarter_em: i16,
    /// Advance/ink slop in font units.
    pub tolerance: f64,
}

impl AdjustmentMetrics {
    pub fn new(upem: u16, config: &Config) -> AdjustmentMetrics {
        let em = upem as f64 * config.fullwidth_advance_ems;
        // Round the half so an odd UPEM trims consistently; the quarter
        // floors off the half, matching the reference builders.
        let half_em = (em / 2.0).round() as i16;
        AdjustmentMetrics {
            em,
            half_em,
            quarter_em: half_em / 2,
            tolerance: config.fullwidth_tolerance * upem as f64,
        }
    }
}

/// One synthesized feature: the tag, its single lookup, and the
/// normalized fingerprint used for idempotence checks.
#[derive(Clone, Debug)]
pub struct PlannedFeature {
    pub tag: Tag,
    pub lookup: PositionLookup,
    pub fingerprint: LookupFingerprint,
}

/// What happened to one planned feature during the merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureDisposition {
    Added,
    /// The font already carries an equivalent feature; nothing to do.
    AlreadyPresent,
    /// The font carries the tag with different lookups; the user's
    /// feature wins and ours is not registered.
    Conflict,
}

// A value record reduced to its four metric fields:
// (x_placement, y_placement, x_advance, y_advance).
type ValueSummary = (i16, i16, i16, i16);

const ZERO_VALUE: ValueSummary = (0, 0, 0, 0);

/// A lookup normalized to per-glyph positioning semantics, so that two
/// structurally different tables can be compared for equivalence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupFingerprint {
    singles: BTreeMap<u16, ValueSummary>,
    /// Keyed by the glyph lists of the two pair classes, ascending.
    pairs: BTreeMap<(Vec<u16>, Vec<u16>), (ValueSummary, ValueSummary)>,
}

impl LookupFingerprint {
    fn absorb(&mut self, other: LookupFingerprint) {
        // First lookup wins on overlap, like a shaper would apply them.
        for (k, v) in other.singles {
            self.singles.entry(k).or_insert(v);
        }
        for (k, v) in other.pairs {
            self.pairs.entry(k).or_insert(v);
        }
    }
}

/// The per-direction value conventions. L and M trim their own advance;
/// R shifts the glyph toward the previous one *and* trims its advance,
/// which is the convention the registered `chws`/`halt` features
/// require. Vertical placement is positive because the y axis points
/// up while the flow runs down.
#[derive(Clone, Copy, Debug)]
struct ValueConventions {
    vertical: bool,
}

impl ValueConventions {
    fn advance_only(&self, advance: i16) -> ValueRecord {
        if self.vertical {
            ValueRecord::new().with_y_advance(advance)
        } else {
            ValueRecord::new().with_x_advance(advance)
        }
    }

    fn advance_and_placement(&self, advance: i16, magnitude: i16) -> ValueRecord {
        if self.vertical {
            ValueRecord::new()
                .with_y_advance(advance)
                .with_y_placement(magnitude)
        } else {
            ValueRecord::new()
                .with_x_advance(advance)
                .with_x_placement(-magnitude)
        }
    }

    fn summarize_advance(&self, advance: i16) -> ValueSummary {
        if self.vertical {
            (0, 0, 0, advance)
        } else {
            (0, 0, advance, 0)
        }
    }

    fn summarize_advance_and_placement(&self, advance: i16, magnitude: i16) -> ValueSummary {
        if self.vertical {
            (0, magnitude, 0, advance)
        } else {
            (-magnitude, 0, advance, 0)
        }
    }
}

/// Synthesize the features for one face; `vertical` is `None` when the
/// face has no vertical metrics or vertical candidates.
pub fn plan_features(
    horizontal: &GlyphSets,
    vertical: Option<&GlyphSets>,
    metrics: &AdjustmentMetrics,
    horizontal_skips: &PairSkips,
    vertical_skips: &PairSkips,
) -> Vec<PlannedFeature> {
    let mut planned = Vec::new();
    plan_direction(
        horizontal,
        metrics,
        horizontal_skips,
        false,
        CHWS,
        HALT,
        &mut planned,
    );
    if let Some(vertical) = vertical {
        plan_direction(vertical, metrics, vertical_skips, true, VCHW, VHAL, &mut planned);
    }
    planned
}

fn plan_direction(
    sets: &GlyphSets,
    metrics: &AdjustmentMetrics,
    skips: &PairSkips,
    vertical: bool,
    pair_tag: Tag,
    single_tag: Tag,
    planned: &mut Vec<PlannedFeature>,
) {
    if !sets.has_pairs() {
        return;
    }
    let conventions = ValueConventions { vertical };
    if let Some((pair, fingerprint)) = build_pair_lookup(sets, metrics, skips, conventions) {
        planned.push(PlannedFeature {
            tag: pair_tag,
            lookup: pair,
            fingerprint,
        });
    }
    if let Some((single, fingerprint)) = build_single_lookup(sets, metrics, conventions) {
        planned.push(PlannedFeature {
            tag: single_tag,
            lookup: single,
            fingerprint,
        });
    }
}

/// Left-side glyphs partitioned into groups with identical skip
/// behavior; with no skips this is a single group, giving the canonical
/// L=1/M=2 class assignment.
fn partition_left(sets: &GlyphSets, skips: &PairSkips) -> Vec<(Vec<GlyphId16>, BTreeSet<GlyphId16>)> {
    let mut by_skips: BTreeMap<BTreeSet<GlyphId16>, Vec<GlyphId16>> = BTreeMap::new();
    for gid in sets.left.keys() {
        let skip_set: BTreeSet<GlyphId16> = skips
            .get(gid)
            .map(|s| s.intersection(&right_glyphs(sets)).copied().collect())
            .unwrap_or_default();
        by_skips.entry(skip_set).or_default().push(*gid);
    }
    let mut groups: Vec<(Vec<GlyphId16>, BTreeSet<GlyphId16>)> = by_skips
        .into_iter()
        .map(|(skips, glyphs)| (glyphs, skips))
        .collect();
    groups.sort_by_key(|(glyphs, _)| glyphs.first().copied());
    groups
}

fn right_glyphs(sets: &GlyphSets) -> BTreeSet<GlyphId16> {
    sets.right.keys().copied().collect()
}

fn partition_right(
    sets: &GlyphSets,
    left_groups: &[(Vec<GlyphId16>, BTreeSet<GlyphId16>)],
) -> Vec<Vec<GlyphId16>> {
    let mut by_skippers: BTreeMap<Vec<usize>, Vec<GlyphId16>> = BTreeMap::new();
    for gid in sets.right.keys() {
        let skippers: Vec<usize> = left_groups
            .iter()
            .enumerate()
            .filter(|(_, (_, skips))| skips.contains(gid))
            .map(|(i, _)| i)
            .collect();
        by_skippers.entry(skippers).or_default().push(*gid);
    }
    let mut groups: Vec<Vec<GlyphId16>> = by_skippers.into_values().collect();
    groups.sort_by_key(|glyphs| glyphs.first().copied());
    groups
}

fn build_pair_lookup(
    sets: &GlyphSets,
    metrics: &AdjustmentMetrics,
    skips: &PairSkips,
    conventions: ValueConventions,
) -> Option<(PositionLookup, LookupFingerprint)> {
    let left_groups = partition_left(sets, skips);
    let right_groups = partition_right(sets, &left_groups);
    let middle: Vec<GlyphId16> = sets.middle.keys().copied().collect();
    if left_groups.is_empty() || right_groups.is_empty() {
        return None;
    }

    // Class 0 is the implicit "everything else"; left groups take
    // 1..=n, the middle class comes last on both sides.
    let middle_class1 = (!middle.is_empty()).then(|| left_groups.len() as u16 + 1);
    let middle_class2 = (!middle.is_empty()).then(|| right_groups.len() as u16 + 1);
    let class1_count = left_groups.len() as u16 + 1 + u16::from(middle_class1.is_some());
    let class2_count = right_groups.len() as u16 + 1 + u16::from(middle_class2.is_some());

    let mut class1_assignments: Vec<(GlyphId16, u16)> = Vec::new();
    for (i, (glyphs, _)) in left_groups.iter().enumerate() {
        class1_assignments.extend(glyphs.iter().map(|gid| (*gid, i as u16 + 1)));
    }
    if let Some(class) = middle_class1 {
        class1_assignments.extend(middle.iter().map(|gid| (*gid, class)));
    }
    let mut class2_assignments: Vec<(GlyphId16, u16)> = Vec::new();
    for (i, glyphs) in right_groups.iter().enumerate() {
        class2_assignments.extend(glyphs.iter().map(|gid| (*gid, i as u16 + 1)));
    }
    if let Some(class) = middle_class2 {
        class2_assignments.extend(middle.iter().map(|gid| (*gid, class)));
    }

    let half = metrics.half_em;
    let quarter = metrics.quarter_em;
    let zero1 = conventions.advance_only(0);
    let zero2 = conventions.advance_and_placement(0, 0);

    let mut fingerprint = LookupFingerprint::default();
    let mut class1_records = Vec::with_capacity(class1_count as usize);
    for c1 in 0..class1_count {
        let mut class2_records = Vec::with_capacity(class2_count as usize);
        for c2 in 0..class2_count {
            let left_group = (c1 >= 1).then(|| c1 as usize - 1).filter(|i| *i < left_groups.len());
            let right_group = (c2 >= 1).then(|| c2 as usize - 1).filter(|i| *i < right_groups.len());
            let is_middle1 = middle_class1 == Some(c1);
            let is_middle2 = middle_class2 == Some(c2);

            let (v1, v2, summary) = match (left_group, is_middle1, right_group, is_middle2) {
                // L x R: trim the left glyph's advance by a half em,
                // unless this exact pair is configured away.
                (Some(l), _, Some(r), _) => {
                    if left_groups[l].1.contains(&right_groups[r][0]) {
                        (zero1.clone(), zero2.clone(), None)
                    } else {
                        (
                            conventions.advance_only(-half),
                            zero2.clone(),
                            Some((conventions.summarize_advance(-half), ZERO_VALUE)),
                        )
                    }
                }
                // L x M and M x M trim a quarter em off the left glyph.
                (Some(_), _, _, true) | (_, true, _, true) => (
                    conventions.advance_only(-quarter),
                    zero2.clone(),
                    Some((conventions.summarize_advance(-quarter), ZERO_VALUE)),
                ),
                // M x R: draw the right glyph tighter on the leading
                // side and trim its advance to match.
                (_, true, Some(_), _) => (
                    zero1.clone(),
                    conventions.advance_and_placement(-quarter, quarter),
                    Some((
                        ZERO_VALUE,
                        conventions.summarize_advance_and_placement(-quarter, quarter),
                    )),
                ),
                _ => (zero1.clone(), zero2.clone(), None),
            };
            if let Some(summary) = summary {
                let glyphs1 = if is_middle1 {
                    middle.clone()
                } else {
                    left_groups[left_group.unwrap()].0.clone()
                };
                let glyphs2 = if is_middle2 {
                    middle.clone()
                } else {
                    right_groups[right_group.unwrap()].clone()
                };
                fingerprint.pairs.insert(
                    (to_u16s(&glyphs1), to_u16s(&glyphs2)),
                    summary,
                );
            }
            class2_records.push(Class2Record::new(v1, v2));
        }
        class1_records.push(Class1Record::new(class2_records));
    }

    let coverage = sets
        .adjusted_glyphs()
        .into_iter()
        .collect();
    let class_def1 = class1_assignments.into_iter().collect();
    let class_def2 = class2_assignments.into_iter().collect();
    let subtable = PairPos::format_2(coverage, class_def1, class_def2, class1_records);
    let lookup = PositionLookup::Pair(Lookup::new(LookupFlag::empty(), vec![subtable]));
    Some((lookup, fingerprint))
}

fn build_single_lookup(
    sets: &GlyphSets,
    metrics: &AdjustmentMetrics,
    conventions: ValueConventions,
) -> Option<(PositionLookup, LookupFingerprint)> {
    let glyphs = sets.adjusted_glyphs();
    if glyphs.is_empty() {
        return None;
    }
    let half = metrics.half_em;
    let quarter = metrics.quarter_em;
    let mut fingerprint = LookupFingerprint::default();
    let mut records = Vec::with_capacity(glyphs.len());
    for gid in &glyphs {
        let (record, summary) = if sets.left.contains_key(gid) {
            (
                conventions.advance_and_placement(-half, 0),
                conventions.summarize_advance_and_placement(-half, 0),
            )
        } else if sets.right.contains_key(gid) {
            (
                conventions.advance_and_placement(-half, half),
                conventions.summarize_advance_and_placement(-half, half),
            )
        } else {
            (
                conventions.advance_and_placement(-half, quarter),
                conventions.summarize_advance_and_placement(-half, quarter),
            )
        };
        fingerprint.singles.insert(gid.to_u16(), summary);
        records.push(record);
    }
    let coverage = glyphs.into_iter().collect();
    let subtable = SinglePos::format_2(coverage, records);
    let lookup = PositionLookup::Single(Lookup::new(LookupFlag::empty(), vec![subtable]));
    Some((lookup, fingerprint))
}

fn to_u16s(glyphs: &[GlyphId16]) -> Vec<u16> {
    glyphs.iter().map(|g| g.to_u16()).collect()
}

// ---- existing-table fingerprints (read side) ----

fn summarize_read_value(value: &rgpos::ValueRecord) -> ValueSummary {
    (
        value.x_placement().unwrap_or(0),
        value.y_placement().unwrap_or(0),
        value.x_advance().unwrap_or(0),
        value.y_advance().unwrap_or(0),
    )
}

/// Fingerprint an existing lookup, or `None` when the lookup's shape
/// has no counterpart in what we build (contextual lookups, class-0
/// values and the like); those compare as conflicting.
fn fingerprint_read_lookup(lookup: &rgpos::PositionLookup) -> Option<LookupFingerprint> {
    let mut fingerprint = LookupFingerprint::default();
    match lookup {
        rgpos::PositionLookup::Single(lookup) => {
            for subtable in lookup.subtables().iter() {
                let subtable = subtable.ok()?;
                match subtable {
                    rgpos::SinglePos::Format1(sub) => {
                        let coverage = sub.coverage().ok()?;
                        let summary = summarize_read_value(&sub.value_record());
                        for gid in coverage.iter() {
                            fingerprint
                                .singles
                                .entry(gid.to_u16())
                                .or_insert(summary);
                        }
                    }
                    rgpos::SinglePos::Format2(sub) => {
                        let coverage = sub.coverage().ok()?;
                        for (gid, value) in coverage.iter().zip(sub.value_records().iter()) {
                            let value = value.ok()?;
                            fingerprint
                                .singles
                                .entry(gid.to_u16())
                                .or_insert(summarize_read_value(&value));
                        }
                    }
                }
            }
        }
        rgpos::PositionLookup::Pair(lookup) => {
            for subtable in lookup.subtables().iter() {
                let subtable = subtable.ok()?;
                match subtable {
                    rgpos::PairPos::Format1(sub) => {
                        let coverage = sub.coverage().ok()?;
                        for (gid, pair_set) in coverage.iter().zip(sub.pair_sets().iter()) {
                            let pair_set = pair_set.ok()?;
                            for record in pair_set.pair_value_records().iter() {
                                let record = record.ok()?;
                                let key = (
                                    vec![gid.to_u16()],
                                    vec![record.second_glyph().to_u16()],
                                );
                                let value = (
                                    summarize_read_value(&record.value_record1()),
                                    summarize_read_value(&record.value_record2()),
                                );
                                if value != (ZERO_VALUE, ZERO_VALUE) {
                                    fingerprint.pairs.entry(key).or_insert(value);
                                }
                            }
                        }
                    }
                    rgpos::PairPos::Format2(sub) => {
                        fingerprint.absorb(fingerprint_pair_format2(&sub)?);
                    }
                }
            }
        }
        _ => return None,
    }
    Some(fingerprint)
}

fn fingerprint_pair_format2(sub: &rgpos::PairPosFormat2) -> Option<LookupFingerprint> {
    let coverage = sub.coverage().ok()?;
    let class_def1 = sub.class_def1().ok()?;
    let class_def2 = sub.class_def2().ok()?;

    let mut class1_glyphs: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
    for gid in coverage.iter() {
        class1_glyphs
            .entry(class_def1.get(GlyphId16::new(gid.to_u16())))
            .or_default()
            .push(gid.to_u16());
    }
    let mut class2_glyphs: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
    for (gid, class) in class_def2.iter() {
        if class != 0 {
            class2_glyphs.entry(class).or_default().push(gid.to_u16());
        }
    }
    for glyphs in class1_glyphs.values_mut().chain(class2_glyphs.values_mut()) {
        glyphs.sort_unstable();
        glyphs.dedup();
    }

    let mut fingerprint = LookupFingerprint::default();
    for (c1, class1_record) in sub.class1_records().iter().enumerate() {
        let class1_record = class1_record.ok()?;
        for (c2, class2_record) in class1_record.class2_records().iter().enumerate() {
            let class2_record = class2_record.ok()?;
            let value = (
                summarize_read_value(&class2_record.value_record1()),
                summarize_read_value(&class2_record.value_record2()),
            );
            if value == (ZERO_VALUE, ZERO_VALUE) {
                continue;
            }
            // A value cell reachable through class 0 has no analogue in
            // anything we'd build; give up rather than mis-compare.
            if c1 == 0 || c2 == 0 {
                return None;
            }
            let glyphs1 = class1_glyphs.get(&(c1 as u16))?.clone();
            let glyphs2 = class2_glyphs.get(&(c2 as u16))?.clone();
            fingerprint.pairs.insert((glyphs1, glyphs2), value);
        }
    }
    Some(fingerprint)
}

// ---- decomposed GPOS, for rebuild-based merging ----

#[derive(Clone, Debug, Default)]
struct LangSysParts {
    required_feature_index: u16,
    feature_indices: Vec<u16>,
}

#[derive(Clone, Debug)]
struct ScriptParts {
    tag: Tag,
    default_lang_sys: Option<LangSysParts>,
    lang_sys: Vec<(Tag, LangSysParts)>,
}

#[derive(Default)]
struct GposParts {
    lookups: Vec<PositionLookup>,
    features: Vec<(Tag, Feature)>,
    scripts: Vec<ScriptParts>,
    feature_variations: Option<FeatureVariations>,
}

impl GposParts {
    /// A GPOS with one DFLT script and an empty default language
    /// system, for fonts that have no GPOS at all.
    fn new_empty() -> GposParts {
        GposParts {
            scripts: vec![ScriptParts {
                tag: DFLT_SCRIPT,
                default_lang_sys: Some(LangSysParts {
                    required_feature_index: NO_REQUIRED_FEATURE,
                    feature_indices: Vec::new(),
                }),
                lang_sys: Vec::new(),
            }],
            ..Default::default()
        }
    }

    fn from_font(face: &Face) -> Result<GposParts, Error> {
        let Ok(gpos) = face.font().gpos() else {
            log::info!("No GPOS table; creating one");
            return Ok(GposParts::new_empty());
        };

        let mut parts = GposParts::default();
        let lookup_list = gpos.lookup_list()?;
        for lookup in lookup_list.lookups().iter() {
            parts.lookups.push(lookup?.to_owned_table());
        }

        let feature_list = gpos.feature_list()?;
        for record in feature_list.feature_records() {
            let feature = record.feature(feature_list.offset_data())?;
            parts
                .features
                .push((record.feature_tag(), feature.to_owned_table()));
        }

        let script_list = gpos.script_list()?;
        for record in script_list.script_records() {
            let script = record.script(script_list.offset_data())?;
            let default_lang_sys = script
                .default_lang_sys()
                .transpose()?
                .map(|ls| read_lang_sys(&ls));
            let lang_sys = script
                .lang_sys_records()
                .iter()
                .map(|lsr| {
                    Ok((
                        lsr.lang_sys_tag(),
                        read_lang_sys(&lsr.lang_sys(script.offset_data())?),
                    ))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            parts.scripts.push(ScriptParts {
                tag: record.script_tag(),
                default_lang_sys,
                lang_sys,
            });
        }

        parts.feature_variations = gpos
            .feature_variations()
            .transpose()?
            .map(|fv| fv.to_owned_table());
        Ok(parts)
    }

    fn existing_fingerprint(&self, face: &Face, tag: Tag) -> Option<LookupFingerprint> {
        // Indices come from the decomposed features, but the lookups
        // are fingerprinted from the read side to stay format-agnostic.
        let gpos = face.font().gpos().ok()?;
        let lookup_list = gpos.lookup_list().ok()?;
        let mut combined = LookupFingerprint::default();
        for (feature_tag, feature) in &self.features {
            if *feature_tag != tag {
                continue;
            }
            for index in &feature.lookup_list_indices {
                let lookup = lookup_list.lookups().get(*index as usize).ok()?;
                combined.absorb(fingerprint_read_lookup(&lookup)?);
            }
        }
        Some(combined)
    }

    fn has_feature(&self, tag: Tag) -> bool {
        self.features.iter().any(|(t, _)| *t == tag)
    }

    fn add_feature(&mut self, tag: Tag, lookup: PositionLookup) {
        let lookup_index = self.lookups.len() as u16;
        self.lookups.push(lookup);
        let feature_index = self.features.len() as u16;
        self.features.push((
            tag,
            Feature::new(None, vec![lookup_index]),
        ));
        for script in &mut self.scripts {
            if let Some(default) = &mut script.default_lang_sys {
                default.feature_indices.push(feature_index);
            }
            for (_, lang_sys) in &mut script.lang_sys {
                lang_sys.feature_indices.push(feature_index);
            }
        }
    }

    /// Sort FeatureList records by tag. Skipped when the table carries
    /// FeatureVariations, whose substitution records reference feature
    /// indices we will not rewrite.
    fn sort_features(&mut self) {
        if self.feature_variations.is_some() {
            return;
        }
        let mut order: Vec<usize> = (0..self.features.len()).collect();
        order.sort_by_key(|&i| (self.features[i].0, i));
        let mut new_index = vec![0u16; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new as u16;
        }
        let mut sorted = Vec::with_capacity(self.features.len());
        for &old in &order {
            sorted.push(self.features[old].clone());
        }
        self.features = sorted;
        for script in &mut self.scripts {
            for lang_sys in script
                .default_lang_sys
                .iter_mut()
                .chain(script.lang_sys.iter_mut().map(|(_, ls)| ls))
            {
                if lang_sys.required_feature_index != NO_REQUIRED_FEATURE {
                    lang_sys.required_feature_index =
                        new_index[lang_sys.required_feature_index as usize];
                }
                for index in &mut lang_sys.feature_indices {
                    *index = new_index[*index as usize];
                }
            }
        }
    }

    fn build(self) -> Result<Vec<u8>, Error> {
        let script_records = self
            .scripts
            .into_iter()
            .map(|parts| {
                let default = parts.default_lang_sys.map(build_lang_sys);
                let records = parts
                    .lang_sys
                    .into_iter()
                    .map(|(tag, ls)| LangSysRecord::new(tag, build_lang_sys(ls)))
                    .collect();
                ScriptRecord::new(parts.tag, Script::new(default, records))
            })
            .collect();
        let feature_records = self
            .features
            .into_iter()
            .map(|(tag, feature)| FeatureRecord::new(tag, feature))
            .collect();
        let mut gpos = Gpos::new(
            ScriptList::new(script_records),
            FeatureList::new(feature_records),
            LookupList::new(self.lookups),
        );
        if self.feature_variations.is_some() {
            gpos.feature_variations = write_fonts::NullableOffsetMarker::new(self.feature_variations);
        }
        dump_table(&gpos).map_err(|e| Error::DumpTable {
            tag: GPOS,
            message: e.to_string(),
        })
    }
}

fn read_lang_sys(lang_sys: &rlayout::LangSys) -> LangSysParts {
    LangSysParts {
        required_feature_index: lang_sys.required_feature_index(),
        feature_indices: lang_sys
            .feature_indices()
            .iter()
            .map(|idx| idx.get())
            .collect(),
    }
}

fn build_lang_sys(parts: LangSysParts) -> LangSys {
    let mut lang_sys = LangSys::new(parts.feature_indices);
    lang_sys.required_feature_index = parts.required_feature_index;
    lang_sys
}

/// Merge the planned features into the face's GPOS. Returns the new
/// table bytes, or `None` when nothing was added, along with what
/// happened to each feature.
pub fn merge_into_gpos(
    face: &Face,
    planned: &[PlannedFeature],
) -> Result<(Option<Vec<u8>>, Vec<(Tag, FeatureDisposition)>), Error> {
    let mut parts = GposParts::from_font(face)?;
    let mut dispositions = Vec::with_capacity(planned.len());
    let mut added = 0usize;
    for feature in planned {
        if parts.has_feature(feature.tag) {
            let existing = parts.existing_fingerprint(face, feature.tag);
            if existing.as_ref() == Some(&feature.fingerprint) {
                log::debug!("'{}' already present with equivalent lookups", feature.tag);
                dispositions.push((feature.tag, FeatureDisposition::AlreadyPresent));
            } else {
                log::warn!(
                    "'{}' already exists with different lookups; keeping the font's version",
                    feature.tag
                );
                dispositions.push((feature.tag, FeatureDisposition::Conflict));
            }
            continue;
        }
        parts.add_feature(feature.tag, feature.lookup.clone());
        dispositions.push((feature.tag, FeatureDisposition::Added));
        added += 1;
    }
    if added == 0 {
        return Ok((None, dispositions));
    }
    parts.sort_features();
    let bytes = parts.build()?;
    Ok((Some(bytes), dispositions))
}

/// Classify each [`PairClass`] glyph for logging and the sidecar dump.
pub fn class_of_glyph(sets: &GlyphSets, gid: GlyphId16) -> Option<PairClass> {
    if sets.left.contains_key(&gid) {
        Some(PairClass::Left)
    } else if sets.right.contains_key(&gid) {
        Some(PairClass::Right)
    } else if sets.middle.contains_key(&gid) {
        Some(PairClass::Middle)
    } else if sets.full.contains_key(&gid) {
        Some(PairClass::Full)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontFile;
    use crate::test_util::TestFontBuilder;
    use std::path::Path;
    use write_fonts::read::FontRef;

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    fn sample_sets() -> GlyphSets {
        let mut sets = GlyphSets::default();
        sets.insert(PairClass::Left, gid(2), '\u{3001}');
        sets.insert(PairClass::Left, gid(3), '\u{300D}');
        sets.insert(PairClass::Right, gid(4), '\u{300C}');
        sets.insert(PairClass::Right, gid(5), '\u{3008}');
        sets.insert(PairClass::Middle, gid(6), '\u{30FB}');
        sets
    }

    fn metrics() -> AdjustmentMetrics {
        AdjustmentMetrics::new(1000, &Config::default())
    }

    #[test]
    fn half_em_rounding() {
        let m = AdjustmentMetrics::new(1000, &Config::default());
        assert_eq!((m.half_em, m.quarter_em), (500, 250));
        // Odd UPEM rounds the half up, then floors the quarter.
        let m = AdjustmentMetrics::new(1001, &Config::default());
        assert_eq!((m.half_em, m.quarter_em), (501, 250));
    }

    #[test]
    fn planned_feature_order_and_tags() {
        let sets = sample_sets();
        let planned = plan_features(
            &sets,
            Some(&sets),
            &metrics(),
            &PairSkips::new(),
            &PairSkips::new(),
        );
        let tags: Vec<Tag> = planned.iter().map(|p| p.tag).collect();
        assert_eq!(tags, [CHWS, HALT, VCHW, VHAL]);
    }

    #[test]
    fn no_pairs_means_no_features() {
        let mut sets = GlyphSets::default();
        sets.insert(PairClass::Left, gid(2), '\u{3001}');
        sets.insert(PairClass::Middle, gid(6), '\u{30FB}');
        let planned = plan_features(&sets, None, &metrics(), &PairSkips::new(), &PairSkips::new());
        assert!(planned.is_empty());
    }

    #[test]
    fn pair_fingerprint_contents() {
        let sets = sample_sets();
        let planned = plan_features(&sets, None, &metrics(), &PairSkips::new(), &PairSkips::new());
        let chws = &planned[0];
        // L x R at -500, L x M / M x M at -250, M x R on the second
        // glyph.
        let lr = chws
            .fingerprint
            .pairs
            .get(&(vec![2, 3], vec![4, 5]))
            .unwrap();
        assert_eq!(*lr, ((0, 0, -500, 0), ZERO_VALUE));
        let lm = chws.fingerprint.pairs.get(&(vec![2, 3], vec![6])).unwrap();
        assert_eq!(*lm, ((0, 0, -250, 0), ZERO_VALUE));
        let mr = chws.fingerprint.pairs.get(&(vec![6], vec![4, 5])).unwrap();
        assert_eq!(*mr, (ZERO_VALUE, (-250, 0, -250, 0)));
        let mm = chws.fingerprint.pairs.get(&(vec![6], vec![6])).unwrap();
        assert_eq!(*mm, ((0, 0, -250, 0), ZERO_VALUE));
    }

    #[test]
    fn vertical_uses_positive_placement() {
        let sets = sample_sets();
        let planned = plan_features(
            &sets,
            Some(&sets),
            &metrics(),
            &PairSkips::new(),
            &PairSkips::new(),
        );
        let vhal = planned.iter().find(|p| p.tag == VHAL).unwrap();
        // Right-class glyph 4: y placement +500, y advance -500.
        assert_eq!(
            vhal.fingerprint.singles.get(&4),
            Some(&(0, 500, 0, -500))
        );
        let halt = planned.iter().find(|p| p.tag == HALT).unwrap();
        assert_eq!(
            halt.fingerprint.singles.get(&4),
            Some(&(-500, 0, -500, 0))
        );
    }

    #[test]
    fn skip_pairs_partition_classes() {
        let sets = sample_sets();
        let mut skips = PairSkips::new();
        skips.entry(gid(2)).or_default().insert(gid(4));
        let planned = plan_features(&sets, None, &metrics(), &skips, &PairSkips::new());
        let chws = &planned[0];
        // Both sides partition: glyph 2 pairs only with glyph 5, while
        // glyph 3 still pairs with both right glyphs (now in separate
        // classes).
        assert!(chws.fingerprint.pairs.contains_key(&(vec![2], vec![5])));
        assert!(chws.fingerprint.pairs.contains_key(&(vec![3], vec![4])));
        assert!(chws.fingerprint.pairs.contains_key(&(vec![3], vec![5])));
        assert!(!chws
            .fingerprint
            .pairs
            .keys()
            .any(|(l, r)| l.contains(&2) && r.contains(&4)));
    }

    #[test]
    fn merge_roundtrip_and_idempotence() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        let face = file.face(0).unwrap();
        let sets = sample_sets();
        let planned = plan_features(&sets, None, &metrics(), &PairSkips::new(), &PairSkips::new());

        let (bytes, dispositions) = merge_into_gpos(&face, &planned).unwrap();
        let bytes = bytes.expect("features were added");
        assert!(dispositions
            .iter()
            .all(|(_, d)| *d == FeatureDisposition::Added));

        // Rebuild the font with the new GPOS and merge again: every
        // feature must fingerprint as already present.
        let rebuilt = TestFontBuilder::jan_punctuation(1000)
            .with_gpos(bytes.clone())
            .build();
        let file2 = FontFile::from_bytes(Path::new("test2.ttf"), rebuilt);
        let face2 = file2.face(0).unwrap();
        let (bytes2, dispositions2) = merge_into_gpos(&face2, &planned).unwrap();
        assert!(bytes2.is_none());
        assert!(dispositions2
            .iter()
            .all(|(_, d)| *d == FeatureDisposition::AlreadyPresent));
    }

    #[test]
    fn merge_conflict_keeps_existing_feature() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        let face = file.face(0).unwrap();
        let sets = sample_sets();
        let planned = plan_features(&sets, None, &metrics(), &PairSkips::new(), &PairSkips::new());
        let (bytes, _) = merge_into_gpos(&face, &planned).unwrap();

        // A second plan with different magnitudes conflicts.
        let mut config = Config::default();
        config.fullwidth_advance_ems = 0.9;
        let other_metrics = AdjustmentMetrics::new(1000, &config);
        let other = plan_features(&sets, None, &other_metrics, &PairSkips::new(), &PairSkips::new());

        let rebuilt = TestFontBuilder::jan_punctuation(1000)
            .with_gpos(bytes.unwrap())
            .build();
        let file2 = FontFile::from_bytes(Path::new("test2.ttf"), rebuilt);
        let face2 = file2.face(0).unwrap();
        let (bytes2, dispositions) = merge_into_gpos(&face2, &other).unwrap();
        assert!(bytes2.is_none());
        assert!(dispositions
            .iter()
            .all(|(_, d)| *d == FeatureDisposition::Conflict));
    }

    #[test]
    fn merged_gpos_is_readable_and_sorted() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let file = FontFile::from_bytes(Path::new("test.ttf"), data);
        let face = file.face(0).unwrap();
        let sets = sample_sets();
        let planned = plan_features(
            &sets,
            Some(&sets),
            &metrics(),
            &PairSkips::new(),
            &PairSkips::new(),
        );
        let (bytes, _) = merge_into_gpos(&face, &planned).unwrap();
        let bytes = bytes.unwrap();

        let rebuilt = TestFontBuilder::jan_punctuation(1000)
            .with_gpos(bytes)
            .build();
        let font = FontRef::new(&rebuilt).unwrap();
        let gpos = font.gpos().unwrap();
        let feature_list = gpos.feature_list().unwrap();
        let tags: Vec<Tag> = feature_list
            .feature_records()
            .iter()
            .map(|rec| rec.feature_tag())
            .collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
        assert_eq!(tags, [CHWS, HALT, VCHW, VHAL]);

        // Every feature is reachable from the default language system.
        let script_list = gpos.script_list().unwrap();
        let record = &script_list.script_records()[0];
        let script = record.script(script_list.offset_data()).unwrap();
        let default = script.default_lang_sys().unwrap().unwrap();
        assert_eq!(default.feature_indices().len(), 4);
    }
}
