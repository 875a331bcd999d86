//! Per-font orchestration: face selection, the classification and
//! merge pipeline, and writing the output.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rayon::prelude::*;
use write_fonts::types::Tag;

use crate::{
    classes::{GlyphSets, PairClass},
    config::Config,
    error::Error,
    font::{is_font_extension, Face, FontFile},
    gpos::{merge_into_gpos, plan_features, AdjustmentMetrics},
    language::{self, LanguageTag},
    noto,
    resolve::{resolve, ResolvedGlyphs},
    shape::Shape,
    tester::{test_font, FaceTestPlan},
    ttc::{self, FaceTables},
};

const GPOS: Tag = Tag::new(b"GPOS");

/// Cooperative cancellation, honored between faces. A cancelled build
/// never leaves a partially written output file because writing only
/// starts after every selected face has completed.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What happened to one face.
#[derive(Clone, Debug)]
pub struct FaceOutcome {
    pub index: u32,
    pub language: Option<LanguageTag>,
    /// Replacement GPOS bytes, when anything was added.
    pub gpos: Option<Vec<u8>>,
    pub resolved: Option<ResolvedGlyphs>,
    pub upem: u16,
}

impl FaceOutcome {
    fn unchanged(index: u32, language: Option<LanguageTag>, upem: u16) -> FaceOutcome {
        FaceOutcome {
            index,
            language,
            gpos: None,
            resolved: None,
            upem,
        }
    }
}

/// Builds the spacing features for one font file (or collection).
pub struct Builder<'a> {
    font: &'a FontFile,
    config: Config,
    /// Face index -> user-requested language; absent faces are copied
    /// through unchanged.
    face_languages: BTreeMap<u32, Option<LanguageTag>>,
    shaper: Arc<dyn Shape>,
    outcomes: Vec<FaceOutcome>,
    face_failures: usize,
}

impl<'a> Builder<'a> {
    pub fn new(
        font: &'a FontFile,
        config: Config,
        face_languages: BTreeMap<u32, Option<LanguageTag>>,
        shaper: Arc<dyn Shape>,
    ) -> Builder<'a> {
        Builder {
            font,
            config,
            face_languages,
            shaper,
            outcomes: Vec::new(),
            face_failures: 0,
        }
    }

    /// A builder with languages derived from the Noto CJK family
    /// names; unrecognized faces (e.g. Mono) are not processed.
    pub fn for_noto(
        font: &'a FontFile,
        config: Config,
        shaper: Arc<dyn Shape>,
    ) -> Result<Builder<'a>, Error> {
        let face_languages = noto::face_languages(font)?
            .into_iter()
            .map(|(index, language)| (index, Some(language)))
            .collect();
        Ok(Builder::new(font, config, face_languages, shaper))
    }

    /// Select every face, with one optional language for all of them.
    pub fn for_all_faces(
        font: &'a FontFile,
        config: Config,
        language: Option<LanguageTag>,
        shaper: Arc<dyn Shape>,
    ) -> Result<Builder<'a>, Error> {
        let face_languages = (0..font.num_faces()?).map(|i| (i, language)).collect();
        Ok(Builder::new(font, config, face_languages, shaper))
    }

    /// Run the pipeline for every selected face. Faces of a collection
    /// are independent, so they fan out across threads; outcomes are
    /// collected back in native face order. A failing face is logged
    /// and copied through unchanged; see [`Builder::face_failures`].
    pub fn build(&mut self, cancel: &CancelToken) -> Result<(), Error> {
        let selected: Vec<(u32, Option<LanguageTag>)> = self
            .face_languages
            .iter()
            .map(|(i, lang)| (*i, *lang))
            .collect();
        let results: Vec<(u32, Result<FaceOutcome, Error>)> = selected
            .par_iter()
            .map(|(index, language)| {
                if cancel.is_cancelled() {
                    return (*index, Err(Error::Cancelled));
                }
                (*index, self.build_face(*index, *language))
            })
            .collect();
        self.outcomes.clear();
        self.face_failures = 0;
        for (index, result) in results {
            match result {
                Ok(outcome) => self.outcomes.push(outcome),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    log::error!("face {index}: {e}");
                    self.face_failures += 1;
                }
            }
        }
        Ok(())
    }

    /// How many faces failed during [`Builder::build`]; they are copied
    /// through unchanged and the caller should exit non-zero.
    pub fn face_failures(&self) -> usize {
        self.face_failures
    }

    fn build_face(
        &self,
        index: u32,
        user_language: Option<LanguageTag>,
    ) -> Result<FaceOutcome, Error> {
        let face = self.font.face(index)?;
        let upem = face.units_per_em()?;
        let config = match user_language {
            Some(_) => self.config.with_language(user_language),
            None => self.config.clone(),
        };

        let language = if config.use_ink_bounds {
            // Geometry decides membership; the tag, if any, only picks
            // shaping localization, so auto-detect failure is fine.
            language::detect(&face, config.language).ok()
        } else {
            Some(language::detect(&face, config.language)?)
        };
        log::info!(
            "Building \"{}\" {}",
            face.display_name(),
            match (config.use_ink_bounds, language) {
                (true, _) => "use_ink".to_string(),
                (false, Some(tag)) => format!("lang={tag}"),
                (false, None) => "lang=auto".to_string(),
            }
        );

        let vertical = config.vertical && face.has_vertical_metrics();
        let resolved = resolve(&face, &config, language, vertical, self.shaper.as_ref())?;
        if !resolved.is_applicable() {
            log::warn!(
                "Skipped because no applicable glyphs: \"{}\"",
                face.display_name()
            );
            return Ok(FaceOutcome::unchanged(index, language, upem));
        }

        let metrics = AdjustmentMetrics::new(upem, &config);
        let planned = plan_features(
            &resolved.horizontal,
            resolved.vertical.as_ref().filter(|v| v.has_pairs()),
            &metrics,
            &resolved.pair_skips(&config, false),
            &resolved.pair_skips(&config, true),
        );
        let (gpos, _dispositions) = merge_into_gpos(&face, &planned)?;
        if gpos.is_none() {
            log::info!(
                "No features to add (already present or conflicting): \"{}\"",
                face.display_name()
            );
        }
        Ok(FaceOutcome {
            index,
            language,
            gpos,
            resolved: Some(resolved),
            upem,
        })
    }

    pub fn outcomes(&self) -> &[FaceOutcome] {
        &self.outcomes
    }

    pub fn has_changes(&self) -> bool {
        self.outcomes.iter().any(|o| o.gpos.is_some())
    }

    /// Write the output font into `out_dir`, returning the path and
    /// the written bytes. A build with no changes copies the input
    /// bytes verbatim, so unchanged fonts stay byte-identical.
    pub fn save(&self, out_dir: &Path) -> Result<(PathBuf, Vec<u8>), Error> {
        let file_name = self
            .font
            .path()
            .file_name()
            .ok_or_else(|| Error::BuildFont("input path has no file name".into()))?;
        let out_path = out_dir.join(file_name);
        let bytes = if self.has_changes() {
            self.serialize()?
        } else {
            self.font.data().to_vec()
        };
        log::info!("Saving to \"{}\"", out_path.display());
        write_atomically(&out_path, &bytes)?;
        Ok((out_path, bytes))
    }

    fn serialize(&self) -> Result<Vec<u8>, Error> {
        let num_faces = self.font.num_faces()?;
        let mut faces = Vec::with_capacity(num_faces as usize);
        for index in 0..num_faces {
            let face = self.font.face(index)?;
            faces.push(self.face_tables(&face)?);
        }
        if self.font.is_collection() {
            ttc::build_collection(faces)
        } else {
            ttc::build_font(faces.into_iter().next().expect("one face"))
        }
    }

    fn face_tables(&self, face: &Face) -> Result<FaceTables, Error> {
        let replacement = self
            .outcomes
            .iter()
            .find(|o| o.index == face.index())
            .and_then(|o| o.gpos.as_ref());
        let mut tables = Vec::new();
        let mut replaced = false;
        for tag in face.table_tags() {
            let data = face
                .table_data(tag)
                .ok_or(Error::MissingTable(tag))?
                .to_vec();
            if tag == GPOS {
                if let Some(gpos) = replacement {
                    tables.push((tag, gpos.clone()));
                    replaced = true;
                    continue;
                }
            }
            tables.push((tag, data));
        }
        if let (Some(gpos), false) = (replacement, replaced) {
            tables.push((GPOS, gpos.clone()));
        }
        Ok(FaceTables {
            sfnt_version: face.sfnt_version(),
            tables,
        })
    }

    /// Write the `-glyphs` sidecar next to (or into) `out`: the final
    /// class of every candidate glyph, one per line, for regression
    /// diffing.
    pub fn save_glyphs(&self, out: &Path) -> Result<PathBuf, Error> {
        let path = if out.is_dir() {
            let file_name = self
                .font
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("font");
            out.join(format!("{file_name}-glyphs"))
        } else {
            out.to_owned()
        };
        let (horizontal, vertical) = self.united_sets();
        let mut buffer = Vec::new();
        horizontal.save_glyphs(&mut buffer, false)?;
        if let Some(vertical) = vertical {
            vertical.save_glyphs(&mut buffer, true)?;
        }
        write_atomically(&path, &buffer)?;
        Ok(path)
    }

    /// Different faces of a collection may classify different glyph
    /// sets; the sidecar reports their union.
    fn united_sets(&self) -> (GlyphSets, Option<GlyphSets>) {
        let mut horizontal = GlyphSets::default();
        let mut vertical: Option<GlyphSets> = None;
        for outcome in self.outcomes.iter().filter(|o| o.gpos.is_some()) {
            let Some(resolved) = &outcome.resolved else {
                continue;
            };
            unite(&mut horizontal, &resolved.horizontal);
            if let Some(v) = &resolved.vertical {
                unite(vertical.get_or_insert_with(GlyphSets::default), v);
            }
        }
        (horizontal, vertical)
    }

    /// Shaping checks for every changed face of the written output.
    pub fn test_plans(&self) -> Vec<FaceTestPlan> {
        self.outcomes
            .iter()
            .filter(|o| o.gpos.is_some())
            .filter_map(|o| {
                let resolved = o.resolved.as_ref()?;
                let metrics = AdjustmentMetrics::new(o.upem, &self.config);
                Some(FaceTestPlan {
                    index: o.index,
                    language: o.language,
                    horizontal: resolved.horizontal.clone(),
                    vertical: resolved.vertical.clone().filter(|v| v.has_pairs()),
                    em: metrics.em as i32,
                    half_em: metrics.half_em as i32,
                    quarter_em: metrics.quarter_em as i32,
                })
            })
            .collect()
    }

    pub fn run_tests(&self, out_path: &Path, data: &[u8]) -> Result<(), Error> {
        test_font(
            out_path,
            data,
            &self.test_plans(),
            self.shaper.as_ref(),
            self.config.test_level,
        )
    }
}

fn unite(into: &mut GlyphSets, from: &GlyphSets) {
    for (class, set) in [
        (PairClass::Left, &from.left),
        (PairClass::Right, &from.right),
        (PairClass::Middle, &from.middle),
        (PairClass::Full, &from.full),
    ] {
        for (gid, ch) in set {
            into.insert(class, *gid, *ch);
        }
    }
    into.enforce_disjoint();
}

/// No partial outputs: write to a sibling temp file, then rename.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    result.map_err(|inner| {
        let _ = std::fs::remove_file(&tmp);
        Error::Save {
            path: path.to_owned(),
            inner,
        }
    })
}

/// Expand the command-line inputs: directories recurse to font files.
pub fn expand_paths(inputs: &[PathBuf], noto: bool) -> Result<Vec<PathBuf>, Error> {
    let mut result = Vec::new();
    for input in inputs {
        if input.is_dir() {
            if noto {
                result.extend(noto::expand_dir(input)?);
            } else {
                expand_dir(input, &mut result)?;
            }
        } else {
            result.push(input.clone());
        }
    }
    Ok(result)
}

fn expand_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|inner| Error::Load {
            path: dir.to_owned(),
            inner,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    children.sort();
    for child in children {
        if child.is_dir() {
            expand_dir(&child, out)?;
        } else if is_font_extension(&child) {
            out.push(child);
        }
    }
    Ok(())
}

/// Parse the `--index` / `--language` pair into a per-face language
/// map, following the convention that one language applies to every
/// selected face while a list is matched up with the index list.
pub fn face_plan(
    num_faces: u32,
    indices: Option<&str>,
    languages: Option<&str>,
) -> Result<BTreeMap<u32, Option<LanguageTag>>, Error> {
    let indices: Vec<u32> = match indices {
        Some(spec) => spec
            .split(',')
            .map(|i| {
                i.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::BuildFont(format!("invalid face index '{i}'")))
            })
            .collect::<Result<_, _>>()?,
        None => (0..num_faces).collect(),
    };
    let languages: Vec<Option<LanguageTag>> = match languages {
        Some(spec) => {
            let parsed: Vec<Option<LanguageTag>> = spec
                .split(',')
                .map(|tag| {
                    let tag = tag.trim();
                    if tag.is_empty() {
                        Ok(None)
                    } else {
                        tag.parse().map(Some)
                    }
                })
                .collect::<Result<_, Error>>()?;
            if parsed.len() == 1 {
                vec![parsed[0]; indices.len()]
            } else {
                parsed
            }
        }
        None => Vec::new(),
    };
    Ok(indices
        .iter()
        .enumerate()
        .map(|(i, index)| (*index, languages.get(i).copied().flatten()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::BuzzShaper;
    use crate::test_util::TestFontBuilder;
    use write_fonts::read::{FontRef, TableProvider};

    fn build_and_save(data: Vec<u8>, config: Config) -> (tempfile::TempDir, PathBuf, Vec<u8>, bool) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ttf");
        std::fs::write(&input, &data).unwrap();
        let font = FontFile::load(&input).unwrap();
        let mut builder =
            Builder::for_all_faces(&font, config, None, Arc::new(BuzzShaper)).unwrap();
        builder.build(&CancelToken::default()).unwrap();
        let out_dir = dir.path().join("build");
        std::fs::create_dir_all(&out_dir).unwrap();
        let changed = builder.has_changes();
        let (path, bytes) = builder.save(&out_dir).unwrap();
        (dir, path, bytes, changed)
    }

    fn feature_tags(font_data: &[u8]) -> Vec<String> {
        let font = FontRef::new(font_data).unwrap();
        let Ok(gpos) = font.gpos() else {
            return Vec::new();
        };
        let list = gpos.feature_list().unwrap();
        list.feature_records()
            .iter()
            .map(|rec| rec.feature_tag().to_string())
            .collect()
    }

    #[test]
    fn end_to_end_adds_features() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let (_dir, path, bytes, changed) = build_and_save(data, config);
        assert!(changed);
        assert_eq!(feature_tags(&bytes), ["chws", "halt"]);
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn latin_font_is_copied_unchanged() {
        let data = TestFontBuilder::latin_only(1000).build();
        let (_dir, _, bytes, changed) = build_and_save(data.clone(), Config::default());
        assert!(!changed);
        assert_eq!(bytes, data);
    }

    #[test]
    fn full_ink_font_is_copied_unchanged() {
        let data = TestFontBuilder::full_ink(1000).build();
        let (_dir, _, bytes, changed) = build_and_save(data.clone(), Config::default());
        assert!(!changed);
        assert_eq!(bytes, data);
    }

    #[test]
    fn second_run_is_idempotent() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let (_dir, _, first, changed) = build_and_save(data, config.clone());
        assert!(changed);
        let (_dir2, _, second, changed) = build_and_save(first.clone(), config);
        assert!(!changed, "second run must detect the existing features");
        assert_eq!(first, second);
    }

    #[test]
    fn determinism() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let (_dir, _, first, _) = build_and_save(data.clone(), config.clone());
        let (_dir2, _, second, _) = build_and_save(data, config);
        assert_eq!(first, second);
    }

    #[test]
    fn glyph_sidecar_dump() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ttf");
        std::fs::write(&input, &data).unwrap();
        let font = FontFile::load(&input).unwrap();
        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let mut builder =
            Builder::for_all_faces(&font, config, Some(LanguageTag::Jan), Arc::new(BuzzShaper))
                .unwrap();
        builder.build(&CancelToken::default()).unwrap();
        let path = builder.save_glyphs(dir.path()).unwrap();
        let dump = std::fs::read_to_string(&path).unwrap();
        let comma = TestFontBuilder::glyph_id_for('\u{3001}');
        assert!(dump.lines().any(|l| l == format!("L {comma}")));
        assert!(dump.lines().any(|l| l.starts_with("R ")));
    }

    #[test]
    fn collection_faces_share_the_new_gpos() {
        use write_fonts::read::FileRef;

        // Two identical faces packed into one collection.
        let single = TestFontBuilder::jan_punctuation(1000).build();
        let font_ref = FontRef::new(&single).unwrap();
        let tables: Vec<(Tag, Vec<u8>)> = font_ref
            .table_directory
            .table_records()
            .iter()
            .map(|rec| {
                let tag = rec.tag();
                (tag, font_ref.table_data(tag).unwrap().as_bytes().to_vec())
            })
            .collect();
        let face = FaceTables {
            sfnt_version: 0x0001_0000,
            tables,
        };
        let ttc = ttc::build_collection(vec![face.clone(), face]).unwrap();

        let config = Config::default().with_language(Some(LanguageTag::Jan));
        let (_dir, _, bytes, changed) = build_and_save(ttc, config);
        assert!(changed);

        let FileRef::Collection(collection) = FileRef::new(&bytes).unwrap() else {
            panic!("expected a collection");
        };
        assert_eq!(collection.len(), 2);
        let gpos_offset = |index: u32| {
            collection
                .get(index)
                .unwrap()
                .table_directory
                .table_records()
                .iter()
                .find(|rec| rec.tag() == GPOS)
                .map(|rec| rec.offset())
        };
        // Both faces got the feature, and the identical GPOS bytes are
        // stored once.
        assert!(gpos_offset(0).is_some());
        assert_eq!(gpos_offset(0), gpos_offset(1));
        for face in collection.iter() {
            let face = face.unwrap();
            let gpos = face.gpos().unwrap();
            let tags: Vec<String> = gpos
                .feature_list()
                .unwrap()
                .feature_records()
                .iter()
                .map(|rec| rec.feature_tag().to_string())
                .collect();
            assert_eq!(tags, ["chws", "halt"]);
        }
    }

    #[test]
    fn cancellation_stops_the_build() {
        let data = TestFontBuilder::jan_punctuation(1000).build();
        let font = FontFile::from_bytes(Path::new("in.ttf"), data);
        let config = Config::default();
        let mut builder =
            Builder::for_all_faces(&font, config, None, Arc::new(BuzzShaper)).unwrap();
        let cancel = CancelToken::default();
        cancel.cancel();
        assert!(matches!(builder.build(&cancel), Err(Error::Cancelled)));
    }

    #[test]
    fn face_plan_parsing() {
        let plan = face_plan(4, Some("0,2"), Some("JAN,KOR")).unwrap();
        assert_eq!(plan.get(&0), Some(&Some(LanguageTag::Jan)));
        assert_eq!(plan.get(&2), Some(&Some(LanguageTag::Kor)));
        assert!(!plan.contains_key(&1));

        // One language fans out to every selected face.
        let plan = face_plan(3, None, Some("ZHS")).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.values().all(|l| *l == Some(LanguageTag::Zhs)));

        // More indices than languages leaves the tail on auto.
        let plan = face_plan(4, Some("0,1,2"), Some("JAN,KOR")).unwrap();
        assert_eq!(plan.get(&2), Some(&None));

        assert!(face_plan(2, Some("x"), None).is_err());
        assert!(face_plan(2, None, Some("XYZ")).is_err());
    }
}
