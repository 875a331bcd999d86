//! CLI for adding `chws`/`vchw`/`halt`/`vhal` features to CJK fonts.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use chws_tool::{
    args::{BuildArgs, Cli},
    builder::{expand_paths, face_plan, Builder, CancelToken},
    config::TestLevel,
    font::FontFile,
    shape::{shaper_from_env, Shape},
    Config, Error,
};

fn main() -> Result<(), Error> {
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}: {}",
                buf.default_level_style(record.level())
                    .value(record.level()),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let (args, noto) = cli.build_args();
    let shaper = shaper_from_env();

    std::fs::create_dir_all(&args.output).map_err(|inner| Error::Save {
        path: args.output.clone(),
        inner,
    })?;
    if let Some(glyphs) = &args.glyphs {
        std::fs::create_dir_all(glyphs).map_err(|inner| Error::Save {
            path: glyphs.clone(),
            inner,
        })?;
    }

    let inputs = expand_paths(&args.inputs, noto)?;
    let mut failures = 0usize;
    for input in &inputs {
        if let Err(e) = run_one(input, args, noto, shaper.clone()) {
            log::error!("\"{}\": {e}", input.display());
            failures += 1;
        }
    }
    if failures > 0 {
        return Err(Error::FacesFailed(failures));
    }
    Ok(())
}

fn run_one(
    input: &Path,
    args: &BuildArgs,
    noto: bool,
    shaper: Arc<dyn Shape>,
) -> Result<(), Error> {
    let font = FontFile::load(input)?;
    let config = Config {
        test_level: TestLevel::from(args.test),
        ..Config::default()
    };

    let mut builder = if noto {
        Builder::for_noto(&font, config, shaper)?
    } else {
        let plan = face_plan(
            font.num_faces()?,
            args.index.as_deref(),
            args.language.as_deref(),
        )?;
        Builder::new(&font, config, plan, shaper)
    };

    builder.build(&CancelToken::default())?;
    if !builder.has_changes() {
        log::info!("No adjustments for \"{}\"; copying unchanged", input.display());
    }
    let (out_path, bytes) = builder.save(&args.output)?;

    let mut paths = vec![out_path.clone(), input.to_owned()];
    if builder.has_changes() {
        if let Some(glyphs_dir) = &args.glyphs {
            paths.push(builder.save_glyphs(glyphs_dir)?);
        }
        builder.run_tests(&out_path, &bytes)?;
    }
    if args.path_out {
        let line = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\t");
        // Flush each line; downstream tools pipe this.
        println!("{line}");
        let _ = std::io::stdout().flush();
    }
    if builder.face_failures() > 0 {
        return Err(Error::FacesFailed(builder.face_failures()));
    }
    Ok(())
}
