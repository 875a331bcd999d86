//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Add contextual half-width spacing features to CJK fonts.
#[derive(Clone, Debug, Parser)]
#[command(
    name = "chws-tool",
    version,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[command(flatten)]
    pub build: BuildArgs,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Process Noto CJK fonts, deriving face indices and languages from
    /// the family names and skipping the Mono variants.
    Noto(BuildArgs),
}

#[derive(Clone, Debug, clap::Args)]
pub struct BuildArgs {
    /// Input font files, or directories to search for fonts.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory.
    #[arg(short, long, default_value = "build")]
    pub output: PathBuf,

    /// Comma-separated TTC face indices to process; other faces are
    /// copied unchanged.
    #[arg(long)]
    pub index: Option<String>,

    /// OpenType language tag (JAN, KOR, ZHS, ZHT), or a comma-separated
    /// list matched up with --index for collections.
    #[arg(short, long)]
    pub language: Option<String>,

    /// Dump the final L/R/M/F glyph sets to this directory.
    #[arg(short = 'g', long = "glyphs")]
    pub glyphs: Option<PathBuf>,

    /// Print output/input path pairs to stdout, tab-separated.
    #[arg(short = 'p', long = "path-out")]
    pub path_out: bool,

    /// Shaping verification level: 0=off, 1=smoke, 2=exhaustive.
    #[arg(long, default_value_t = 1)]
    pub test: u8,
}

impl Cli {
    /// The effective build arguments and whether the Noto conventions
    /// apply.
    pub fn build_args(&self) -> (&BuildArgs, bool) {
        match &self.command {
            Some(Command::Noto(args)) => (args, true),
            None => (&self.build, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_invocation() {
        let cli = Cli::parse_from(["chws-tool", "font.ttf", "-o", "out", "--test", "2"]);
        let (args, noto) = cli.build_args();
        assert!(!noto);
        assert_eq!(args.inputs, [PathBuf::from("font.ttf")]);
        assert_eq!(args.output, PathBuf::from("out"));
        assert_eq!(args.test, 2);
    }

    #[test]
    fn parse_noto_subcommand() {
        let cli = Cli::parse_from(["chws-tool", "noto", "fonts/", "-p"]);
        let (args, noto) = cli.build_args();
        assert!(noto);
        assert!(args.path_out);
        assert_eq!(args.inputs, [PathBuf::from("fonts/")]);
    }

    #[test]
    fn inputs_are_required() {
        assert!(Cli::try_parse_from(["chws-tool"]).is_err());
        assert!(Cli::try_parse_from(["chws-tool", "noto"]).is_err());
    }
}
