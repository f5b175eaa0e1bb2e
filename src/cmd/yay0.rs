use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use argp::FromArgs;

use crate::util::ncompress::decompress_yay0;

#[derive(FromArgs, PartialEq, Debug)]
/// Commands for processing Yay0-compressed files.
#[argp(subcommand, name = "yay0")]
pub struct Args {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Decompress(DecompressArgs),
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Decompresses Yay0-compressed files.
#[argp(subcommand, name = "decompress")]
pub struct DecompressArgs {
    #[argp(positional)]
    /// Yay0-compressed files
    files: Vec<PathBuf>,
    #[argp(option, short = 'o')]
    /// Output file (or directory, if multiple files are specified).
    /// If not specified, decompresses in-place.
    output: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        SubCommand::Decompress(args) => decompress(args),
    }
}

fn decompress(args: DecompressArgs) -> Result<()> {
    let single_file = args.files.len() == 1;
    for path in &args.files {
        let data = {
            let compressed = fs::read(path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            decompress_yay0(&compressed)
                .with_context(|| format!("Failed to decompress '{}' using Yay0", path.display()))?
        };
        let out_path = if let Some(output) = &args.output {
            if single_file {
                output.clone()
            } else {
                output.join(path.file_name().unwrap())
            }
        } else {
            path.clone()
        };
        fs::write(&out_path, data)
            .with_context(|| format!("Failed to write '{}'", out_path.display()))?;
    }
    Ok(())
}
