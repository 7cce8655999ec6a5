//! Assemble a sorbet source file into an encoded memory image.

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;

/// Assemble sorbet assembly into a memory image
#[derive(Debug, Parser)]
#[command(name = "sorbet-as", version, about)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Destination for the encoded memory image
    target: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = fs::read_to_string(&args.source)
        .with_context(|| format!("reading {}", args.source.display()))?;
    let image = sorbet_asm::assemble(&source)
        .with_context(|| format!("assembling {}", args.source.display()))?;
    let encoded = sorbet_isa::encode(&image).context("encoding the image")?;
    fs::write(&args.target, encoded)
        .with_context(|| format!("writing {}", args.target.display()))?;

    log::info!(
        "assembled {} into {} words",
        args.source.display(),
        image.len()
    );
    Ok(())
}
