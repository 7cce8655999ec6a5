//! Run an encoded memory image on the sorbet machine.
//!
//! The input file is read whole and a NUL byte is appended as the
//! end-of-stream sentinel; NUL bytes in the collected output are written
//! back as newlines.  Both conventions belong to this layer, not to the
//! machine.

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use sorbet_machine::{DEFAULT_INSTRUCTION_LIMIT, DEFAULT_MEMORY_SIZE};

/// Simulate an encoded sorbet memory image
#[derive(Debug, Parser)]
#[command(name = "sorbet-run", version, about)]
struct Args {
    /// Encoded memory image produced by sorbet-as
    code_file: PathBuf,

    /// File whose contents feed the input port
    input_file: PathBuf,

    /// Destination for the characters emitted through the output port
    output_file: PathBuf,

    /// Number of memory words, including the two reserved I/O ports
    #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE)]
    memory_size: usize,

    /// Maximum number of executed instructions
    #[arg(long, default_value_t = DEFAULT_INSTRUCTION_LIMIT)]
    limit: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let encoded = fs::read_to_string(&args.code_file)
        .with_context(|| format!("reading {}", args.code_file.display()))?;
    let image = sorbet_isa::decode(&encoded)
        .with_context(|| format!("loading {}", args.code_file.display()))?;

    let mut input = fs::read_to_string(&args.input_file)
        .with_context(|| format!("reading {}", args.input_file.display()))?;
    input.push('\0');

    let outcome =
        sorbet_machine::simulate(&image, args.memory_size, args.limit, &input)
            .context("simulation fault")?;

    fs::write(&args.output_file, outcome.output.replace('\0', "\n"))
        .with_context(|| format!("writing {}", args.output_file.display()))?;

    println!(
        "instructions: {}  ticks: {}",
        outcome.instructions, outcome.ticks
    );
    Ok(())
}
