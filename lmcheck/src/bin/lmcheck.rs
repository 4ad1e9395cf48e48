use anyhow::{bail, Context, Result};
use clap::Parser;
use lmcheck::*;
use std::io::{self, BufWriter, Write};

/// Checks that every line of an lmtrace trace is well-formed,
/// i.e. that no two lines got mixed up, and summarizes it.
#[derive(Parser, Debug)]
struct Arg {
    /// Path to the trace (wherever descriptor 200 was redirected)
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    input:  PathBuf,

    /// Print every well-formed record as a JSON object, one per line
    #[arg(short, long)]
    json:   bool,

    /// Exit with an error if any line is malformed
    #[arg(short, long)]
    strict: bool,
}

/// Malformed lines listed before the rest are elided.
const MAX_REPORTED: usize = 20;

fn main() -> Result<()> {
    let cli = Arg::parse();
    let file = File::open(&cli.input)
        .with_context(|| format!("Cannot open trace {}", cli.input.display()))?;

    let mut out = BufWriter::new(io::stdout().lock());
    let report = check_with(BufReader::new(file), |record| {
        if cli.json {
            serde_json::to_writer(&mut out, record)?;
            writeln!(out)?;
        }
        Ok(())
    })
    .with_context(|| format!("Failed reading {}", cli.input.display()))?;
    out.flush()?;
    drop(out);

    // Keep stdout clean for the JSON stream.
    let mut summary: Box<dyn Write> = if cli.json {
        Box::new(io::stderr().lock())
    } else {
        Box::new(io::stdout().lock())
    };
    writeln!(summary, "Lines:\t\t{}", report.lines)?;
    for (op, count) in &report.counts {
        writeln!(summary, "  {}:\t{}", op, count)?;
    }
    writeln!(summary, "Malformed:\t{}", report.malformed.len())?;
    for bad in report.malformed.iter().take(MAX_REPORTED) {
        eprintln!("line {}: {}", bad.line_no, bad.error);
    }
    if report.malformed.len() > MAX_REPORTED {
        eprintln!("... and {} more", report.malformed.len() - MAX_REPORTED);
    }

    if cli.strict && !report.is_clean() {
        bail!("{} malformed line(s) in {}", report.malformed.len(), cli.input.display());
    }

    Ok(())
}
