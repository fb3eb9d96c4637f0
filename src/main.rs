use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

mod ast;
mod codegen;
mod diag;
mod driver;
mod emit;
mod labels;
mod parser;
mod symtab;
mod translate;

use driver::Config;

#[derive(Parser)]
#[command(name = "cminusc")]
#[command(about = "C-Minus compiler - translates C-Minus source to Jasmin assembly")]
#[command(version)]
struct Cli {
    /// Input source file (omit or use '-' for stdin)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Name of the generated class (default: input file stem, or Main)
    #[arg(long)]
    class_name: Option<String>,

    /// Count semantic errors without printing them
    #[arg(long)]
    no_semantic_diagnostics: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether target code was produced.
fn run(cli: Cli) -> Result<bool> {
    let src = read_source(cli.input.as_ref())?;
    let class_name = cli.class_name.unwrap_or_else(|| {
        cli.input
            .as_ref()
            .filter(|p| p.to_str() != Some("-"))
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or("Main")
            .to_string()
    });
    let cfg = Config {
        class_name,
        semantic_diagnostics: !cli.no_semantic_diagnostics,
    };

    let result = driver::compile(&src, &cfg).context("internal translator error")?;
    for d in &result.diagnostics {
        eprintln!("error: {d}");
    }
    let Some(code) = result.output else {
        return Ok(false);
    };
    match &cli.output {
        Some(path) => fs::write(path, &code)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut out = io::stdout().lock();
            out.write_all(code.as_bytes()).context("failed to write stdout")?;
            out.flush()?;
        }
    }
    Ok(true)
}

fn read_source(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) if path.to_str() != Some("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to open source file {}", path.display())),
        _ => {
            let mut s = String::new();
            io::stdin()
                .read_to_string(&mut s)
                .context("failed to read stdin")?;
            Ok(s)
        }
    }
}
