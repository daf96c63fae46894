use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::Level;

use json_tabular_mapping::{Converter, Engine, EngineConfig, OnError};

/// Convert JSON records into flat rows with a declarative mapping.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Policy for rules without `on_error`: null, default, raise or warn
    #[arg(long, global = true)]
    on_error: Option<OnError>,
    /// Fail records whose rows violate the mapping's schema
    #[arg(long, global = true)]
    enforce_schema: bool,
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a mapping document and print every finding
    Validate { mapping: PathBuf },
    /// Convert records (JSON array or NDJSON) to NDJSON rows
    Convert {
        mapping: PathBuf,
        /// Input file; stdin when omitted
        input: Option<PathBuf>,
        /// Convert records on all cores
        #[arg(long)]
        parallel: bool,
    },
    /// Print the evaluation trace of a single record
    Trace { mapping: PathBuf, record: PathBuf },
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(io::stderr).init();

    if let Err(msg) = run(args) {
        eprintln!("{msg}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_str(&read_to_string(path)?)
            .map_err(|e| format!("Invalid config {}: {e}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.on_error {
        config.default_on_error = mode;
    }
    config.enforce_schema |= args.enforce_schema;
    let engine = Engine::new().with_config(config);

    match args.command {
        Command::Validate { mapping } => {
            let report = engine.validate(&read_json(&mapping)?);
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            for error in &report.errors {
                println!("{error}");
            }
            if report.ok {
                println!("ok");
                Ok(())
            } else {
                Err(format!("{} error(s)", report.errors.len()))
            }
        }
        Command::Convert { mapping, input, parallel } => {
            let converter = compile(&engine, &mapping)?;
            let text = match &input {
                Some(path) => read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf).map_err(|e| format!("Cannot read stdin: {e}"))?;
                    buf
                }
            };
            convert(&converter, parse_records(&text)?, parallel)
        }
        Command::Trace { mapping, record } => {
            let converter = compile(&engine, &mapping)?;
            let trace = converter.trace(&read_json(&record)?).map_err(|e| e.to_string())?;
            let out = serde_json::to_string_pretty(&trace).map_err(|e| e.to_string())?;
            println!("{out}");
            Ok(())
        }
    }
}

fn convert(converter: &Converter, records: Vec<Value>, parallel: bool) -> Result<(), String> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut failures = 0usize;
    let mut emit = |row: &json_tabular_mapping::Row| -> Result<(), String> {
        let line = serde_json::to_string(row).map_err(|e| e.to_string())?;
        writeln!(out, "{line}").map_err(|e| e.to_string())
    };

    if parallel {
        for result in converter.convert_batch(&records) {
            match result {
                Ok(rows) => rows.iter().try_for_each(&mut emit)?,
                Err(e) => {
                    failures += 1;
                    eprintln!("{e}");
                }
            }
        }
    } else {
        for result in converter.convert_many(records) {
            match result {
                Ok(row) => emit(&row)?,
                Err(e) => {
                    failures += 1;
                    eprintln!("{e}");
                }
            }
        }
    }
    drop(emit);
    out.flush().map_err(|e| e.to_string())?;
    if failures > 0 {
        Err(format!("{failures} record(s) failed"))
    } else {
        Ok(())
    }
}

fn compile(engine: &Engine, mapping: &Path) -> Result<Converter, String> {
    engine.compile(&read_json(mapping)?).map_err(|e| e.to_string())
}

fn read_to_string(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Cannot read {}: {e}", path.display()))
}

fn read_json(path: &Path) -> Result<Value, String> {
    serde_json::from_str(&read_to_string(path)?).map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))
}

/// A JSON array of records, or one record per line.
fn parse_records(text: &str) -> Result<Vec<Value>, String> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).map_err(|e| format!("Invalid JSON input: {e}"));
    }
    text.as_bytes()
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|(i, line)| {
            let line = line.map_err(|e| e.to_string())?;
            serde_json::from_str(&line).map_err(|e| format!("Invalid JSON on line {}: {e}", i + 1))
        })
        .collect()
}
