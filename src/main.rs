mod debug_report;

use clap::Parser;
use kwcascade::{MemoryStore, Options, RuleSet, run_pipeline};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Run leveled keyword classification rules over a keyword list.
///
/// Exit codes: 0 success, 1 a stage failed, 2 invalid arguments or unreadable
/// input.
#[derive(Debug, Parser)]
#[command(name = "kwcascade", version, about, long_about = None)]
struct Cli {
    /// JSON array of rule records.
    #[arg(short, long, value_name = "FILE")]
    rules: PathBuf,

    /// Seed keywords: a JSON array of strings, or one keyword per line.
    #[arg(short, long, value_name = "FILE")]
    keywords: PathBuf,

    /// JSON options file; flags below override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    case_sensitive: bool,

    /// Label separator for multi-label output.
    #[arg(long, value_name = "SEP")]
    separator: Option<String>,

    /// Force ANSI color output.
    #[arg(long, conflicts_with = "no_color")]
    color: bool,

    /// Disable ANSI color output.
    #[arg(long)]
    no_color: bool,

    /// Log at debug level (-vv for trace). Without it RUST_LOG applies.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (rules, keywords, options) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let mut store = MemoryStore::new();
    let report = match run_pipeline(rules, &keywords, options, &mut store) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    debug_report::print_run(&report, &store, color);
    if report.succeeded() { ExitCode::SUCCESS } else { ExitCode::from(1) }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("kwcascade=debug"),
        _ => EnvFilter::new("kwcascade=trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(io::stderr).init();
}

fn load(cli: &Cli) -> kwcascade::Result<(RuleSet, Vec<String>, Options)> {
    let mut options = match &cli.config {
        Some(path) => Options::from_json_file(path)?,
        None => Options::default(),
    };
    if cli.case_sensitive {
        options = options.with_case_sensitive(true);
    }
    if let Some(separator) = &cli.separator {
        options = options.with_separator(separator.as_str());
    }

    let rules = RuleSet::from_json_file(&cli.rules)?;
    let keywords = read_keywords(&cli.keywords)?;
    tracing::debug!(rules = rules.len(), keywords = keywords.len(), "inputs loaded");
    Ok((rules, keywords, options))
}

fn read_keywords(path: &Path) -> kwcascade::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&text)?);
    }
    Ok(text.lines().map(str::to_string).collect())
}
