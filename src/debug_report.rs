use kwcascade::{MemoryStore, RunReport, Severity, StageRow, StageStatus, StageStore, TERMINAL_LEVEL};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

const SAMPLE_ROWS: usize = 5;

pub fn print_run(report: &RunReport, store: &MemoryStore, color: bool) {
    let palette = ansi::Palette::new(color);
    let started = report.started_at.format("%Y-%m-%d %H:%M:%S");
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Classification run ({started})"), ansi::CYAN)));

    println!("\n{}", palette.paint("━━━ Stages ━━━", ansi::GRAY));
    print_stages(report, &palette);

    println!("\n{}", palette.paint("━━━ Outputs ━━━", ansi::GRAY));
    if store.handles().next().is_none() {
        println!("{}", palette.dim("  No outputs written"));
    } else {
        print_outputs(store, &palette);
    }

    let notable: Vec<_> = report.diagnostics.entries().iter().filter(|d| d.severity != Severity::Info).collect();
    if !notable.is_empty() {
        println!("\n{}", palette.paint("━━━ Diagnostics ━━━", ansi::GRAY));
        for diag in notable {
            let color = if diag.severity == Severity::Error { ansi::RED } else { ansi::YELLOW };
            println!("  {}", palette.paint(diag.to_string(), color));
        }
    }

    if let Some(err) = &report.error {
        println!("\n{}", palette.bold(palette.paint(format!("✗ {err}"), ansi::RED)));
    }

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    let per_stage: Vec<String> =
        report.metrics.stages.iter().map(|s| format!("L{}: {:?}", s.level, s.duration)).collect();
    println!(
        "  Total: {}  │  {}",
        palette.paint(format!("{:?}", report.metrics.total), ansi::GREEN),
        palette.dim(if per_stage.is_empty() { "no stages ran".to_string() } else { per_stage.join("  ") }),
    );
    println!();
}

fn print_stages(report: &RunReport, palette: &ansi::Palette) {
    for outcome in &report.outcomes {
        let (mark, color) = match outcome.status {
            StageStatus::Success => ("✓", ansi::GREEN),
            StageStatus::Warning => ("!", ansi::YELLOW),
            StageStatus::Fail => ("✗", ansi::RED),
        };
        let next = if outcome.next_level == TERMINAL_LEVEL { "end".to_string() } else { outcome.next_level.to_string() };
        println!(
            "  {} {} {}",
            palette.paint(format!("Level {}:", outcome.level), ansi::BLUE),
            palette.paint(format!("{mark} {}", outcome.status.as_str()), color),
            palette.dim(format!("→ {next}")),
        );
        if let Some(message) = &outcome.message {
            println!("    {}", palette.dim(message));
        }
        if let Some(m) = report.metrics.stage(outcome.level) {
            println!(
                "    {} {}  {} {}  {} {}  {} {}",
                palette.dim("scopes:"),
                palette.paint(format!("{} (+{} skipped)", m.scopes, m.skipped_scopes), ansi::YELLOW),
                palette.dim("rules:"),
                palette.paint(format!("{} ({} bad)", m.rules_compiled, m.rule_errors), ansi::YELLOW),
                palette.dim("matched:"),
                palette.paint(m.matched.to_string(), ansi::GREEN),
                palette.dim("unmatched:"),
                palette.paint(m.unmatched.to_string(), ansi::YELLOW),
            );
        }
    }
}

fn print_outputs(store: &MemoryStore, palette: &ansi::Palette) {
    for handle in store.handles() {
        println!("  {}", palette.bold(palette.paint(handle.as_str(), ansi::CYAN)));
        let Ok(sheets) = store.sheet_names(handle) else { continue };
        for sheet in sheets {
            let rows = store.sheet(handle.as_str(), &sheet).unwrap_or_default();
            println!("    {} {}", palette.paint(&sheet, ansi::BLUE), palette.dim(format!("({} rows)", rows.len())));
            for row in rows.iter().take(SAMPLE_ROWS) {
                println!("      {}", fmt_row(row, palette));
            }
            if rows.len() > SAMPLE_ROWS {
                println!("      {}", palette.dim(format!("... +{} more", rows.len() - SAMPLE_ROWS)));
            }
        }
    }
}

fn fmt_row(row: &StageRow, palette: &ansi::Palette) -> String {
    let mut out = palette.paint(&row.keyword, ansi::GREEN);
    for (level, rule) in &row.matched {
        out.push_str(&format!("  {}{}", palette.dim(format!("阶段{level}=")), rule));
        if let Some(tag) = row.tags.get(level) {
            out.push_str(&palette.dim(format!(" [{tag}]")));
        }
        if let Some(parent) = row.parents.get(level) {
            out.push_str(&palette.dim(format!(" ← {parent}")));
        }
    }
    out
}
