use crate::cmd::load_scenario;
use crate::output::{print_json, print_table};
use anyhow::Context;
use relay_core::scenario::{Outcome, TransactionReport};
use std::path::Path;

pub fn run(path: &Path, only: Option<&str>, show_trace: bool, json: bool) -> anyhow::Result<()> {
    let scenario = load_scenario(path)?;
    let reports = scenario
        .run(only)
        .with_context(|| format!("failed to run {}", path.display()))?;

    if let Some(name) = only {
        if reports.is_empty() {
            anyhow::bail!("no transaction named '{name}' in {}", path.display());
        }
    }

    if json {
        print_json(&reports)?;
    } else {
        print_reports(&reports, show_trace);
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        anyhow::bail!(
            "{failed} of {} transaction(s) did not match expectations",
            reports.len()
        );
    }
    Ok(())
}

fn print_reports(reports: &[TransactionReport], show_trace: bool) {
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                match r.outcome {
                    Outcome::Committed => "committed".to_string(),
                    Outcome::Aborted => format!(
                        "aborted ({})",
                        r.error_kind.map(|k| k.to_string()).unwrap_or_default()
                    ),
                },
                r.items.len().to_string(),
                r.markers.join(" "),
                if r.passed() { "ok" } else { "MISMATCH" }.to_string(),
            ]
        })
        .collect();
    print_table(&["TRANSACTION", "OUTCOME", "ITEMS", "MARKERS", "RESULT"], &rows);

    for report in reports {
        if show_trace {
            println!();
            println!("{}:", report.name);
            for (seq, item) in report.items.iter().enumerate() {
                println!("  {seq:>3}  {item}");
            }
            if let Some(error) = &report.error {
                println!("  error: {error}");
            }
        }
        for mismatch in &report.mismatches {
            println!("{}: {mismatch}", report.name);
        }
    }
}
