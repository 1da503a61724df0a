use crate::cmd::load_scenario;
use crate::output::print_json;
use relay_core::config::{ConfigWarning, WarnLevel};
use std::path::Path;

pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let scenario = load_scenario(path)?;
    let mut warnings = scenario.validate();
    if let Err(e) = scenario.build_chain() {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: e.to_string(),
        });
    }
    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();

    if json {
        #[derive(serde::Serialize)]
        struct CheckOutput<'a> {
            path: String,
            accounts: usize,
            transactions: usize,
            warnings: &'a [ConfigWarning],
        }
        print_json(&CheckOutput {
            path: path.display().to_string(),
            accounts: scenario.accounts.len(),
            transactions: scenario.transactions.len(),
            warnings: &warnings,
        })?;
    } else {
        for w in &warnings {
            let label = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("{label}: {}", w.message);
        }
        if warnings.is_empty() {
            println!(
                "{}: {} account(s), {} transaction(s), ok",
                path.display(),
                scenario.accounts.len(),
                scenario.transactions.len()
            );
        }
    }

    if errors > 0 {
        anyhow::bail!("{errors} error(s) in {}", path.display());
    }
    Ok(())
}
