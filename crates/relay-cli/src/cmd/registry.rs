use crate::cmd::load_scenario;
use crate::output::{print_json, print_table};
use anyhow::Context;
use relay_core::registry::Registration;
use std::path::Path;

pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let scenario = load_scenario(path)?;
    let chain = scenario
        .build_chain()
        .with_context(|| format!("failed to register handlers from {}", path.display()))?;
    let registrations = chain.registry().registrations();

    if json {
        return print_json(&registrations);
    }

    let rows: Vec<Vec<String>> = registrations
        .iter()
        .map(|r| match r {
            Registration::Action { contract, action } => vec![
                "action".to_string(),
                contract.to_string(),
                "-".to_string(),
                action.to_string(),
            ],
            Registration::Notification {
                contract,
                sender,
                action,
            } => vec![
                "notify".to_string(),
                contract.to_string(),
                sender.to_string(),
                action.to_string(),
            ],
        })
        .collect();
    print_table(&["KIND", "CONTRACT", "SENDER", "ACTION"], &rows);

    let idle: Vec<&str> = chain
        .accounts()
        .filter(|a| !a.is_contract)
        .map(|a| a.name.as_str())
        .collect();
    if !idle.is_empty() {
        println!();
        println!("accounts without handlers: {}", idle.join(", "));
    }
    Ok(())
}
