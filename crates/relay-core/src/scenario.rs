//! YAML scenario files: accounts with scripted handlers, seeded rows, and a
//! list of transactions with optional expectations.

use crate::chain::Chain;
use crate::config::{ChainConfig, ConfigWarning, WarnLevel};
use crate::error::{ErrorKind, Result};
use crate::name::Name;
use crate::registry::SenderPattern;
use crate::script::{Key, Script};
use crate::types::{ActionInvocation, PermissionLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// File model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub config: ChainConfig,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<RowSpec>,
    #[serde(default)]
    pub transactions: Vec<TransactionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSpec {
    pub name: Name,
    /// Keyed by action name; registered in name order, not file order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<Name, Script>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<NotifySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySpec {
    #[serde(default = "wildcard")]
    pub sender: SenderPattern,
    pub action: Name,
    pub steps: Script,
}

fn wildcard() -> SenderPattern {
    SenderPattern::Wildcard
}

/// A record written to the store before any transaction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowSpec {
    pub code: Name,
    /// Defaults to `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Name>,
    pub table: Name,
    pub key: Key,
    /// Defaults to `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Name>,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub name: String,
    pub contract: Name,
    pub action: Name,
    /// JSON payload. `null` sends an empty payload.
    #[serde(default)]
    pub payload: Value,
    /// `actor` or `actor@permission`; empty means `contract@<default>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization: Vec<String>,
    /// Chain time to set before pushing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expectation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectation {
    /// Whitespace-separated console tokens, e.g. `"1 2 7 3"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,
    /// Exact console text of the transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,
    /// The transaction must abort with this error kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fails: Option<ErrorKind>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    pub name: String,
    pub transaction_id: Uuid,
    pub outcome: Outcome,
    pub markers: Vec<String>,
    /// Executed work items in order; for an aborted transaction the last
    /// entry is the item that failed.
    pub items: Vec<String>,
    pub console: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub mismatches: Vec<String>,
}

impl TransactionReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Static checks: config warnings, script operands, and transactions that
    /// target unknown accounts.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = self.config.validate();

        for account in &self.accounts {
            let scripts = account
                .actions
                .iter()
                .map(|(action, script)| (format!("{}::{action}", account.name), script))
                .chain(account.notify.iter().map(|n| {
                    (
                        format!("{} <- {}::{}", account.name, n.sender, n.action),
                        &n.steps,
                    )
                }));
            for (label, script) in scripts {
                if let Err(e) = script.validate() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("{label}: {e}"),
                    });
                }
            }
        }

        let mut seen = Vec::new();
        for tx in &self.transactions {
            if seen.contains(&tx.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("duplicate transaction name '{}'", tx.name),
                });
            }
            seen.push(tx.name.as_str());
            if !self.accounts.iter().any(|a| a.name == tx.contract) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "transaction '{}' targets '{}', which is not a declared account",
                        tx.name, tx.contract
                    ),
                });
            }
        }

        warnings
    }

    /// Create accounts, register every script, and seed rows.
    ///
    /// Accounts register in file order. Within an account, actions register
    /// alphabetically, then notification handlers in file order.
    pub fn build_chain(&self) -> Result<Chain> {
        let mut chain = Chain::new(self.config.clone());

        for account in &self.accounts {
            chain.create_account(&account.name)?;
        }
        for account in &self.accounts {
            for (action, script) in &account.actions {
                chain.register_action_handler(
                    account.name.clone(),
                    action.clone(),
                    script.clone().compile(),
                )?;
            }
            for notify in &account.notify {
                chain.register_notification_handler(
                    account.name.clone(),
                    notify.sender.clone(),
                    notify.action.clone(),
                    notify.steps.clone().compile(),
                )?;
            }
        }

        for row in &self.rows {
            let id = crate::table::TableId::new(
                row.code.clone(),
                row.scope.clone().unwrap_or_else(|| row.code.clone()),
                row.table.clone(),
            );
            let key = match &row.key {
                Key::Id(id) => *id,
                Key::Name(name) => Name::new(name)?.value(),
            };
            let payer = row.payer.clone().unwrap_or_else(|| row.code.clone());
            chain
                .store_mut()
                .insert(&id, key, payer, serde_json::to_vec(&row.value)?)?;
        }

        Ok(chain)
    }

    /// Build a fresh chain and push each transaction in file order.
    ///
    /// With `only`, transactions before the named one still run so the
    /// chain state matches a full run; only the named one is reported.
    pub fn run(&self, only: Option<&str>) -> Result<Vec<TransactionReport>> {
        let mut chain = self.build_chain()?;
        let mut reports = Vec::new();

        for tx in &self.transactions {
            let report = self.push(&mut chain, tx)?;
            match only {
                Some(name) if name != tx.name => continue,
                Some(_) => {
                    reports.push(report);
                    break;
                }
                None => reports.push(report),
            }
        }

        Ok(reports)
    }

    fn push(&self, chain: &mut Chain, tx: &TransactionSpec) -> Result<TransactionReport> {
        if let Some(time) = tx.time {
            chain.set_time(time);
        }

        let mut root = ActionInvocation::new(&tx.contract, &tx.action)?;
        if !tx.payload.is_null() {
            root = root.with_json(&tx.payload)?;
        }
        for auth in &tx.authorization {
            root.authorization.push(PermissionLevel::parse_with_default(
                auth,
                &self.config.dispatch.default_permission,
            )?);
        }

        let mut report = match chain.push_action(root) {
            Ok(trace) => TransactionReport {
                name: tx.name.clone(),
                transaction_id: trace.transaction_id,
                outcome: Outcome::Committed,
                markers: trace.markers(),
                items: trace.items(),
                console: trace.console(),
                error: None,
                error_kind: None,
                mismatches: Vec::new(),
            },
            Err(failure) => {
                let mut items: Vec<String> =
                    failure.completed.iter().map(|e| e.item.to_string()).collect();
                items.push(failure.failed.item.to_string());
                let console = failure
                    .completed
                    .iter()
                    .chain(std::iter::once(&failure.failed))
                    .map(|e| e.console.as_str())
                    .collect();
                TransactionReport {
                    name: tx.name.clone(),
                    transaction_id: failure.transaction_id,
                    outcome: Outcome::Aborted,
                    markers: failure.markers(),
                    items,
                    console,
                    error: Some(failure.to_string()),
                    error_kind: Some(failure.kind()),
                    mismatches: Vec::new(),
                }
            }
        };

        report.mismatches = compare(tx.expect.as_ref(), &report);
        Ok(report)
    }
}

fn compare(expect: Option<&Expectation>, report: &TransactionReport) -> Vec<String> {
    let mut mismatches = Vec::new();
    let default = Expectation::default();
    let expect = expect.unwrap_or(&default);

    match (expect.fails, report.error_kind) {
        (Some(want), Some(got)) if want != got => {
            mismatches.push(format!("expected failure {want}, got {got}"));
        }
        (Some(want), None) => {
            mismatches.push(format!("expected failure {want}, transaction committed"));
        }
        (None, Some(_)) => {
            mismatches.push(format!(
                "unexpected failure: {}",
                report.error.as_deref().unwrap_or_default()
            ));
        }
        _ => {}
    }

    if let Some(markers) = &expect.markers {
        let want: Vec<&str> = markers.split_whitespace().collect();
        if want != report.markers {
            mismatches.push(format!(
                "markers: expected [{}], got [{}]",
                want.join(" "),
                report.markers.join(" ")
            ));
        }
    }

    if let Some(console) = &expect.console {
        if console != &report.console {
            mismatches.push(format!(
                "console: expected {console:?}, got {:?}",
                report.console
            ));
        }
    }

    mismatches
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
