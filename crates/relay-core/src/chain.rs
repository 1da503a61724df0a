use crate::config::ChainConfig;
use crate::error::{RelayError, Result};
use crate::name::{IntoName, Name};
use crate::registry::{Handler, Registry, SenderPattern};
use crate::runtime::{ApplyContext, Environment};
use crate::scheduler::Scheduler;
use crate::table::TableStore;
use crate::trace::{ExecutionTrace, TransactionFailure};
use crate::types::{ActionInvocation, PermissionLevel};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: Name,
    /// Set once any handler is registered for the account.
    #[serde(default)]
    pub is_contract: bool,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// In-process chain: accounts, their handlers, persistent tables, and a clock.
///
/// Transactions run one at a time. Each runs against a copy of the table
/// store which replaces the committed store only when every work item in the
/// transaction succeeded.
pub struct Chain {
    config: ChainConfig,
    accounts: BTreeMap<Name, Account>,
    registry: Registry,
    store: TableStore,
    now: DateTime<Utc>,
    console: String,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new(ChainConfig::default())
    }
}

impl Chain {
    pub fn new(config: ChainConfig) -> Self {
        let now = config.genesis_time;
        Self {
            config,
            accounts: BTreeMap::new(),
            registry: Registry::new(),
            store: TableStore::new(),
            now,
            console: String::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub fn create_account(&mut self, name: impl IntoName) -> Result<&Account> {
        let name = name.into_name()?;
        if self.accounts.contains_key(&name) {
            return Err(RelayError::AccountExists(name.to_string()));
        }
        tracing::debug!(account = %name, "create account");
        Ok(self.accounts.entry(name.clone()).or_insert(Account {
            name,
            is_contract: false,
        }))
    }

    /// Create each account in order, failing on the first error.
    pub fn create_accounts<I, N>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = N>,
        N: IntoName,
    {
        for name in names {
            self.create_account(name)?;
        }
        Ok(())
    }

    pub fn is_account(&self, name: &Name) -> bool {
        self.accounts.contains_key(name)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    fn contract_account(&mut self, name: &Name) -> Result<()> {
        let account = self
            .accounts
            .get_mut(name)
            .ok_or_else(|| RelayError::AccountNotFound(name.to_string()))?;
        account.is_contract = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    pub fn register_action<F>(
        &mut self,
        contract: impl IntoName,
        action: impl IntoName,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut ApplyContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_action_handler(contract.into_name()?, action.into_name()?, Arc::new(handler))
    }

    pub fn register_action_handler(
        &mut self,
        contract: Name,
        action: Name,
        handler: Handler,
    ) -> Result<()> {
        self.contract_account(&contract)?;
        self.registry
            .register_action_handler(contract, action, handler)
    }

    pub fn register_notification<F>(
        &mut self,
        contract: impl IntoName,
        sender: SenderPattern,
        action: impl IntoName,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut ApplyContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_notification_handler(
            contract.into_name()?,
            sender,
            action.into_name()?,
            Arc::new(handler),
        )
    }

    pub fn register_notification_handler(
        &mut self,
        contract: Name,
        sender: SenderPattern,
        action: Name,
        handler: Handler,
    ) -> Result<()> {
        self.contract_account(&contract)?;
        self.registry
            .register_notification_handler(contract, sender, action, handler);
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Run `root` and everything it transitively spawns as one transaction.
    ///
    /// A root without authorization is signed as `contract@<default
    /// permission>`. On failure no table write from any work item survives.
    pub fn push_action(
        &mut self,
        mut root: ActionInvocation,
    ) -> std::result::Result<ExecutionTrace, TransactionFailure> {
        if root.authorization.is_empty() {
            root.authorization.push(PermissionLevel {
                actor: root.contract.clone(),
                permission: self.config.dispatch.default_permission.clone(),
            });
        }

        tracing::info!(
            contract = %root.contract,
            action = %root.action,
            time = %self.now.to_rfc3339(),
            "push transaction"
        );

        let mut working = self.store.clone();
        let env = Environment::new(&self.config, &self.accounts, self.now);
        let result = Scheduler::new(&self.registry, &env).run(root, &mut working);

        match &result {
            Ok(trace) => {
                self.store = working;
                self.console = trace.console();
                tracing::info!(
                    transaction = %trace.transaction_id,
                    executed = trace.len(),
                    "transaction committed"
                );
            }
            Err(failure) => {
                self.console = String::new();
                tracing::warn!(
                    transaction = %failure.transaction_id,
                    kind = %failure.kind(),
                    error = %failure.error,
                    "transaction rolled back"
                );
            }
        }
        result
    }

    /// Console output of the last committed transaction.
    pub fn console(&self) -> &str {
        &self.console
    }

    // -----------------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------------

    pub fn time(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn set_time(&mut self, time: DateTime<Utc>) {
        self.now = time;
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Direct access for seeding rows outside a transaction.
    pub fn store_mut(&mut self) -> &mut TableStore {
        &mut self.store
    }

    pub fn reset_store(&mut self) {
        self.store = TableStore::new();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
