//! Capability surface handed to handler code.
//!
//! An [`ApplyContext`] lives for the execution of exactly one work item. Inline
//! sends and notification requests land in a local buffer that the scheduler
//! appends to the dispatch queue only if every handler for the item returns
//! `Ok`. Table writes go straight into the transaction's working store, which
//! the chain discards wholesale if the transaction fails.

use crate::chain::Account;
use crate::config::ChainConfig;
use crate::error::{RelayError, Result};
use crate::name::{IntoName, Name};
use crate::table::{Record, TableId, TableStore};
use crate::types::{ActionInvocation, NotificationBroadcast, PermissionLevel, WorkItem};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

static NO_ACCOUNTS: BTreeMap<Name, Account> = BTreeMap::new();

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Read-only chain state visible to every work item of one transaction.
pub struct Environment<'a> {
    pub config: &'a ChainConfig,
    pub accounts: &'a BTreeMap<Name, Account>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> Environment<'a> {
    pub fn new(
        config: &'a ChainConfig,
        accounts: &'a BTreeMap<Name, Account>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            accounts,
            timestamp,
        }
    }

    /// An environment with no accounts, clocked at the configured genesis
    /// time.
    pub fn detached(config: &'a ChainConfig) -> Self {
        Self::new(config, &NO_ACCOUNTS, config.genesis_time)
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// What a finished execution produced besides table writes.
#[derive(Debug, Default)]
pub struct Effects {
    /// Sends and notifications in the order the handler issued them.
    pub pending: Vec<WorkItem>,
    pub console: String,
}

// ---------------------------------------------------------------------------
// ApplyContext
// ---------------------------------------------------------------------------

pub struct ApplyContext<'a> {
    item: &'a WorkItem,
    store: &'a mut TableStore,
    env: &'a Environment<'a>,
    pending: Vec<WorkItem>,
    recipients: Vec<Name>,
    console: String,
}

impl<'a> ApplyContext<'a> {
    pub fn new(item: &'a WorkItem, store: &'a mut TableStore, env: &'a Environment<'a>) -> Self {
        Self {
            item,
            store,
            env,
            pending: Vec::new(),
            recipients: Vec::new(),
            console: String::new(),
        }
    }

    pub fn finish(self) -> Effects {
        Effects {
            pending: self.pending,
            console: self.console,
        }
    }

    // -----------------------------------------------------------------------
    // Current item
    // -----------------------------------------------------------------------

    /// Contract whose code is running.
    pub fn receiver(&self) -> &Name {
        self.item.receiver()
    }

    /// Contract the originating action was addressed to. Differs from
    /// [`receiver`](Self::receiver) while handling a notification.
    pub fn first_receiver(&self) -> &Name {
        self.item.first_receiver()
    }

    pub fn action(&self) -> &Name {
        self.item.action()
    }

    pub fn is_notification(&self) -> bool {
        self.item.is_notification()
    }

    pub fn data(&self) -> &[u8] {
        self.item.payload()
    }

    /// Decode the payload as JSON. An empty payload decodes as `null`.
    pub fn data_json<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.data();
        if data.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(data)?)
    }

    pub fn authorization(&self) -> &[PermissionLevel] {
        self.item.authorization()
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// True if `actor` signed the current item with a satisfying permission.
    pub fn has_auth(&self, actor: &Name) -> bool {
        let satisfying = &self.env.config.auth.satisfying_permissions;
        self.authorization()
            .iter()
            .any(|p| &p.actor == actor && satisfying.contains(&p.permission))
    }

    pub fn require_auth(&self, actor: impl IntoName) -> Result<()> {
        let actor = actor.into_name()?;
        if self.has_auth(&actor) {
            return Ok(());
        }
        Err(RelayError::AuthorizationFailure {
            actor: actor.to_string(),
            permission: None,
        })
    }

    /// Require `actor@permission` exactly.
    pub fn require_auth2(&self, actor: impl IntoName, permission: impl IntoName) -> Result<()> {
        let wanted = PermissionLevel::new(actor, permission)?;
        if self.authorization().contains(&wanted) {
            return Ok(());
        }
        Err(RelayError::AuthorizationFailure {
            actor: wanted.actor.to_string(),
            permission: Some(wanted.permission.to_string()),
        })
    }

    pub fn is_account(&self, name: &Name) -> bool {
        self.env.accounts.contains_key(name)
    }

    /// `receiver@<default permission>`, the usual authorization for sends
    /// issued on the contract's own behalf.
    pub fn self_permission(&self) -> PermissionLevel {
        PermissionLevel {
            actor: self.receiver().clone(),
            permission: self.env.config.dispatch.default_permission.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Queue an inline action. It runs after everything already queued.
    pub fn send(
        &mut self,
        contract: impl IntoName,
        action: impl IntoName,
        payload: Vec<u8>,
        authorization: Vec<PermissionLevel>,
    ) -> Result<()> {
        let invocation = ActionInvocation {
            contract: contract.into_name()?,
            action: action.into_name()?,
            payload,
            authorization,
        };
        tracing::trace!(
            from = %self.receiver(),
            contract = %invocation.contract,
            action = %invocation.action,
            "inline send"
        );
        self.pending.push(WorkItem::Action(invocation));
        Ok(())
    }

    pub fn send_json<T: Serialize>(
        &mut self,
        contract: impl IntoName,
        action: impl IntoName,
        value: &T,
        authorization: Vec<PermissionLevel>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(contract, action, payload, authorization)
    }

    /// Ask for `recipient` to be notified of the originating action.
    ///
    /// Repeated requests for the same recipient within this execution collapse
    /// into one delivery; naming the running contract itself is a no-op.
    pub fn require_recipient(&mut self, recipient: impl IntoName) -> Result<()> {
        let recipient = recipient.into_name()?;
        if &recipient == self.receiver() || self.recipients.contains(&recipient) {
            return Ok(());
        }
        self.recipients.push(recipient.clone());
        self.pending
            .push(WorkItem::Notification(NotificationBroadcast {
                recipient,
                origin_contract: self.first_receiver().clone(),
                origin_action: self.action().clone(),
                payload: self.data().to_vec(),
                authorization: self.authorization().to_vec(),
            }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Console / assertions / clock
    // -----------------------------------------------------------------------

    pub fn print(&mut self, value: impl fmt::Display) {
        use std::fmt::Write as _;
        let _ = write!(self.console, "{value}");
    }

    pub fn check(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(RelayError::AssertionFailure(message.into()))
        }
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.env.timestamp
    }

    /// Microseconds since the Unix epoch.
    pub fn current_time_micros(&self) -> i64 {
        self.env.timestamp.timestamp_micros()
    }

    // -----------------------------------------------------------------------
    // Tables (owned by the receiver)
    // -----------------------------------------------------------------------

    fn own_table(&self, table: impl IntoName, scope: impl IntoName) -> Result<TableId> {
        Ok(TableId::new(
            self.receiver().clone(),
            scope.into_name()?,
            table.into_name()?,
        ))
    }

    pub fn get(&self, table: impl IntoName, scope: impl IntoName, key: u64) -> Result<Option<Record>> {
        let id = self.own_table(table, scope)?;
        Ok(self.store.get(&id, key).cloned())
    }

    /// Read a record from another contract's table.
    pub fn get_from(
        &self,
        code: impl IntoName,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
    ) -> Result<Option<Record>> {
        let id = TableId::new(code.into_name()?, scope.into_name()?, table.into_name()?);
        Ok(self.store.get(&id, key).cloned())
    }

    pub fn insert(
        &mut self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
        payer: impl IntoName,
        value: Vec<u8>,
    ) -> Result<()> {
        let id = self.own_table(table, scope)?;
        self.store.insert(&id, key, payer.into_name()?, value)
    }

    pub fn modify(
        &mut self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
        payer: Option<Name>,
        value: Vec<u8>,
    ) -> Result<()> {
        let id = self.own_table(table, scope)?;
        self.store.modify(&id, key, payer, value)
    }

    pub fn erase(&mut self, table: impl IntoName, scope: impl IntoName, key: u64) -> Result<()> {
        let id = self.own_table(table, scope)?;
        self.store.erase(&id, key).map(|_| ())
    }

    pub fn lower_bound(
        &self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
    ) -> Result<Option<Record>> {
        let id = self.own_table(table, scope)?;
        Ok(self.store.lower_bound(&id, key).cloned())
    }

    /// First record with a primary key strictly greater than `key`.
    pub fn upper_bound(
        &self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
    ) -> Result<Option<Record>> {
        let id = self.own_table(table, scope)?;
        Ok(self.store.upper_bound(&id, key).cloned())
    }

    pub fn rows(&self, table: impl IntoName, scope: impl IntoName) -> Result<Vec<Record>> {
        let id = self.own_table(table, scope)?;
        Ok(self.store.rows(&id).into_iter().cloned().collect())
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
    ) -> Result<Option<T>> {
        self.get(table, scope, key)?
            .map(|record| record.json())
            .transpose()
    }

    pub fn insert_json<T: Serialize>(
        &mut self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
        payer: impl IntoName,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.insert(table, scope, key, payer, bytes)
    }

    pub fn modify_json<T: Serialize>(
        &mut self,
        table: impl IntoName,
        scope: impl IntoName,
        key: u64,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.modify(table, scope, key, None, bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
