use crate::error::{RelayError, Result};
use crate::name::{IntoName, Name};
use crate::runtime::ApplyContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handler code run for an action or notification delivery.
pub type Handler = Arc<dyn Fn(&mut ApplyContext<'_>) -> Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// SenderPattern
// ---------------------------------------------------------------------------

/// Which originating contracts a notification handler listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SenderPattern {
    Exact(Name),
    Wildcard,
}

impl SenderPattern {
    pub fn matches(&self, origin: &Name) -> bool {
        match self {
            SenderPattern::Exact(name) => name == origin,
            SenderPattern::Wildcard => true,
        }
    }
}

impl fmt::Display for SenderPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderPattern::Exact(name) => write!(f, "{name}"),
            SenderPattern::Wildcard => f.write_str("*"),
        }
    }
}

impl std::str::FromStr for SenderPattern {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(SenderPattern::Wildcard);
        }
        Name::new(s)
            .map(SenderPattern::Exact)
            .map_err(|_| RelayError::InvalidPattern(s.to_string()))
    }
}

impl TryFrom<String> for SenderPattern {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SenderPattern> for String {
    fn from(pattern: SenderPattern) -> Self {
        pattern.to_string()
    }
}

// ---------------------------------------------------------------------------
// Registration listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Registration {
    Action {
        contract: Name,
        action: Name,
    },
    Notification {
        contract: Name,
        sender: SenderPattern,
        action: Name,
    },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct NotifyEntry {
    pattern: SenderPattern,
    action: Name,
    handler: Handler,
}

/// Load-time table of action and notification handlers.
///
/// Notification handlers on one contract are kept in registration order and
/// that order is the execution order when several match the same delivery,
/// whether they were registered with an exact sender or a wildcard.
#[derive(Default)]
pub struct Registry {
    actions: HashMap<(Name, Name), Handler>,
    action_order: Vec<(Name, Name)>,
    notifications: HashMap<Name, Vec<NotifyEntry>>,
    notify_order: Vec<Name>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

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
        let key = (contract, action);
        if self.actions.contains_key(&key) {
            return Err(RelayError::DuplicateHandler {
                contract: key.0.to_string(),
                action: key.1.to_string(),
            });
        }
        self.action_order.push(key.clone());
        self.actions.insert(key, handler);
        Ok(())
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
        );
        Ok(())
    }

    pub fn register_notification_handler(
        &mut self,
        contract: Name,
        sender: SenderPattern,
        action: Name,
        handler: Handler,
    ) {
        if !self.notifications.contains_key(&contract) {
            self.notify_order.push(contract.clone());
        }
        self.notifications
            .entry(contract)
            .or_default()
            .push(NotifyEntry {
                pattern: sender,
                action,
                handler,
            });
    }

    pub fn lookup_action(&self, contract: &Name, action: &Name) -> Option<Handler> {
        self.actions
            .get(&(contract.clone(), action.clone()))
            .cloned()
    }

    pub fn lookup_notification_handlers(
        &self,
        recipient: &Name,
        origin_contract: &Name,
        action: &Name,
    ) -> Vec<Handler> {
        self.notifications
            .get(recipient)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| &e.action == action && e.pattern.matches(origin_contract))
                    .map(|e| e.handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registration, actions first, each group in registration order.
    /// Scenario files register an account's actions in name order.
    pub fn registrations(&self) -> Vec<Registration> {
        let actions = self
            .action_order
            .iter()
            .map(|(contract, action)| Registration::Action {
                contract: contract.clone(),
                action: action.clone(),
            });
        let notifications = self.notify_order.iter().flat_map(|contract| {
            self.notifications
                .get(contract)
                .into_iter()
                .flatten()
                .map(move |e| Registration::Notification {
                    contract: contract.clone(),
                    sender: e.pattern.clone(),
                    action: e.action.clone(),
                })
        });
        actions.chain(notifications).collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.actions.len())
            .field(
                "notifications",
                &self.notifications.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::table::TableStore;
    use crate::types::{ActionInvocation, WorkItem};

    fn n(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    /// Run `handlers` against a throwaway context and return what they printed.
    fn run_all(handlers: &[Handler]) -> String {
        let item: WorkItem = ActionInvocation::new("probe", "send").unwrap().into();
        let mut store = TableStore::new();
        let config = ChainConfig::default();
        let env = crate::runtime::Environment::detached(&config);
        let mut ctx = ApplyContext::new(&item, &mut store, &env);
        for h in handlers {
            h(&mut ctx).unwrap();
        }
        ctx.finish().console
    }

    #[test]
    fn pattern_parse_and_match() {
        let wild: SenderPattern = "*".parse().unwrap();
        assert!(wild.matches(&n("anyone")));
        let exact: SenderPattern = "sender".parse().unwrap();
        assert!(exact.matches(&n("sender")));
        assert!(!exact.matches(&n("other")));
        assert!(matches!(
            "Bad!".parse::<SenderPattern>(),
            Err(RelayError::InvalidPattern(_))
        ));
    }

    #[test]
    fn missing_action_is_none() {
        let reg = Registry::new();
        assert!(reg.lookup_action(&n("receiver"), &n("receive1")).is_none());
        assert!(reg
            .lookup_notification_handlers(&n("notified4"), &n("sender"), &n("send2"))
            .is_empty());
    }

    #[test]
    fn duplicate_action_registration_fails() {
        let mut reg = Registry::new();
        reg.register_action("receiver", "receive1", |_| Ok(())).unwrap();
        let err = reg
            .register_action("receiver", "receive1", |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RelayError::DuplicateHandler { .. }));
    }

    #[test]
    fn notification_lookup_filters_by_action_and_sender() {
        let mut reg = Registry::new();
        reg.register_notification("watcher", SenderPattern::Wildcard, "send2", |ctx| {
            ctx.print("wild");
            Ok(())
        })
        .unwrap();
        reg.register_notification("watcher", "other".parse().unwrap(), "send2", |ctx| {
            ctx.print("other");
            Ok(())
        })
        .unwrap();

        let hits = reg.lookup_notification_handlers(&n("watcher"), &n("sender"), &n("send2"));
        assert_eq!(run_all(&hits), "wild");
        let none = reg.lookup_notification_handlers(&n("watcher"), &n("sender"), &n("send1"));
        assert!(none.is_empty());
    }

    #[test]
    fn exact_and_wildcard_run_in_registration_order() {
        let mut reg = Registry::new();
        reg.register_notification("watcher", "sender".parse().unwrap(), "send", |ctx| {
            ctx.print("exact ");
            Ok(())
        })
        .unwrap();
        reg.register_notification("watcher", SenderPattern::Wildcard, "send", |ctx| {
            ctx.print("wild ");
            Ok(())
        })
        .unwrap();
        let hits = reg.lookup_notification_handlers(&n("watcher"), &n("sender"), &n("send"));
        assert_eq!(run_all(&hits), "exact wild ");

        let mut reversed = Registry::new();
        reversed
            .register_notification("watcher", SenderPattern::Wildcard, "send", |ctx| {
                ctx.print("wild ");
                Ok(())
            })
            .unwrap();
        reversed
            .register_notification("watcher", "sender".parse().unwrap(), "send", |ctx| {
                ctx.print("exact ");
                Ok(())
            })
            .unwrap();
        let hits = reversed.lookup_notification_handlers(&n("watcher"), &n("sender"), &n("send"));
        assert_eq!(run_all(&hits), "wild exact ");
    }

    #[test]
    fn registrations_list_in_order() {
        let mut reg = Registry::new();
        reg.register_action("sender", "send1", |_| Ok(())).unwrap();
        reg.register_action("sender", "send2", |_| Ok(())).unwrap();
        reg.register_notification("notified1", SenderPattern::Wildcard, "send2", |_| Ok(()))
            .unwrap();
        let regs = reg.registrations();
        assert_eq!(regs.len(), 3);
        assert_eq!(
            regs[0],
            Registration::Action {
                contract: n("sender"),
                action: n("send1")
            }
        );
        assert!(matches!(&regs[2], Registration::Notification { sender: SenderPattern::Wildcard, .. }));
    }
}
