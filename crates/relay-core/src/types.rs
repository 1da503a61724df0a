use crate::error::{RelayError, Result};
use crate::name::{IntoName, Name};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PermissionLevel
// ---------------------------------------------------------------------------

/// An `(actor, permission)` pair attached to an action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub fn new(actor: impl IntoName, permission: impl IntoName) -> Result<Self> {
        Ok(Self {
            actor: actor.into_name()?,
            permission: permission.into_name()?,
        })
    }

    /// `actor@active`
    pub fn active(actor: Name) -> Self {
        Self {
            actor,
            permission: Name::literal("active"),
        }
    }

    /// Parse `actor@permission`, using `default_permission` when the
    /// `@permission` suffix is omitted.
    pub fn parse_with_default(s: &str, default_permission: &Name) -> Result<Self> {
        match s.split_once('@') {
            Some((actor, permission)) => {
                if actor.is_empty() || permission.is_empty() {
                    return Err(RelayError::InvalidPermission(s.to_string()));
                }
                Self::new(actor, permission)
            }
            None => Ok(Self {
                actor: Name::new(s)?,
                permission: default_permission.clone(),
            }),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_default(s, &Name::literal("active"))
    }
}

// ---------------------------------------------------------------------------
// ActionInvocation
// ---------------------------------------------------------------------------

/// A request to run `contract::action` with a payload and authorizations.
///
/// Created either as the root of a transaction or by an inline send from a
/// running handler. Consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub contract: Name,
    pub action: Name,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
}

impl ActionInvocation {
    pub fn new(contract: impl IntoName, action: impl IntoName) -> Result<Self> {
        Ok(Self {
            contract: contract.into_name()?,
            action: action.into_name()?,
            payload: Vec::new(),
            authorization: Vec::new(),
        })
    }

    /// Serialize `value` as the JSON payload.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.payload = serde_json::to_vec(value)?;
        Ok(self)
    }

    pub fn with_authorization(mut self, level: PermissionLevel) -> Self {
        self.authorization.push(level);
        self
    }
}

// ---------------------------------------------------------------------------
// NotificationBroadcast
// ---------------------------------------------------------------------------

/// Delivery of an originating action to a contract that was named with
/// `require_recipient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBroadcast {
    pub recipient: Name,
    pub origin_contract: Name,
    pub origin_action: Name,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// The unit held by the dispatch queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    Action(ActionInvocation),
    Notification(NotificationBroadcast),
}

impl WorkItem {
    /// The contract whose code runs for this item.
    pub fn receiver(&self) -> &Name {
        match self {
            WorkItem::Action(a) => &a.contract,
            WorkItem::Notification(n) => &n.recipient,
        }
    }

    /// The contract the originating action was addressed to.
    pub fn first_receiver(&self) -> &Name {
        match self {
            WorkItem::Action(a) => &a.contract,
            WorkItem::Notification(n) => &n.origin_contract,
        }
    }

    pub fn action(&self) -> &Name {
        match self {
            WorkItem::Action(a) => &a.action,
            WorkItem::Notification(n) => &n.origin_action,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            WorkItem::Action(a) => &a.payload,
            WorkItem::Notification(n) => &n.payload,
        }
    }

    pub fn authorization(&self) -> &[PermissionLevel] {
        match self {
            WorkItem::Action(a) => &a.authorization,
            WorkItem::Notification(n) => &n.authorization,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, WorkItem::Notification(_))
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Action(a) => write!(f, "{}::{}", a.contract, a.action),
            WorkItem::Notification(n) => write!(
                f,
                "{} <- {}::{}",
                n.recipient, n.origin_contract, n.origin_action
            ),
        }
    }
}

impl From<ActionInvocation> for WorkItem {
    fn from(action: ActionInvocation) -> Self {
        WorkItem::Action(action)
    }
}

impl From<NotificationBroadcast> for WorkItem {
    fn from(notification: NotificationBroadcast) -> Self {
        WorkItem::Notification(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_parse_defaults_to_active() {
        let p: PermissionLevel = "sender".parse().unwrap();
        assert_eq!(p.to_string(), "sender@active");
        let p: PermissionLevel = "sender@owner".parse().unwrap();
        assert_eq!(p.permission.as_str(), "owner");
    }

    #[test]
    fn permission_parse_rejects_empty_parts() {
        assert!("@active".parse::<PermissionLevel>().is_err());
        assert!("sender@".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn notification_attributes_origin() {
        let item = WorkItem::Notification(NotificationBroadcast {
            recipient: Name::new("notified1").unwrap(),
            origin_contract: Name::new("sender").unwrap(),
            origin_action: Name::new("send2").unwrap(),
            payload: Vec::new(),
            authorization: Vec::new(),
        });
        assert_eq!(item.receiver().as_str(), "notified1");
        assert_eq!(item.first_receiver().as_str(), "sender");
        assert_eq!(item.action().as_str(), "send2");
        assert_eq!(item.to_string(), "notified1 <- sender::send2");
    }

    #[test]
    fn work_item_json_is_tagged() {
        let item: WorkItem = ActionInvocation::new("receiver", "receive1").unwrap().into();
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "action");
        assert_eq!(json["contract"], "receiver");
    }
}
