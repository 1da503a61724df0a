//! Declarative handler bodies.
//!
//! A [`Script`] is a list of [`Step`]s loaded from YAML and compiled into a
//! [`Handler`]. String operands may be a literal name, `$self` (the executing
//! contract), or `$<field>` (a top-level field of the JSON payload).

use crate::error::{RelayError, Result};
use crate::name::Name;
use crate::registry::Handler;
use crate::runtime::ApplyContext;
use crate::types::PermissionLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const SELF_REF: &str = "$self";

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Primary key operand: a number, or a name whose 64-bit value is the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Id(u64),
    Name(String),
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Print {
        text: String,
    },
    /// Print a payload field. Strings print bare, anything else as JSON.
    PrintField {
        field: String,
    },
    /// Print `current_time_micros()`.
    PrintTime,
    RequireAuth {
        actor: String,
    },
    RequireAuth2 {
        actor: String,
        permission: String,
    },
    RequireRecipient {
        recipient: String,
    },
    /// Inline send. Without `payload` the current payload is forwarded.
    Send {
        contract: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default = "self_authorization")]
        authorization: Vec<String>,
    },
    Check {
        field: String,
        equals: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Fail {
        message: String,
    },
    Insert {
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
        key: Key,
        #[serde(default = "self_ref")]
        payer: String,
        value: Value,
    },
    Modify {
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
        key: Key,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payer: Option<String>,
        value: Value,
    },
    Erase {
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
        key: Key,
    },
    /// Print a record's JSON value, or `none`. `code` may name another
    /// contract; such reads are read-only.
    PrintRow {
        #[serde(default = "self_ref")]
        code: String,
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
        key: Key,
    },
    /// Print every primary key of an own table in key order.
    PrintKeys {
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
    },
    /// Print the first primary key `>= key` in an own table, or `none`.
    PrintLowerBound {
        table: String,
        #[serde(default = "self_ref")]
        scope: String,
        key: Key,
    },
}

fn self_ref() -> String {
    SELF_REF.to_string()
}

fn self_authorization() -> Vec<String> {
    vec![self_ref()]
}

impl Step {
    pub fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        match self {
            Step::Print { text } => {
                ctx.print(text);
                Ok(())
            }
            Step::PrintField { field } => {
                let value = payload_field(ctx, field)?;
                match value {
                    Value::String(s) => ctx.print(s),
                    other => ctx.print(other),
                }
                Ok(())
            }
            Step::PrintTime => {
                let micros = ctx.current_time_micros();
                ctx.print(micros);
                Ok(())
            }
            Step::RequireAuth { actor } => {
                let actor = resolve_name(ctx, actor)?;
                ctx.require_auth(actor)
            }
            Step::RequireAuth2 { actor, permission } => {
                let actor = resolve_name(ctx, actor)?;
                let permission = resolve_name(ctx, permission)?;
                ctx.require_auth2(actor, permission)
            }
            Step::RequireRecipient { recipient } => {
                let recipient = resolve_name(ctx, recipient)?;
                ctx.require_recipient(recipient)
            }
            Step::Send {
                contract,
                action,
                payload,
                authorization,
            } => {
                let contract = resolve_name(ctx, contract)?;
                let action = resolve_name(ctx, action)?;
                let bytes = match payload {
                    Some(value) => serde_json::to_vec(&resolve_value(ctx, value)?)?,
                    None => ctx.data().to_vec(),
                };
                let auth = authorization
                    .iter()
                    .map(|a| resolve_permission(ctx, a))
                    .collect::<Result<Vec<_>>>()?;
                ctx.send(contract, action, bytes, auth)
            }
            Step::Check {
                field,
                equals,
                message,
            } => {
                let actual = payload_field(ctx, field)?;
                let expected = resolve_value(ctx, equals)?;
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("{field}: expected {expected}, got {actual}"));
                ctx.check(actual == expected, message)
            }
            Step::Fail { message } => Err(RelayError::AssertionFailure(message.clone())),
            Step::Insert {
                table,
                scope,
                key,
                payer,
                value,
            } => {
                let scope = resolve_name(ctx, scope)?;
                let key = resolve_key(ctx, key)?;
                let payer = resolve_name(ctx, payer)?;
                let value = serde_json::to_vec(&resolve_value(ctx, value)?)?;
                ctx.insert(table, scope, key, payer, value)
            }
            Step::Modify {
                table,
                scope,
                key,
                payer,
                value,
            } => {
                let scope = resolve_name(ctx, scope)?;
                let key = resolve_key(ctx, key)?;
                let payer = payer.as_deref().map(|p| resolve_name(ctx, p)).transpose()?;
                let value = serde_json::to_vec(&resolve_value(ctx, value)?)?;
                ctx.modify(table, scope, key, payer, value)
            }
            Step::Erase { table, scope, key } => {
                let scope = resolve_name(ctx, scope)?;
                let key = resolve_key(ctx, key)?;
                ctx.erase(table, scope, key)
            }
            Step::PrintRow {
                code,
                table,
                scope,
                key,
            } => {
                let code = resolve_name(ctx, code)?;
                let scope = resolve_name(ctx, scope)?;
                let key = resolve_key(ctx, key)?;
                match ctx.get_from(code, table, scope, key)? {
                    Some(record) => {
                        let value: Value = record.json()?;
                        ctx.print(value);
                    }
                    None => ctx.print("none"),
                }
                Ok(())
            }
            Step::PrintKeys { table, scope } => {
                let scope = resolve_name(ctx, scope)?;
                let keys: Vec<String> = ctx
                    .rows(table, scope)?
                    .iter()
                    .map(|r| r.primary_key.to_string())
                    .collect();
                ctx.print(keys.join(" "));
                Ok(())
            }
            Step::PrintLowerBound { table, scope, key } => {
                let scope = resolve_name(ctx, scope)?;
                let key = resolve_key(ctx, key)?;
                match ctx.lower_bound(table, scope, key)? {
                    Some(record) => ctx.print(record.primary_key),
                    None => ctx.print("none"),
                }
                Ok(())
            }
        }
    }

    /// Check literal operands without running anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            Step::Print { .. } | Step::PrintField { .. } | Step::PrintTime | Step::Fail { .. } => {
                Ok(())
            }
            Step::Check { .. } => Ok(()),
            Step::RequireAuth { actor } => literal(actor),
            Step::RequireAuth2 { actor, permission } => {
                literal(actor)?;
                literal(permission)
            }
            Step::RequireRecipient { recipient } => literal(recipient),
            Step::Send {
                contract,
                action,
                authorization,
                ..
            } => {
                literal(contract)?;
                literal(action)?;
                for auth in authorization {
                    match auth.split_once('@') {
                        Some((actor, permission)) => {
                            literal(actor)?;
                            literal(permission)?;
                        }
                        None => literal(auth)?,
                    }
                }
                Ok(())
            }
            Step::Insert {
                table,
                scope,
                key,
                payer,
                ..
            } => {
                literal(table)?;
                literal(scope)?;
                literal_key(key)?;
                literal(payer)
            }
            Step::Modify {
                table,
                scope,
                key,
                payer,
                ..
            } => {
                literal(table)?;
                literal(scope)?;
                literal_key(key)?;
                payer.as_deref().map(literal).transpose().map(|_| ())
            }
            Step::Erase { table, scope, key }
            | Step::PrintLowerBound { table, scope, key } => {
                literal(table)?;
                literal(scope)?;
                literal_key(key)
            }
            Step::PrintRow {
                code,
                table,
                scope,
                key,
            } => {
                literal(code)?;
                literal(table)?;
                literal(scope)?;
                literal_key(key)
            }
            Step::PrintKeys { table, scope } => {
                literal(table)?;
                literal(scope)
            }
        }
    }
}

fn is_reference(s: &str) -> bool {
    s.starts_with('$')
}

fn literal(s: &str) -> Result<()> {
    if is_reference(s) {
        return Ok(());
    }
    Name::new(s).map(|_| ())
}

fn literal_key(key: &Key) -> Result<()> {
    match key {
        Key::Id(_) => Ok(()),
        Key::Name(s) => literal(s),
    }
}

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

fn payload_field(ctx: &ApplyContext<'_>, field: &str) -> Result<Value> {
    let payload: Value = ctx.data_json()?;
    payload
        .get(field)
        .cloned()
        .ok_or_else(|| RelayError::MissingField(field.to_string()))
}

fn resolve_name(ctx: &ApplyContext<'_>, s: &str) -> Result<Name> {
    if s == SELF_REF {
        return Ok(ctx.receiver().clone());
    }
    match s.strip_prefix('$') {
        Some(field) => match payload_field(ctx, field)? {
            Value::String(name) => Name::new(&name),
            other => Err(RelayError::InvalidName(other.to_string())),
        },
        None => Name::new(s),
    }
}

fn resolve_key(ctx: &ApplyContext<'_>, key: &Key) -> Result<u64> {
    match key {
        Key::Id(id) => Ok(*id),
        Key::Name(s) if s == SELF_REF => Ok(ctx.receiver().value()),
        Key::Name(s) => match s.strip_prefix('$') {
            Some(field) => match payload_field(ctx, field)? {
                Value::Number(n) => n
                    .as_u64()
                    .ok_or_else(|| RelayError::Handler(format!("key {field} is not a u64: {n}"))),
                Value::String(name) => Ok(Name::new(&name)?.value()),
                other => Err(RelayError::Handler(format!(
                    "key {field} is not a number or name: {other}"
                ))),
            },
            None => Ok(Name::new(s)?.value()),
        },
    }
}

/// `actor[@permission]`, where a missing permission is the configured default.
fn resolve_permission(ctx: &ApplyContext<'_>, s: &str) -> Result<PermissionLevel> {
    let default = ctx.self_permission().permission;
    match s.split_once('@') {
        Some((actor, permission)) => Ok(PermissionLevel {
            actor: resolve_name(ctx, actor)?,
            permission: resolve_name(ctx, permission)?,
        }),
        None => Ok(PermissionLevel {
            actor: resolve_name(ctx, s)?,
            permission: default,
        }),
    }
}

/// Substitute `$self` and `$<field>` strings anywhere inside `value`.
fn resolve_value(ctx: &ApplyContext<'_>, value: &Value) -> Result<Value> {
    Ok(match value {
        Value::String(s) if s == SELF_REF => Value::String(ctx.receiver().to_string()),
        Value::String(s) if is_reference(s) => payload_field(ctx, &s[1..])?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(ctx, v))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), resolve_value(ctx, v)?)) })
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.steps.iter().try_for_each(Step::validate)
    }

    /// Steps run in order; the first error aborts the handler.
    pub fn compile(self) -> Handler {
        Arc::new(move |ctx: &mut ApplyContext<'_>| {
            self.steps.iter().try_for_each(|step| step.apply(ctx))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::error::ErrorKind;
    use crate::runtime::Environment;
    use crate::table::{TableId, TableStore};
    use crate::types::{ActionInvocation, WorkItem};
    use serde_json::json;

    fn item(payload: Value) -> WorkItem {
        ActionInvocation::new("sender", "send1")
            .unwrap()
            .with_json(&payload)
            .unwrap()
            .with_authorization("sender@active".parse().unwrap())
            .into()
    }

    fn run(script: &str, payload: Value) -> (Result<()>, String, Vec<WorkItem>, TableStore) {
        let handler = Script::from_yaml(script).unwrap().compile();
        let config = ChainConfig::default();
        let env = Environment::detached(&config);
        let mut store = TableStore::new();
        let item = item(payload);
        let mut ctx = ApplyContext::new(&item, &mut store, &env);
        let result = handler(&mut ctx);
        let effects = ctx.finish();
        (result, effects.console, effects.pending, store)
    }

    #[test]
    fn parses_tagged_steps() {
        let script = Script::from_yaml(
            r#"
- op: print
  text: " 1 "
- op: require_auth
  actor: $owner
- op: send
  contract: $self
  action: send2
- op: print_time
"#,
        )
        .unwrap();
        assert_eq!(script.steps.len(), 4);
        match &script.steps[2] {
            Step::Send {
                payload,
                authorization,
                ..
            } => {
                assert!(payload.is_none());
                assert_eq!(authorization, &vec!["$self".to_string()]);
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(script.steps[3], Step::PrintTime);
        script.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_literals() {
        let script = Script::from_yaml("- op: require_recipient\n  recipient: Not_A_Name\n").unwrap();
        assert!(matches!(script.validate(), Err(RelayError::InvalidName(_))));
    }

    #[test]
    fn send_forwards_payload_and_resolves_self() {
        let (result, console, pending, _) = run(
            "- op: print\n  text: ' 1 '\n- op: require_auth\n  actor: $owner\n- op: send\n  contract: $self\n  action: send2\n",
            json!({ "owner": "sender", "value": 0 }),
        );
        result.unwrap();
        assert_eq!(console, " 1 ");
        assert_eq!(pending.len(), 1);
        let sent = &pending[0];
        assert_eq!(sent.to_string(), "sender::send2");
        assert_eq!(sent.authorization()[0].to_string(), "sender@active");
        let forwarded: Value = serde_json::from_slice(sent.payload()).unwrap();
        assert_eq!(forwarded["owner"], "sender");
    }

    #[test]
    fn explicit_payload_substitutes_fields() {
        let (result, _, pending, _) = run(
            "- op: send\n  contract: receiver\n  action: receive1\n  payload: { value: $value, from: $self }\n  authorization: ['$self@owner']\n",
            json!({ "value": 7 }),
        );
        result.unwrap();
        let sent: Value = serde_json::from_slice(pending[0].payload()).unwrap();
        assert_eq!(sent, json!({ "value": 7, "from": "sender" }));
        assert_eq!(pending[0].authorization()[0].to_string(), "sender@owner");
    }

    #[test]
    fn failed_auth_and_check_report_kinds() {
        let (result, _, _, _) = run(
            "- op: require_auth\n  actor: alice\n",
            json!({}),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::AuthorizationFailure);

        let (result, _, _, _) = run(
            "- op: check\n  field: value\n  equals: 1\n",
            json!({ "value": 2 }),
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionFailure);
        assert!(err.to_string().contains("expected 1, got 2"));

        let (result, _, _, _) = run("- op: print_field\n  field: missing\n", json!({}));
        assert!(matches!(result, Err(RelayError::MissingField(f)) if f == "missing"));
    }

    #[test]
    fn table_steps_write_receiver_tables() {
        let (result, _, _, store) = run(
            "- op: insert\n  table: balances\n  key: $owner\n  value: { amount: $value }\n- op: modify\n  table: balances\n  key: $owner\n  value: { amount: 5 }\n- op: insert\n  table: balances\n  key: 1\n  value: {}\n- op: erase\n  table: balances\n  key: 1\n",
            json!({ "owner": "alice", "value": 3 }),
        );
        result.unwrap();
        let id = TableId::new(
            Name::new("sender").unwrap(),
            Name::new("sender").unwrap(),
            Name::new("balances").unwrap(),
        );
        let key = Name::new("alice").unwrap().value();
        let row: Value = store.get_json(&id, key).unwrap().unwrap();
        assert_eq!(row, json!({ "amount": 5 }));
        assert_eq!(store.get(&id, key).unwrap().payer.as_str(), "sender");
        assert!(store.get(&id, 1).is_none());
    }

    #[test]
    fn read_steps_print_rows_keys_and_bounds() {
        let (result, console, _, _) = run(
            "- op: insert\n  table: ticks\n  key: 20\n  value: { at: 20 }\n- op: insert\n  table: ticks\n  key: 10\n  value: { at: 10 }\n- op: print_keys\n  table: ticks\n- op: print\n  text: ' | '\n- op: print_row\n  table: ticks\n  key: 20\n- op: print\n  text: ' | '\n- op: print_row\n  code: bank\n  table: ticks\n  key: 20\n- op: print\n  text: ' | '\n- op: print_lower_bound\n  table: ticks\n  key: 11\n- op: print\n  text: ' | '\n- op: print_lower_bound\n  table: ticks\n  key: 21\n",
            json!({}),
        );
        result.unwrap();
        assert_eq!(console, r#"10 20 | {"at":20} | none | 20 | none"#);
    }

    #[test]
    fn duplicate_insert_fails() {
        let (result, _, _, _) = run(
            "- op: insert\n  table: t\n  key: 1\n  value: 1\n- op: insert\n  table: t\n  key: 1\n  value: 2\n",
            json!({}),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateKey);
    }
}
