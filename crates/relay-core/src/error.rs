use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing authority of {actor}{}", permission_suffix(.permission))]
    AuthorizationFailure {
        actor: String,
        permission: Option<String>,
    },

    #[error("key uniqueness violation: {table} already has primary key {key}")]
    DuplicateKey { table: String, key: u64 },

    #[error("record not found: {table} has no primary key {key}")]
    RecordNotFound { table: String, key: u64 },

    #[error("assertion failure: {0}")]
    AssertionFailure(String),

    #[error("invalid name '{0}': must be 1-12 characters of a-z, 1-5 or '.', not ending in '.'")]
    InvalidName(String),

    #[error("invalid permission level '{0}': expected actor or actor@permission")]
    InvalidPermission(String),

    #[error("invalid sender pattern '{0}': expected '*' or an account name")]
    InvalidPattern(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account already exists: {0}")]
    AccountExists(String),

    #[error("handler already registered: {contract}::{action}")]
    DuplicateHandler { contract: String, action: String },

    #[error("payload field '{0}' is missing")]
    MissingField(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

fn permission_suffix(permission: &Option<String>) -> String {
    permission
        .as_ref()
        .map(|p| format!("@{p}"))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse classification of a [`RelayError`], used in failure reports and
/// scenario expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthorizationFailure,
    DuplicateKey,
    RecordNotFound,
    AssertionFailure,
    InvalidInput,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthorizationFailure => "authorization_failure",
            ErrorKind::DuplicateKey => "duplicate_key",
            ErrorKind::RecordNotFound => "record_not_found",
            ErrorKind::AssertionFailure => "assertion_failure",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::AuthorizationFailure { .. } => ErrorKind::AuthorizationFailure,
            RelayError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            RelayError::RecordNotFound { .. } => ErrorKind::RecordNotFound,
            RelayError::AssertionFailure(_) => ErrorKind::AssertionFailure,
            RelayError::InvalidName(_)
            | RelayError::InvalidPermission(_)
            | RelayError::InvalidPattern(_)
            | RelayError::MissingField(_)
            | RelayError::Json(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_message_includes_permission_when_present() {
        let plain = RelayError::AuthorizationFailure {
            actor: "alice".into(),
            permission: None,
        };
        assert_eq!(plain.to_string(), "missing authority of alice");

        let exact = RelayError::AuthorizationFailure {
            actor: "alice".into(),
            permission: Some("owner".into()),
        };
        assert_eq!(exact.to_string(), "missing authority of alice@owner");
    }

    #[test]
    fn kinds_classify_table_errors() {
        let dup = RelayError::DuplicateKey {
            table: "test/test/data".into(),
            key: 7,
        };
        assert_eq!(dup.kind(), ErrorKind::DuplicateKey);
        let missing = RelayError::RecordNotFound {
            table: "test/test/data".into(),
            key: 7,
        };
        assert_eq!(missing.kind(), ErrorKind::RecordNotFound);
        assert_eq!(
            RelayError::Handler("boom".into()).kind(),
            ErrorKind::Other
        );
    }

    #[test]
    fn kind_yaml_is_snake_case() {
        let kind: ErrorKind = serde_yaml::from_str("authorization_failure").unwrap();
        assert_eq!(kind, ErrorKind::AuthorizationFailure);
        assert_eq!(kind.to_string(), "authorization_failure");
    }
}
