use crate::error::{RelayError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Name
// ---------------------------------------------------------------------------

/// Account, action, permission, table and scope identifier.
///
/// Names are 1-12 characters drawn from `a-z`, `1-5` and `.`, and never end
/// in `.`. Every name maps to a unique 64-bit value (see [`Name::value`]) so
/// it can be used directly as a table primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z1-5.]{0,11}[a-z1-5]$").unwrap())
}

impl Name {
    pub fn new(s: &str) -> Result<Self> {
        if !name_re().is_match(s) {
            return Err(RelayError::InvalidName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Build a name from a literal known to be valid.
    pub(crate) fn literal(s: &'static str) -> Self {
        debug_assert!(name_re().is_match(s), "invalid literal name {s}");
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical 64-bit encoding: five bits per character, most significant
    /// first.
    pub fn value(&self) -> u64 {
        self.0
            .bytes()
            .take(12)
            .enumerate()
            .fold(0u64, |acc, (i, c)| {
                acc | ((symbol(c) & 0x1f) << (64 - 5 * (i as u32 + 1)))
            })
    }
}

fn symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        _ => 0,
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Name {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Name::new(s)
    }
}

impl TryFrom<String> for Name {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self> {
        Name::new(&s)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// IntoName
// ---------------------------------------------------------------------------

/// Anything a caller can hand over where a [`Name`] is expected. String
/// inputs are validated on conversion.
pub trait IntoName {
    fn into_name(self) -> Result<Name>;
}

impl IntoName for Name {
    fn into_name(self) -> Result<Name> {
        Ok(self)
    }
}

impl IntoName for &Name {
    fn into_name(self) -> Result<Name> {
        Ok(self.clone())
    }
}

impl IntoName for &str {
    fn into_name(self) -> Result<Name> {
        Name::new(self)
    }
}

impl IntoName for String {
    fn into_name(self) -> Result<Name> {
        Name::new(&self)
    }
}

impl IntoName for &String {
    fn into_name(self) -> Result<Name> {
        Name::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for s in ["sender", "n1221", "eosio.token", "a", "abcdefghijkl"] {
            assert!(Name::new(s).is_ok(), "{s} should be valid");
        }
    }

    #[test]
    fn invalid_names() {
        for s in ["", "Sender", "has space", "abcdefghijklm", "trailing.", "n6", "x_y"] {
            assert!(
                matches!(Name::new(s), Err(RelayError::InvalidName(_))),
                "{s} should be rejected"
            );
        }
    }

    #[test]
    fn value_matches_canonical_encoding() {
        assert_eq!(Name::new("a").unwrap().value(), 6u64 << 59);
        assert_eq!(Name::new("eosio").unwrap().value(), 0x5530_EA00_0000_0000);
        assert_eq!(Name::new("active").unwrap().value(), 0x3232_EDA8_0000_0000);
    }

    #[test]
    fn value_preserves_order_of_names() {
        let a = Name::new("owner1").unwrap().value();
        let b = Name::new("owner2").unwrap().value();
        assert!(a < b);
    }

    #[test]
    fn serde_rejects_invalid() {
        let ok: Name = serde_yaml::from_str("receiver").unwrap();
        assert_eq!(ok.as_str(), "receiver");
        assert!(serde_yaml::from_str::<Name>("NotAName").is_err());
    }
}
