//! Distinguished Name utilities for directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use ldman_core::Error as CoreError;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DnError> for CoreError {
    fn from(err: DnError) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

/// Single attribute/value pair of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rdn {
    attribute: String,
    value: String,
}

impl Rdn {
    /// Creates a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion (e.g. `uid`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Value portion.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the attribute name matches (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Strongly-typed distinguished name.
///
/// Keeps a canonical escaped string representation alongside the parsed
/// components. Parsing is strict so malformed DNs surface early instead of
/// producing broken directory requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a distinguished name from a string.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] if the input is empty or contains invalid syntax.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DnError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DnError::Empty);
        }

        let mut rdns = Vec::new();
        for component in split_escaped(raw)? {
            let (attribute, value) = split_attribute_value(&component)?;
            rdns.push(Rdn::new(attribute, value));
        }

        Ok(Self {
            raw: rdns_to_string(&rdns),
            rdns,
        })
    }

    /// Borrows the canonical distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the components in order, leftmost (most specific) first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Returns the leftmost component, if any.
    #[must_use]
    pub fn leading(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Looks up the value of the first component matching `attribute`
    /// (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .iter()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(Rdn::value)
    }

    /// Creates a new distinguished name by prefixing an entry-specific RDN
    /// onto this base.
    #[must_use]
    pub fn child(&self, rdn: Rdn) -> Self {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Self {
            raw: rdns_to_string(&rdns),
            rdns,
        }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

/// Escapes a value for use inside a distinguished name component.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in chars.iter().enumerate() {
        let is_first = idx == 0;
        let is_last = idx == chars.len() - 1;
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (is_first && (*ch == ' ' || *ch == '#'))
            || (is_last && *ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(*ch);
    }

    escaped
}

fn split_escaped(input: &str) -> std::result::Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }

        match ch {
            '\\' => escape = true,
            ',' => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if escape {
        return Err(DnError::UnterminatedEscape);
    }

    parts.push(current.trim().to_string());
    if parts.iter().any(String::is_empty) {
        return Err(DnError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn split_attribute_value(component: &str) -> std::result::Result<(String, String), DnError> {
    let idx = component
        .find('=')
        .ok_or_else(|| DnError::InvalidComponent(component.to_string()))?;

    let attribute = component[..idx].trim();
    let value = component[idx + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DnError::InvalidComponent(component.to_string()));
    }
    if value.is_empty() {
        return Err(DnError::MissingValue(attribute.to_string()));
    }

    Ok((attribute.to_string(), value.to_string()))
}

fn rdns_to_string(rdns: &[Rdn]) -> String {
    rdns.iter()
        .map(|rdn| format!("{}={}", rdn.attribute(), escape_dn_value(rdn.value())))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_dn() {
        let dn = DistinguishedName::parse("uid=jdoe,ou=users,dc=example,dc=org").unwrap();
        assert_eq!(dn.get("uid"), Some("jdoe"));
        assert_eq!(dn.get("ou"), Some("users"));
        assert_eq!(dn.leading().map(Rdn::value), Some("jdoe"));
        assert_eq!(dn.to_string(), "uid=jdoe,ou=users,dc=example,dc=org");
    }

    #[test]
    fn parse_dn_with_escaped_comma() {
        let dn = DistinguishedName::parse("cn=Smith\\, Jane,ou=users,dc=example,dc=org").unwrap();
        assert_eq!(dn.get("cn"), Some("Smith, Jane"));
        assert!(dn.to_string().starts_with("cn=Smith\\, Jane,ou=users"));
    }

    #[test]
    fn rejects_empty_and_trailing_delimiter() {
        assert!(matches!(
            DistinguishedName::parse("  "),
            Err(DnError::Empty)
        ));
        assert!(matches!(
            DistinguishedName::parse("uid=jdoe,"),
            Err(DnError::InvalidComponent(_))
        ));
    }

    #[test]
    fn rejects_missing_value() {
        assert!(matches!(
            DistinguishedName::parse("uid=,dc=example"),
            Err(DnError::MissingValue(_))
        ));
    }

    #[test]
    fn child_prefixes_rdn() {
        let base = DistinguishedName::parse("ou=users,dc=example,dc=org").unwrap();
        let dn = base.child(Rdn::new("uid", "jdoe"));
        assert_eq!(dn.to_string(), "uid=jdoe,ou=users,dc=example,dc=org");
        // the base is untouched
        assert_eq!(base.to_string(), "ou=users,dc=example,dc=org");
    }

    #[test]
    fn child_escapes_special_characters() {
        let base = DistinguishedName::parse("ou=users,dc=example,dc=org").unwrap();
        let dn = base.child(Rdn::new("cn", "Smith, Jane"));
        assert_eq!(
            dn.to_string(),
            "cn=Smith\\, Jane,ou=users,dc=example,dc=org"
        );
        assert_eq!(dn.get("cn"), Some("Smith, Jane"));
    }
}
