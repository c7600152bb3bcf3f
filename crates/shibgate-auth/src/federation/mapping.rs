//! Attribute mapping between federation protocols and canonical names.
//!
//! Each protocol is a fixed table of `(raw name, canonical name)` pairs.
//! [`AttributeProtocol`] selects the table and is itself an
//! [`AttributeMapper`], so callers can hold one value picked from
//! configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identity::{CanonicalIdentity, REQUIRED_ATTRIBUTES};
use crate::{AuthError, AuthResult};

/// Raw attributes as delivered by the upstream service provider.
pub type RawAttributes = BTreeMap<String, String>;

/// Translates one protocol's attribute vocabulary.
pub trait AttributeMapper: Send + Sync {
    /// Builds a canonical identity from raw attributes.
    ///
    /// Unmapped keys and empty values are dropped. `mail` is lower-cased.
    fn parse(&self, raw: &RawAttributes) -> CanonicalIdentity;

    /// Returns the raw attribute name for a canonical name.
    fn reverse_lookup(&self, canonical: &str) -> Option<&'static str>;
}

type AttributeTable = &'static [(&'static str, &'static str)];

fn parse_with(table: AttributeTable, raw: &RawAttributes) -> CanonicalIdentity {
    let mut identity = CanonicalIdentity::new();
    for (raw_name, canonical) in table {
        if let Some(value) = raw.get(*raw_name).filter(|v| !v.is_empty()) {
            identity.insert(*canonical, value.as_str());
        }
    }
    identity
}

fn reverse_with(table: AttributeTable, canonical: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(_, c)| *c == canonical)
        .map(|(raw, _)| *raw)
}

/// Shibboleth SP environment attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShibbolethAttributeMap;

impl ShibbolethAttributeMap {
    const TABLE: AttributeTable = &[
        ("persistent-id", "id"),
        ("mail", "mail"),
        ("displayName", "fullname"),
        ("cn", "cn"),
        ("givenName", "firstname"),
        ("sn", "surname"),
        ("o", "organisation"),
        ("l", "location"),
        ("telephoneNumber", "phone"),
        ("mobile", "mobile"),
        ("eduPersonAffiliation", "affiliation"),
        ("eduPersonOrgUnitDN", "orgunit"),
    ];
}

impl AttributeMapper for ShibbolethAttributeMap {
    fn parse(&self, raw: &RawAttributes) -> CanonicalIdentity {
        parse_with(Self::TABLE, raw)
    }

    fn reverse_lookup(&self, canonical: &str) -> Option<&'static str> {
        reverse_with(Self::TABLE, canonical)
    }
}

/// AAF Rapid Connect JWT attribute claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct RapidConnectAttributeMap;

impl RapidConnectAttributeMap {
    const TABLE: AttributeTable = &[
        ("edupersontargetedid", "id"),
        ("mail", "mail"),
        ("displayname", "fullname"),
        ("cn", "cn"),
        ("givenname", "firstname"),
        ("surname", "surname"),
    ];
}

impl AttributeMapper for RapidConnectAttributeMap {
    fn parse(&self, raw: &RawAttributes) -> CanonicalIdentity {
        parse_with(Self::TABLE, raw)
    }

    fn reverse_lookup(&self, canonical: &str) -> Option<&'static str> {
        reverse_with(Self::TABLE, canonical)
    }
}

/// Supported federation protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeProtocol {
    /// Shibboleth SP headers.
    #[default]
    Shibboleth,
    /// AAF Rapid Connect.
    RapidConnect,
}

impl AttributeProtocol {
    /// Returns the protocol's configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shibboleth => "shibboleth",
            Self::RapidConnect => "rapid-connect",
        }
    }

    fn mapper(&self) -> &'static dyn AttributeMapper {
        match self {
            Self::Shibboleth => &ShibbolethAttributeMap,
            Self::RapidConnect => &RapidConnectAttributeMap,
        }
    }
}

impl AttributeMapper for AttributeProtocol {
    fn parse(&self, raw: &RawAttributes) -> CanonicalIdentity {
        self.mapper().parse(raw)
    }

    fn reverse_lookup(&self, canonical: &str) -> Option<&'static str> {
        self.mapper().reverse_lookup(canonical)
    }
}

impl fmt::Display for AttributeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shibboleth" => Ok(Self::Shibboleth),
            "rapid-connect" | "rapidconnect" => Ok(Self::RapidConnect),
            other => Err(format!(
                "unknown protocol '{other}', expected shibboleth or rapid-connect"
            )),
        }
    }
}

/// Lists missing required fields as user-facing messages, sorted.
///
/// The raw attribute name is used in each message so users can relate it to
/// what their identity provider releases.
#[must_use]
pub fn validate_required(
    mapper: &dyn AttributeMapper,
    identity: &CanonicalIdentity,
) -> Vec<String> {
    let mut errors: Vec<String> = REQUIRED_ATTRIBUTES
        .into_iter()
        .filter(|name| !identity.contains(name))
        .map(|name| {
            let raw = mapper.reverse_lookup(name).unwrap_or(name);
            format!("Required field '{raw}' can't be found.")
        })
        .collect();
    errors.sort();
    errors
}

/// Parses raw attributes and checks the required set.
///
/// # Errors
///
/// Returns `AuthError::Validation` listing every missing field.
pub fn parse_and_validate(
    mapper: &dyn AttributeMapper,
    raw: &RawAttributes,
) -> AuthResult<CanonicalIdentity> {
    let identity = mapper.parse(raw);
    let missing = identity.missing_required();

    tracing::debug!(
        present = ?identity.attributes().keys().collect::<Vec<_>>(),
        missing = ?missing,
        "Parsed federation attributes"
    );

    let errors = validate_required(mapper, &identity);
    if !errors.is_empty() {
        tracing::info!(missing = ?missing, "Assertion missing required attributes");
        return Err(AuthError::validation(errors));
    }
    Ok(identity)
}

/// Flattens a JSON claim object into raw string attributes.
///
/// Strings are taken as-is, numbers and booleans are rendered, and arrays of
/// scalars are joined with `;` the way Shibboleth joins multi-valued
/// attributes. Nulls and nested objects are dropped.
#[must_use]
pub fn flatten_claims(claims: &serde_json::Value) -> RawAttributes {
    let Some(object) = claims.as_object() else {
        return RawAttributes::new();
    };

    object
        .iter()
        .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key.clone(), v)))
        .collect()
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|v| !v.is_array())
                .filter_map(scalar_to_string)
                .collect();
            Some(parts.join(";"))
        }
        Value::Null | Value::Object(_) => None,
    }
}
