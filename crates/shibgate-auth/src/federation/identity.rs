//! Canonical identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical name of the persistent id attribute.
pub const ID: &str = "id";
/// Canonical name of the email attribute.
pub const MAIL: &str = "mail";
/// Canonical name of the display name attribute.
pub const FULLNAME: &str = "fullname";

/// Canonical attributes every identity must carry.
pub const REQUIRED_ATTRIBUTES: [&str; 3] = [ID, MAIL, FULLNAME];

/// Protocol-independent identity derived from one assertion.
///
/// Maps canonical attribute names to values. Attributes beyond the required
/// three are kept as-is. Empty values are never stored, so an empty
/// required attribute counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, String>", from = "BTreeMap<String, String>")]
pub struct CanonicalIdentity {
    attributes: BTreeMap<String, String>,
}

impl CanonicalIdentity {
    /// Creates an empty identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, replacing any previous value.
    ///
    /// `mail` is lower-cased. An empty value removes the attribute.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut value = value.into();
        if value.is_empty() {
            self.attributes.remove(&name);
            return;
        }
        if name == MAIL {
            value = value.to_lowercase();
        }
        self.attributes.insert(name, value);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns `true` if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// The external persistent id.
    #[must_use]
    pub fn persistent_id(&self) -> Option<&str> {
        self.get(ID)
    }

    /// The lower-cased email.
    #[must_use]
    pub fn mail(&self) -> Option<&str> {
        self.get(MAIL)
    }

    /// The display name.
    #[must_use]
    pub fn fullname(&self) -> Option<&str> {
        self.get(FULLNAME)
    }

    /// All attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Required canonical names this identity lacks, in declaration order.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_ATTRIBUTES
            .into_iter()
            .filter(|name| !self.contains(name))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CanonicalIdentity {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut identity = Self::new();
        for (k, v) in iter {
            identity.insert(k, v);
        }
        identity
    }
}

impl From<BTreeMap<String, String>> for CanonicalIdentity {
    fn from(attributes: BTreeMap<String, String>) -> Self {
        attributes.into_iter().collect()
    }
}

impl From<CanonicalIdentity> for BTreeMap<String, String> {
    fn from(identity: CanonicalIdentity) -> Self {
        identity.attributes
    }
}
