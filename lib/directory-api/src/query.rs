use crate::Field;
use serde::{Deserialize, Serialize};

/// Query selects service records by field.
///
/// An empty field is a wildcard and matches any value. `identity` is always the
/// key watches are indexed under, so callers should set it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub identity: String,
    pub environment: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub hostname: String,
    pub id: String,
}

impl Query {
    /// Create a query for one subscriber identity with every other field wildcarded
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    /// Set a field, returning the updated query
    pub fn with_field(mut self, field: Field, value: impl Into<String>) -> Self {
        let value = value.into();
        match field {
            Field::Identity => self.identity = value,
            Field::Environment => self.environment = value,
            Field::Name => self.name = value,
            Field::Version => self.version = value,
            Field::Region => self.region = value,
            Field::Hostname => self.hostname = value,
            Field::Id => self.id = value,
        }
        self
    }

    /// Value of `field`; empty means wildcard
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Identity => &self.identity,
            Field::Environment => &self.environment,
            Field::Name => &self.name,
            Field::Version => &self.version,
            Field::Region => &self.region,
            Field::Hostname => &self.hostname,
            Field::Id => &self.id,
        }
    }

    /// Whether `field` is left as a wildcard
    pub fn is_wildcard(&self, field: Field) -> bool {
        self.get(field).is_empty()
    }
}
