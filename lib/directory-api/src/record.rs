use crate::Field;
use serde::{Deserialize, Serialize};

/// ServiceRecord describes one registered service instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    /// Identity of the subscriber owning the service
    pub identity: String,
    pub environment: String,
    /// Service name
    pub name: String,
    pub version: String,
    pub region: String,
    pub hostname: String,
    /// Unique instance id, the directory key
    pub id: String,

    /// Address the service is reachable on; not filterable
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
}

impl ServiceRecord {
    /// Value of `field` on this record
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

    /// Set a field, returning the updated record
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
}
