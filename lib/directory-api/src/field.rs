//! Named fields shared by queries and service records

use serde::{Deserialize, Serialize};
use std::fmt;

/// A filterable field of a service record.
///
/// `Field::ALL` is the fixed descriptor list the matcher walks. Every entry has an
/// accessor on both [`crate::Query`] and [`crate::ServiceRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    /// Subscriber identity, the primary index key for watches
    Identity,
    Environment,
    Name,
    Version,
    Region,
    Hostname,
    Id,
}

impl Field {
    /// All filterable fields, in declaration order
    pub const ALL: [Field; 7] = [
        Field::Identity,
        Field::Environment,
        Field::Name,
        Field::Version,
        Field::Region,
        Field::Hostname,
        Field::Id,
    ];

    /// Field name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Identity => "identity",
            Field::Environment => "environment",
            Field::Name => "name",
            Field::Version => "version",
            Field::Region => "region",
            Field::Hostname => "hostname",
            Field::Id => "id",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
