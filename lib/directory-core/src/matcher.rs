//! Query matching for service records

use directory_api::{Field, Query, ServiceRecord};

/// Returns true if `record` satisfies every non-wildcard field of `query`
pub fn matches(record: &ServiceRecord, query: &Query) -> bool {
    Field::ALL
        .iter()
        .all(|&field| query.is_wildcard(field) || record.get(field) == query.get(field))
}
