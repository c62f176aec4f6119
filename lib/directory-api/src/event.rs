//! Notification events delivered to watchers

use crate::ServiceRecord;
use serde::{Deserialize, Serialize};

/// What happened to a service record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Registered,
    Deregistered,
}

/// Event delivered to a watch whose query matched `record`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub action: Action,
    pub record: ServiceRecord,
}

impl Event {
    pub fn new(action: Action, record: ServiceRecord) -> Self {
        Self { action, record }
    }
}
