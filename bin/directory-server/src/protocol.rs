//! Newline-delimited JSON frames exchanged with clients

use directory_api::{Event, Query, ServiceRecord};
use directory_core::WatchId;
use serde::{Deserialize, Serialize};

/// Client request, one per line
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Register { record: ServiceRecord },
    Deregister { id: String },
    Watch { query: Query },
    Unwatch { watch_id: WatchId },
    Query { query: Query },
    Metrics,
}

/// Server frame, either a reply or an asynchronous watch event
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Ok,
    Watching { watch_id: WatchId },
    Records { records: Vec<ServiceRecord> },
    Metrics { text: String },
    Event { event: Event },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
