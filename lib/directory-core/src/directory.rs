//! Service directory for registered service records

use crate::connection::{Connection, ConnectionId};
use crate::matcher::matches;
use crate::watcher::WatcherHub;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use directory_api::{Action, Query, ServiceRecord};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A record together with the connection that registered it
#[derive(Clone, Debug)]
pub struct Registration {
    pub record: ServiceRecord,
    pub owner: ConnectionId,
    pub registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct Records {
    // Map of record id to registration
    by_id: HashMap<String, Registration>,
    // Connections that already carry a deregistration hook
    hooked: HashSet<ConnectionId>,
}

struct DirectoryState {
    records: RwLock<Records>,
    hub: Arc<WatcherHub>,
}

impl DirectoryState {
    async fn deregister_connection(&self, owner: ConnectionId) -> usize {
        let mut records = self.records.write().await;
        records.hooked.remove(&owner);

        let mut owned: Vec<String> = records
            .by_id
            .values()
            .filter(|reg| reg.owner == owner)
            .map(|reg| reg.record.id.clone())
            .collect();
        owned.sort();

        for id in &owned {
            if let Some(reg) = records.by_id.remove(id) {
                self.hub.notify(&reg.record, Action::Deregistered).await;
            }
        }

        if !owned.is_empty() {
            info!(connection = %owner, count = owned.len(), "Deregistered services of closed connection");
        }
        owned.len()
    }
}

/// ServiceDirectory stores service records and reports changes to a [`WatcherHub`]
pub struct ServiceDirectory {
    state: Arc<DirectoryState>,
}

impl ServiceDirectory {
    pub fn new(hub: Arc<WatcherHub>) -> Self {
        Self {
            state: Arc::new(DirectoryState {
                records: RwLock::new(Records::default()),
                hub,
            }),
        }
    }

    /// The hub notified of every registration change
    pub fn hub(&self) -> &Arc<WatcherHub> {
        &self.state.hub
    }

    /// Register or replace a service record owned by `connection`.
    ///
    /// Replacing a record with different contents emits `Deregistered` for the old
    /// version first. The record is deregistered automatically when `connection`
    /// disconnects.
    pub async fn register(&self, connection: &dyn Connection, record: ServiceRecord) -> Result<()> {
        validate(&record)?;
        let owner = connection.id();

        let mut records = self.state.records.write().await;
        if records.hooked.insert(owner) {
            let state: Weak<DirectoryState> = Arc::downgrade(&self.state);
            connection.on_disconnect(Box::new(move || {
                async move {
                    if let Some(state) = state.upgrade() {
                        state.deregister_connection(owner).await;
                    }
                }
                .boxed()
            }));
        }

        let previous = records.by_id.insert(
            record.id.clone(),
            Registration {
                record: record.clone(),
                owner,
                registered_at: Utc::now(),
            },
        );
        debug!(id = %record.id, identity = %record.identity, connection = %owner, "Registered service");

        // Watchers of the replaced version must see it leave
        if let Some(previous) = previous.filter(|prev| prev.record != record) {
            self.state.hub.notify(&previous.record, Action::Deregistered).await;
        }
        self.state.hub.notify(&record, Action::Registered).await;
        Ok(())
    }

    /// Deregister a service record by id
    pub async fn deregister(&self, id: &str) -> Result<ServiceRecord> {
        let mut records = self.state.records.write().await;
        let reg = records
            .by_id
            .remove(id)
            .ok_or_else(|| CoreError::ServiceNotFound(id.to_string()))?;
        debug!(id = %id, identity = %reg.record.identity, "Deregistered service");

        self.state.hub.notify(&reg.record, Action::Deregistered).await;
        Ok(reg.record)
    }

    /// Deregister every record owned by `connection`
    pub async fn deregister_connection(&self, connection: ConnectionId) -> usize {
        self.state.deregister_connection(connection).await
    }

    /// Get a registration by record id
    pub async fn get(&self, id: &str) -> Result<Registration> {
        let records = self.state.records.read().await;
        records
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ServiceNotFound(id.to_string()))
    }

    /// Records matching `query`, sorted by id
    pub async fn find(&self, query: &Query) -> Vec<ServiceRecord> {
        let records = self.state.records.read().await;
        let mut found: Vec<ServiceRecord> = records
            .by_id
            .values()
            .filter(|reg| matches(&reg.record, query))
            .map(|reg| reg.record.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Get count of registered records
    pub async fn record_count(&self) -> usize {
        self.state.records.read().await.by_id.len()
    }
}

fn validate(record: &ServiceRecord) -> Result<()> {
    if record.id.is_empty() {
        return Err(CoreError::InvalidRecord("id must not be empty".to_string()));
    }
    if record.identity.is_empty() {
        return Err(CoreError::InvalidRecord(format!(
            "identity must not be empty for {}",
            record.id
        )));
    }
    Ok(())
}
