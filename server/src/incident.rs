//! Incident selection signal

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// A disaster event scoping which cases are relevant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub name: String,
    /// Ids of the geographic locations (regions) the incident declares
    pub location_ids: Vec<i64>,
}

/// Observable current incident. Subscribers see every distinct selection.
pub struct IncidentSelector {
    tx: watch::Sender<Option<Incident>>,
}

impl IncidentSelector {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Select `incident`, or clear the selection with `None`. Re-selecting
    /// the current incident does not notify subscribers.
    pub fn select(&self, incident: Option<Incident>) {
        self.tx.send_if_modified(|current| {
            if *current == incident {
                false
            } else {
                *current = incident;
                true
            }
        });
    }

    pub fn current(&self) -> Option<Incident> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Incident>> {
        self.tx.subscribe()
    }
}

impl Default for IncidentSelector {
    fn default() -> Self {
        Self::new()
    }
}
