//! Process-wide instance table
//!
//! Holds the default instance slot and publishes instance lifecycle events.
//! The slot is written only by resolutions that name no version; it is
//! never cleared.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::ModuleInstance;
use crate::registry::VersionKey;

const EVENT_CAPACITY: usize = 64;

/// Instance lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// A new instance finished loading
    Loaded { key: VersionKey, version: String },
    /// The default slot now points at `key`
    DefaultChanged {
        key: VersionKey,
        previous: Option<VersionKey>,
    },
}

/// Table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub loaded: u64,
    /// Writes of the default slot, including ones that kept the same instance
    pub default_writes: u64,
    pub default_changes: u64,
}

pub struct InstanceTable {
    default: RwLock<Option<Arc<ModuleInstance>>>,
    events: broadcast::Sender<InstanceEvent>,
    stats: Mutex<TableStats>,
}

impl InstanceTable {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            default: RwLock::new(None),
            events,
            stats: Mutex::new(TableStats::default()),
        }
    }

    /// The instance of the last no-argument resolution
    pub fn default_instance(&self) -> Option<Arc<ModuleInstance>> {
        self.default.read().clone()
    }

    pub(crate) fn set_default(&self, instance: Arc<ModuleInstance>) {
        let previous = {
            let mut slot = self.default.write();
            slot.replace(instance.clone())
        };

        let changed = previous
            .as_ref()
            .is_none_or(|previous| !Arc::ptr_eq(previous, &instance));
        {
            let mut stats = self.stats.lock();
            stats.default_writes += 1;
            if changed {
                stats.default_changes += 1;
            }
        }

        if changed {
            info!(key = %instance.key(), version = %instance.version(), "Default instance changed");
            self.publish(InstanceEvent::DefaultChanged {
                key: instance.key().clone(),
                previous: previous.map(|p| p.key().clone()),
            });
        }
    }

    pub(crate) fn loaded(&self, instance: &ModuleInstance) {
        self.stats.lock().loaded += 1;
        self.publish(InstanceEvent::Loaded {
            key: instance.key().clone(),
            version: instance.version().to_string(),
        });
    }

    fn publish(&self, event: InstanceEvent) {
        // no subscribers is not an error
        if self.events.send(event).is_err() {
            debug!("No instance event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> TableStats {
        self.stats.lock().clone()
    }
}

impl Default for InstanceTable {
    fn default() -> Self {
        Self::new()
    }
}
