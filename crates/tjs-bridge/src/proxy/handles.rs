//! Host-side handle table
//!
//! Each module instance keeps the host objects its proxies refer to in a
//! [`HandleTable`]. Wrapping the same object twice reuses its slot and
//! bumps a reference count; the slot is freed when the count drops to
//! zero. Guests hold [`RefHandle`]s, whose `Drop` is the release callback.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::host::{HostObject, HostRef};

/// Identity of a host object within one handle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(usize);

impl RefId {
    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

struct Slot {
    object: HostRef,
    refs: usize,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Option<Slot>>,
    free: Vec<usize>,
    by_address: HashMap<usize, usize>,
    released: u64,
}

impl Slots {
    fn allocate(&mut self, slot: Slot) -> usize {
        if let Some(index) = self.free.pop() {
            self.entries[index] = Some(slot);
            return index;
        }

        self.entries.push(Some(slot));
        self.entries.len() - 1
    }
}

fn address_of(object: &HostRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Handle table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub live: usize,
    pub total_refs: usize,
    pub released: u64,
}

/// Reference-counted table of host objects held for guest proxies
#[derive(Default)]
pub struct HandleTable {
    slots: Mutex<Slots>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `object` alive on behalf of one more guest handle
    pub fn retain(&self, object: HostRef) -> RefId {
        let mut slots = self.slots.lock();
        let address = address_of(&object);

        if let Some(index) = slots.by_address.get(&address).copied() {
            if let Some(Some(slot)) = slots.entries.get_mut(index) {
                slot.refs += 1;
                trace!(ref_id = index, refs = slot.refs, "Retained host object");
                return RefId(index);
            }
        }

        let class = object.class_name().to_string();
        let index = slots.allocate(Slot { object, refs: 1 });
        slots.by_address.insert(address, index);
        debug!(ref_id = index, class = %class, "Registered host object");
        RefId(index)
    }

    pub fn resolve(&self, id: RefId) -> Option<HostRef> {
        let slots = self.slots.lock();
        slots
            .entries
            .get(id.0)
            .and_then(|entry| entry.as_ref())
            .map(|slot| slot.object.clone())
    }

    /// Drop one guest reference; frees the slot on the last one
    pub fn release(&self, id: RefId) {
        let mut slots = self.slots.lock();
        let Some(entry) = slots.entries.get_mut(id.0) else {
            return;
        };
        let Some(slot) = entry.as_mut() else {
            return;
        };

        slot.refs -= 1;
        if slot.refs > 0 {
            trace!(ref_id = id.0, refs = slot.refs, "Released guest reference");
            return;
        }

        if let Some(slot) = entry.take() {
            let address = address_of(&slot.object);
            slots.by_address.remove(&address);
            slots.free.push(id.0);
            slots.released += 1;
            debug!(ref_id = id.0, class = %slot.object.class_name(), "Freed host object");
        }
    }

    pub fn refcount(&self, id: RefId) -> usize {
        let slots = self.slots.lock();
        slots
            .entries
            .get(id.0)
            .and_then(|entry| entry.as_ref())
            .map_or(0, |slot| slot.refs)
    }

    /// Number of host objects currently held
    pub fn live(&self) -> usize {
        self.slots.lock().by_address.len()
    }

    pub fn stats(&self) -> HandleStats {
        let slots = self.slots.lock();
        HandleStats {
            live: slots.by_address.len(),
            total_refs: slots.entries.iter().flatten().map(|slot| slot.refs).sum(),
            released: slots.released,
        }
    }
}

/// Guest-side handle to a slot in a [`HandleTable`]
///
/// Holds the table weakly, so dropping the handle after its instance is
/// gone is a no-op.
pub struct RefHandle {
    id: RefId,
    table: Weak<HandleTable>,
}

impl RefHandle {
    pub fn new(table: &Arc<HandleTable>, object: HostRef) -> Self {
        Self {
            id: table.retain(object),
            table: Arc::downgrade(table),
        }
    }

    pub fn id(&self) -> RefId {
        self.id
    }
}

impl Drop for RefHandle {
    fn drop(&mut self) {
        match self.table.upgrade() {
            Some(table) => table.release(self.id),
            None => trace!(ref_id = self.id.0, "Handle table already dropped"),
        }
    }
}

impl fmt::Debug for RefHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefHandle").field("id", &self.id).finish()
    }
}
