//! Callback Dispatcher (SPEC_FULL.md §4.7): fan-out of relevant-tx events to
//! registered listeners. Listener ids are dense integers assigned on
//! registration; removing a listener nulls the slot rather than compacting
//! the id space, matching the append-only-slots design the Go source uses
//! (SPEC_FULL.md §9 Design Note on callback listeners).

use std::sync::RwLock;

use crate::types::TransactionCallback;

pub trait Listener: Send + Sync {
    fn on_transaction(&self, cb: &TransactionCallback);
}

struct Slot {
    listener: Option<Box<dyn Listener>>,
    verbose: bool,
}

/// Guards its own lock around the listener map and is invoked only after the
/// Ingestor/ReorgHandler writer lock has been released, so callbacks never
/// run while the store is mid-mutation (SPEC_FULL.md §5).
#[derive(Default)]
pub struct Dispatcher {
    slots: RwLock<Vec<Slot>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Registers a listener; `verbose` listeners also see irrelevant txs.
    /// Returns the dense id assigned to this registration.
    pub fn add_listener(&self, verbose: bool, listener: Box<dyn Listener>) -> usize {
        let mut slots = self.slots.write().unwrap();
        slots.push(Slot {
            listener: Some(listener),
            verbose,
        });
        slots.len() - 1
    }

    /// Nulls the slot. Returns an error if `id` was never registered (the
    /// slot doesn't exist), matching the source's "check presence, not
    /// value" semantics (SPEC_FULL.md §9 note 2).
    pub fn remove_listener(&self, id: usize) -> crate::error::Result<()> {
        let mut slots = self.slots.write().unwrap();
        match slots.get_mut(id) {
            Some(slot) => {
                slot.listener = None;
                Ok(())
            }
            None => Err(crate::error::Error::NotFound("listener id".into())),
        }
    }

    /// Fires `cb` to every listener if the tx was relevant, or only to
    /// verbose listeners otherwise. Must be called with no Ingestor/store
    /// lock held by the caller.
    pub fn dispatch(&self, cb: &TransactionCallback, relevant: bool) {
        let slots = self.slots.read().unwrap();
        for slot in slots.iter() {
            if let Some(listener) = &slot.listener {
                if relevant || slot.verbose {
                    listener.on_transaction(cb);
                }
            }
        }
    }
}
