//! Network pool leases.
//!
//! Tasks without a prefork slot can be spread across a set of pre-created
//! networks instead; each lease names the network the container joins.

use std::sync::Mutex;
use tracing::debug;

/// A checked-out network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLease {
    name: String,
}

impl NetworkLease {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }

    /// Network name, used verbatim as the container's network mode.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Source of networks, shared by all tasks on the node.
pub trait NetworkPool: Send + Sync {
    /// Pick a network for a new container, if any is configured.
    fn acquire(&self) -> Option<NetworkLease>;

    /// Hand a network back.
    fn release(&self, lease: NetworkLease);
}

#[derive(Debug)]
struct NetworkSlot {
    name: String,
    users: u64,
}

/// Fixed set of networks; each lease goes to the least used one.
#[derive(Debug)]
pub struct StaticNetworkPool {
    slots: Mutex<Vec<NetworkSlot>>,
}

impl StaticNetworkPool {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = names
            .into_iter()
            .map(|name| NetworkSlot {
                name: name.into(),
                users: 0,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Current number of containers on `name`.
    pub fn users(&self, name: &str) -> u64 {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.users)
            .unwrap_or(0)
    }
}

impl NetworkPool for StaticNetworkPool {
    fn acquire(&self) -> Option<NetworkLease> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // min_by_key keeps the first of equal candidates
        let slot = slots.iter_mut().min_by_key(|slot| slot.users)?;
        slot.users += 1;
        debug!("Leased network {} ({} users)", slot.name, slot.users);
        Some(NetworkLease {
            name: slot.name.clone(),
        })
    }

    fn release(&self, lease: NetworkLease) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.iter_mut().find(|slot| slot.name == lease.name) {
            slot.users = slot.users.saturating_sub(1);
            debug!("Returned network {} ({} users)", slot.name, slot.users);
        }
    }
}
