//! Prefork pool leases.
//!
//! A prefork pool keeps pre-created "pause" containers whose network
//! namespaces new task containers join, trading a bit of idle memory for
//! shorter cold starts.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A checked-out prefork slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLease {
    id: String,
}

impl PoolLease {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into() }
    }

    /// Id of the pre-created container backing the slot.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Network mode that makes a task container share the slot's namespace.
    pub fn network_mode(&self) -> String {
        format!("container:{}", self.id)
    }
}

/// Prefork pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Prefork pool exhausted")]
    Exhausted,
}

/// Source of prefork slots, shared by all tasks on the node.
pub trait PreforkPool: Send + Sync {
    /// Check out a free slot.
    fn acquire(&self) -> Result<PoolLease, PoolError>;

    /// Return a slot to the pool.
    fn release(&self, lease: PoolLease);
}

/// Fixed set of pre-created container ids handed out in FIFO order.
#[derive(Debug)]
pub struct StaticPreforkPool {
    free: Mutex<VecDeque<String>>,
    issued: HashSet<String>,
}

impl StaticPreforkPool {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let free: VecDeque<String> = ids.into_iter().map(Into::into).collect();
        let issued = free.iter().cloned().collect();
        Self {
            free: Mutex::new(free),
            issued,
        }
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn capacity(&self) -> usize {
        self.issued.len()
    }
}

impl PreforkPool for StaticPreforkPool {
    fn acquire(&self) -> Result<PoolLease, PoolError> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        let id = free.pop_front().ok_or(PoolError::Exhausted)?;
        debug!("Leased prefork slot {} ({} left)", id, free.len());
        Ok(PoolLease { id })
    }

    fn release(&self, lease: PoolLease) {
        if !self.issued.contains(&lease.id) {
            warn!("Ignoring release of unknown prefork slot {}", lease.id);
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.iter().any(|id| *id == lease.id) {
            warn!("Prefork slot {} released twice", lease.id);
            return;
        }
        debug!("Returned prefork slot {}", lease.id);
        free.push_back(lease.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fifo_lease_and_release() {
        let pool = StaticPreforkPool::new(["p1", "p2"]);

        let first = pool.acquire().unwrap();
        assert_eq!(first.id(), "p1");
        assert_eq!(first.network_mode(), "container:p1");

        let second = pool.acquire().unwrap();
        assert_eq!(second.id(), "p2");
        assert_eq!(pool.acquire(), Err(PoolError::Exhausted));

        pool.release(first);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire().unwrap().id(), "p1");
    }

    #[test]
    fn test_double_release_is_ignored() {
        let pool = StaticPreforkPool::new(["p1"]);
        let lease = pool.acquire().unwrap();
        pool.release(lease.clone());
        pool.release(lease);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_unknown_slot_release_is_ignored() {
        let pool = StaticPreforkPool::new(["p1"]);
        pool.release(PoolLease::new("forged"));
        assert_eq!(pool.available(), 1);

        let lease = pool.acquire().unwrap();
        pool.release(PoolLease::new("other-pool-slot"));
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.acquire(), Err(PoolError::Exhausted));

        pool.release(lease);
        assert!(pool.available() <= pool.capacity());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_concurrent_leases_are_exclusive() {
        let ids: Vec<String> = (0..16).map(|i| format!("p{}", i)).collect();
        let pool = Arc::new(StaticPreforkPool::new(ids));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.acquire().unwrap().id().to_string())
            })
            .collect();

        let leased: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(leased.len(), 16);
        assert_eq!(pool.available(), 0);
    }
}
