//! Bridge endpoint allocation
//!
//! Ports are drawn at random from the configured range, skipping any port
//! held by a live [`PortLease`]. A lease gives its port back when dropped,
//! so a port stays reserved for exactly as long as the session owning it.

use common::{Error, Result};
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Random draws before falling back to a linear scan of the range
const RANDOM_PROBES: usize = 64;

/// Hands out unique TCP ports from an inclusive range
#[derive(Clone)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    in_use: Arc<Mutex<HashSet<u16>>>,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn in_use(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.in_use.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve an unused port
    pub fn allocate(&self) -> Result<PortLease> {
        let mut in_use = self.in_use();
        let capacity = usize::from(self.max - self.min) + 1;
        if in_use.len() >= capacity {
            return Err(Error::Bridge(format!(
                "port range exhausted ({}-{})",
                self.min, self.max
            )));
        }

        let mut rng = rand::rng();
        let port = (0..RANDOM_PROBES)
            .map(|_| rng.random_range(self.min..=self.max))
            .find(|p| !in_use.contains(p))
            .or_else(|| (self.min..=self.max).find(|p| !in_use.contains(p)))
            .ok_or_else(|| Error::Bridge("no free port".to_string()))?;

        in_use.insert(port);
        trace!("Allocated port {} ({} in use)", port, in_use.len());

        Ok(PortLease {
            port,
            in_use: self.in_use.clone(),
        })
    }

    /// Number of ports currently leased
    pub fn in_use_count(&self) -> usize {
        self.in_use().len()
    }

    pub fn is_in_use(&self, port: u16) -> bool {
        self.in_use().contains(&port)
    }
}

/// A reserved port, released on drop
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    in_use: Arc<Mutex<HashSet<u16>>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        in_use.remove(&self.port);
        debug!("Released port {}", self.port);
    }
}
