//! The in-memory analogue of a reconciliation controller's pool map:
//! register pools by name, look them up, and re-hydrate allocator state
//! from previously persisted requests at start-up.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ipam_core::Cidr;

use crate::error::{PoolError, Result};
use crate::pool::Pool;

#[derive(Default)]
pub struct Registry {
    pools: RwLock<HashMap<String, Arc<Pool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&self, name: impl Into<String>, pool: Pool) -> Result<Arc<Pool>> {
        let name = name.into();
        let mut pools = self.pools.write().expect("registry lock poisoned");
        if pools.contains_key(&name) {
            return Err(PoolError::DuplicatePool(name));
        }
        let pool = Arc::new(pool);
        pools.insert(name, Arc::clone(&pool));
        Ok(pool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pool>> {
        self.pools
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Pool>> {
        self.pools.write().expect("registry lock poisoned").remove(name)
    }

    /// Replay already-assigned CIDRs as `Busy` calls against a pool,
    /// restoring allocator state without a persistence layer of its own.
    pub fn rehydrate(&self, name: &str, busy_cidrs: &[Cidr]) -> Result<()> {
        let pool = self.get(name).ok_or_else(|| PoolError::UnknownPool(name.to_string()))?;
        for cidr in busy_cidrs {
            if !pool.busy(cidr) {
                tracing::warn!(pool = name, %cidr, "rehydration busy call was refused");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Mode;

    #[test]
    fn register_then_lookup() {
        let registry = Registry::new();
        let pool = Pool::new(Cidr::parse("10.0.0.0/24").unwrap(), Mode::FirstMatch).unwrap();
        registry.register("default", pool).unwrap();
        assert!(registry.get("default").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        let pool = Pool::new(Cidr::parse("10.0.0.0/24").unwrap(), Mode::FirstMatch).unwrap();
        registry.register("default", pool).unwrap();
        let again = Pool::new(Cidr::parse("10.0.0.0/24").unwrap(), Mode::FirstMatch).unwrap();
        assert!(registry.register("default", again).is_err());
    }

    #[test]
    fn rehydrate_replays_busy_cidrs() {
        let registry = Registry::new();
        let pool = Pool::new(Cidr::parse("10.0.0.0/24").unwrap(), Mode::FirstMatch).unwrap();
        registry.register("default", pool).unwrap();
        let busy = vec![Cidr::parse("10.0.0.0/25").unwrap()];
        registry.rehydrate("default", &busy).unwrap();
        let pool = registry.get("default").unwrap();
        assert!(pool.contains(&Cidr::parse("10.0.0.10/32").unwrap()));
        assert_eq!(pool.dump(), "10.0.0.0/25[busy], 10.0.0.128/25[free]");
    }
}
