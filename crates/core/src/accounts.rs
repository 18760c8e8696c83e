//! Local account registry.
//!
//! Tracks the addresses this node holds keys for. The sealer uses it to
//! recognize its own blocks and the pool uses it to exempt local
//! transactions from pricing rules.

use parking_lot::RwLock;

use crate::types::Address;

/// Registry of addresses controlled by this node.
#[derive(Default)]
pub struct AccountManager {
    accounts: RwLock<Vec<Address>>,
}

impl AccountManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address. Duplicates are ignored.
    pub fn add(&self, address: Address) {
        let mut accounts = self.accounts.write();
        if !accounts.contains(&address) {
            accounts.push(address);
        }
    }

    /// True when the address is locally controlled.
    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.read().contains(address)
    }

    /// Snapshot of all registered addresses.
    pub fn list(&self) -> Vec<Address> {
        self.accounts.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mgr = AccountManager::new();
        let addr = Address([9u8; 20]);
        mgr.add(addr);
        mgr.add(addr);
        assert_eq!(mgr.list().len(), 1);
        assert!(mgr.contains(&addr));
    }

    #[test]
    fn unknown_address_not_contained() {
        let mgr = AccountManager::new();
        assert!(!mgr.contains(&Address([1u8; 20])));
    }
}
