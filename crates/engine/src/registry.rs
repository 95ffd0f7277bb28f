//! Withdrawal enablement per asset contract.
//!
//! Deposits never consult the registry; only withdrawals are gated.

use alloy_primitives::Address;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    enabled: HashSet<Address>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins. Returns whether the flag actually changed.
    pub fn set_enabled(&mut self, asset: Address, enabled: bool) -> bool {
        if enabled {
            self.enabled.insert(asset)
        } else {
            self.enabled.remove(&asset)
        }
    }

    /// Assets never written read as disabled.
    pub fn is_enabled(&self, asset: &Address) -> bool {
        self.enabled.contains(asset)
    }

    /// Enabled assets in ascending address order.
    pub fn enabled_assets(&self) -> Vec<Address> {
        let mut assets: Vec<Address> = self.enabled.iter().copied().collect();
        assets.sort_unstable();
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_asset_is_disabled() {
        assert!(!AssetRegistry::new().is_enabled(&Address::ZERO));
    }

    #[test]
    fn set_enabled_is_idempotent() {
        let mut reg = AssetRegistry::new();
        let asset = Address::with_last_byte(3);

        assert!(reg.set_enabled(asset, true));
        assert!(!reg.set_enabled(asset, true));
        assert!(reg.is_enabled(&asset));

        assert!(reg.set_enabled(asset, false));
        assert!(!reg.set_enabled(asset, false));
        assert!(!reg.is_enabled(&asset));
        assert!(reg.enabled_assets().is_empty());
    }
}
