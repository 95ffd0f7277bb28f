//! Single fixed administrator check for privileged operations.

use alloy_primitives::Address;
use treasury_core::{TreasuryError, TreasuryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGate {
    administrator: Address,
}

impl AccessGate {
    pub const fn new(administrator: Address) -> Self {
        Self { administrator }
    }

    pub fn administrator(&self) -> Address {
        self.administrator
    }

    pub fn require_administrator(&self, caller: Address) -> TreasuryResult<()> {
        if caller != self.administrator {
            return Err(TreasuryError::Unauthorized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_administrator_passes() {
        let admin = Address::with_last_byte(1);
        let gate = AccessGate::new(admin);
        assert!(gate.require_administrator(admin).is_ok());
        assert_eq!(
            gate.require_administrator(Address::with_last_byte(2)),
            Err(TreasuryError::Unauthorized)
        );
    }
}
