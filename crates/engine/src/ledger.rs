//! Custody records: fungible balances and single-slot non-fungible holdings.
//!
//! Plain owned store with no interior mutability. The treasury wraps it in a
//! `RefCell` and never keeps a borrow alive across an asset contract call.

use alloy_primitives::U256;
use std::collections::HashMap;
use treasury_core::{
    DepositKey, Erc20Position, Erc721Position, TreasuryError, TreasuryResult,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    erc20: HashMap<DepositKey, U256>,
    erc721: HashMap<DepositKey, U256>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Fungible
    // -----------------------------------------------------------------------

    /// Absent records read as zero.
    pub fn erc20_balance(&self, key: &DepositKey) -> U256 {
        self.erc20.get(key).copied().unwrap_or_default()
    }

    /// Balance a credit of `amount` would produce, without applying it.
    pub fn checked_credit(&self, key: &DepositKey, amount: U256) -> TreasuryResult<U256> {
        self.erc20_balance(key)
            .checked_add(amount)
            .ok_or(TreasuryError::BalanceOverflow)
    }

    pub fn credit_erc20(&mut self, key: DepositKey, amount: U256) -> TreasuryResult<U256> {
        let balance = self.checked_credit(&key, amount)?;
        self.set_erc20(key, balance);
        Ok(balance)
    }

    /// Fails without touching the record when `amount` exceeds the balance.
    pub fn debit_erc20(&mut self, key: DepositKey, amount: U256) -> TreasuryResult<U256> {
        let available = self.erc20_balance(&key);
        let balance = available
            .checked_sub(amount)
            .ok_or(TreasuryError::InsufficientBalance {
                requested: amount,
                available,
            })?;
        self.set_erc20(key, balance);
        Ok(balance)
    }

    fn set_erc20(&mut self, key: DepositKey, balance: U256) {
        if balance.is_zero() {
            self.erc20.remove(&key);
        } else {
            self.erc20.insert(key, balance);
        }
    }

    // -----------------------------------------------------------------------
    // Non-fungible
    // -----------------------------------------------------------------------

    pub fn erc721_holding(&self, key: &DepositKey) -> Option<U256> {
        self.erc721.get(key).copied()
    }

    /// Overwrites the slot. Returns the id it displaced.
    pub fn record_erc721(&mut self, key: DepositKey, token_id: U256) -> Option<U256> {
        self.erc721.insert(key, token_id)
    }

    /// Clears the slot if it holds exactly `token_id`.
    pub fn release_erc721(&mut self, key: DepositKey, token_id: U256) -> TreasuryResult<()> {
        match self.erc721.get(&key) {
            Some(held) if *held == token_id => {
                self.erc721.remove(&key);
                Ok(())
            }
            held => Err(TreasuryError::IncorrectTokenId {
                expected: token_id,
                held: held.copied(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn erc20_positions(&self) -> Vec<Erc20Position> {
        let mut positions: Vec<Erc20Position> = self
            .erc20
            .iter()
            .map(|(key, amount)| Erc20Position {
                owner: key.owner,
                asset: key.asset,
                amount: *amount,
            })
            .collect();
        positions.sort_unstable_by(|a, b| (a.owner, a.asset).cmp(&(b.owner, b.asset)));
        positions
    }

    pub fn erc721_positions(&self) -> Vec<Erc721Position> {
        let mut positions: Vec<Erc721Position> = self
            .erc721
            .iter()
            .map(|(key, token_id)| Erc721Position {
                owner: key.owner,
                asset: key.asset,
                token_id: *token_id,
            })
            .collect();
        positions.sort_unstable_by(|a, b| (a.owner, a.asset).cmp(&(b.owner, b.asset)));
        positions
    }
}
