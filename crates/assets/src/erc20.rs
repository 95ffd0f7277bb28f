//! In-memory ERC-20 with allowances, minting, and recipient hooks.

use crate::{Erc20, Erc20Recipient, FailureMode};
use alloy_primitives::{Address, U256};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use treasury_core::{AssetError, AssetResult};

#[derive(Debug, Clone, Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
}

impl Ledger {
    fn balance(&self, owner: &Address) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> AssetResult<()> {
        let from_balance = self.balance(&from);
        let remaining = from_balance
            .checked_sub(amount)
            .ok_or(AssetError::InsufficientBalance)?;
        self.balances.insert(from, remaining);
        // Cannot overflow: the sum of all balances is bounded by total_supply.
        let to_balance = self.balance(&to).saturating_add(amount);
        self.balances.insert(to, to_balance);
        Ok(())
    }
}

/// Fungible token held entirely in memory.
///
/// `spender == from` in [`Erc20::transfer_from`] needs no allowance.
/// An allowance of `U256::MAX` is never decremented.
pub struct MemoryErc20 {
    address: Address,
    name: String,
    symbol: String,
    decimals: u8,
    ledger: RefCell<Ledger>,
    recipients: RefCell<HashMap<Address, Rc<dyn Erc20Recipient>>>,
    failure: Cell<Option<FailureMode>>,
}

impl MemoryErc20 {
    pub fn new(address: Address, name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            address,
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            ledger: RefCell::new(Ledger::default()),
            recipients: RefCell::new(HashMap::new()),
            failure: Cell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn total_supply(&self) -> U256 {
        self.ledger.borrow().total_supply
    }

    pub fn mint(&self, to: Address, amount: U256) -> AssetResult<()> {
        if to == Address::ZERO {
            return Err(AssetError::Reverted("mint to the zero address".into()));
        }
        let mut ledger = self.ledger.borrow_mut();
        ledger.total_supply = ledger
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| AssetError::Reverted("total supply overflow".into()))?;
        let balance = ledger.balance(&to) + amount;
        ledger.balances.insert(to, balance);
        tracing::debug!(token = %self.address, %to, %amount, "mint");
        Ok(())
    }

    pub fn approve(&self, owner: Address, spender: Address, amount: U256) -> bool {
        self.ledger
            .borrow_mut()
            .allowances
            .insert((owner, spender), amount);
        true
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.ledger
            .borrow()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Treat `account` as a contract that is notified of incoming transfers.
    pub fn register_recipient(&self, account: Address, hook: Rc<dyn Erc20Recipient>) {
        self.recipients.borrow_mut().insert(account, hook);
    }

    pub fn set_failure(&self, mode: Option<FailureMode>) {
        self.failure.set(mode);
    }

    /// Returns `Some(false)` when the call must report failure without
    /// touching state.
    fn check_failure(&self) -> AssetResult<Option<bool>> {
        match self.failure.get() {
            Some(FailureMode::Revert) => Err(AssetError::Reverted("token paused".into())),
            Some(FailureMode::ReturnFalse) => Ok(Some(false)),
            None => Ok(None),
        }
    }

    /// Moves the balance, then runs the recipient hook with no borrow held.
    /// Leaves whatever the hook did in place; callers revert on `Err`.
    fn move_and_notify(&self, from: Address, to: Address, amount: U256) -> AssetResult<()> {
        if to == Address::ZERO {
            return Err(AssetError::Reverted("transfer to the zero address".into()));
        }
        self.ledger.borrow_mut().move_balance(from, to, amount)?;

        let hook = self.recipients.borrow().get(&to).cloned();
        if let Some(hook) = hook {
            tracing::debug!(token = %self.address, %from, %to, %amount, "notifying recipient");
            hook.on_tokens_received(self.address, from, amount)?;
        }
        Ok(())
    }

    /// Runs `call`; on `Err` every balance and allowance goes back to what it
    /// was before, including changes made by nested calls from a hook.
    fn reverting<T>(&self, call: impl FnOnce() -> AssetResult<T>) -> AssetResult<T> {
        let checkpoint = self.ledger.borrow().clone();
        let result = call();
        if result.is_err() {
            *self.ledger.borrow_mut() = checkpoint;
        }
        result
    }
}

impl Erc20 for MemoryErc20 {
    fn address(&self) -> Address {
        self.address
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn balance_of(&self, owner: Address) -> U256 {
        self.ledger.borrow().balance(&owner)
    }

    fn transfer(&self, sender: Address, to: Address, amount: U256) -> AssetResult<bool> {
        if let Some(result) = self.check_failure()? {
            return Ok(result);
        }
        self.reverting(|| self.move_and_notify(sender, to, amount))?;
        tracing::debug!(token = %self.address, from = %sender, %to, %amount, "transfer");
        Ok(true)
    }

    fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> AssetResult<bool> {
        if let Some(result) = self.check_failure()? {
            return Ok(result);
        }

        self.reverting(|| {
            if spender != from {
                let allowance = self.allowance(from, spender);
                if allowance < amount {
                    return Err(AssetError::InsufficientAllowance);
                }
                if allowance != U256::MAX {
                    self.approve(from, spender, allowance - amount);
                }
            }
            self.move_and_notify(from, to, amount)
        })?;
        tracing::debug!(token = %self.address, %spender, %from, %to, %amount, "transfer_from");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> MemoryErc20 {
        MemoryErc20::new(Address::with_last_byte(0xee), "Test Token", "TT", 18)
    }

    struct Refuse;

    impl Erc20Recipient for Refuse {
        fn on_tokens_received(&self, _: Address, _: Address, _: U256) -> AssetResult<()> {
            Err(AssetError::Reverted("refused".into()))
        }
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let t = token();
        let (alice, vault) = (Address::with_last_byte(1), Address::with_last_byte(2));
        t.mint(alice, U256::from(100)).unwrap();
        t.approve(alice, vault, U256::from(60));

        assert!(t.transfer_from(vault, alice, vault, U256::from(50)).unwrap());
        assert_eq!(t.balance_of(alice), U256::from(50));
        assert_eq!(t.balance_of(vault), U256::from(50));
        assert_eq!(t.allowance(alice, vault), U256::from(10));

        assert_eq!(
            t.transfer_from(vault, alice, vault, U256::from(11)),
            Err(AssetError::InsufficientAllowance)
        );
    }

    #[test]
    fn transfer_rejects_overdraft() {
        let t = token();
        let alice = Address::with_last_byte(1);
        t.mint(alice, U256::from(5)).unwrap();
        assert_eq!(
            t.transfer(alice, Address::with_last_byte(2), U256::from(6)),
            Err(AssetError::InsufficientBalance)
        );
        assert_eq!(t.balance_of(alice), U256::from(5));
    }

    #[test]
    fn refusing_recipient_undoes_transfer_and_allowance() {
        let t = token();
        let (alice, vault) = (Address::with_last_byte(1), Address::with_last_byte(2));
        t.mint(alice, U256::from(10)).unwrap();
        t.approve(alice, vault, U256::from(10));
        t.register_recipient(vault, Rc::new(Refuse));

        assert!(t.transfer_from(vault, alice, vault, U256::from(10)).is_err());
        assert_eq!(t.balance_of(alice), U256::from(10));
        assert_eq!(t.balance_of(vault), U256::ZERO);
        assert_eq!(t.allowance(alice, vault), U256::from(10));
    }

    /// Forwards what it receives to `sink`, then refuses.
    struct ForwardThenRefuse {
        token: std::rc::Weak<MemoryErc20>,
        account: Address,
        sink: Address,
    }

    impl Erc20Recipient for ForwardThenRefuse {
        fn on_tokens_received(&self, _: Address, _: Address, amount: U256) -> AssetResult<()> {
            if let Some(token) = self.token.upgrade() {
                token.transfer(self.account, self.sink, amount)?;
            }
            Err(AssetError::Reverted("refused".into()))
        }
    }

    #[test]
    fn refusal_reverts_nested_transfers_made_by_the_hook() {
        let t = Rc::new(token());
        let (alice, vault, sink) = (
            Address::with_last_byte(1),
            Address::with_last_byte(2),
            Address::with_last_byte(3),
        );
        t.mint(alice, U256::from(10)).unwrap();
        t.mint(vault, U256::from(4)).unwrap();
        t.register_recipient(
            vault,
            Rc::new(ForwardThenRefuse {
                token: Rc::downgrade(&t),
                account: vault,
                sink,
            }),
        );

        assert!(t.transfer(alice, vault, U256::from(10)).is_err());
        assert_eq!(t.balance_of(alice), U256::from(10));
        assert_eq!(t.balance_of(vault), U256::from(4));
        assert_eq!(t.balance_of(sink), U256::ZERO);
        assert_eq!(
            t.balance_of(alice) + t.balance_of(vault) + t.balance_of(sink),
            t.total_supply()
        );
    }

    #[test]
    fn failure_modes() {
        let t = token();
        let alice = Address::with_last_byte(1);
        t.mint(alice, U256::from(10)).unwrap();

        t.set_failure(Some(FailureMode::ReturnFalse));
        assert_eq!(t.transfer(alice, Address::with_last_byte(2), U256::from(1)), Ok(false));
        assert_eq!(t.balance_of(alice), U256::from(10));

        t.set_failure(Some(FailureMode::Revert));
        assert!(t.transfer(alice, Address::with_last_byte(2), U256::from(1)).is_err());

        t.set_failure(None);
        assert_eq!(t.transfer(alice, Address::with_last_byte(2), U256::from(1)), Ok(true));
        assert_eq!(t.total_supply(), U256::from(10));
    }
}
