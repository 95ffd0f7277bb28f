//! The custodial treasury.
//!
//! Deposit: pull from caller, then credit. Withdrawal: guard, registry check,
//! debit, push, release. The debit is committed before the push so that a
//! nested call reaching the treasury through the asset contract sees the
//! reduced balance even if it got past the guard.
//!
//! A failed push restores the treasury to its state before the debit,
//! discarding anything a nested call recorded meanwhile; the call then fails
//! as a whole.

use crate::access::AccessGate;
use crate::guard::ReentrancyGuard;
use crate::ledger::Ledger;
use crate::registry::AssetRegistry;
use crate::transfer;
use alloy_primitives::{Address, U256};
use std::cell::RefCell;
use treasury_assets::{Erc20, Erc721};
use treasury_core::{DepositKey, TreasuryError, TreasuryEvent, TreasuryResult, TreasurySnapshot};

/// Treasury state as it stood before a withdrawal's push.
struct Checkpoint {
    registry: AssetRegistry,
    ledger: Ledger,
    events: usize,
}

/// Operations take `&self` so an asset contract holding an `Rc<Treasury>`
/// can call back in during a transfer. No `RefCell` borrow outlives a
/// statement that touches an asset contract.
pub struct Treasury {
    address: Address,
    gate: AccessGate,
    guard: ReentrancyGuard,
    registry: RefCell<AssetRegistry>,
    ledger: RefCell<Ledger>,
    events: RefCell<Vec<TreasuryEvent>>,
}

impl Treasury {
    /// `address` is where custodied assets live; `administrator` is fixed
    /// for the treasury's lifetime.
    pub fn new(address: Address, administrator: Address) -> Self {
        Self::with_ledger(address, administrator, Ledger::new())
    }

    pub fn with_ledger(address: Address, administrator: Address, ledger: Ledger) -> Self {
        Self {
            address,
            gate: AccessGate::new(administrator),
            guard: ReentrancyGuard::new(),
            registry: RefCell::new(AssetRegistry::new()),
            ledger: RefCell::new(ledger),
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.gate.administrator()
    }

    /// True only while a withdrawal is on the stack.
    pub fn is_locked(&self) -> bool {
        self.guard.is_locked()
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    pub fn enable_token(&self, caller: Address, asset: Address, enabled: bool) -> TreasuryResult<()> {
        if let Err(e) = self.gate.require_administrator(caller) {
            tracing::warn!(%caller, %asset, enabled, "enable_token rejected: not the owner");
            return Err(e);
        }
        let changed = self.registry.borrow_mut().set_enabled(asset, enabled);
        self.emit(TreasuryEvent::TokenEnabled { asset, enabled });
        tracing::info!(%asset, enabled, changed, "token enablement set");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fungible
    // -----------------------------------------------------------------------

    /// Pulls `amount` from `caller`, who must have approved the treasury.
    pub fn deposit_erc20(&self, caller: Address, asset: &dyn Erc20, amount: U256) -> TreasuryResult<()> {
        let key = DepositKey::new(caller, asset.address());
        self.ledger.borrow().checked_credit(&key, amount)?;

        transfer::pull_erc20(asset, self.address, caller, amount)?;

        let balance = self.ledger.borrow_mut().credit_erc20(key, amount)?;
        self.emit(TreasuryEvent::Erc20Deposited {
            owner: caller,
            asset: key.asset,
            amount,
            balance,
        });
        tracing::info!(owner = %caller, asset = %key.asset, %amount, %balance, "erc20 deposited");
        Ok(())
    }

    pub fn withdraw_erc20(&self, caller: Address, asset: &dyn Erc20, amount: U256) -> TreasuryResult<()> {
        let _scope = self.guard.enter()?;
        let key = DepositKey::new(caller, asset.address());
        self.require_enabled(&key.asset)?;
        let checkpoint = self.checkpoint();

        self.ledger.borrow_mut().debit_erc20(key, amount)?;

        if let Err(e) = transfer::push_erc20(asset, self.address, caller, amount) {
            self.revert_to(checkpoint);
            tracing::warn!(owner = %caller, asset = %key.asset, %amount, error = %e, "erc20 withdrawal rolled back");
            return Err(e);
        }

        let balance = self.ledger.borrow().erc20_balance(&key);
        self.emit(TreasuryEvent::Erc20Withdrawn {
            owner: caller,
            asset: key.asset,
            amount,
            balance,
        });
        tracing::info!(owner = %caller, asset = %key.asset, %amount, %balance, "erc20 withdrawn");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Non-fungible
    // -----------------------------------------------------------------------

    /// Pulls `token_id` from `caller` and records it, replacing whatever the
    /// `(caller, asset)` slot held.
    pub fn deposit_erc721(&self, caller: Address, asset: &dyn Erc721, token_id: U256) -> TreasuryResult<()> {
        let key = DepositKey::new(caller, asset.address());

        transfer::pull_erc721(asset, self.address, caller, token_id)?;

        let replaced = self.ledger.borrow_mut().record_erc721(key, token_id);
        if let Some(previous) = replaced {
            tracing::warn!(
                owner = %caller,
                asset = %key.asset,
                %previous,
                %token_id,
                "erc721 holding overwritten; previous unit stays in custody"
            );
        }
        self.emit(TreasuryEvent::Erc721Deposited {
            owner: caller,
            asset: key.asset,
            token_id,
            replaced,
        });
        tracing::info!(owner = %caller, asset = %key.asset, %token_id, "erc721 deposited");
        Ok(())
    }

    pub fn withdraw_erc721(&self, caller: Address, asset: &dyn Erc721, token_id: U256) -> TreasuryResult<()> {
        let _scope = self.guard.enter()?;
        let key = DepositKey::new(caller, asset.address());
        self.require_enabled(&key.asset)?;
        let checkpoint = self.checkpoint();

        self.ledger.borrow_mut().release_erc721(key, token_id)?;

        if let Err(e) = transfer::push_erc721(asset, self.address, caller, token_id) {
            self.revert_to(checkpoint);
            tracing::warn!(
                owner = %caller,
                asset = %key.asset,
                %token_id,
                error = %e,
                "erc721 withdrawal rolled back"
            );
            return Err(e);
        }

        self.emit(TreasuryEvent::Erc721Withdrawn {
            owner: caller,
            asset: key.asset,
            token_id,
        });
        tracing::info!(owner = %caller, asset = %key.asset, %token_id, "erc721 withdrawn");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn enabled_tokens(&self, asset: Address) -> bool {
        self.registry.borrow().is_enabled(&asset)
    }

    pub fn erc20_deposits(&self, owner: Address, asset: Address) -> U256 {
        self.ledger
            .borrow()
            .erc20_balance(&DepositKey::new(owner, asset))
    }

    /// `None` when no unit is recorded for the pair.
    pub fn erc721_deposits(&self, owner: Address, asset: Address) -> Option<U256> {
        self.ledger
            .borrow()
            .erc721_holding(&DepositKey::new(owner, asset))
    }

    pub fn snapshot(&self) -> TreasurySnapshot {
        let ledger = self.ledger.borrow();
        TreasurySnapshot {
            address: self.address,
            administrator: self.gate.administrator(),
            enabled: self.registry.borrow().enabled_assets(),
            erc20: ledger.erc20_positions(),
            erc721: ledger.erc721_positions(),
        }
    }

    /// Drains events emitted since the last call.
    pub fn take_events(&self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Consumes the treasury, returning its ledger.
    pub fn into_ledger(self) -> Ledger {
        self.ledger.into_inner()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            registry: self.registry.borrow().clone(),
            ledger: self.ledger.borrow().clone(),
            events: self.events.borrow().len(),
        }
    }

    /// Discards everything recorded since `checkpoint`, including deposits
    /// and events from calls nested inside the failed push.
    fn revert_to(&self, checkpoint: Checkpoint) {
        *self.registry.borrow_mut() = checkpoint.registry;
        *self.ledger.borrow_mut() = checkpoint.ledger;
        self.events.borrow_mut().truncate(checkpoint.events);
    }

    fn require_enabled(&self, asset: &Address) -> TreasuryResult<()> {
        if !self.registry.borrow().is_enabled(asset) {
            return Err(TreasuryError::TokenNotEnabled);
        }
        Ok(())
    }

    fn emit(&self, event: TreasuryEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl std::fmt::Debug for Treasury {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Treasury")
            .field("address", &self.address)
            .field("administrator", &self.gate.administrator())
            .field("locked", &self.guard.is_locked())
            .finish_non_exhaustive()
    }
}
