//! Hostile receiver that re-enters the treasury from inside a withdrawal.
//!
//! Registered on an asset contract as the recipient hook for `account`.
//! When the treasury pushes assets to `account`, the hook immediately asks
//! the treasury for another withdrawal and records what it saw.

use crate::treasury::Treasury;
use alloy_primitives::{Address, U256};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use treasury_assets::{Erc20, Erc20Recipient, Erc721, Erc721Receiver, ERC721_RECEIVED};
use treasury_core::{AssetResult, TreasuryResult};

/// What to withdraw again. Asset handles are weak because the asset
/// contract owns the hook that owns this target.
pub enum ReentryTarget {
    Erc20 { asset: Weak<dyn Erc20>, amount: U256 },
    Erc721 { asset: Weak<dyn Erc721>, token_id: U256 },
}

/// One nested withdrawal attempt and the treasury state visible to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReentryAttempt {
    pub asset: Address,
    pub result: TreasuryResult<()>,
    pub locked: bool,
    pub erc20_balance: U256,
    pub erc721_holding: Option<U256>,
}

/// Flattened form of [`ReentryAttempt`] for reports and sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ReentryRecord {
    pub account: Address,
    pub asset: Address,
    pub rejected: bool,
    pub error: Option<String>,
    pub locked: bool,
    pub erc20_balance: U256,
    pub erc721_holding: Option<U256>,
}

pub struct ReentrantWithdrawer {
    treasury: Rc<Treasury>,
    account: Address,
    target: ReentryTarget,
    /// Revert the outer transfer when the nested call fails.
    propagate: bool,
    active: Cell<bool>,
    attempts: RefCell<Vec<ReentryAttempt>>,
}

impl ReentrantWithdrawer {
    pub fn new(treasury: Rc<Treasury>, account: Address, target: ReentryTarget) -> Self {
        Self {
            treasury,
            account,
            target,
            propagate: false,
            active: Cell::new(false),
            attempts: RefCell::new(Vec::new()),
        }
    }

    pub fn propagating(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn attempts(&self) -> Vec<ReentryAttempt> {
        self.attempts.borrow().clone()
    }

    pub fn records(&self) -> Vec<ReentryRecord> {
        self.attempts
            .borrow()
            .iter()
            .map(|a| ReentryRecord {
                account: self.account,
                asset: a.asset,
                rejected: a.result.is_err(),
                error: a.result.as_ref().err().map(|e| e.to_string()),
                locked: a.locked,
                erc20_balance: a.erc20_balance,
                erc721_holding: a.erc721_holding,
            })
            .collect()
    }

    fn reenter(&self) -> AssetResult<()> {
        // One nested attempt per outer push.
        if self.active.replace(true) {
            return Ok(());
        }

        let attempt = match &self.target {
            ReentryTarget::Erc20 { asset, amount } => asset.upgrade().map(|asset| {
                let address = asset.address();
                let locked = self.treasury.is_locked();
                let erc20_balance = self.treasury.erc20_deposits(self.account, address);
                let result = self
                    .treasury
                    .withdraw_erc20(self.account, asset.as_ref(), *amount);
                ReentryAttempt {
                    asset: address,
                    result,
                    locked,
                    erc20_balance,
                    erc721_holding: None,
                }
            }),
            ReentryTarget::Erc721 { asset, token_id } => asset.upgrade().map(|asset| {
                let address = asset.address();
                let locked = self.treasury.is_locked();
                let erc721_holding = self.treasury.erc721_deposits(self.account, address);
                let result = self
                    .treasury
                    .withdraw_erc721(self.account, asset.as_ref(), *token_id);
                ReentryAttempt {
                    asset: address,
                    result,
                    locked,
                    erc20_balance: U256::ZERO,
                    erc721_holding,
                }
            }),
        };
        self.active.set(false);

        let Some(attempt) = attempt else {
            return Ok(());
        };
        tracing::warn!(
            account = %self.account,
            asset = %attempt.asset,
            rejected = attempt.result.is_err(),
            "re-entrant withdrawal attempted"
        );
        let result = attempt.result.clone();
        self.attempts.borrow_mut().push(attempt);

        match result {
            Err(e) if self.propagate => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Erc20Recipient for ReentrantWithdrawer {
    fn on_tokens_received(&self, _token: Address, from: Address, _amount: U256) -> AssetResult<()> {
        if from != self.treasury.address() {
            return Ok(());
        }
        self.reenter()
    }
}

impl Erc721Receiver for ReentrantWithdrawer {
    fn on_erc721_received(
        &self,
        _operator: Address,
        from: Address,
        _token_id: U256,
        _data: &[u8],
    ) -> AssetResult<[u8; 4]> {
        if from == self.treasury.address() {
            self.reenter()?;
        }
        Ok(ERC721_RECEIVED)
    }
}
