//! Domain types for the custodial treasury.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ledger keys
// ---------------------------------------------------------------------------

/// A `(depositor, asset contract)` pair. Key of both ledgers.
///
/// `#[repr(C)]` for stable layout: `Address(20) + Address(20)` = 40 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DepositKey {
    pub owner: Address,
    pub asset: Address,
}

impl DepositKey {
    #[inline]
    pub const fn new(owner: Address, asset: Address) -> Self {
        Self { owner, asset }
    }
}

/// Which asset standard a contract implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Erc20,
    Erc721,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Erc20 => f.write_str("ERC-20"),
            AssetKind::Erc721 => f.write_str("ERC-721"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// State changes emitted by successful treasury operations.
///
/// Failed operations emit nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TreasuryEvent {
    TokenEnabled {
        asset: Address,
        enabled: bool,
    },
    Erc20Deposited {
        owner: Address,
        asset: Address,
        amount: U256,
        /// Recorded balance after the credit.
        balance: U256,
    },
    Erc20Withdrawn {
        owner: Address,
        asset: Address,
        amount: U256,
        /// Recorded balance after the debit.
        balance: U256,
    },
    Erc721Deposited {
        owner: Address,
        asset: Address,
        token_id: U256,
        /// Holding that was overwritten by this deposit, if any.
        replaced: Option<U256>,
    },
    Erc721Withdrawn {
        owner: Address,
        asset: Address,
        token_id: U256,
    },
}

impl TreasuryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TreasuryEvent::TokenEnabled { .. } => "token_enabled",
            TreasuryEvent::Erc20Deposited { .. } => "erc20_deposited",
            TreasuryEvent::Erc20Withdrawn { .. } => "erc20_withdrawn",
            TreasuryEvent::Erc721Deposited { .. } => "erc721_deposited",
            TreasuryEvent::Erc721Withdrawn { .. } => "erc721_withdrawn",
        }
    }

    pub fn asset(&self) -> Address {
        match self {
            TreasuryEvent::TokenEnabled { asset, .. }
            | TreasuryEvent::Erc20Deposited { asset, .. }
            | TreasuryEvent::Erc20Withdrawn { asset, .. }
            | TreasuryEvent::Erc721Deposited { asset, .. }
            | TreasuryEvent::Erc721Withdrawn { asset, .. } => *asset,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Position {
    pub owner: Address,
    pub asset: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc721Position {
    pub owner: Address,
    pub asset: Address,
    pub token_id: U256,
}

/// Point-in-time copy of every treasury record, sorted by `(owner, asset)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasurySnapshot {
    pub address: Address,
    pub administrator: Address,
    pub enabled: Vec<Address>,
    pub erc20: Vec<Erc20Position>,
    pub erc721: Vec<Erc721Position>,
}

impl TreasurySnapshot {
    /// Sum of all recorded fungible balances for one asset.
    pub fn erc20_total(&self, asset: &Address) -> U256 {
        self.erc20
            .iter()
            .filter(|p| &p.asset == asset)
            .fold(U256::ZERO, |acc, p| acc.saturating_add(p.amount))
    }

    pub fn is_empty(&self) -> bool {
        self.erc20.is_empty() && self.erc721.is_empty()
    }
}

// Compile-time layout assertions.
const _: () = assert!(std::mem::size_of::<DepositKey>() == 40);
const _: () = assert!(std::mem::align_of::<DepositKey>() == 1);
