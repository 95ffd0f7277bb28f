//! Domain models, events, and error definitions.
//!
//! Foundation crate -- no I/O, no logging, no asset contract logic.

pub mod error;
pub mod types;

pub use error::{AssetError, AssetResult, TreasuryError, TreasuryResult};
pub use types::{
    AssetKind, DepositKey, Erc20Position, Erc721Position, TreasuryEvent, TreasurySnapshot,
};
