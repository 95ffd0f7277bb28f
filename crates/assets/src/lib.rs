//! Asset contract interfaces and in-memory reference contracts.
//!
//! The treasury only ever talks to assets through [`Erc20`] and [`Erc721`].
//! Calls take `&self`: a contract may call back into whoever invoked it
//! (receiver hooks), so implementations keep their state behind interior
//! mutability and never hold a borrow across a hook call.

pub mod erc20;
pub mod erc721;

use alloy_primitives::{Address, U256};
use treasury_core::AssetResult;

pub use erc20::MemoryErc20;
pub use erc721::MemoryErc721;

/// `bytes4(keccak256("onERC721Received(address,address,uint256,bytes)"))`.
pub const ERC721_RECEIVED: [u8; 4] = [0x15, 0x0b, 0x7a, 0x02];

/// Fungible asset standard.
///
/// `Err` is a revert. `Ok(false)` is a non-reverting failure, which some
/// legacy tokens report instead of reverting.
pub trait Erc20 {
    fn address(&self) -> Address;
    fn symbol(&self) -> &str;
    fn balance_of(&self, owner: Address) -> U256;
    /// Moves `amount` from `sender` to `to`.
    fn transfer(&self, sender: Address, to: Address, amount: U256) -> AssetResult<bool>;
    /// Moves `amount` from `from` to `to`, spending `spender`'s allowance.
    fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> AssetResult<bool>;
}

/// Non-fungible asset standard.
pub trait Erc721 {
    fn address(&self) -> Address;
    fn symbol(&self) -> &str;
    fn owner_of(&self, token_id: U256) -> AssetResult<Address>;
    fn transfer_from(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> AssetResult<()>;
    /// Like `transfer_from`, then asks a contract recipient to acknowledge
    /// receipt with [`ERC721_RECEIVED`].
    fn safe_transfer_from(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
        data: &[u8],
    ) -> AssetResult<()>;
}

/// Contract-side hook run by [`Erc721::safe_transfer_from`].
pub trait Erc721Receiver {
    fn on_erc721_received(
        &self,
        operator: Address,
        from: Address,
        token_id: U256,
        data: &[u8],
    ) -> AssetResult<[u8; 4]>;
}

/// Contract-side hook run after a fungible transfer lands on a hooked
/// address (ERC-777 / ERC-1363 style).
pub trait Erc20Recipient {
    fn on_tokens_received(&self, token: Address, from: Address, amount: U256) -> AssetResult<()>;
}

/// Injected misbehaviour for the in-memory contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every transfer reverts.
    Revert,
    /// Every transfer returns `false` without moving anything (ERC-20 only;
    /// ERC-721 treats it as a revert).
    ReturnFalse,
}
