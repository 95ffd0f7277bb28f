//! Centralized error types for the treasury workspace.

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Reasons a treasury operation aborts. Every variant leaves treasury state
/// exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TreasuryError {
    /// A non-administrator invoked a privileged operation.
    #[error("Not the owner")]
    Unauthorized,

    /// Withdrawal attempted on an asset the administrator has not enabled.
    #[error("Token not enabled")]
    TokenNotEnabled,

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: U256, available: U256 },

    /// `held` is `None` when nothing is recorded for the pair.
    #[error("Incorrect token ID: requested {expected}, held {held:?}")]
    IncorrectTokenId { expected: U256, held: Option<U256> },

    /// The reentrancy guard was already held by an in-progress operation.
    #[error("Reentrant call")]
    ReentrantCall,

    /// The asset contract reverted or reported failure.
    #[error("Transfer failed on {asset}: {reason}")]
    TransferFailed { asset: Address, reason: String },

    #[error("Balance overflow")]
    BalanceOverflow,
}

pub type TreasuryResult<T> = Result<T, TreasuryError>;

/// Reverts raised by asset contracts (and by receiver hooks they call).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AssetError {
    #[error("transfer amount exceeds balance")]
    InsufficientBalance,

    #[error("insufficient allowance")]
    InsufficientAllowance,

    #[error("caller is not token owner or approved")]
    NotAuthorized,

    #[error("invalid token ID {0}")]
    NonexistentToken(U256),

    #[error("token {0} already minted")]
    AlreadyMinted(U256),

    #[error("transfer to non ERC721Receiver implementer")]
    InvalidReceiver,

    #[error("{0}")]
    Reverted(String),
}

impl From<TreasuryError> for AssetError {
    /// A receiver hook that calls back into the treasury bubbles the
    /// treasury's revert reason up through the asset contract.
    fn from(err: TreasuryError) -> Self {
        AssetError::Reverted(err.to_string())
    }
}

pub type AssetResult<T> = Result<T, AssetError>;
