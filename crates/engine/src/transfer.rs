//! Transfer interaction layer.
//!
//! One function per direction and standard. Each issues exactly one state
//! changing call on the asset contract and folds both reverts and `false`
//! returns into [`TreasuryError::TransferFailed`].

use alloy_primitives::{Address, U256};
use treasury_assets::{Erc20, Erc721};
use treasury_core::{AssetResult, TreasuryError, TreasuryResult};

fn failed(asset: Address, reason: impl Into<String>) -> TreasuryError {
    TreasuryError::TransferFailed {
        asset,
        reason: reason.into(),
    }
}

fn expect_true(asset: Address, call: &str, result: AssetResult<bool>) -> TreasuryResult<()> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => Err(failed(asset, format!("{call} returned false"))),
        Err(e) => Err(failed(asset, e.to_string())),
    }
}

/// Pulls `amount` from `from` into `custodian` using its allowance.
pub fn pull_erc20(
    asset: &dyn Erc20,
    custodian: Address,
    from: Address,
    amount: U256,
) -> TreasuryResult<()> {
    let token = asset.address();
    tracing::debug!(asset = %token, %from, %amount, "pulling erc20");
    expect_true(
        token,
        "transferFrom",
        asset.transfer_from(custodian, from, custodian, amount),
    )
}

/// Pushes `amount` out of `custodian` to `to`.
pub fn push_erc20(
    asset: &dyn Erc20,
    custodian: Address,
    to: Address,
    amount: U256,
) -> TreasuryResult<()> {
    let token = asset.address();
    tracing::debug!(asset = %token, %to, %amount, "pushing erc20");
    expect_true(token, "transfer", asset.transfer(custodian, to, amount))
}

/// Pulls `token_id` from `from` and confirms `custodian` now owns it.
pub fn pull_erc721(
    asset: &dyn Erc721,
    custodian: Address,
    from: Address,
    token_id: U256,
) -> TreasuryResult<()> {
    let token = asset.address();
    tracing::debug!(asset = %token, %from, %token_id, "pulling erc721");
    asset
        .transfer_from(custodian, from, custodian, token_id)
        .map_err(|e| failed(token, e.to_string()))?;

    match asset.owner_of(token_id) {
        Ok(owner) if owner == custodian => Ok(()),
        Ok(owner) => Err(failed(
            token,
            format!("custody not confirmed: token {token_id} owned by {owner}"),
        )),
        Err(e) => Err(failed(token, e.to_string())),
    }
}

/// Pushes `token_id` to `to` with `safeTransferFrom`, so contract recipients
/// must acknowledge it.
pub fn push_erc721(
    asset: &dyn Erc721,
    custodian: Address,
    to: Address,
    token_id: U256,
) -> TreasuryResult<()> {
    let token = asset.address();
    tracing::debug!(asset = %token, %to, %token_id, "pushing erc721");
    asset
        .safe_transfer_from(custodian, custodian, to, token_id, &[])
        .map_err(|e| failed(token, e.to_string()))
}
