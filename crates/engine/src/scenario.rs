//! Scripted treasury runs against in-memory asset contracts.
//!
//! A [`Scenario`] is a JSON document: the treasury and administrator
//! addresses, the asset contracts to deploy, and an ordered list of steps.
//! Each step may name the outcome it expects; [`run`] records every step's
//! actual outcome, the events it emitted, and whether it matched.
//!
//! ```json
//! {
//!   "name": "erc20 withdrawal",
//!   "treasury": "0x00000000000000000000000000000000000000f0",
//!   "admin": "0x0000000000000000000000000000000000000001",
//!   "assets": [{ "kind": "erc20", "address": "0x...ee", "symbol": "TT" }],
//!   "steps": [
//!     { "op": "mint_erc20", "asset": "0x...ee", "to": "0x...02", "amount": "100e18" },
//!     { "op": "withdraw_erc20", "caller": "0x...02", "asset": "0x...ee",
//!       "amount": "20e18", "expect": "TokenNotEnabled" }
//!   ]
//! }
//! ```

use crate::attacker::{ReentrantWithdrawer, ReentryRecord, ReentryTarget};
use crate::treasury::Treasury;
use alloy_primitives::{Address, U256};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use treasury_assets::{Erc20, Erc721, FailureMode, MemoryErc20, MemoryErc721};
use treasury_core::{AssetError, AssetKind, TreasuryError, TreasuryEvent, TreasurySnapshot};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScenarioError {
    #[error("Invalid scenario JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate asset {0}")]
    DuplicateAsset(Address),

    #[error("Step {step}: unknown asset {asset}")]
    UnknownAsset { step: usize, asset: Address },

    #[error("Step {step}: asset {asset} is not {expected}")]
    WrongAssetKind {
        step: usize,
        asset: Address,
        expected: AssetKind,
    },
}

// ---------------------------------------------------------------------------
// Scenario document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub treasury: Address,
    pub admin: Address,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetSpec {
    pub kind: AssetKind,
    pub address: Address,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    18
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub expect: Option<Outcome>,
}

/// Token approvals always name the treasury as spender/operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    MintErc20 {
        asset: Address,
        to: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        amount: U256,
    },
    ApproveErc20 {
        asset: Address,
        owner: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        amount: U256,
    },
    /// Mints the next sequential id (starting at 1).
    MintErc721 { asset: Address, to: Address },
    ApproveErc721 {
        asset: Address,
        owner: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        token_id: U256,
    },
    EnableToken {
        caller: Address,
        asset: Address,
        enabled: bool,
    },
    DepositErc20 {
        caller: Address,
        asset: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        amount: U256,
    },
    WithdrawErc20 {
        caller: Address,
        asset: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        amount: U256,
    },
    DepositErc721 {
        caller: Address,
        asset: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        token_id: U256,
    },
    WithdrawErc721 {
        caller: Address,
        asset: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        token_id: U256,
    },
    /// Turns `account` into a contract that re-enters the treasury whenever
    /// it receives `asset` from it. `value` is an amount (ERC-20) or a token
    /// id (ERC-721).
    ArmAttacker {
        asset: Address,
        account: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        value: U256,
        #[serde(default)]
        propagate: bool,
    },
    SetFailure {
        asset: Address,
        mode: Option<FailureSpec>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::MintErc20 { .. } => "mint_erc20",
            Action::ApproveErc20 { .. } => "approve_erc20",
            Action::MintErc721 { .. } => "mint_erc721",
            Action::ApproveErc721 { .. } => "approve_erc721",
            Action::EnableToken { .. } => "enable_token",
            Action::DepositErc20 { .. } => "deposit_erc20",
            Action::WithdrawErc20 { .. } => "withdraw_erc20",
            Action::DepositErc721 { .. } => "deposit_erc721",
            Action::WithdrawErc721 { .. } => "withdraw_erc721",
            Action::ArmAttacker { .. } => "arm_attacker",
            Action::SetFailure { .. } => "set_failure",
        }
    }

    /// Declared asset this step needs, and its required kind (`None` = any).
    /// `enable_token` may name any address, deployed or not.
    fn asset_ref(&self) -> Option<(Address, Option<AssetKind>)> {
        match self {
            Action::MintErc20 { asset, .. }
            | Action::ApproveErc20 { asset, .. }
            | Action::DepositErc20 { asset, .. }
            | Action::WithdrawErc20 { asset, .. } => Some((*asset, Some(AssetKind::Erc20))),
            Action::MintErc721 { asset, .. }
            | Action::ApproveErc721 { asset, .. }
            | Action::DepositErc721 { asset, .. }
            | Action::WithdrawErc721 { asset, .. } => Some((*asset, Some(AssetKind::Erc721))),
            Action::ArmAttacker { asset, .. } | Action::SetFailure { asset, .. } => {
                Some((*asset, None))
            }
            Action::EnableToken { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSpec {
    Revert,
    ReturnFalse,
}

impl From<FailureSpec> for FailureMode {
    fn from(spec: FailureSpec) -> Self {
        match spec {
            FailureSpec::Revert => FailureMode::Revert,
            FailureSpec::ReturnFalse => FailureMode::ReturnFalse,
        }
    }
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks asset declarations and that every step names a declared asset
    /// of the right kind.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut kinds = HashMap::with_capacity(self.assets.len());
        for spec in &self.assets {
            if kinds.insert(spec.address, spec.kind).is_some() {
                return Err(ScenarioError::DuplicateAsset(spec.address));
            }
        }

        for (step, s) in self.steps.iter().enumerate() {
            let Some((asset, required)) = s.action.asset_ref() else {
                continue;
            };
            let kind = kinds
                .get(&asset)
                .ok_or(ScenarioError::UnknownAsset { step, asset })?;
            if let Some(expected) = required {
                if *kind != expected {
                    return Err(ScenarioError::WrongAssetKind {
                        step,
                        asset,
                        expected,
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result class of one step; also the vocabulary of `expect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Ok,
    Unauthorized,
    TokenNotEnabled,
    InsufficientBalance,
    IncorrectTokenId,
    ReentrantCall,
    TransferFailed,
    BalanceOverflow,
    /// An asset contract call made directly by the script reverted.
    AssetReverted,
    Other,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "Ok",
            Outcome::Unauthorized => "Unauthorized",
            Outcome::TokenNotEnabled => "TokenNotEnabled",
            Outcome::InsufficientBalance => "InsufficientBalance",
            Outcome::IncorrectTokenId => "IncorrectTokenId",
            Outcome::ReentrantCall => "ReentrantCall",
            Outcome::TransferFailed => "TransferFailed",
            Outcome::BalanceOverflow => "BalanceOverflow",
            Outcome::AssetReverted => "AssetReverted",
            Outcome::Other => "Other",
        }
    }
}

struct StepFailure {
    outcome: Outcome,
    message: String,
}

impl From<TreasuryError> for StepFailure {
    fn from(err: TreasuryError) -> Self {
        let outcome = match err {
            TreasuryError::Unauthorized => Outcome::Unauthorized,
            TreasuryError::TokenNotEnabled => Outcome::TokenNotEnabled,
            TreasuryError::InsufficientBalance { .. } => Outcome::InsufficientBalance,
            TreasuryError::IncorrectTokenId { .. } => Outcome::IncorrectTokenId,
            TreasuryError::ReentrantCall => Outcome::ReentrantCall,
            TreasuryError::TransferFailed { .. } => Outcome::TransferFailed,
            TreasuryError::BalanceOverflow => Outcome::BalanceOverflow,
            _ => Outcome::Other,
        };
        Self {
            outcome,
            message: err.to_string(),
        }
    }
}

impl From<AssetError> for StepFailure {
    fn from(err: AssetError) -> Self {
        Self {
            outcome: Outcome::AssetReverted,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    pub outcome: Outcome,
    pub message: Option<String>,
    pub expected: Option<Outcome>,
    pub matched: bool,
    /// Events emitted by the treasury during this step.
    pub events: SmallVec<[TreasuryEvent; 2]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetLabel {
    pub address: Address,
    pub kind: AssetKind,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub assets: Vec<AssetLabel>,
    pub steps: Vec<StepOutcome>,
    pub snapshot: TreasurySnapshot,
    pub reentry: Vec<ReentryRecord>,
    pub elapsed_us: u64,
}

impl ScenarioOutcome {
    /// Every step with an expectation met it.
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.matched)
    }

    pub fn mismatches(&self) -> usize {
        self.steps.iter().filter(|s| !s.matched).count()
    }

    pub fn label(&self, address: &Address) -> Option<&AssetLabel> {
        self.assets.iter().find(|a| &a.address == address)
    }

    pub fn events(&self) -> impl Iterator<Item = (usize, &TreasuryEvent)> {
        self.steps
            .iter()
            .flat_map(|s| s.events.iter().map(move |e| (s.index, e)))
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum AssetHandle {
    Erc20(Rc<MemoryErc20>),
    Erc721(Rc<MemoryErc721>),
}

/// Everything one scenario run touches. Lives on a single thread.
struct World {
    treasury: Rc<Treasury>,
    assets: HashMap<Address, AssetHandle>,
    attackers: Vec<Rc<ReentrantWithdrawer>>,
}

impl World {
    fn new(scenario: &Scenario) -> Self {
        let assets = scenario
            .assets
            .iter()
            .map(|spec| {
                let name = spec.name.as_deref().unwrap_or(&spec.symbol);
                let handle = match spec.kind {
                    AssetKind::Erc20 => AssetHandle::Erc20(Rc::new(MemoryErc20::new(
                        spec.address,
                        name,
                        &spec.symbol,
                        spec.decimals,
                    ))),
                    AssetKind::Erc721 => AssetHandle::Erc721(Rc::new(MemoryErc721::new(
                        spec.address,
                        name,
                        &spec.symbol,
                    ))),
                };
                (spec.address, handle)
            })
            .collect();

        Self {
            treasury: Rc::new(Treasury::new(scenario.treasury, scenario.admin)),
            assets,
            attackers: Vec::new(),
        }
    }

    fn handle(&self, step: usize, asset: &Address) -> Result<AssetHandle, ScenarioError> {
        self.assets
            .get(asset)
            .cloned()
            .ok_or(ScenarioError::UnknownAsset {
                step,
                asset: *asset,
            })
    }

    fn erc20(&self, step: usize, asset: &Address) -> Result<Rc<MemoryErc20>, ScenarioError> {
        match self.handle(step, asset)? {
            AssetHandle::Erc20(token) => Ok(token),
            AssetHandle::Erc721(_) => Err(ScenarioError::WrongAssetKind {
                step,
                asset: *asset,
                expected: AssetKind::Erc20,
            }),
        }
    }

    fn erc721(&self, step: usize, asset: &Address) -> Result<Rc<MemoryErc721>, ScenarioError> {
        match self.handle(step, asset)? {
            AssetHandle::Erc721(token) => Ok(token),
            AssetHandle::Erc20(_) => Err(ScenarioError::WrongAssetKind {
                step,
                asset: *asset,
                expected: AssetKind::Erc721,
            }),
        }
    }

    /// Outer `Err` is a malformed script; inner `Err` is a step that failed.
    fn execute(
        &mut self,
        step: usize,
        action: &Action,
    ) -> Result<Result<(), StepFailure>, ScenarioError> {
        let treasury = Rc::clone(&self.treasury);
        let custodian = treasury.address();

        let result = match action {
            Action::MintErc20 { asset, to, amount } => self
                .erc20(step, asset)?
                .mint(*to, *amount)
                .map_err(StepFailure::from),
            Action::ApproveErc20 {
                asset,
                owner,
                amount,
            } => {
                self.erc20(step, asset)?.approve(*owner, custodian, *amount);
                Ok(())
            }
            Action::MintErc721 { asset, to } => self
                .erc721(step, asset)?
                .safe_mint(*to)
                .map(|_| ())
                .map_err(StepFailure::from),
            Action::ApproveErc721 {
                asset,
                owner,
                token_id,
            } => self
                .erc721(step, asset)?
                .approve(*owner, custodian, *token_id)
                .map_err(StepFailure::from),
            Action::EnableToken {
                caller,
                asset,
                enabled,
            } => treasury
                .enable_token(*caller, *asset, *enabled)
                .map_err(StepFailure::from),
            Action::DepositErc20 {
                caller,
                asset,
                amount,
            } => {
                let token = self.erc20(step, asset)?;
                treasury
                    .deposit_erc20(*caller, token.as_ref(), *amount)
                    .map_err(StepFailure::from)
            }
            Action::WithdrawErc20 {
                caller,
                asset,
                amount,
            } => {
                let token = self.erc20(step, asset)?;
                treasury
                    .withdraw_erc20(*caller, token.as_ref(), *amount)
                    .map_err(StepFailure::from)
            }
            Action::DepositErc721 {
                caller,
                asset,
                token_id,
            } => {
                let token = self.erc721(step, asset)?;
                treasury
                    .deposit_erc721(*caller, token.as_ref(), *token_id)
                    .map_err(StepFailure::from)
            }
            Action::WithdrawErc721 {
                caller,
                asset,
                token_id,
            } => {
                let token = self.erc721(step, asset)?;
                treasury
                    .withdraw_erc721(*caller, token.as_ref(), *token_id)
                    .map_err(StepFailure::from)
            }
            Action::ArmAttacker {
                asset,
                account,
                value,
                propagate,
            } => {
                self.arm_attacker(step, asset, *account, *value, *propagate)?;
                Ok(())
            }
            Action::SetFailure { asset, mode } => {
                let mode = mode.map(FailureMode::from);
                match self.handle(step, asset)? {
                    AssetHandle::Erc20(token) => token.set_failure(mode),
                    AssetHandle::Erc721(token) => token.set_failure(mode),
                }
                Ok(())
            }
        };
        Ok(result)
    }

    fn arm_attacker(
        &mut self,
        step: usize,
        asset: &Address,
        account: Address,
        value: U256,
        propagate: bool,
    ) -> Result<(), ScenarioError> {
        let treasury = Rc::clone(&self.treasury);
        match self.handle(step, asset)? {
            AssetHandle::Erc20(token) => {
                let dyn_token: Rc<dyn Erc20> = token.clone();
                let target = ReentryTarget::Erc20 {
                    asset: Rc::downgrade(&dyn_token),
                    amount: value,
                };
                let attacker =
                    Rc::new(ReentrantWithdrawer::new(treasury, account, target).propagating(propagate));
                token.register_recipient(account, attacker.clone());
                self.attackers.push(attacker);
            }
            AssetHandle::Erc721(token) => {
                let dyn_token: Rc<dyn Erc721> = token.clone();
                let target = ReentryTarget::Erc721 {
                    asset: Rc::downgrade(&dyn_token),
                    token_id: value,
                };
                let attacker =
                    Rc::new(ReentrantWithdrawer::new(treasury, account, target).propagating(propagate));
                token.register_receiver(account, attacker.clone());
                self.attackers.push(attacker);
            }
        }
        tracing::debug!(step, %account, %asset, propagate, "attacker armed");
        Ok(())
    }
}

/// Runs one scenario against a fresh treasury.
pub fn run(scenario: &Scenario) -> Result<ScenarioOutcome, ScenarioError> {
    scenario.validate()?;

    let span = tracing::info_span!("scenario", name = %scenario.name);
    let _entered = span.enter();
    let started = Instant::now();

    let mut world = World::new(scenario);
    let mut steps = Vec::with_capacity(scenario.steps.len());

    for (index, step) in scenario.steps.iter().enumerate() {
        let result = world.execute(index, &step.action)?;
        let (outcome, message) = match result {
            Ok(()) => (Outcome::Ok, None),
            Err(failure) => (failure.outcome, Some(failure.message)),
        };
        let matched = step.expect.map_or(true, |expected| expected == outcome);
        if !matched {
            tracing::warn!(
                index,
                op = step.action.name(),
                expected = ?step.expect,
                actual = ?outcome,
                "step outcome differs from expectation"
            );
        }

        steps.push(StepOutcome {
            index,
            op: step.action.name(),
            outcome,
            message,
            expected: step.expect,
            matched,
            events: world.treasury.take_events().into_iter().collect(),
        });
    }

    let reentry = world
        .attackers
        .iter()
        .flat_map(|a| a.records())
        .collect();

    let outcome = ScenarioOutcome {
        name: scenario.name.clone(),
        assets: scenario
            .assets
            .iter()
            .map(|spec| AssetLabel {
                address: spec.address,
                kind: spec.kind,
                symbol: spec.symbol.clone(),
            })
            .collect(),
        steps,
        snapshot: world.treasury.snapshot(),
        reentry,
        elapsed_us: started.elapsed().as_micros() as u64,
    };

    tracing::info!(
        steps = outcome.steps.len(),
        mismatches = outcome.mismatches(),
        elapsed_us = outcome.elapsed_us,
        "scenario complete"
    );
    Ok(outcome)
}

/// Runs independent scenarios in parallel. Each gets its own treasury on
/// its own worker thread.
pub fn run_batch(scenarios: &[Scenario]) -> Vec<Result<ScenarioOutcome, ScenarioError>> {
    tracing::info!(scenarios = scenarios.len(), "running batch");
    scenarios.par_iter().map(run).collect()
}

// ---------------------------------------------------------------------------
// Amount parsing
// ---------------------------------------------------------------------------

/// Accepts JSON integers, decimal or `0x` strings, and `<int>e<exp>` for
/// unit-scaled amounts (`"50e18"` = 50 tokens at 18 decimals).
mod amount {
    use alloy_primitives::U256;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(U256::from(n)),
            Raw::Text(s) => parse(&s).map_err(D::Error::custom),
        }
    }

    pub(super) fn parse(s: &str) -> Result<U256, String> {
        let s = s.trim();
        if !s.starts_with("0x") {
            if let Some((mantissa, exp)) = s.split_once(['e', 'E']) {
                let mantissa = U256::from_str(mantissa).map_err(|e| format!("{s}: {e}"))?;
                let exp: u64 = exp.parse().map_err(|e| format!("{s}: {e}"))?;
                return U256::from(10)
                    .checked_pow(U256::from(exp))
                    .and_then(|scale| mantissa.checked_mul(scale))
                    .ok_or_else(|| format!("{s}: amount overflows 256 bits"));
            }
        }
        U256::from_str(s).map_err(|e| format!("{s}: {e}"))
    }
}
