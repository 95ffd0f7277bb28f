//! Custodial treasury engine: access gate, asset registry, ledgers,
//! reentrancy guard, transfer layer, scenario runner, reports, and sinks.

pub mod access;
pub mod attacker;
pub mod guard;
pub mod ledger;
pub mod registry;
pub mod reporter;
pub mod scenario;
pub mod sink;
pub mod transfer;
pub mod treasury;

pub use ledger::Ledger;
pub use scenario::{run, run_batch, Scenario, ScenarioError, ScenarioOutcome};
pub use treasury::Treasury;
