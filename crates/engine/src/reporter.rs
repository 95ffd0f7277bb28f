//! Custody report generator.
//!
//! Takes a [`ScenarioOutcome`] and produces a human-readable report with
//! asset labels, per-asset custody totals, step results, and re-entry
//! attempts.

use crate::scenario::{Outcome, ScenarioOutcome};
use alloy_primitives::{Address, U256};
use std::collections::{BTreeMap, HashSet};
use treasury_core::AssetKind;

/// Summary built from one scenario run.
#[derive(Debug)]
pub struct Report {
    pub scenario: String,
    pub total_steps: usize,
    pub failed_steps: usize,
    pub mismatches: usize,
    pub total_events: usize,
    pub reentry_attempts: usize,
    pub reentry_rejected: usize,
    pub groups: Vec<HoldingGroup>,
    pub elapsed: std::time::Duration,
}

/// Custody held for one asset contract.
#[derive(Debug)]
pub struct HoldingGroup {
    pub address: Address,
    pub kind: Option<AssetKind>,
    pub symbol: String,
    pub enabled: bool,
    pub depositors: usize,
    /// Sum of fungible balances (zero for ERC-721).
    pub erc20_total: U256,
    /// Recorded non-fungible holdings.
    pub units: usize,
}

impl Report {
    pub fn build(outcome: &ScenarioOutcome) -> Self {
        let snapshot = &outcome.snapshot;

        #[derive(Default)]
        struct Acc {
            depositors: HashSet<Address>,
            erc20_total: U256,
            units: usize,
        }

        // BTreeMap keeps groups in address order before the final sort.
        let mut by_asset: BTreeMap<Address, Acc> = BTreeMap::new();
        for p in &snapshot.erc20 {
            let acc = by_asset.entry(p.asset).or_default();
            acc.depositors.insert(p.owner);
            acc.erc20_total = acc.erc20_total.saturating_add(p.amount);
        }
        for p in &snapshot.erc721 {
            let acc = by_asset.entry(p.asset).or_default();
            acc.depositors.insert(p.owner);
            acc.units += 1;
        }
        for asset in &snapshot.enabled {
            by_asset.entry(*asset).or_default();
        }

        let mut groups: Vec<HoldingGroup> = by_asset
            .into_iter()
            .map(|(address, acc)| {
                let (kind, symbol) = match outcome.label(&address) {
                    Some(l) => (Some(l.kind), l.symbol.clone()),
                    None => (None, format!("{address}")),
                };
                HoldingGroup {
                    address,
                    kind,
                    symbol,
                    enabled: snapshot.enabled.contains(&address),
                    depositors: acc.depositors.len(),
                    erc20_total: acc.erc20_total,
                    units: acc.units,
                }
            })
            .collect();

        // Most depositors first.
        groups.sort_by(|a, b| b.depositors.cmp(&a.depositors));

        Report {
            scenario: outcome.name.clone(),
            total_steps: outcome.steps.len(),
            failed_steps: outcome
                .steps
                .iter()
                .filter(|s| s.outcome != Outcome::Ok)
                .count(),
            mismatches: outcome.mismatches(),
            total_events: outcome.events().count(),
            reentry_attempts: outcome.reentry.len(),
            reentry_rejected: outcome.reentry.iter().filter(|r| r.rejected).count(),
            groups,
            elapsed: std::time::Duration::from_micros(outcome.elapsed_us),
        }
    }

    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }

    /// Render the report as a formatted string with the step log.
    pub fn render(&self, outcome: &ScenarioOutcome) -> String {
        let mut out = String::new();

        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                    TREASURY CUSTODY REPORT                   ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!("║  Scenario:           {:>39} ║\n", self.scenario));
        out.push_str(&format!("║  Steps:              {:>39} ║\n", self.total_steps));
        out.push_str(&format!("║  Failed steps:       {:>39} ║\n", self.failed_steps));
        out.push_str(&format!("║  Unexpected results: {:>39} ║\n", self.mismatches));
        out.push_str(&format!("║  Events:             {:>39} ║\n", self.total_events));
        out.push_str(&format!(
            "║  Re-entry blocked:   {:>39} ║\n",
            format!("{}/{}", self.reentry_rejected, self.reentry_attempts)
        ));
        out.push_str(&format!("║  Elapsed:            {:>36?} ║\n", self.elapsed));
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        if self.groups.is_empty() {
            out.push_str("║  Nothing in custody.                                         ║\n");
        } else {
            out.push_str("║  CUSTODY                                                     ║\n");
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            for (i, g) in self.groups.iter().enumerate() {
                let kind = g.kind.map_or_else(|| "?".to_string(), |k| k.to_string());
                let held = match g.kind {
                    Some(AssetKind::Erc721) => format!("{} unit(s)", g.units),
                    _ => format!("{}", g.erc20_total),
                };
                out.push_str(&format!(
                    "║  {}. [{}] {} {}\n",
                    i + 1,
                    kind,
                    g.symbol,
                    if g.enabled { "(withdrawable)" } else { "(frozen)" }
                ));
                out.push_str(&format!("║     {}\n", g.address));
                out.push_str(&format!(
                    "║     Held: {}  |  Depositors: {}\n",
                    held, g.depositors
                ));
            }
        }

        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        out.push_str("║  STEPS                                                       ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        for s in &outcome.steps {
            let mark = if s.matched { " " } else { "!" };
            let expected = match s.expected {
                Some(e) if !s.matched => format!(" (expected {})", e.as_str()),
                _ => String::new(),
            };
            out.push_str(&format!(
                "║ {mark}{:>3}. {:<16} {}{}\n",
                s.index,
                s.op,
                s.outcome.as_str(),
                expected
            ));
        }

        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        out
    }
}
