//! Data sink for scenario results.
//!
//! Three row schemas:
//! - [`ScenarioSummaryRow`]: one per scenario run
//! - [`StepRow`]: one per executed step
//! - [`EventRow`]: one per treasury event, tagged with its step
//!
//! One backend: [`json_stream::JsonStreamSink`] writes newline-delimited JSON
//! to any `Write` impl.

pub mod json_stream;

use crate::reporter::Report;
use crate::scenario::ScenarioOutcome;
use serde::Serialize;
use treasury_core::TreasuryEvent;

// ---------------------------------------------------------------------------
// Serializable row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummaryRow {
    pub scenario: String,
    pub total_steps: u32,
    pub failed_steps: u32,
    pub mismatches: u32,
    pub total_events: u32,
    pub reentry_attempts: u32,
    pub reentry_rejected: u32,
    pub erc20_positions: u32,
    pub erc721_positions: u32,
    pub passed: bool,
    pub elapsed_us: u64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRow {
    pub scenario: String,
    pub index: u32,
    pub op: String,
    pub outcome: String,
    pub expected: Option<String>,
    pub matched: bool,
    pub message: Option<String>,
}

/// Event flattened alongside its scenario and step.
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub scenario: String,
    pub step: u32,
    #[serde(flatten)]
    pub event: TreasuryEvent,
}

// ---------------------------------------------------------------------------
// Builder: Report → Rows
// ---------------------------------------------------------------------------

impl Report {
    /// Flatten the report and its outcome into sink-ready rows.
    pub fn to_rows(
        &self,
        outcome: &ScenarioOutcome,
    ) -> (ScenarioSummaryRow, Vec<StepRow>, Vec<EventRow>) {
        let summary = ScenarioSummaryRow {
            scenario: self.scenario.clone(),
            total_steps: self.total_steps as u32,
            failed_steps: self.failed_steps as u32,
            mismatches: self.mismatches as u32,
            total_events: self.total_events as u32,
            reentry_attempts: self.reentry_attempts as u32,
            reentry_rejected: self.reentry_rejected as u32,
            erc20_positions: outcome.snapshot.erc20.len() as u32,
            erc721_positions: outcome.snapshot.erc721.len() as u32,
            passed: self.passed(),
            elapsed_us: self.elapsed.as_micros() as u64,
            created_at: unix_now(),
        };

        let steps = outcome
            .steps
            .iter()
            .map(|s| StepRow {
                scenario: self.scenario.clone(),
                index: s.index as u32,
                op: s.op.to_string(),
                outcome: s.outcome.as_str().to_string(),
                expected: s.expected.map(|e| e.as_str().to_string()),
                matched: s.matched,
                message: s.message.clone(),
            })
            .collect();

        let events = outcome
            .events()
            .map(|(step, event)| EventRow {
                scenario: self.scenario.clone(),
                step: step as u32,
                event: event.clone(),
            })
            .collect();

        (summary, steps, events)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
