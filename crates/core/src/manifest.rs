//! The assembly manifest — the audit record of one assembly call.
//!
//! Constructed once per call, immutable afterward, consumed by the caller
//! for audit and telemetry. Field names and reason strings are wire-stable:
//! downstream logging pipelines key off them.

use serde::{Deserialize, Serialize};

use crate::budget::SectionName;
use crate::unit::UnitId;

/// Why a unit was left out of (or shrunk within) the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionReason {
    /// Dropped by the most-recent-first retention walk.
    EvictedOldest,
    /// Content-level truncation produced a smaller derived unit.
    Truncated,
    /// Didn't rank high enough (or truncation would leave nothing).
    ExcludedLowRelevance,
    /// Removed to preserve structural validity (orphaned tool pairing,
    /// or the unit could not be tokenized at all).
    StructuralRemoval,
}

/// One eviction/truncation decision, in the order it was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// The unit this decision applies to.
    pub unit_id: UnitId,

    /// Which section the unit was offered to.
    pub section: SectionName,

    /// Why it was evicted or truncated.
    pub reason: EvictionReason,

    /// Tokens removed from the context by this decision.
    pub tokens_freed: usize,

    /// For truncation/summarization: the derived unit that replaced this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<UnitId>,
}

/// Per-section breakdown of the assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    /// Section name.
    pub name: SectionName,

    /// Sub-budget granted by the allocator.
    pub budget: usize,

    /// Tokens actually consumed.
    pub tokens_used: usize,

    /// Units included after fitting.
    pub units_included: usize,

    /// Units offered to the fitter before any eviction.
    pub units_offered: usize,
}

/// The audit record for one assembly call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Model the context was counted against.
    pub model: String,

    /// The hard ceiling in force.
    pub ceiling: usize,

    /// Tokens reserved for the completion.
    pub reserved_output: usize,

    /// Total tokens of the assembled context.
    pub total_tokens: usize,

    /// `total_tokens` as a percentage of the available budget
    /// (ceiling − reserved_output).
    pub utilization_pct: f32,

    /// Per-section breakdown, in final output order.
    pub sections: Vec<SectionReport>,

    /// Ordered log of every eviction/truncation decision.
    pub decisions: Vec<Decision>,

    /// Candidate history tokens that could not be included; 0 when the full
    /// history fit. Surfaced so callers can warn users about truncation.
    pub overage_tokens: usize,
}

impl Manifest {
    /// Look up a section report by name.
    pub fn section(&self, name: SectionName) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// All decisions recorded for one section.
    pub fn decisions_for(&self, name: SectionName) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(move |d| d.section == name)
    }
}
