//! Context assembly — the orchestration of one engine call.
//!
//! Counts the fixed sections exactly, allocates sub-budgets, fits history
//! and attachments concurrently, merges everything in canonical order
//! (system, tools, history, attachments), re-validates the cross-section
//! invariants, and emits the manifest. The caller gets either a valid
//! bounded context plus its manifest, or a clearly typed fatal error —
//! never a context that exceeds the requested ceiling.

use std::collections::HashSet;
use std::sync::Arc;

use promptloom_core::{
    ContextUnit, Decision, EngineError, EvictionReason, Manifest, Result, SectionName,
    SectionReport, Summarizer, TokenCounter,
};
use tracing::{debug, warn};

use crate::allocator::{BudgetAllocator, SectionRequest};
use crate::attachments::AttachmentFitter;
use crate::history::{HistoryFitter, lineage_root};
use crate::policy::AssemblyPolicy;

/// Everything the assembler needs for a single call. Units are borrowed:
/// the engine never mutates caller-owned content.
pub struct AssemblyInput<'a> {
    /// System prompt sections. Mandatory: counted exactly, never trimmed.
    pub system: &'a [ContextUnit],

    /// Pre-rendered tool schema units. Mandatory, like the system prompt.
    pub tools: &'a [ContextUnit],

    /// Conversation history in sequence order.
    pub history: &'a [ContextUnit],

    /// Attachment chunks, relevance-scored by the caller.
    pub attachments: &'a [ContextUnit],
}

/// The assembled context plus its audit manifest.
#[derive(Debug)]
pub struct FitResult {
    /// Final ordered unit sequence, ready to become the message list of a
    /// chat-completion request.
    pub units: Vec<ContextUnit>,

    /// The audit record for this call.
    pub manifest: Manifest,
}

/// The context assembler. Stateless across calls — create one and reuse it
/// from as many tasks as needed.
pub struct ContextAssembler {
    policy: AssemblyPolicy,
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextAssembler {
    /// Create an assembler. Fails fast on an invalid policy.
    pub fn new(policy: AssemblyPolicy, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            counter,
            summarizer: None,
        })
    }

    /// Configure a summarizer: the history fitter will offer it the evicted
    /// tail instead of dropping those turns outright.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Assemble a bounded context from the candidate input.
    pub async fn assemble(&self, input: &AssemblyInput<'_>) -> Result<FitResult> {
        let model = self.policy.model.as_str();
        let budget = self.policy.budget();

        // Fixed sections are counted exactly, up front. An untokenizable
        // fixed unit is excluded, not fatal.
        let mut fixed_decisions: Vec<Decision> = Vec::new();
        let (system_units, system_tokens) = self
            .count_fixed(input.system, SectionName::System, &mut fixed_decisions)
            .await;
        let (tool_units, tool_tokens) = self
            .count_fixed(input.tools, SectionName::Tools, &mut fixed_decisions)
            .await;

        let allocation = BudgetAllocator::allocate(
            &budget,
            &[
                SectionRequest::fixed(SectionName::System, system_tokens),
                SectionRequest::fixed(SectionName::Tools, tool_tokens),
                SectionRequest::fill_remaining(SectionName::History, self.policy.history.weight),
                SectionRequest::weighted(SectionName::Attachments, self.policy.attachments.weight),
            ],
        )?;
        let history_budget = allocation.get(SectionName::History);
        let attachment_budget = allocation.get(SectionName::Attachments);
        debug!(
            system = system_tokens,
            tools = tool_tokens,
            history = history_budget,
            attachments = attachment_budget,
            "Allocated section budgets"
        );

        // History and attachments have no data dependency on each other
        // after allocation; fit them concurrently.
        let history_fitter =
            HistoryFitter::new(self.counter.as_ref(), self.summarizer.as_deref(), &self.policy.history);
        let attachment_fitter =
            AttachmentFitter::new(self.counter.as_ref(), &self.policy.attachments);
        let (history_fit, attachment_fit) = tokio::join!(
            history_fitter.fit(input.history, history_budget, model),
            attachment_fitter.fit(input.attachments, attachment_budget, model),
        );

        // Merge in canonical order.
        let mut units =
            Vec::with_capacity(system_units.len() + tool_units.len() + history_fit.units.len() + attachment_fit.units.len());
        units.extend(system_units);
        units.extend(tool_units);
        units.extend(history_fit.units);
        units.extend(attachment_fit.units);

        let total_tokens =
            system_tokens + tool_tokens + history_fit.tokens_used + attachment_fit.tokens_used;
        let available = budget.available();

        let section_budgets = || {
            vec![
                ("system".to_string(), system_tokens),
                ("tools".to_string(), tool_tokens),
                ("history".to_string(), history_budget),
                ("attachments".to_string(), attachment_budget),
            ]
        };

        // Final assertions. A failure here is a fitter bug, never a normal
        // runtime condition.
        if total_tokens > available {
            return Err(EngineError::InvariantViolation {
                detail: "assembled context exceeds the available budget".into(),
                section_budgets: section_budgets(),
                computed_total: total_tokens,
            });
        }
        if let Some(detail) = find_orphaned_pairing(&units, input.history) {
            return Err(EngineError::InvariantViolation {
                detail,
                section_budgets: section_budgets(),
                computed_total: total_tokens,
            });
        }

        let utilization_pct = if available > 0 {
            (total_tokens as f32 / available as f32) * 100.0
        } else {
            0.0
        };

        let mut decisions = fixed_decisions;
        decisions.extend(history_fit.decisions);
        decisions.extend(attachment_fit.decisions);
        if history_fit.overage_tokens > 0 {
            warn!(
                overage = history_fit.overage_tokens,
                "Candidate history exceeded its budget; oldest turns were dropped"
            );
        }

        let manifest = Manifest {
            model: self.policy.model.clone(),
            ceiling: budget.ceiling,
            reserved_output: budget.reserved_output,
            total_tokens,
            utilization_pct,
            sections: vec![
                SectionReport {
                    name: SectionName::System,
                    budget: allocation.get(SectionName::System),
                    tokens_used: system_tokens,
                    units_included: input.system.len()
                        - decisions_in(&decisions, SectionName::System),
                    units_offered: input.system.len(),
                },
                SectionReport {
                    name: SectionName::Tools,
                    budget: allocation.get(SectionName::Tools),
                    tokens_used: tool_tokens,
                    units_included: input.tools.len() - decisions_in(&decisions, SectionName::Tools),
                    units_offered: input.tools.len(),
                },
                SectionReport {
                    name: SectionName::History,
                    budget: history_budget,
                    tokens_used: history_fit.tokens_used,
                    units_included: units
                        .iter()
                        .filter(|u| history_section_member(u, input))
                        .count(),
                    units_offered: history_fit.units_offered,
                },
                SectionReport {
                    name: SectionName::Attachments,
                    budget: attachment_budget,
                    tokens_used: attachment_fit.tokens_used,
                    units_included: attachment_fit.units_offered
                        - decisions_in(&decisions, SectionName::Attachments),
                    units_offered: attachment_fit.units_offered,
                },
            ],
            decisions,
            overage_tokens: history_fit.overage_tokens,
        };

        debug!(
            total = total_tokens,
            available,
            utilization = utilization_pct,
            "Assembled context"
        );

        Ok(FitResult { units, manifest })
    }

    async fn count_fixed(
        &self,
        units: &[ContextUnit],
        section: SectionName,
        decisions: &mut Vec<Decision>,
    ) -> (Vec<ContextUnit>, usize) {
        let model = self.policy.model.as_str();
        let mut included = Vec::with_capacity(units.len());
        let mut total = 0usize;
        for unit in units {
            match self.counter.count_unit(unit, model).await {
                Ok(cost) => {
                    total += cost;
                    included.push(unit.clone());
                }
                Err(e) => {
                    warn!(unit = %unit.id, section = %section, error = %e, "Fixed unit could not be tokenized, excluding");
                    decisions.push(Decision {
                        unit_id: unit.id.clone(),
                        section,
                        reason: EvictionReason::StructuralRemoval,
                        tokens_freed: 0,
                        replacement_id: None,
                    });
                }
            }
        }
        (included, total)
    }
}

fn decisions_in(decisions: &[Decision], section: SectionName) -> usize {
    decisions.iter().filter(|d| d.section == section).count()
}

/// A final unit belongs to the history section when it isn't one of the
/// fixed or attachment inputs (derived units count toward their originals'
/// section).
fn history_section_member(unit: &ContextUnit, input: &AssemblyInput<'_>) -> bool {
    let root = lineage_root(&unit.id);
    let in_list = |list: &[ContextUnit]| list.iter().any(|u| u.id.0 == root);
    !in_list(input.system) && !in_list(input.tools) && !in_list(input.attachments)
}

/// Re-verify tool pairing across the final merged output. Returns a
/// diagnostic string when an orphan survives — which means a fitter bug.
fn find_orphaned_pairing(units: &[ContextUnit], offered_history: &[ContextUnit]) -> Option<String> {
    let present: HashSet<&str> = units.iter().map(|u| lineage_root(&u.id)).collect();
    let linked: HashSet<&str> = units
        .iter()
        .filter_map(|u| u.tool_link.as_ref())
        .map(|id| id.0.as_str())
        .collect();
    let calls_with_results: HashSet<&str> = offered_history
        .iter()
        .filter_map(|u| u.tool_link.as_ref())
        .map(|id| id.0.as_str())
        .collect();

    for unit in units {
        if unit.is_tool_result() {
            match &unit.tool_link {
                Some(call_id) if present.contains(call_id.0.as_str()) => {}
                _ => {
                    return Some(format!(
                        "tool-result {} retained without its tool-call",
                        unit.id
                    ));
                }
            }
        } else if unit.is_tool_call() {
            let root = lineage_root(&unit.id);
            if calls_with_results.contains(root) && !linked.contains(root) {
                return Some(format!(
                    "tool-call {} retained without its tool-result",
                    unit.id
                ));
            }
        }
    }
    None
}
