//! Attachment fitting — relevance-ranked greedy packing.
//!
//! Attachments are not inherently ordered by conversational necessity, so
//! unlike history they are packed by caller-supplied relevance: highest
//! rank first until the sub-budget is exhausted. Ties break by recency,
//! then by original offer order. A chunk that does not fully fit is
//! truncated when the policy allows partial inclusion, else skipped — the
//! fitter never splits a unit; oversized attachments are chunked upstream.

use promptloom_core::{ContextUnit, Decision, EvictionReason, SectionName, TokenCounter};
use tracing::{debug, warn};

use crate::policy::AttachmentPolicy;
use crate::truncate::truncate_unit_to_fit;

/// The outcome of fitting one attachments section.
#[derive(Debug)]
pub struct AttachmentFit {
    /// Included chunks in rank order (derived units included).
    pub units: Vec<ContextUnit>,

    /// Tokens consumed by the included chunks.
    pub tokens_used: usize,

    /// Every skip/truncation decision, in rank-walk order.
    pub decisions: Vec<Decision>,

    /// Chunks offered before any packing.
    pub units_offered: usize,
}

/// Fits attachment chunks into their sub-budget.
pub struct AttachmentFitter<'a> {
    counter: &'a dyn TokenCounter,
    policy: &'a AttachmentPolicy,
}

impl<'a> AttachmentFitter<'a> {
    pub fn new(counter: &'a dyn TokenCounter, policy: &'a AttachmentPolicy) -> Self {
        Self { counter, policy }
    }

    /// Pack `chunks` greedily, highest relevance first.
    pub async fn fit(
        &self,
        chunks: &[ContextUnit],
        sub_budget: usize,
        model: &str,
    ) -> AttachmentFit {
        let units_offered = chunks.len();
        let mut decisions: Vec<Decision> = Vec::new();

        // Price every chunk; untokenizable chunks are excluded up front.
        let mut costed: Vec<(usize, &ContextUnit, usize)> = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            match self.counter.count_unit(chunk, model).await {
                Ok(cost) => costed.push((index, chunk, cost)),
                Err(e) => {
                    warn!(unit = %chunk.id, error = %e, "Attachment chunk could not be tokenized, excluding");
                    decisions.push(Decision {
                        unit_id: chunk.id.clone(),
                        section: SectionName::Attachments,
                        reason: EvictionReason::StructuralRemoval,
                        tokens_freed: 0,
                        replacement_id: None,
                    });
                }
            }
        }

        // Rank: relevance descending (missing scores rank lowest), then
        // recency, then original offer order.
        costed.sort_by(|(ia, a, _), (ib, b, _)| {
            let ra = a.relevance.unwrap_or(0.0);
            let rb = b.relevance.unwrap_or(0.0);
            rb.total_cmp(&ra)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| ia.cmp(ib))
        });

        let mut included: Vec<(ContextUnit, usize)> = Vec::new();
        let mut remaining = sub_budget;
        for (_, chunk, cost) in costed {
            if cost <= remaining {
                remaining -= cost;
                included.push((chunk.clone(), cost));
                continue;
            }

            if self.policy.allow_truncation {
                match truncate_unit_to_fit(self.counter, chunk, remaining, model).await {
                    Ok(Some((derived, derived_cost))) => {
                        debug!(unit = %chunk.id, from = cost, to = derived_cost, "Truncated attachment chunk");
                        decisions.push(Decision {
                            unit_id: chunk.id.clone(),
                            section: SectionName::Attachments,
                            reason: EvictionReason::Truncated,
                            tokens_freed: cost - derived_cost,
                            replacement_id: Some(derived.id.clone()),
                        });
                        remaining -= derived_cost;
                        included.push((derived, derived_cost));
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(unit = %chunk.id, error = %e, "Counting failed during truncation, skipping chunk");
                        decisions.push(Decision {
                            unit_id: chunk.id.clone(),
                            section: SectionName::Attachments,
                            reason: EvictionReason::StructuralRemoval,
                            tokens_freed: cost,
                            replacement_id: None,
                        });
                        continue;
                    }
                }
            }

            decisions.push(Decision {
                unit_id: chunk.id.clone(),
                section: SectionName::Attachments,
                reason: EvictionReason::ExcludedLowRelevance,
                tokens_freed: cost,
                replacement_id: None,
            });
        }

        let tokens_used: usize = included.iter().map(|(_, c)| c).sum();
        debug!(
            included = included.len(),
            offered = units_offered,
            tokens = tokens_used,
            budget = sub_budget,
            "Fitted attachments section"
        );

        AttachmentFit {
            units: included.into_iter().map(|(unit, _)| unit).collect(),
            tokens_used,
            decisions,
            units_offered,
        }
    }
}
