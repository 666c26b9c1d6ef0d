//! History fitting — deterministic most-recent-first retention.
//!
//! Recency is the strongest relevance signal for conversational context, so
//! the fitter walks from the newest unit backward, including turns until the
//! sub-budget runs out, then repairs structural invariants: a tool-result
//! whose tool-call fell outside the cutoff (or vice versa) is dropped rather
//! than left as an orphan. Repair may leave slack budget but never an
//! invalid pairing.
//!
//! Two compression stages soften hard eviction:
//!
//! - an abbreviation pre-pass replaces old oversized tool results with a
//!   placeholder before whole turns are dropped;
//! - a configured [`Summarizer`] is offered the evicted tail and, when its
//!   summary is genuinely smaller and fits the slack, the summary replaces
//!   the dropped turns. Both stages fall back silently to plain eviction.

use std::collections::HashSet;

use promptloom_core::{
    ContextUnit, Decision, EvictionReason, SectionName, Summarizer, TokenCounter, UnitId,
};
use tracing::{debug, warn};

use crate::policy::HistoryPolicy;
use crate::truncate::truncate_unit_to_fit;

/// The outcome of fitting one history section.
#[derive(Debug)]
pub struct HistoryFit {
    /// Included units in chronological order (derived units included).
    pub units: Vec<ContextUnit>,

    /// Tokens consumed by the included units.
    pub tokens_used: usize,

    /// Every eviction/truncation decision, oldest-first within each phase.
    pub decisions: Vec<Decision>,

    /// Units offered before any eviction.
    pub units_offered: usize,

    /// Candidate tokens that could not be included; 0 when everything fit.
    pub overage_tokens: usize,
}

/// Fits an ordered conversation history into its sub-budget.
pub struct HistoryFitter<'a> {
    counter: &'a dyn TokenCounter,
    summarizer: Option<&'a dyn Summarizer>,
    policy: &'a HistoryPolicy,
}

/// The pre-derivation id of a unit: derived units carry a `#t` suffix per
/// derivation, and tool links always reference original ids.
pub(crate) fn lineage_root(id: &UnitId) -> &str {
    let mut root = id.0.as_str();
    while let Some(stripped) = root.strip_suffix("#t") {
        root = stripped;
    }
    root
}

impl<'a> HistoryFitter<'a> {
    pub fn new(
        counter: &'a dyn TokenCounter,
        summarizer: Option<&'a dyn Summarizer>,
        policy: &'a HistoryPolicy,
    ) -> Self {
        Self {
            counter,
            summarizer,
            policy,
        }
    }

    /// Select the maximal-recency, budget-respecting, structurally valid
    /// subsequence of `history`.
    pub async fn fit(
        &self,
        history: &[ContextUnit],
        sub_budget: usize,
        model: &str,
    ) -> HistoryFit {
        let units_offered = history.len();
        let mut decisions: Vec<Decision> = Vec::new();

        // Order chronologically. Sequence indices are strictly increasing by
        // invariant; on a duplicate seq the lexicographically smaller id is
        // treated as older.
        let mut ordered: Vec<&ContextUnit> = history.iter().collect();
        ordered.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));

        // Price every unit individually. An untokenizable unit is excluded
        // and the assembly carries on.
        let mut costed: Vec<(ContextUnit, usize)> = Vec::with_capacity(ordered.len());
        for unit in ordered {
            match self.counter.count_unit(unit, model).await {
                Ok(cost) => costed.push((unit.clone(), cost)),
                Err(e) => {
                    warn!(unit = %unit.id, error = %e, "History unit could not be tokenized, excluding");
                    decisions.push(Decision {
                        unit_id: unit.id.clone(),
                        section: SectionName::History,
                        reason: EvictionReason::StructuralRemoval,
                        tokens_freed: 0,
                        replacement_id: None,
                    });
                }
            }
        }

        let mut candidate_total: usize = costed.iter().map(|(_, c)| c).sum();

        // Abbreviation pre-pass: under budget pressure, old tool results are
        // replaced by a cheap placeholder before whole turns are evicted.
        if self.policy.abbreviate_tool_results && candidate_total > sub_budget {
            self.abbreviate_old_tool_results(&mut costed, &mut decisions, model)
                .await;
            candidate_total = costed.iter().map(|(_, c)| c).sum();
        }

        // Retention walk, newest to oldest. The first unit that would
        // overflow the sub-budget stops the walk; it and everything older is
        // evicted.
        let mut included: Vec<(ContextUnit, usize)> = Vec::new();
        let mut used = 0usize;
        let mut cutoff = 0usize;
        for (i, (_, cost)) in costed.iter().enumerate().rev() {
            if used + cost <= sub_budget {
                used += cost;
            } else {
                cutoff = i + 1;
                break;
            }
        }
        let mut evicted: Vec<(ContextUnit, usize)> = costed[..cutoff].to_vec();
        included.extend(costed[cutoff..].iter().cloned());

        // The single newest unit alone exceeding the sub-budget is truncated
        // to fit rather than dropped, unless nothing meaningful would
        // survive.
        let mut newest_decision: Option<Decision> = None;
        if included.is_empty() {
            if let Some((newest, newest_cost)) = evicted.pop() {
                newest_decision = Some(
                    self.fit_oversized_newest(newest, newest_cost, sub_budget, model, &mut included, &mut used)
                        .await,
                );
            }
        }

        // Structural repair: drop orphaned halves of tool pairings.
        let repair_decisions = repair_tool_pairings(history, &mut included, &mut used);

        // Offer the evicted tail to the summarizer; on any failure fall back
        // to plain eviction.
        let mut summary_head: Option<(ContextUnit, usize)> = None;
        let mut summary_id: Option<UnitId> = None;
        if !evicted.is_empty() {
            if let Some(summarizer) = self.summarizer {
                if let Some((summary, cost)) = self
                    .try_summarize_tail(summarizer, &evicted, used, sub_budget, model)
                    .await
                {
                    summary_id = Some(summary.id.clone());
                    used += cost;
                    summary_head = Some((summary, cost));
                }
            }
        }

        // Decision log: evictions oldest-first, then the newest-unit
        // outcome, then structural repairs.
        for (unit, cost) in &evicted {
            decisions.push(Decision {
                unit_id: unit.id.clone(),
                section: SectionName::History,
                reason: EvictionReason::EvictedOldest,
                tokens_freed: *cost,
                replacement_id: summary_id.clone(),
            });
        }
        decisions.extend(newest_decision);
        decisions.extend(repair_decisions);

        let units: Vec<ContextUnit> = summary_head
            .into_iter()
            .chain(included)
            .map(|(unit, _)| unit)
            .collect();

        debug!(
            included = units.len(),
            offered = units_offered,
            tokens = used,
            budget = sub_budget,
            "Fitted history section"
        );

        HistoryFit {
            units,
            tokens_used: used,
            decisions,
            units_offered,
            overage_tokens: candidate_total.saturating_sub(used),
        }
    }

    async fn abbreviate_old_tool_results(
        &self,
        costed: &mut [(ContextUnit, usize)],
        decisions: &mut Vec<Decision>,
        model: &str,
    ) {
        let exempt: HashSet<UnitId> = costed
            .iter()
            .rev()
            .filter(|(u, _)| u.is_tool_result())
            .take(self.policy.keep_recent_tool_results)
            .map(|(u, _)| u.id.clone())
            .collect();

        for slot in costed.iter_mut() {
            if !slot.0.is_tool_result() || exempt.contains(&slot.0.id) {
                continue;
            }
            let derived = slot
                .0
                .derive_truncated(self.policy.tool_result_placeholder.clone());
            let derived_cost = match self.counter.count_unit(&derived, model).await {
                Ok(cost) => cost,
                Err(e) => {
                    warn!(unit = %slot.0.id, error = %e, "Could not count placeholder, keeping original");
                    continue;
                }
            };
            if derived_cost < slot.1 {
                debug!(
                    unit = %slot.0.id,
                    from = slot.1,
                    to = derived_cost,
                    "Abbreviated old tool result"
                );
                decisions.push(Decision {
                    unit_id: slot.0.id.clone(),
                    section: SectionName::History,
                    reason: EvictionReason::Truncated,
                    tokens_freed: slot.1 - derived_cost,
                    replacement_id: Some(derived.id.clone()),
                });
                *slot = (derived, derived_cost);
            }
        }
    }

    async fn fit_oversized_newest(
        &self,
        newest: ContextUnit,
        newest_cost: usize,
        sub_budget: usize,
        model: &str,
        included: &mut Vec<(ContextUnit, usize)>,
        used: &mut usize,
    ) -> Decision {
        if self.policy.allow_truncation {
            match truncate_unit_to_fit(self.counter, &newest, sub_budget, model).await {
                Ok(Some((derived, cost))) => {
                    debug!(unit = %newest.id, from = newest_cost, to = cost, "Truncated oversized newest unit");
                    let decision = Decision {
                        unit_id: newest.id.clone(),
                        section: SectionName::History,
                        reason: EvictionReason::Truncated,
                        tokens_freed: newest_cost - cost,
                        replacement_id: Some(derived.id.clone()),
                    };
                    *used += cost;
                    included.push((derived, cost));
                    return decision;
                }
                Ok(None) => {
                    debug!(unit = %newest.id, "No semantic content survives truncation, excluding");
                }
                Err(e) => {
                    warn!(unit = %newest.id, error = %e, "Counting failed during truncation, excluding");
                }
            }
        }
        Decision {
            unit_id: newest.id.clone(),
            section: SectionName::History,
            reason: EvictionReason::ExcludedLowRelevance,
            tokens_freed: newest_cost,
            replacement_id: None,
        }
    }

    async fn try_summarize_tail(
        &self,
        summarizer: &dyn Summarizer,
        evicted: &[(ContextUnit, usize)],
        used: usize,
        sub_budget: usize,
        model: &str,
    ) -> Option<(ContextUnit, usize)> {
        let tail: Vec<ContextUnit> = evicted.iter().map(|(u, _)| u.clone()).collect();
        let tail_cost: usize = evicted.iter().map(|(_, c)| c).sum();

        let summary = match summarizer.summarize(&tail, model).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Summarization failed, falling back to eviction");
                return None;
            }
        };
        // A summary must not re-enter the tool pairing protocol.
        if summary.is_tool_call() || summary.is_tool_result() || summary.tool_link.is_some() {
            warn!(summary = %summary.id, "Summarizer returned a tool-protocol unit, falling back to eviction");
            return None;
        }
        // Never trust the collaborator's arithmetic: re-count the summary.
        let cost = match self.counter.count_unit(&summary, model).await {
            Ok(cost) => cost,
            Err(e) => {
                warn!(error = %e, "Could not count summary, falling back to eviction");
                return None;
            }
        };
        if cost >= tail_cost || used + cost > sub_budget {
            warn!(
                summary_tokens = cost,
                original_tokens = tail_cost,
                slack = sub_budget - used,
                "Summary not small enough, falling back to eviction"
            );
            return None;
        }

        // Seat the summary ahead of every retained unit.
        let mut summary = summary;
        summary.seq = tail[0].seq;
        debug!(
            summary = %summary.id,
            tokens = cost,
            replaced = tail.len(),
            "Compressed evicted history tail into summary"
        );
        Some((summary, cost))
    }
}

/// Drop orphaned halves of tool-call/tool-result pairs from `included`.
///
/// A result is orphaned when its linked call is not retained. A call is
/// orphaned when some offered result links to it but no retained unit does —
/// a call whose result never existed among the candidates is left alone.
fn repair_tool_pairings(
    offered: &[ContextUnit],
    included: &mut Vec<(ContextUnit, usize)>,
    used: &mut usize,
) -> Vec<Decision> {
    let included_roots: HashSet<String> = included
        .iter()
        .map(|(u, _)| lineage_root(&u.id).to_string())
        .collect();
    let included_links: HashSet<String> = included
        .iter()
        .filter_map(|(u, _)| u.tool_link.as_ref())
        .map(|id| id.0.clone())
        .collect();
    let calls_with_results: HashSet<String> = offered
        .iter()
        .filter_map(|u| u.tool_link.as_ref())
        .map(|id| id.0.clone())
        .collect();

    let mut decisions = Vec::new();
    included.retain(|(unit, cost)| {
        let orphaned = if unit.is_tool_result() {
            match &unit.tool_link {
                Some(call_id) => !included_roots.contains(call_id.0.as_str()),
                // a result without linkage cannot be validly paired
                None => true,
            }
        } else if unit.is_tool_call() {
            let root = lineage_root(&unit.id);
            calls_with_results.contains(root) && !included_links.contains(root)
        } else {
            false
        };

        if orphaned {
            debug!(unit = %unit.id, "Dropping orphaned tool pairing half");
            *used -= cost;
            decisions.push(Decision {
                unit_id: unit.id.clone(),
                section: SectionName::History,
                reason: EvictionReason::StructuralRemoval,
                tokens_freed: *cost,
                replacement_id: None,
            });
        }
        !orphaned
    });
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use promptloom_core::{CountError, SummarizeError};

    /// chars/4 rounded up, +4 per-unit overhead, like the heuristic backend.
    struct TestCounter;

    #[async_trait]
    impl TokenCounter for TestCounter {
        async fn count(&self, content: &str, _model: &str) -> Result<usize, CountError> {
            Ok(content.len().div_ceil(4))
        }
    }

    /// Counter that refuses content containing a marker string.
    struct PickyCounter;

    #[async_trait]
    impl TokenCounter for PickyCounter {
        async fn count(&self, content: &str, _model: &str) -> Result<usize, CountError> {
            if content.contains("<binary>") {
                return Err(CountError::Untokenizable {
                    reason: "binary content".into(),
                });
            }
            Ok(content.len().div_ceil(4))
        }
    }

    fn fitter<'a>(counter: &'a dyn TokenCounter, policy: &'a HistoryPolicy) -> HistoryFitter<'a> {
        HistoryFitter::new(counter, None, policy)
    }

    /// A unit costing exactly `tokens` under TestCounter (4 chars/token,
    /// 4 tokens overhead).
    fn unit_with_cost(seq: u64, id: &str, tokens: usize) -> ContextUnit {
        assert!(tokens > 4, "cost must exceed the 4-token overhead");
        ContextUnit::user(seq, "x".repeat((tokens - 4) * 4)).with_id(id)
    }

    #[tokio::test]
    async fn full_history_fits_untouched() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history: Vec<ContextUnit> =
            (0..5).map(|i| unit_with_cost(i, &format!("m{i}"), 10)).collect();

        let fit = fitter(&counter, &policy).fit(&history, 100, "m").await;
        assert_eq!(fit.units.len(), 5);
        assert_eq!(fit.tokens_used, 50);
        assert!(fit.decisions.is_empty());
        assert_eq!(fit.overage_tokens, 0);
    }

    #[tokio::test]
    async fn oldest_evicted_first() {
        // 10 messages of 100 tokens, budget 850 → the 8 newest are kept
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history: Vec<ContextUnit> =
            (0..10).map(|i| unit_with_cost(i, &format!("m{i}"), 100)).collect();

        let fit = fitter(&counter, &policy).fit(&history, 850, "m").await;
        assert_eq!(fit.units.len(), 8);
        assert_eq!(fit.tokens_used, 800);
        assert_eq!(fit.units[0].id.0, "m2");
        assert_eq!(fit.units[7].id.0, "m9");

        let evictions: Vec<_> = fit
            .decisions
            .iter()
            .filter(|d| d.reason == EvictionReason::EvictedOldest)
            .collect();
        assert_eq!(evictions.len(), 2);
        assert_eq!(evictions[0].unit_id.0, "m0");
        assert_eq!(evictions[1].unit_id.0, "m1");
        assert_eq!(fit.overage_tokens, 200);
    }

    #[tokio::test]
    async fn recency_is_monotonic() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history: Vec<ContextUnit> = (0..20)
            .map(|i| unit_with_cost(i, &format!("m{i:02}"), 7 + (i as usize % 5)))
            .collect();

        let fit = fitter(&counter, &policy).fit(&history, 60, "m").await;
        // every included unit must be newer than every evicted one
        let min_included_seq = fit.units.iter().map(|u| u.seq).min().unwrap();
        for decision in &fit.decisions {
            let seq = history
                .iter()
                .find(|u| u.id == decision.unit_id)
                .unwrap()
                .seq;
            assert!(seq < min_included_seq);
        }
    }

    #[tokio::test]
    async fn oversized_newest_truncated_to_fit() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        // one unit of 104 tokens against a budget of 20
        let history = vec![unit_with_cost(0, "big", 104)];

        let fit = fitter(&counter, &policy).fit(&history, 20, "m").await;
        assert_eq!(fit.units.len(), 1);
        assert!(fit.tokens_used <= 20);
        assert_eq!(fit.units[0].id.0, "big#t");
        assert_eq!(fit.decisions.len(), 1);
        assert_eq!(fit.decisions[0].reason, EvictionReason::Truncated);
        assert_eq!(
            fit.decisions[0].replacement_id.as_ref().unwrap().0,
            "big#t"
        );
    }

    #[tokio::test]
    async fn oversized_newest_excluded_when_truncation_disabled() {
        let policy = HistoryPolicy {
            allow_truncation: false,
            ..Default::default()
        };
        let counter = TestCounter;
        let history = vec![unit_with_cost(0, "big", 104)];

        let fit = fitter(&counter, &policy).fit(&history, 20, "m").await;
        assert!(fit.units.is_empty());
        assert_eq!(fit.decisions[0].reason, EvictionReason::ExcludedLowRelevance);
    }

    #[tokio::test]
    async fn oversized_newest_excluded_when_nothing_survives() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history = vec![unit_with_cost(0, "big", 104)];

        // budget of 4 == overhead → no content token can survive
        let fit = fitter(&counter, &policy).fit(&history, 4, "m").await;
        assert!(fit.units.is_empty());
        assert_eq!(fit.decisions[0].reason, EvictionReason::ExcludedLowRelevance);
    }

    #[tokio::test]
    async fn orphaned_tool_result_dropped() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;

        // call (seq 0) is old and will be evicted; its result (seq 1) would
        // survive the cutoff but must be dropped as an orphan.
        let call = ContextUnit::tool_call(0, "x".repeat(400)).with_id("call-1"); // 104 tokens
        let result = ContextUnit::tool_result(1, call.id.clone(), "x".repeat(40)).with_id("res-1"); // 14
        let newer = unit_with_cost(2, "m2", 14);
        let history = vec![call, result, newer];

        let fit = fitter(&counter, &policy).fit(&history, 30, "m").await;
        let ids: Vec<&str> = fit.units.iter().map(|u| u.id.0.as_str()).collect();
        assert_eq!(ids, vec!["m2"]);

        let repair = fit
            .decisions
            .iter()
            .find(|d| d.reason == EvictionReason::StructuralRemoval)
            .unwrap();
        assert_eq!(repair.unit_id.0, "res-1");
        // repaired total stays within budget and excludes the orphan's cost
        assert_eq!(fit.tokens_used, 14);
    }

    #[tokio::test]
    async fn call_with_untokenizable_result_dropped() {
        let policy = HistoryPolicy::default();
        let counter = PickyCounter;

        // the result cannot be counted and is excluded up front; the call
        // would fit but must not survive without it
        let call = ContextUnit::tool_call(0, "x".repeat(40)).with_id("call-1");
        let result =
            ContextUnit::tool_result(1, call.id.clone(), "<binary>blob</binary>").with_id("res-1");
        let newer = unit_with_cost(2, "m2", 14);
        let history = vec![call, result, newer];

        let fit = fitter(&counter, &policy).fit(&history, 100, "m").await;
        let ids: Vec<&str> = fit.units.iter().map(|u| u.id.0.as_str()).collect();
        assert_eq!(ids, vec!["m2"]);
        assert!(
            fit.decisions
                .iter()
                .any(|d| d.unit_id.0 == "res-1" && d.reason == EvictionReason::StructuralRemoval)
        );
        assert!(
            fit.decisions
                .iter()
                .any(|d| d.unit_id.0 == "call-1" && d.reason == EvictionReason::StructuralRemoval)
        );
    }

    #[tokio::test]
    async fn surviving_call_with_evicted_result_dropped() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;

        // Duplicate-seq defensive ordering: result sorts before call on id
        // tie-break, so the cutoff can evict the result while the call
        // survives. Ids chosen so "a-res" < "b-call".
        let call = ContextUnit::tool_call(5, "x".repeat(40)).with_id("b-call"); // 14
        let result =
            ContextUnit::tool_result(5, call.id.clone(), "x".repeat(40)).with_id("a-res"); // 14
        let history = vec![result, call];

        // budget fits exactly one unit; the walk keeps "b-call" (newer by
        // tie-break) and evicts "a-res" → the call is an orphan and must go.
        let fit = fitter(&counter, &policy).fit(&history, 14, "m").await;
        assert!(fit.units.is_empty());
        assert!(
            fit.decisions
                .iter()
                .any(|d| d.unit_id.0 == "b-call" && d.reason == EvictionReason::StructuralRemoval)
        );
    }

    #[tokio::test]
    async fn call_without_any_result_is_kept() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        // a trailing tool call the model is expected to continue from
        let call = ContextUnit::tool_call(0, "x".repeat(40)).with_id("call-1");
        let history = vec![call];

        let fit = fitter(&counter, &policy).fit(&history, 100, "m").await;
        assert_eq!(fit.units.len(), 1);
        assert!(fit.decisions.is_empty());
    }

    #[tokio::test]
    async fn untokenizable_unit_excluded_not_fatal() {
        let policy = HistoryPolicy::default();
        let counter = PickyCounter;
        let history = vec![
            ContextUnit::user(0, "<binary>blob</binary>").with_id("bad"),
            unit_with_cost(1, "good", 14),
        ];

        let fit = fitter(&counter, &policy).fit(&history, 100, "m").await;
        assert_eq!(fit.units.len(), 1);
        assert_eq!(fit.units[0].id.0, "good");
        assert_eq!(fit.decisions.len(), 1);
        assert_eq!(fit.decisions[0].reason, EvictionReason::StructuralRemoval);
        assert_eq!(fit.decisions[0].unit_id.0, "bad");
    }

    #[tokio::test]
    async fn abbreviation_shrinks_old_tool_results() {
        let policy = HistoryPolicy {
            abbreviate_tool_results: true,
            keep_recent_tool_results: 1,
            ..Default::default()
        };
        let counter = TestCounter;

        let call_a = ContextUnit::tool_call(0, "x".repeat(40)).with_id("call-a"); // 14
        let res_a =
            ContextUnit::tool_result(1, call_a.id.clone(), "x".repeat(400)).with_id("res-a"); // 104
        let call_b = ContextUnit::tool_call(2, "x".repeat(40)).with_id("call-b"); // 14
        let res_b =
            ContextUnit::tool_result(3, call_b.id.clone(), "x".repeat(400)).with_id("res-b"); // 104
        let history = vec![call_a, res_a, call_b, res_b];

        // full cost 236; budget 200 triggers abbreviation of res-a (res-b is
        // exempt as the newest tool result). placeholder "[tool output
        // elided]" is 20 chars → 5 + 4 = 9 tokens; new total 141, all fits.
        let fit = fitter(&counter, &policy).fit(&history, 200, "m").await;
        assert_eq!(fit.units.len(), 4);
        assert_eq!(fit.tokens_used, 141);

        let abbreviated = fit
            .decisions
            .iter()
            .find(|d| d.reason == EvictionReason::Truncated)
            .unwrap();
        assert_eq!(abbreviated.unit_id.0, "res-a");
        assert_eq!(abbreviated.tokens_freed, 95);
        assert_eq!(fit.units[1].content, "[tool output elided]");
        // the abbreviated result still links to its call
        assert_eq!(fit.units[1].tool_link.as_ref().unwrap().0, "call-a");
    }

    #[tokio::test]
    async fn abbreviation_skipped_when_under_budget() {
        let policy = HistoryPolicy {
            abbreviate_tool_results: true,
            ..Default::default()
        };
        let counter = TestCounter;
        let call = ContextUnit::tool_call(0, "x".repeat(40)).with_id("call-1");
        let result =
            ContextUnit::tool_result(1, call.id.clone(), "x".repeat(400)).with_id("res-1");
        let history = vec![call, result];

        let fit = fitter(&counter, &policy).fit(&history, 1000, "m").await;
        assert!(fit.decisions.is_empty());
        assert_eq!(fit.units[1].content.len(), 400);
    }

    // ── Summarizer integration ─────────────────────────────────────────

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(
            &self,
            units: &[ContextUnit],
            _model: &str,
        ) -> Result<ContextUnit, SummarizeError> {
            Ok(ContextUnit::system(units[0].seq, self.0).with_id("summary-1"))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _units: &[ContextUnit],
            _model: &str,
        ) -> Result<ContextUnit, SummarizeError> {
            Err(SummarizeError::Backend("model unavailable".into()))
        }
    }

    #[tokio::test]
    async fn evicted_tail_replaced_by_summary() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let summarizer = FixedSummarizer("earlier: greetings"); // 18 chars → 5+4=9
        let history: Vec<ContextUnit> =
            (0..10).map(|i| unit_with_cost(i, &format!("m{i}"), 100)).collect();

        let fit = HistoryFitter::new(&counter, Some(&summarizer), &policy)
            .fit(&history, 850, "m")
            .await;

        // 8 newest + summary head
        assert_eq!(fit.units.len(), 9);
        assert_eq!(fit.units[0].id.0, "summary-1");
        assert_eq!(fit.tokens_used, 809);
        // summary seats ahead of the oldest retained unit
        assert!(fit.units[0].seq <= fit.units[1].seq);

        // evictions reference the summary as their replacement
        for decision in fit
            .decisions
            .iter()
            .filter(|d| d.reason == EvictionReason::EvictedOldest)
        {
            assert_eq!(decision.replacement_id.as_ref().unwrap().0, "summary-1");
        }
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_eviction() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let summarizer = FailingSummarizer;
        let history: Vec<ContextUnit> =
            (0..10).map(|i| unit_with_cost(i, &format!("m{i}"), 100)).collect();

        let fit = HistoryFitter::new(&counter, Some(&summarizer), &policy)
            .fit(&history, 850, "m")
            .await;

        assert_eq!(fit.units.len(), 8);
        assert_eq!(fit.tokens_used, 800);
        let evictions = fit
            .decisions
            .iter()
            .filter(|d| d.reason == EvictionReason::EvictedOldest)
            .count();
        assert_eq!(evictions, 2);
        assert!(fit.decisions.iter().all(|d| d.replacement_id.is_none()));
    }

    #[tokio::test]
    async fn oversized_summary_rejected() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        // summary larger than the slack left after retention
        let summarizer = FixedSummarizer(
            "an extremely verbose recapitulation that defeats its own purpose \
             by being considerably longer than the fifty tokens of slack left \
             in the history budget after the eight newest turns were retained, \
             which makes it strictly worse than simply evicting the two oldest \
             turns and should therefore be rejected by the fitter outright",
        );
        let history: Vec<ContextUnit> =
            (0..10).map(|i| unit_with_cost(i, &format!("m{i}"), 100)).collect();

        let fit = HistoryFitter::new(&counter, Some(&summarizer), &policy)
            .fit(&history, 850, "m")
            .await;

        assert_eq!(fit.units.len(), 8);
        assert!(fit.units.iter().all(|u| u.id.0 != "summary-1"));
    }

    #[tokio::test]
    async fn deterministic_fitting() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history: Vec<ContextUnit> = (0..15)
            .map(|i| unit_with_cost(i, &format!("m{i:02}"), 10 + (i as usize % 7)))
            .collect();

        let a = fitter(&counter, &policy).fit(&history, 100, "m").await;
        let b = fitter(&counter, &policy).fit(&history, 100, "m").await;

        let ids_a: Vec<&str> = a.units.iter().map(|u| u.id.0.as_str()).collect();
        let ids_b: Vec<&str> = b.units.iter().map(|u| u.id.0.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(a.tokens_used, b.tokens_used);
        assert_eq!(a.decisions.len(), b.decisions.len());
        for (da, db) in a.decisions.iter().zip(b.decisions.iter()) {
            assert_eq!(da.unit_id, db.unit_id);
            assert_eq!(da.reason, db.reason);
            assert_eq!(da.tokens_freed, db.tokens_freed);
        }
    }

    #[tokio::test]
    async fn zero_budget_evicts_everything() {
        let policy = HistoryPolicy::default();
        let counter = TestCounter;
        let history: Vec<ContextUnit> =
            (0..3).map(|i| unit_with_cost(i, &format!("m{i}"), 10)).collect();

        let fit = fitter(&counter, &policy).fit(&history, 0, "m").await;
        assert!(fit.units.is_empty());
        assert_eq!(fit.tokens_used, 0);
        assert_eq!(fit.decisions.len(), 3);
        assert_eq!(fit.overage_tokens, 30);
    }
}
