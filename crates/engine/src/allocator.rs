//! Budget allocation — splitting the available tokens across sections.
//!
//! Fixed sections (system prompt, tool schemas) are counted exactly and
//! subtracted first; what remains is split among weighted sections by
//! normalized weight, rounded down, with the rounding remainder granted to
//! the section marked fill-remaining.

use promptloom_core::{Budget, EngineError, Result, SectionName, SectionPolicy};

/// One section's claim on the budget.
#[derive(Debug, Clone, Copy)]
pub struct SectionRequest {
    pub name: SectionName,
    pub policy: SectionPolicy,
    /// Exact token cost, meaningful only for `SectionPolicy::Fixed`.
    pub fixed_tokens: usize,
}

impl SectionRequest {
    pub fn fixed(name: SectionName, tokens: usize) -> Self {
        Self {
            name,
            policy: SectionPolicy::Fixed,
            fixed_tokens: tokens,
        }
    }

    pub fn weighted(name: SectionName, weight: u32) -> Self {
        Self {
            name,
            policy: SectionPolicy::Weighted(weight),
            fixed_tokens: 0,
        }
    }

    pub fn fill_remaining(name: SectionName, weight: u32) -> Self {
        Self {
            name,
            policy: SectionPolicy::FillRemaining(weight),
            fixed_tokens: 0,
        }
    }
}

/// The computed sub-budget for every requested section, in request order.
#[derive(Debug, Clone)]
pub struct Allocation {
    grants: Vec<(SectionName, usize)>,
}

impl Allocation {
    /// Sub-budget for a section; 0 for sections never requested.
    pub fn get(&self, name: SectionName) -> usize {
        self.grants
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, tokens)| *tokens)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionName, usize)> + '_ {
        self.grants.iter().copied()
    }
}

/// Stateless allocator. Pure arithmetic once fixed costs are known; counting
/// of fixed sections happens upstream in the assembler.
pub struct BudgetAllocator;

impl BudgetAllocator {
    /// Split `budget.available()` across `requests`.
    ///
    /// Errors with [`EngineError::BudgetExhausted`] when the fixed sections
    /// alone exceed the available budget — fatal, not retried: the caller
    /// must reduce mandatory content or raise the ceiling.
    pub fn allocate(budget: &Budget, requests: &[SectionRequest]) -> Result<Allocation> {
        let available = budget.available();

        let fixed_total: usize = requests
            .iter()
            .filter(|r| matches!(r.policy, SectionPolicy::Fixed))
            .map(|r| r.fixed_tokens)
            .sum();

        if fixed_total > available {
            return Err(EngineError::BudgetExhausted {
                fixed_tokens: fixed_total,
                available,
                ceiling: budget.ceiling,
                reserved_output: budget.reserved_output,
            });
        }

        let remainder = available - fixed_total;
        let total_weight: u64 = requests.iter().map(|r| u64::from(r.policy.weight())).sum();

        let mut grants = Vec::with_capacity(requests.len());
        let mut granted_flexible = 0usize;
        for request in requests {
            let tokens = match request.policy {
                SectionPolicy::Fixed => request.fixed_tokens,
                SectionPolicy::Weighted(w) | SectionPolicy::FillRemaining(w) => {
                    if total_weight == 0 {
                        0
                    } else {
                        let share =
                            (remainder as u64 * u64::from(w) / total_weight) as usize;
                        granted_flexible += share;
                        share
                    }
                }
            };
            grants.push((request.name, tokens));
        }

        // Rounding leftover goes to the first fill-remaining section.
        let leftover = if total_weight == 0 {
            0
        } else {
            remainder - granted_flexible
        };
        if leftover > 0 {
            if let Some(slot) = grants.iter_mut().zip(requests).find_map(|(grant, req)| {
                matches!(req.policy, SectionPolicy::FillRemaining(_)).then_some(grant)
            }) {
                slot.1 += leftover;
            }
        }

        Ok(Allocation { grants })
    }
}
