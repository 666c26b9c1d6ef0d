//! Content-level truncation with re-counting.
//!
//! Tokenizers are not monotonic under concatenation, so a truncated prefix
//! must be re-counted, never estimated from the original count. Binary
//! search over char boundaries keeps the number of counter round-trips at
//! O(log n).

use promptloom_core::{ContextUnit, CountError, TokenCounter};

/// Derive the largest prefix of `unit` whose full cost (content + overhead)
/// fits in `max_tokens`.
///
/// Returns the derived unit and its re-counted cost, or `None` when no
/// non-empty prefix fits — the caller excludes the unit instead.
pub(crate) async fn truncate_unit_to_fit(
    counter: &dyn TokenCounter,
    unit: &ContextUnit,
    max_tokens: usize,
    model: &str,
) -> Result<Option<(ContextUnit, usize)>, CountError> {
    let overhead = counter.unit_overhead();
    if max_tokens <= overhead {
        return Ok(None);
    }
    let content_budget = max_tokens - overhead;

    let chars: Vec<char> = unit.content.chars().collect();
    let mut low = 0usize;
    let mut high = chars.len();

    while low < high {
        let mid = (low + high + 1) / 2;
        let prefix: String = chars[..mid].iter().collect();
        let cost = counter.count(&prefix, model).await?;
        if cost <= content_budget {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    if low == 0 {
        return Ok(None);
    }

    let prefix: String = chars[..low].iter().collect();
    let cost = counter.count(&prefix, model).await? + overhead;
    let derived = unit.derive_truncated(prefix);
    Ok(Some((derived, cost)))
}
