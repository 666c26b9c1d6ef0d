//! Assembly policy — the configurable knobs of one engine instance.
//!
//! Deserializable from TOML so callers can ship policy alongside their other
//! configuration. Every field has a serde default; `validate()` rejects
//! combinations the allocator cannot work with.

use promptloom_core::{Budget, EngineError, Result};
use serde::{Deserialize, Serialize};

/// The root policy for a [`crate::ContextAssembler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyPolicy {
    /// Model identifier passed to the token counter.
    #[serde(default = "default_model")]
    pub model: String,

    /// Token ceiling and completion margin.
    #[serde(default)]
    pub budget: BudgetPolicy,

    /// History section policy.
    #[serde(default)]
    pub history: HistoryPolicy,

    /// Attachments section policy.
    #[serde(default)]
    pub attachments: AttachmentPolicy,
}

/// Token ceiling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Hard ceiling: maximum tokens for one request.
    #[serde(default = "default_ceiling")]
    pub ceiling: usize,

    /// Tokens reserved for the model's completion.
    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,
}

/// History fitting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPolicy {
    /// Proportional weight of the history section. History also absorbs the
    /// rounding remainder of the split.
    #[serde(default = "default_history_weight")]
    pub weight: u32,

    /// Truncate the newest unit to fit when it alone exceeds the sub-budget
    /// (instead of excluding it).
    #[serde(default = "default_true")]
    pub allow_truncation: bool,

    /// Replace old oversized tool results with a placeholder before evicting
    /// whole turns.
    #[serde(default)]
    pub abbreviate_tool_results: bool,

    /// Placeholder content for abbreviated tool results.
    #[serde(default = "default_placeholder")]
    pub tool_result_placeholder: String,

    /// How many of the newest tool results are exempt from abbreviation.
    #[serde(default = "default_keep_recent")]
    pub keep_recent_tool_results: usize,
}

/// Attachment fitting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPolicy {
    /// Proportional weight of the attachments section.
    #[serde(default = "default_attachment_weight")]
    pub weight: u32,

    /// Truncate a chunk that doesn't fully fit (partial inclusion) instead
    /// of skipping it.
    #[serde(default)]
    pub allow_truncation: bool,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_ceiling() -> usize {
    32_768
}

fn default_reserved_output() -> usize {
    4_096
}

fn default_history_weight() -> u32 {
    3
}

fn default_attachment_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_placeholder() -> String {
    "[tool output elided]".to_string()
}

fn default_keep_recent() -> usize {
    2
}

impl Default for AssemblyPolicy {
    fn default() -> Self {
        Self {
            model: default_model(),
            budget: BudgetPolicy::default(),
            history: HistoryPolicy::default(),
            attachments: AttachmentPolicy::default(),
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            reserved_output: default_reserved_output(),
        }
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            weight: default_history_weight(),
            allow_truncation: true,
            abbreviate_tool_results: false,
            tool_result_placeholder: default_placeholder(),
            keep_recent_tool_results: default_keep_recent(),
        }
    }
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            weight: default_attachment_weight(),
            allow_truncation: false,
        }
    }
}

impl AssemblyPolicy {
    /// Parse a policy from TOML.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let policy: Self =
            toml::from_str(s).map_err(|e| EngineError::Policy(format!("TOML parse: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject configurations the allocator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(EngineError::Policy("model must not be empty".into()));
        }
        if self.budget.ceiling == 0 {
            return Err(EngineError::Policy("budget.ceiling must be > 0".into()));
        }
        if self.budget.reserved_output >= self.budget.ceiling {
            return Err(EngineError::Policy(format!(
                "budget.reserved_output ({}) must be below budget.ceiling ({})",
                self.budget.reserved_output, self.budget.ceiling
            )));
        }
        if self.history.weight == 0 && self.attachments.weight == 0 {
            return Err(EngineError::Policy(
                "history.weight and attachments.weight are both zero".into(),
            ));
        }
        Ok(())
    }

    /// The budget this policy describes.
    pub fn budget(&self) -> Budget {
        Budget::new(self.budget.ceiling, self.budget.reserved_output)
    }
}
