//! ContextUnit — the atomic, addressable piece of candidate context.
//!
//! Everything the engine budgets over is a unit: a conversation message, a
//! tool call or its result, an attachment chunk, a system prompt section.
//! Units are value objects: the engine borrows them from the caller, never
//! mutates them, and expresses truncation as a pure derivation that produces
//! a new unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a context unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role/kind of a context unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// System prompt section
    System,
    /// A user turn
    User,
    /// An assistant turn
    Assistant,
    /// A tool invocation requested by the assistant
    ToolCall,
    /// The result of a tool invocation
    ToolResult,
    /// A chunk of an attachment/document
    AttachmentChunk,
}

/// An atomic, orderable piece of context.
///
/// Invariants the engine relies on:
/// - `seq` is strictly increasing across a candidate history; every
///   transformation preserves that total order.
/// - A tool-result unit's `tool_link` names the id of its originating
///   tool-call unit. The link is a lookup relation, not an ownership edge —
///   any valid subsequence containing the result must also contain the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextUnit {
    /// Unique unit ID
    pub id: UnitId,

    /// What kind of unit this is
    pub kind: UnitKind,

    /// The raw text content
    pub content: String,

    /// Monotonically increasing sequence index establishing conversation order
    pub seq: u64,

    /// For a tool-result: the id of the tool-call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_link: Option<UnitId>,

    /// Caller-supplied relevance score for attachment ranking (0.0–1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,

    /// Timestamp (recency tie-break for attachments)
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (source document, channel info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContextUnit {
    fn base(kind: UnitKind, seq: u64, content: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(),
            kind,
            content: content.into(),
            seq,
            tool_link: None,
            relevance: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a system prompt unit.
    pub fn system(seq: u64, content: impl Into<String>) -> Self {
        Self::base(UnitKind::System, seq, content)
    }

    /// Create a user message unit.
    pub fn user(seq: u64, content: impl Into<String>) -> Self {
        Self::base(UnitKind::User, seq, content)
    }

    /// Create an assistant message unit.
    pub fn assistant(seq: u64, content: impl Into<String>) -> Self {
        Self::base(UnitKind::Assistant, seq, content)
    }

    /// Create a tool-call unit. Its `id` is the call id that the matching
    /// tool-result links back to.
    pub fn tool_call(seq: u64, content: impl Into<String>) -> Self {
        Self::base(UnitKind::ToolCall, seq, content)
    }

    /// Create a tool-result unit linked to its originating call.
    pub fn tool_result(seq: u64, call_id: UnitId, content: impl Into<String>) -> Self {
        let mut unit = Self::base(UnitKind::ToolResult, seq, content);
        unit.tool_link = Some(call_id);
        unit
    }

    /// Create an attachment chunk with a caller-supplied relevance score.
    pub fn attachment_chunk(seq: u64, content: impl Into<String>, relevance: f32) -> Self {
        let mut unit = Self::base(UnitKind::AttachmentChunk, seq, content);
        unit.relevance = Some(relevance);
        unit
    }

    /// Replace the generated id with a caller-supplied one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = UnitId(id.into());
        self
    }

    /// Replace the generated timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Derive a truncated copy of this unit.
    ///
    /// Pure transformation: the original is untouched; the derived unit gets
    /// a `#t`-suffixed id so manifests can relate the two, and keeps the
    /// original seq, kind, and tool link so ordering and pairing invariants
    /// carry over.
    pub fn derive_truncated(&self, new_content: impl Into<String>) -> Self {
        Self {
            id: UnitId(format!("{}#t", self.id)),
            kind: self.kind,
            content: new_content.into(),
            seq: self.seq,
            tool_link: self.tool_link.clone(),
            relevance: self.relevance,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }

    /// Whether this unit participates in tool-call/tool-result pairing.
    pub fn is_tool_call(&self) -> bool {
        self.kind == UnitKind::ToolCall
    }

    pub fn is_tool_result(&self) -> bool {
        self.kind == UnitKind::ToolResult
    }
}
