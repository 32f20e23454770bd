//! Handler output and its normalization into a single payload string

use serde_json::Value;

/// One block of handler output
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },
    /// Structured value
    Json(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Textual form of the block
    ///
    /// A JSON object with a string `text` field yields that field; any other
    /// value yields its compact serialization.
    pub fn to_text(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Json(value) => match value.get("text") {
                Some(Value::String(text)) => text.clone(),
                _ => value.to_string(),
            },
        }
    }
}

/// What a domain handler returns
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HandlerOutput {
    /// A list of content blocks; only the first one is reported
    Blocks(Vec<ContentBlock>),
    /// A single block
    Single(ContentBlock),
    /// Nothing to report
    #[default]
    Empty,
}

impl HandlerOutput {
    /// Single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Single(ContentBlock::text(text))
    }

    /// Single JSON block
    pub fn json(value: Value) -> Self {
        Self::Single(ContentBlock::Json(value))
    }
}

impl From<String> for HandlerOutput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        Self::json(value)
    }
}

/// Reduce handler output to the payload sent back to the orchestrator
pub fn extract_text(output: &HandlerOutput) -> String {
    match output {
        HandlerOutput::Blocks(blocks) => blocks.first().map(ContentBlock::to_text).unwrap_or_default(),
        HandlerOutput::Single(block) => block.to_text(),
        HandlerOutput::Empty => String::new(),
    }
}
