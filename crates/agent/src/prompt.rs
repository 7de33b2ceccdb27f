//! Prompt templates and the instruction policy.
//!
//! Templates use `{name}` placeholders. Rendering is a single left-to-right
//! pass: substituted values are never scanned again, so retrieved context
//! that happens to contain `{query_str}` stays literal.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use ragdesk_config::PromptConfig;
use ragdesk_core::knowledge::ContextSnippet;
use ragdesk_core::message::Message;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_INSTRUCTIONS: &str = include_str!("prompts/instructions.txt");

const CONVERSATIONAL_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
{instruction}";

const QUERY_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
{instruction}\
Query: {query_str}\n\
Answer: ";

const CONDENSE_TEMPLATE: &str = "Given the following conversation between a user and an AI assistant \
and a follow up question from user, rephrase the follow up question to be a standalone question.\n\
\n\
Chat History:\n\
{chat_history}\n\
Follow Up Input: {question}\n\
Standalone question:";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read instruction file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid UTC offset: {0} hours")]
    InvalidOffset(i32),
}

/// A text with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Substitute known placeholders; unknown ones are left verbatim.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (close, *value))
            });

            match value {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// The directive block appended to every retrieval prompt.
///
/// `{current_time}` is captured once at construction unless `refresh` is
/// set, in which case every render reads the clock. `{utc_offset}` names
/// the configured offset, e.g. `UTC+8`.
#[derive(Debug, Clone)]
pub struct InstructionPolicy {
    template: PromptTemplate,
    offset: FixedOffset,
    refresh: bool,
    clock: fn() -> DateTime<Utc>,
    captured: String,
}

impl InstructionPolicy {
    /// Build from config: the shipped policy unless `instruction_file` is set.
    pub fn from_config(config: &PromptConfig) -> Result<Self, PromptError> {
        let text = match &config.instruction_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| PromptError::Read {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };
        Self::new(text, config.utc_offset_hours, config.refresh_timestamp)
    }

    pub fn new(text: impl Into<String>, utc_offset_hours: i32, refresh: bool) -> Result<Self, PromptError> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(PromptError::InvalidOffset(utc_offset_hours))?;
        Ok(Self::build(text.into(), offset, refresh))
    }

    fn build(mut text: String, offset: FixedOffset, refresh: bool) -> Self {
        // The block is followed directly by "Query:", so it must end in a newline
        text.truncate(text.trim_end().len());
        text.push('\n');

        Self {
            template: PromptTemplate::new(text),
            offset,
            refresh,
            clock: Utc::now,
            captured: stamp(Utc::now(), offset),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self.captured = stamp(clock(), self.offset);
        self
    }

    /// The policy with its placeholders filled.
    pub fn render(&self) -> String {
        let time = if self.refresh {
            stamp((self.clock)(), self.offset)
        } else {
            self.captured.clone()
        };
        let hours = self.offset.local_minus_utc() / 3600;
        let zone = format!("UTC{hours:+}");
        self.template
            .render(&[("current_time", &time), ("utc_offset", &zone)])
    }
}

impl Default for InstructionPolicy {
    fn default() -> Self {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix());
        Self::build(DEFAULT_INSTRUCTIONS.to_string(), offset, false)
    }
}

fn stamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format(TIMESTAMP_FORMAT).to_string()
}

/// Builds the three prompts the engines send.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    policy: InstructionPolicy,
}

impl PromptComposer {
    pub fn new(policy: InstructionPolicy) -> Self {
        Self { policy }
    }

    pub fn shared(policy: InstructionPolicy) -> Arc<Self> {
        Arc::new(Self::new(policy))
    }

    /// System prompt for the conversational path.
    pub fn conversational(&self, context_str: &str) -> String {
        let instruction = self.policy.render();
        PromptTemplate::new(CONVERSATIONAL_TEMPLATE)
            .render(&[("context_str", context_str), ("instruction", &instruction)])
    }

    /// Single-turn prompt for the fallback path.
    pub fn query(&self, context_str: &str, query_str: &str) -> String {
        let instruction = self.policy.render();
        PromptTemplate::new(QUERY_TEMPLATE).render(&[
            ("context_str", context_str),
            ("instruction", &instruction),
            ("query_str", query_str),
        ])
    }

    /// Prompt asking the model to rewrite a follow-up as a standalone question.
    pub fn condense(&self, history: &[Message], question: &str) -> String {
        let chat_history = history
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        PromptTemplate::new(CONDENSE_TEMPLATE)
            .render(&[("chat_history", &chat_history), ("question", question)])
    }
}

/// One context entry per snippet, as the templates expect in `{context_str}`.
pub fn format_snippet(snippet: &ContextSnippet) -> String {
    format!("source: {}\n\n{}", snippet.source_id, snippet.text)
}

/// Join snippets, most relevant first.
pub fn context_str(snippets: &[ContextSnippet]) -> String {
    snippets
        .iter()
        .map(format_snippet)
        .collect::<Vec<_>>()
        .join("\n\n")
}
