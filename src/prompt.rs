//! Prompt assembly with a hard character budget.
//!
//! Sections appear in a fixed order and empty sections are omitted
//! entirely. When the assembled prompt exceeds the budget, only the
//! retrieved-documents section is cut; the question and answer cue always
//! survive intact, and a marker shows where text was dropped.

use crate::models::{ContextSections, ScoredChunk, SourceRef};

/// Appended where retrieved document text was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "[context truncated]";

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One prior exchange in the conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        ChatTurn {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        ChatTurn {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        match self.role {
            TurnRole::User => format!("User: {}", self.text),
            TurnRole::Assistant => format!("Assistant: {}", self.text),
        }
    }
}

/// Everything that goes into one prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptInput<'a> {
    pub preamble: &'a str,
    pub user_profile: Option<&'a str>,
    pub history: &'a [ChatTurn],
    pub documents: &'a str,
    pub question: &'a str,
}

/// Assemble the prompt, cutting the documents section to honor `max_chars`.
pub fn build_prompt(input: &PromptInput<'_>, max_chars: usize) -> String {
    let full = render(input, input.documents);
    // With no documents there is nothing to cut; an over-long prompt is
    // left for the caller's own length check.
    if full.len() <= max_chars || input.documents.trim().is_empty() {
        return full;
    }

    // Everything except the documents text is fixed; give the documents
    // whatever budget remains after the marker.
    let overhead = render(input, "X").len() - 1;
    let budget = max_chars.saturating_sub(overhead + TRUNCATION_MARKER.len() + 1);
    let docs = if budget == 0 {
        TRUNCATION_MARKER.to_string()
    } else {
        let cut = floor_char_boundary(input.documents, budget);
        format!("{}\n{}", input.documents[..cut].trim_end(), TRUNCATION_MARKER)
    };
    render(input, &docs)
}

fn render(input: &PromptInput<'_>, documents: &str) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(6);
    if !input.preamble.trim().is_empty() {
        sections.push(input.preamble.trim().to_string());
    }
    if let Some(profile) = input.user_profile {
        if !profile.trim().is_empty() {
            sections.push(format!("User Profile:\n{}", profile.trim()));
        }
    }
    if !input.history.is_empty() {
        let turns: Vec<String> = input.history.iter().map(ChatTurn::render).collect();
        sections.push(format!("Chat History:\n{}", turns.join("\n")));
    }
    if !documents.trim().is_empty() {
        sections.push(format!("Relevant Documents:\n{documents}"));
    }
    sections.push(format!("Question:\n{}", input.question.trim()));
    sections.push("Answer:".to_string());
    sections.join("\n\n")
}

/// Join retrieved chunks into a bounded context block, collecting citation
/// sources (deduplicated by filename, first-seen order) and scores.
pub fn compose_context(chunks: &[ScoredChunk], max_context_chars: usize) -> ContextSections {
    let mut text = String::new();
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut scores = Vec::new();

    for chunk in chunks {
        let addition = if text.is_empty() {
            chunk.text.len()
        } else {
            CHUNK_SEPARATOR.len() + chunk.text.len()
        };

        if !text.is_empty() && text.len() + addition > max_context_chars {
            break;
        }

        if !text.is_empty() {
            text.push_str(CHUNK_SEPARATOR);
        }
        if text.is_empty() && chunk.text.len() > max_context_chars {
            // A single oversized chunk still yields usable context.
            let cut = floor_char_boundary(&chunk.text, max_context_chars);
            text.push_str(chunk.text[..cut].trim_end());
        } else {
            text.push_str(&chunk.text);
        }

        scores.push(chunk.score);
        if !sources.iter().any(|s| s.filename == chunk.metadata.source) {
            sources.push(SourceRef {
                filename: chunk.metadata.source.clone(),
                metadata: Some(chunk.metadata.clone()),
            });
        }
    }

    ContextSections { text, sources, scores }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
