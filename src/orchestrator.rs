//! Query orchestration: validate, retrieve, compose, generate.
//!
//! One query flows through a fixed sequence: sanitize and validate the
//! question, retrieve similar chunks, compose a bounded prompt, call the
//! generation backend. The retrieve-through-generate span sits inside a
//! bounded retry envelope; retrieval is read-only so repeating it is safe.
//! Every failure escaping a query is wrapped once at this boundary.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, SamplingParams};
use crate::index::IndexService;
use crate::models::{ServiceStatus, SourceRef};
use crate::prompt::{self, ChatTurn, PromptInput};
use crate::retry::RetryPolicy;
use crate::stream::TokenStream;

/// Answer returned when retrieval produces nothing; no generation call is
/// made in that case.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant documents were found for your question. Try ingesting documents first or rephrasing the question.";

const ANSWER_INSTRUCTIONS: &str =
    "Answer the question below using only the context provided.";

const MAX_RESULTS_LIMIT: usize = 50;

/// One question, with optional conversational context and knob overrides.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub history: Vec<ChatTurn>,
    pub user_profile: Option<String>,
    pub max_results: Option<usize>,
    pub score_threshold: Option<f32>,
    /// When false, sources carry only filenames.
    pub include_metadata: bool,
    pub sampling: SamplingParams,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        QueryRequest {
            query: query.into(),
            history: Vec::new(),
            user_profile: None,
            max_results: None,
            score_threshold: None,
            include_metadata: true,
            sampling: SamplingParams::default(),
        }
    }
}

/// Outcome of the post-answer verification pass.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub reply: String,
}

/// Observability data attached to every answer.
#[derive(Debug, Clone, Default)]
pub struct QueryDiagnostics {
    pub retrieved_chunks: usize,
    pub prompt_chars: usize,
    pub context_truncated: bool,
    pub elapsed_ms: u64,
    pub verification: Option<VerificationOutcome>,
}

/// A complete buffered answer.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub scores: Vec<f32>,
    pub diagnostics: QueryDiagnostics,
}

/// A streaming answer: citation data is available immediately, tokens
/// arrive as the caller pulls them.
pub struct QueryStream {
    pub tokens: TokenStream,
    pub sources: Vec<SourceRef>,
    pub scores: Vec<f32>,
    pub diagnostics: QueryDiagnostics,
}

struct PreparedQuery {
    prompt: String,
    sources: Vec<SourceRef>,
    scores: Vec<f32>,
    diagnostics: QueryDiagnostics,
    context_text: String,
}

pub struct QueryOrchestrator {
    index: Arc<IndexService>,
    generator: Arc<GenerationClient>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
    status_cache: Mutex<Option<(Instant, ServiceStatus)>>,
    status_ttl: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        index: Arc<IndexService>,
        generator: Arc<GenerationClient>,
    ) -> Self {
        QueryOrchestrator {
            index,
            generator,
            retry: RetryPolicy::new(config.max_attempts),
            status_cache: Mutex::new(None),
            status_ttl: Duration::from_secs(config.status_ttl_secs),
            config: config.clone(),
        }
    }

    /// Answer a question with retrieval-augmented generation, buffered.
    #[instrument(skip_all, fields(query_chars = request.query.len()))]
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = sanitize(&request.query);
        self.validate(&query, request)
            .map_err(RagError::into_orchestration)?;

        let mut response = self
            .retry
            .run("query", || self.answer_once(&query, request))
            .await
            .map_err(RagError::into_orchestration)?
            .0;
        response.diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            retrieved = response.diagnostics.retrieved_chunks,
            answer_chars = response.answer.len(),
            elapsed_ms = response.diagnostics.elapsed_ms,
            "query answered"
        );
        Ok(response)
    }

    /// Answer a question with tokens streamed as they arrive. The retry
    /// envelope covers everything up to stream acquisition; once tokens
    /// flow, failures surface through the stream itself.
    #[instrument(skip_all, fields(query_chars = request.query.len()))]
    pub async fn query_stream(&self, request: &QueryRequest) -> Result<QueryStream> {
        let started = Instant::now();
        let query = sanitize(&request.query);
        self.validate(&query, request)
            .map_err(RagError::into_orchestration)?;

        let mut streamed = self
            .retry
            .run("query stream", || self.stream_once(&query, request))
            .await
            .map_err(RagError::into_orchestration)?;
        streamed.diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(streamed)
    }

    /// Cheap single-shot answer: two retrieved chunks, no history or
    /// profile, citation metadata dropped.
    pub async fn query_minimal(&self, query: &str) -> Result<String> {
        let mut request = QueryRequest::new(query);
        request.max_results = Some(2);
        request.include_metadata = false;
        self.query(&request).await.map(|r| r.answer)
    }

    /// Buffered answer followed by a verification pass: the model is asked,
    /// at temperature zero, whether its answer follows from the retrieved
    /// context. The outcome lands in diagnostics; a failed or errored check
    /// never suppresses the answer.
    pub async fn query_with_sanity_check(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = sanitize(&request.query);
        self.validate(&query, request)
            .map_err(RagError::into_orchestration)?;

        let (mut response, context_text) = self
            .retry
            .run("query", || self.answer_once(&query, request))
            .await
            .map_err(RagError::into_orchestration)?;

        if !response.sources.is_empty() {
            let verification_prompt = format!(
                "Context:\n{context_text}\n\nProposed answer:\n{}\n\nDoes the proposed answer follow from the context above? Reply with yes or no, then a short reason.",
                response.answer,
            );
            let params = SamplingParams {
                temperature: Some(0.0),
                ..Default::default()
            };
            match self.generator.generate(&verification_prompt, None, &params).await {
                Ok(reply) => {
                    let passed = verification_passed(&reply);
                    if !passed {
                        warn!(reply = %reply.trim(), "answer failed verification");
                    }
                    response.diagnostics.verification = Some(VerificationOutcome { passed, reply });
                }
                Err(e) => {
                    warn!(error = %e, "verification pass errored, keeping answer");
                    response.diagnostics.verification = Some(VerificationOutcome {
                        passed: false,
                        reply: format!("verification call failed: {e}"),
                    });
                }
            }
        }

        response.diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    /// One retrieve-through-generate attempt. Returns the answer along with
    /// the composed context text for callers that post-process it.
    async fn answer_once(
        &self,
        query: &str,
        request: &QueryRequest,
    ) -> Result<(QueryResponse, String)> {
        let prepared = match self.prepare(query, request).await? {
            Some(prepared) => prepared,
            None => return Ok((no_context_response(), String::new())),
        };

        let answer = self
            .generator
            .generate(
                &prepared.prompt,
                Some(&self.config.system_prompt),
                &request.sampling,
            )
            .await?;

        Ok((
            QueryResponse {
                answer,
                sources: prepared.sources,
                scores: prepared.scores,
                diagnostics: prepared.diagnostics,
            },
            prepared.context_text,
        ))
    }

    async fn stream_once(&self, query: &str, request: &QueryRequest) -> Result<QueryStream> {
        let prepared = match self.prepare(query, request).await? {
            Some(prepared) => prepared,
            None => {
                return Ok(QueryStream {
                    tokens: TokenStream::from_fragments(vec![NO_CONTEXT_ANSWER.to_string()]),
                    sources: Vec::new(),
                    scores: Vec::new(),
                    diagnostics: QueryDiagnostics::default(),
                })
            }
        };

        let tokens = self
            .generator
            .generate_stream(
                &prepared.prompt,
                Some(&self.config.system_prompt),
                &request.sampling,
            )
            .await?;

        Ok(QueryStream {
            tokens,
            sources: prepared.sources,
            scores: prepared.scores,
            diagnostics: prepared.diagnostics,
        })
    }

    async fn prepare(&self, query: &str, request: &QueryRequest) -> Result<Option<PreparedQuery>> {
        let context = self
            .index
            .context_sections(
                query,
                request.max_results,
                request.score_threshold,
                self.config.max_context_chars,
            )
            .await?;
        if context.is_empty() {
            debug!("no chunks retrieved, returning canned answer");
            return Ok(None);
        }

        let sources = if request.include_metadata {
            context.sources
        } else {
            context
                .sources
                .into_iter()
                .map(|s| SourceRef {
                    filename: s.filename,
                    metadata: None,
                })
                .collect()
        };

        let history_start = request.history.len().saturating_sub(self.config.history_limit);
        let input = PromptInput {
            preamble: ANSWER_INSTRUCTIONS,
            user_profile: request.user_profile.as_deref(),
            history: &request.history[history_start..],
            documents: &context.text,
            question: query,
        };
        let rendered = prompt::build_prompt(&input, self.prompt_budget());
        let context_truncated = rendered.contains(prompt::TRUNCATION_MARKER);

        Ok(Some(PreparedQuery {
            diagnostics: QueryDiagnostics {
                retrieved_chunks: context.scores.len(),
                prompt_chars: rendered.len(),
                context_truncated,
                elapsed_ms: 0,
                verification: None,
            },
            prompt: rendered,
            sources,
            scores: context.scores,
            context_text: context.text,
        }))
    }

    fn validate(&self, query: &str, request: &QueryRequest) -> Result<()> {
        if query.is_empty() {
            return Err(RagError::Input("query must not be empty".into()));
        }
        if query.len() > self.config.max_query_chars {
            return Err(RagError::Input(format!(
                "query is {} chars, limit is {}",
                query.len(),
                self.config.max_query_chars
            )));
        }
        if let Some(k) = request.max_results {
            if k == 0 || k > MAX_RESULTS_LIMIT {
                return Err(RagError::Input(format!(
                    "max_results {k} outside [1, {MAX_RESULTS_LIMIT}]"
                )));
            }
        }
        if let Some(t) = request.sampling.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RagError::Input(format!(
                    "temperature {t} outside [0.0, 2.0]"
                )));
            }
        }
        if request.sampling.max_tokens == Some(0) {
            return Err(RagError::Input("max_tokens must be positive".into()));
        }
        Ok(())
    }

    fn prompt_budget(&self) -> usize {
        // Never hand the generation client a prompt longer than it accepts;
        // overflow is truncated out of the documents section, not rejected.
        let wanted = self.config.max_context_chars + self.config.max_query_chars + 4096;
        wanted.min(self.generator.max_prompt_chars())
    }

    /// Service readiness, cached for the configured TTL so health polling
    /// does not hammer the backend probe.
    pub async fn status(&self) -> ServiceStatus {
        {
            let cache = self.status_cache.lock().unwrap();
            if let Some((at, status)) = cache.as_ref() {
                if at.elapsed() <= self.status_ttl {
                    return status.clone();
                }
            }
        }

        let index_ready = self.index.is_ready().await;
        let generation_available = self.generator.is_available().await;
        let status = ServiceStatus::from_parts(
            index_ready,
            generation_available,
            self.index.document_count(),
        );

        *self.status_cache.lock().unwrap() = Some((Instant::now(), status.clone()));
        status
    }

    /// Drop both the search cache and the cached status snapshot.
    pub fn clear_cache(&self) {
        self.index.clear_search_cache();
        *self.status_cache.lock().unwrap() = None;
    }
}

/// A verification reply counts as a pass when its first word starts with
/// "yes", case-insensitive.
fn verification_passed(reply: &str) -> bool {
    reply
        .trim()
        .split_whitespace()
        .next()
        .is_some_and(|w| w.to_ascii_lowercase().starts_with("yes"))
}

fn no_context_response() -> QueryResponse {
    QueryResponse {
        answer: NO_CONTEXT_ANSWER.to_string(),
        sources: Vec::new(),
        scores: Vec::new(),
        diagnostics: QueryDiagnostics::default(),
    }
}

/// Strip control characters (keeping newlines and tabs), collapse runs of
/// three or more newlines, and trim.
pub fn sanitize(query: &str) -> String {
    let mut cleaned = String::with_capacity(query.len());
    for c in query.chars() {
        if c.is_control() && c != '\n' && c != '\t' {
            continue;
        }
        cleaned.push(c);
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut newline_run = 0usize;
    for c in cleaned.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run > 2 {
                continue;
            }
        } else {
            newline_run = 0;
        }
        collapsed.push(c);
    }
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_chars() {
        assert_eq!(sanitize("what\u{0} is\u{7} this?"), "what is this?");
        assert_eq!(sanitize("keep\ttabs\nand newlines"), "keep\ttabs\nand newlines");
    }

    #[test]
    fn sanitize_collapses_newline_runs() {
        assert_eq!(sanitize("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(sanitize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn sanitize_trims() {
        assert_eq!(sanitize("  padded  "), "padded");
        assert_eq!(sanitize("\n\n\n"), "");
    }

    #[test]
    fn verification_reply_parsing() {
        assert!(verification_passed("Yes, it follows."));
        assert!(verification_passed("  yes"));
        assert!(verification_passed("YES."));
        assert!(!verification_passed("No, the answer invents facts."));
        assert!(!verification_passed(""));
        assert!(!verification_passed("Maybe yes"));
    }
}
