//! Generation client and orchestrator tests against a mock HTTP backend.
//!
//! Covers: availability probing (including an installed-but-different
//! model), buffered and streamed completions, error mapping for 404 and
//! 5xx responses, bounded retries, request timeouts, and orchestrator
//! behavior end to end (canned no-context answer, citations, degraded
//! health).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use nexus_rag::config::{Config, GenerationConfig};
use nexus_rag::embedding::Embedder;
use nexus_rag::error::{GenerationErrorKind, RagError, Result};
use nexus_rag::generation::{GenerationClient, SamplingParams};
use nexus_rag::index::IndexService;
use nexus_rag::models::HealthState;
use nexus_rag::orchestrator::{QueryOrchestrator, QueryRequest, NO_CONTEXT_ANSWER};
use nexus_rag::vector_index::InMemoryVectorIndex;

fn generation_config(base_url: String) -> GenerationConfig {
    GenerationConfig {
        base_url,
        model: "mistral".to_string(),
        timeout_secs: 2,
        max_retries: 2,
        max_prompt_chars: 16_000,
        transport_max_age_secs: 300,
        max_stream_decode_failures: 5,
    }
}

fn client_for(server: &MockServer) -> GenerationClient {
    GenerationClient::new(&generation_config(server.base_url())).unwrap()
}

#[tokio::test]
async fn probe_passes_when_model_is_installed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200)
                .json_body(json!({"models": [{"name": "mistral:latest"}, {"name": "llama3:8b"}]}));
        })
        .await;

    let client = client_for(&server);
    assert!(client.is_available().await);
}

#[tokio::test]
async fn probe_reports_missing_model() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({"models": [{"name": "llama3:latest"}]}));
        })
        .await;

    let client = client_for(&server);
    let err = client.probe().await.unwrap_err();
    assert!(matches!(
        err,
        RagError::Generation {
            kind: GenerationErrorKind::ModelNotFound,
            ..
        }
    ));
    assert!(!client.is_available().await);
}

#[tokio::test]
async fn buffered_generate_returns_the_response_field() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_includes(r#"{"model": "mistral", "stream": false}"#);
            then.status(200).json_body(json!({"response": "The refund window is 30 days."}));
        })
        .await;

    let client = client_for(&server);
    let answer = client
        .generate("What is the refund window?", None, &SamplingParams::default())
        .await
        .unwrap();
    assert_eq!(answer, "The refund window is 30 days.");
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_model_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(404).json_body(json!({"error": "model 'mistral' not found"}));
        })
        .await;

    let client = client_for(&server);
    let err = client
        .generate("hello", None, &SamplingParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::Generation {
            kind: GenerationErrorKind::ModelNotFound,
            ..
        }
    ));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn server_errors_retry_up_to_the_budget() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500);
        })
        .await;

    let client = client_for(&server);
    let err = client
        .generate("hello", None, &SamplingParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::Generation {
            kind: GenerationErrorKind::Unavailable,
            ..
        }
    ));
    // max_retries = 2 total attempts.
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(json!({"response": "too late"}));
        })
        .await;

    let mut config = generation_config(server.base_url());
    config.timeout_secs = 1;
    config.max_retries = 1;
    let client = GenerationClient::new(&config).unwrap();

    let err = client
        .generate("hello", None, &SamplingParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::Generation {
            kind: GenerationErrorKind::Timeout,
            ..
        }
    ));
}

#[tokio::test]
async fn streamed_generate_yields_fragments_until_done() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_includes(r#"{"stream": true}"#);
            then.status(200).body(concat!(
                "{\"response\":\"Thirty \",\"done\":false}\n",
                "{\"response\":\"days.\",\"done\":false}\n",
                "{\"response\":\"\",\"done\":true}\n",
            ));
        })
        .await;

    let client = client_for(&server);
    let mut stream = client
        .generate_stream("refund window?", None, &SamplingParams::default())
        .await
        .unwrap();

    let mut collected = String::new();
    while let Some(fragment) = stream.next().await {
        collected.push_str(&fragment.unwrap());
    }
    assert_eq!(collected, "Thirty days.");
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_any_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "x"}));
        })
        .await;

    let client = client_for(&server);
    let err = client
        .generate("   ", None, &SamplingParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Input(_)));
    mock.assert_hits_async(0).await;
}

// Orchestrator tests below use a deterministic embedder so retrieval is
// driven purely by shared vocabulary.

struct KeywordEmbedder {
    calls: AtomicUsize,
}

const VOCAB: &[&str] = &["refund", "policy", "parking", "permit"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-stub"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|term| lower.matches(term).count() as f32)
                    .collect();
                v.push(1.0);
                v
            })
            .collect())
    }
}

struct Stack {
    _tmp: TempDir,
    docs: std::path::PathBuf,
    service: Arc<IndexService>,
    orchestrator: QueryOrchestrator,
}

fn stack(server: &MockServer) -> Stack {
    stack_with(server, |_| {})
}

fn stack_with(server: &MockServer, tweak: impl FnOnce(&mut Config)) -> Stack {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();

    let mut config = Config::with_documents_root(&docs);
    config.generation = generation_config(server.base_url());
    config.orchestrator.status_ttl_secs = 0;
    tweak(&mut config);

    let embedder = Arc::new(KeywordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let index = Arc::new(InMemoryVectorIndex::open(&config.index.persist_dir).unwrap());
    let service = Arc::new(IndexService::new(&config, embedder, index).unwrap());
    let generator = Arc::new(GenerationClient::new(&config.generation).unwrap());
    let orchestrator = QueryOrchestrator::new(&config.orchestrator, service.clone(), generator);

    Stack {
        _tmp: tmp,
        docs,
        service,
        orchestrator,
    }
}

#[tokio::test]
async fn query_answers_with_citations() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "Refunds take 30 days."}));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(
        stack.docs.join("refunds.txt"),
        "The refund policy allows returns within 30 days.",
    )
    .unwrap();
    std::fs::write(stack.docs.join("parking.txt"), "Street cleaning happens on Mondays.")
        .unwrap();
    stack.service.ingest_all().await.unwrap();

    // k = 1 keeps only the best chunk, so the unrelated file never shows
    // up in the citations.
    let mut request = QueryRequest::new("what is the refund policy?");
    request.max_results = Some(1);
    let response = stack.orchestrator.query(&request).await.unwrap();

    assert_eq!(response.answer, "Refunds take 30 days.");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].filename, "refunds.txt");
    assert!(response.diagnostics.retrieved_chunks >= 1);
    assert!(response.diagnostics.prompt_chars > 0);
}

#[tokio::test]
async fn empty_index_returns_canned_answer_without_calling_backend() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "never"}));
        })
        .await;

    let stack = stack(&server);
    let response = stack
        .orchestrator
        .query(&QueryRequest::new("anything at all?"))
        .await
        .unwrap();

    assert_eq!(response.answer, NO_CONTEXT_ANSWER);
    assert!(response.sources.is_empty());
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn query_minimal_returns_bare_text_answer() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "Thirty days."}));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("refunds.txt"), "refund policy: thirty days").unwrap();
    stack.service.ingest_all().await.unwrap();

    let answer = stack.orchestrator.query_minimal("refund policy?").await.unwrap();
    assert_eq!(answer, "Thirty days.");
}

#[tokio::test]
async fn prompts_over_the_backend_limit_are_truncated_not_rejected() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "Fits now."}));
        })
        .await;

    // A backend limit well below the retrieval context forces the
    // documents section to shrink; the query must still go through.
    let stack = stack_with(&server, |c| c.generation.max_prompt_chars = 1_200);
    let body = "The refund policy covers returns within thirty days. ".repeat(60);
    std::fs::write(stack.docs.join("refunds.txt"), body).unwrap();
    stack.service.ingest_all().await.unwrap();

    let response = stack
        .orchestrator
        .query(&QueryRequest::new("what is the refund policy?"))
        .await
        .unwrap();

    assert_eq!(response.answer, "Fits now.");
    assert!(response.diagnostics.prompt_chars <= 1_200);
    assert!(response.diagnostics.context_truncated);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let server = MockServer::start_async().await;
    let stack = stack(&server);

    let empty = stack.orchestrator.query(&QueryRequest::new("  ")).await.unwrap_err();
    assert!(matches!(empty, RagError::Orchestration { .. }));

    let mut bad_temp = QueryRequest::new("valid question");
    bad_temp.sampling.temperature = Some(9.0);
    assert!(stack.orchestrator.query(&bad_temp).await.is_err());

    let mut bad_k = QueryRequest::new("valid question");
    bad_k.max_results = Some(0);
    assert!(stack.orchestrator.query(&bad_k).await.is_err());
}

#[tokio::test]
async fn status_is_degraded_with_documents_but_no_backend() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(500);
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("a.txt"), "parking permit rules").unwrap();
    stack.service.ingest_all().await.unwrap();

    let status = stack.orchestrator.status().await;
    assert_eq!(status.overall, HealthState::Degraded);
    assert!(status.index_ready);
    assert!(!status.generation_available);
    assert_eq!(status.documents_ingested, 1);
}

#[tokio::test]
async fn status_is_healthy_when_both_sides_are_up() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({"models": [{"name": "mistral:latest"}]}));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("a.txt"), "refund policy").unwrap();
    stack.service.ingest_all().await.unwrap();

    let status = stack.orchestrator.status().await;
    assert_eq!(status.overall, HealthState::Healthy);
}

#[tokio::test]
async fn streamed_query_carries_sources_up_front() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).body(concat!(
                "{\"response\":\"Permits \",\"done\":false}\n",
                "{\"response\":\"cost $30.\",\"done\":true}\n",
            ));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("permits.txt"), "A parking permit costs thirty dollars.")
        .unwrap();
    stack.service.ingest_all().await.unwrap();

    let mut streamed = stack
        .orchestrator
        .query_stream(&QueryRequest::new("how much is a parking permit?"))
        .await
        .unwrap();

    assert_eq!(streamed.sources[0].filename, "permits.txt");
    let text = streamed.tokens.collect_text().await.unwrap();
    assert_eq!(text, "Permits cost $30.");
}

#[tokio::test]
async fn sanity_check_outcome_lands_in_diagnostics() {
    let server = MockServer::start_async().await;
    // First call answers, second call verifies; both hit the same endpoint,
    // so a single canned reply that starts with "Yes" serves both.
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({"response": "Yes, thirty days."}));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("refunds.txt"), "refund policy: thirty days").unwrap();
    stack.service.ingest_all().await.unwrap();

    let response = stack
        .orchestrator
        .query_with_sanity_check(&QueryRequest::new("refund policy?"))
        .await
        .unwrap();

    let verification = response.diagnostics.verification.expect("verification recorded");
    assert!(verification.passed);
    assert_eq!(response.answer, "Yes, thirty days.");
}

#[tokio::test]
async fn errored_verification_call_is_recorded_and_answer_kept() {
    let server = MockServer::start_async().await;
    // The answer prompt carries retrieved documents, the verification
    // prompt carries the proposed answer; match on those markers so only
    // the verification call fails.
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_includes("Relevant Documents:");
            then.status(200).json_body(json!({"response": "Thirty days."}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_includes("Proposed answer:");
            then.status(404).json_body(json!({"error": "model gone"}));
        })
        .await;

    let stack = stack(&server);
    std::fs::write(stack.docs.join("refunds.txt"), "refund policy: thirty days").unwrap();
    stack.service.ingest_all().await.unwrap();

    let response = stack
        .orchestrator
        .query_with_sanity_check(&QueryRequest::new("refund policy?"))
        .await
        .unwrap();

    assert_eq!(response.answer, "Thirty days.");
    let verification = response.diagnostics.verification.expect("failure recorded");
    assert!(!verification.passed);
    assert!(verification.reply.contains("verification call failed"));
}
