//! Client for an Ollama-compatible generation backend.
//!
//! Speaks `POST /api/generate` (buffered or streamed NDJSON) and probes
//! `GET /api/tags` for availability. Transient failures retry with bounded
//! backoff; for streamed calls the retry envelope covers everything up to
//! stream acquisition, never a partially-delivered stream. The underlying
//! HTTP transport is rebuilt once it exceeds a configured age so stale
//! pooled connections do not serve long-lived processes forever.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::GenerationConfig;
use crate::error::{GenerationErrorKind, RagError, Result};
use crate::retry::RetryPolicy;
use crate::stream::TokenStream;

/// Per-call sampling knobs. `None` leaves the backend default in place.
#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

#[derive(Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: WireOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

struct Transport {
    client: reqwest::Client,
    built_at: Instant,
}

pub struct GenerationClient {
    transport: Mutex<Transport>,
    base_url: String,
    model: String,
    timeout: Duration,
    transport_max_age: Duration,
    max_prompt_chars: usize,
    max_stream_decode_failures: u32,
    retry: RetryPolicy,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = build_client(timeout)?;
        Ok(GenerationClient {
            transport: Mutex::new(Transport {
                client,
                built_at: Instant::now(),
            }),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
            transport_max_age: Duration::from_secs(config.transport_max_age_secs),
            max_prompt_chars: config.max_prompt_chars,
            max_stream_decode_failures: config.max_stream_decode_failures,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    /// Configured model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Largest prompt this client will accept, in characters.
    pub fn max_prompt_chars(&self) -> usize {
        self.max_prompt_chars
    }

    /// Current HTTP client, rebuilt when it has aged past the limit.
    fn client(&self) -> Result<reqwest::Client> {
        let mut transport = self.transport.lock().unwrap();
        if transport.built_at.elapsed() > self.transport_max_age {
            debug!("generation transport aged out, rebuilding");
            transport.client = build_client(self.timeout)?;
            transport.built_at = Instant::now();
        }
        Ok(transport.client.clone())
    }

    /// Probe the backend. `Ok` means it is reachable and the configured
    /// model is present.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client()?
            .get(&url)
            .send()
            .await
            .map_err(|e| RagError::from_transport("availability probe", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::generation(
                GenerationErrorKind::Unavailable,
                format!("tags endpoint returned {status}"),
            ));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport("tags response", e))?;

        let present = tags.models.iter().any(|m| model_matches(&m.name, &self.model));
        if present {
            Ok(())
        } else {
            Err(RagError::generation(
                GenerationErrorKind::ModelNotFound,
                format!("model '{}' is not installed on the backend", self.model),
            ))
        }
    }

    /// True when the backend is reachable and serving the configured model.
    pub async fn is_available(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "generation backend unavailable");
                false
            }
        }
    }

    /// One buffered completion. Retries transient failures.
    #[instrument(skip_all, fields(prompt_chars = prompt.len()))]
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &SamplingParams,
    ) -> Result<String> {
        self.validate_call(prompt, params)?;
        self.retry
            .run("generate", || self.generate_once(prompt, system, params))
            .await
    }

    /// Start a streamed completion. Retries cover request setup and the
    /// initial response only; once a [`TokenStream`] is returned, failures
    /// surface through it without another attempt.
    #[instrument(skip_all, fields(prompt_chars = prompt.len()))]
    pub async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &SamplingParams,
    ) -> Result<TokenStream> {
        self.validate_call(prompt, params)?;
        self.retry
            .run("generate_stream", || {
                self.generate_stream_once(prompt, system, params)
            })
            .await
    }

    fn validate_call(&self, prompt: &str, params: &SamplingParams) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(RagError::Input("prompt must not be empty".into()));
        }
        if prompt.len() > self.max_prompt_chars {
            return Err(RagError::Input(format!(
                "prompt is {} chars, limit is {}",
                prompt.len(),
                self.max_prompt_chars
            )));
        }
        if let Some(t) = params.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RagError::Input(format!(
                    "temperature {t} outside [0.0, 2.0]"
                )));
            }
        }
        if params.max_tokens == Some(0) {
            return Err(RagError::Input("max_tokens must be positive".into()));
        }
        Ok(())
    }

    async fn send_generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &SamplingParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: WireOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                top_p: params.top_p,
                top_k: params.top_k,
            },
            system,
        };

        let response = self
            .client()?
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::from_transport("generate request", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let kind = match status.as_u16() {
            404 => GenerationErrorKind::ModelNotFound,
            429 => GenerationErrorKind::RateLimited,
            s if (500..600).contains(&s) => GenerationErrorKind::Unavailable,
            _ => GenerationErrorKind::InvalidResponse,
        };
        Err(RagError::generation(
            kind,
            format!("generate endpoint returned {status}"),
        ))
    }

    async fn generate_once(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &SamplingParams,
    ) -> Result<String> {
        let response = self.send_generate(prompt, system, params, false).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport("generate response", e))?;
        Ok(body.response)
    }

    async fn generate_stream_once(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &SamplingParams,
    ) -> Result<TokenStream> {
        let response = self.send_generate(prompt, system, params, true).await?;
        let bytes = response.bytes_stream().boxed();
        Ok(TokenStream::new(bytes, self.max_stream_decode_failures))
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::Config(format!("failed to build generation client: {e}")))
}

/// A tag entry matches when it equals the configured model exactly or when
/// its base name (before the `:tag` suffix) does.
fn model_matches(tag_name: &str, configured: &str) -> bool {
    if tag_name == configured {
        return true;
    }
    tag_name.split(':').next() == Some(configured)
}
