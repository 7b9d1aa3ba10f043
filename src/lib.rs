//! # Nexus RAG
//!
//! A retrieval-augmented question answering core for local document
//! collections.
//!
//! Nexus RAG ingests documents (plain text, Markdown, PDF) into an
//! embedding index with content-hash change detection, retrieves the most
//! similar chunks for a question, composes a bounded prompt with citation
//! tracking, and drives an Ollama-compatible generation backend with
//! retries, availability probing, and optional token streaming.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Documents │──▶│ IndexService │──▶│ VectorIndex  │
//! │ txt/md/pdf │   │ chunk+embed │   │ cosine + JSON │
//! └────────────┘   └──────┬──────┘   └──────┬───────┘
//!                         │ search          │
//!                  ┌──────▼──────────────────▼──────┐
//!                  │       QueryOrchestrator        │
//!                  │ validate ▸ retrieve ▸ compose  │
//!                  └──────────────┬─────────────────┘
//!                                 ▼
//!                        ┌────────────────┐
//!                        │ GenerationClient│
//!                        │ Ollama HTTP API │
//!                        └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nexus_rag::config::Config;
//! use nexus_rag::embedding::OllamaEmbedder;
//! use nexus_rag::generation::GenerationClient;
//! use nexus_rag::index::IndexService;
//! use nexus_rag::orchestrator::{QueryOrchestrator, QueryRequest};
//! use nexus_rag::vector_index::InMemoryVectorIndex;
//!
//! # async fn run() -> nexus_rag::error::Result<()> {
//! let config = nexus_rag::config::load_config("nexus.toml")?;
//! let embedder = Arc::new(OllamaEmbedder::new(&config.embedding)?);
//! let index = Arc::new(InMemoryVectorIndex::open(&config.index.persist_dir)?);
//! let service = Arc::new(IndexService::new(&config, embedder, index)?);
//! let generator = Arc::new(GenerationClient::new(&config.generation)?);
//! let orchestrator = QueryOrchestrator::new(&config.orchestrator, service.clone(), generator);
//!
//! service.ingest_all().await?;
//! let response = orchestrator.query(&QueryRequest::new("What is the refund policy?")).await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`loader`] | Document loading and text extraction |
//! | [`chunker`] | Overlapping boundary-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Vector storage and similarity search |
//! | [`content_store`] | Ingested-document records |
//! | [`cache`] | Bounded LRU + TTL cache |
//! | [`index`] | Ingestion and cached search service |
//! | [`retry`] | Bounded exponential backoff |
//! | [`stream`] | Streamed generation decoding |
//! | [`generation`] | Ollama-compatible generation client |
//! | [`prompt`] | Prompt assembly and context composition |
//! | [`orchestrator`] | Query orchestration and health |

pub mod cache;
pub mod chunker;
pub mod config;
pub mod content_store;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
pub mod stream;
pub mod vector_index;

pub use error::{RagError, Result};
