//! Naiad Providers
//!
//! The two external model contracts the engine depends on:
//!
//! - [`LlmProvider`]: one structured call, `prompt + schema -> JSON object`
//! - [`EmbeddingProvider`]: `text -> fixed-dimension vector`
//!
//! Each has a deterministic simulation implementation (scripted responses,
//! hash-derived fallbacks, fault hooks) and an OpenAI-compatible HTTP
//! implementation layered on `naiad_core::http::HttpClient`.

mod embedding;
mod llm;

pub use embedding::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, HttpEmbeddingProvider,
    SimEmbeddingProvider, EMBEDDING_DIM_1536, EMBEDDING_DIM_384,
};
pub use llm::{
    HttpLlmProvider, LlmConfig, LlmError, LlmProvider, LlmResult, SimLlmProvider,
    StructuredResponse,
};
