//! InkWorks generation backend adapter.
//!
//! Implements the [`pipeline::GenerationBackend`] trait for Anthropic's
//! Messages API. Other providers are added as further implementations in this
//! crate without any change to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing,
//! `retry-after` extraction and error-body scrubbing live here. The
//! [`pipeline`] crate sees only [`pipeline::GenerationBackend`] and
//! [`pipeline::BackendError`].
//!
//! The adapter never retries. Each [`pipeline::GenerationBackend::complete`]
//! call is exactly one HTTP request.

mod anthropic;
mod wire;

pub use anthropic::{
    AnthropicBackend, AnthropicConfig, ANTHROPIC_VERSION, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
