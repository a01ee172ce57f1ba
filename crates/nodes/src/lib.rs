//! InkWorks pipeline executor and the services it orchestrates.
//!
//! This crate provides the [`PipelineExecutor`] that drives a generation
//! through Draft, Critique, Rewrite and the optional detection-refinement pass,
//! the per-caller [`RateLimiter`] and [`CheckpointStore`] services, and the
//! [`LlmGateway`] that wraps every backend call with cancellation, a timeout
//! and tracing.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The executor sequences calls between business
//! logic in the [`pipeline`] crate (parsing, detection policy, rate-limit
//! policy, checkpoint validity) and the port traits it is given. It holds no
//! domain rules of its own.
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`executor`] | [`PipelineExecutor`], [`ExecutorDeps`], [`PipelineConfig`] |
//! | [`rate_limiter`] | [`RateLimiter`]: persisted cooldown and daily caps |
//! | [`checkpoint_store`] | [`CheckpointStore`]: single resumable slot per caller |
//! | [`gateway`] | [`LlmGateway`]: timeout, cancellation, `llm_call` span |
//! | `testing` | Deterministic port doubles (`testing` feature) |

pub mod checkpoint_store;
pub mod executor;
pub mod gateway;
pub mod rate_limiter;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checkpoint_store::CheckpointStore;
pub use executor::{ExecutorDeps, PassTemperatures, PipelineConfig, PipelineExecutor};
pub use gateway::{LlmGateway, DEFAULT_CALL_TIMEOUT};
pub use rate_limiter::RateLimiter;
