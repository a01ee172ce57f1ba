//! LLM gateway: the single path from the executor to the generation backend.
//!
//! Every call is raced against the run's cancellation token and bounded by the
//! per-call timeout, and each one gets its own `llm_call` span.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pipeline::{Completion, CompletionRequest, Credential, GenerationBackend, PassFailure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Default bound on a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Wraps a [`GenerationBackend`] with cancellation, timeout and tracing.
pub struct LlmGateway {
    backend: Arc<dyn GenerationBackend>,
    call_timeout: Duration,
}

impl LlmGateway {
    /// Gateway that gives each call at most `call_timeout`.
    pub fn new(backend: Arc<dyn GenerationBackend>, call_timeout: Duration) -> Self {
        Self {
            backend,
            call_timeout,
        }
    }

    /// Sends one request. Never retries.
    ///
    /// Cancellation wins over a completion that becomes ready at the same time.
    pub async fn call(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, PassFailure> {
        let span = info_span!(
            "llm_call",
            pass = %request.pass,
            temperature = request.temperature,
            tokens_used = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PassFailure::Cancelled),
                result = tokio::time::timeout(
                    self.call_timeout,
                    self.backend.complete(credential, request),
                ) => match result {
                    Ok(Ok(completion)) => Ok(completion),
                    Ok(Err(e)) => Err(PassFailure::Backend(e)),
                    Err(_) => Err(PassFailure::TimedOut { after: self.call_timeout }),
                },
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(completion) => {
                    Span::current().record("tokens_used", completion.tokens_used.as_u64());
                    debug!(elapsed_ms, "backend call completed");
                }
                Err(e) => warn!(elapsed_ms, error = %e, "backend call failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use pipeline::{BackendError, Pass};

    fn request() -> CompletionRequest {
        CompletionRequest {
            pass: Pass::Draft,
            system_prompt: "sys".into(),
            user_prompt: "user".into(),
            temperature: 0.8,
        }
    }

    fn key() -> Credential {
        Credential::new("k").unwrap()
    }

    #[tokio::test]
    async fn passes_completion_through() {
        let backend = Arc::new(ScriptedBackend::new().reply_with_tokens("hello", 42));
        let gateway = LlmGateway::new(backend.clone(), DEFAULT_CALL_TIMEOUT);

        let completion = gateway
            .call(&key(), &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(completion.tokens_used.as_u64(), 42);
        assert_eq!(backend.passes(), vec![Pass::Draft]);
    }

    #[tokio::test]
    async fn backend_error_is_wrapped() {
        let err = BackendError::Status {
            status: 500,
            message: "boom".into(),
            retry_after: None,
        };
        let backend = Arc::new(ScriptedBackend::new().fail(err.clone()));
        let gateway = LlmGateway::new(backend, DEFAULT_CALL_TIMEOUT);

        let result = gateway.call(&key(), &request(), &CancellationToken::new()).await;
        assert_eq!(result, Err(PassFailure::Backend(err)));
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_backend() {
        let backend = Arc::new(ScriptedBackend::new().reply("unused"));
        let gateway = LlmGateway::new(backend.clone(), DEFAULT_CALL_TIMEOUT);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = gateway.call(&key(), &request(), &cancel).await;
        assert_eq!(result, Err(PassFailure::Cancelled));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out() {
        let backend = Arc::new(ScriptedBackend::new().hang());
        let gateway = LlmGateway::new(backend, Duration::from_secs(5));

        let result = gateway.call(&key(), &request(), &CancellationToken::new()).await;
        assert_eq!(
            result,
            Err(PassFailure::TimedOut {
                after: Duration::from_secs(5)
            })
        );
    }
}
