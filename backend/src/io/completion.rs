//! Remote completion capability and the timeout/retry policy around it.
//!
//! The [`CompletionService`] trait is the single seam to the language-model
//! provider. [`ModelGateway`] collects a streamed completion under a deadline
//! and owns the one implicit re-query applied to empty or failed streams.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::{debug, instrument, warn};

use crate::core::types::CompletionRequest;
use crate::error::ModelError;

/// Stream of text deltas for one completion.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionStream, ModelError>;
}

/// Builds the completion service for a named provider.
pub trait CompletionProvider: Send + Sync {
    fn connect(&self, provider: &str) -> Result<Arc<dyn CompletionService>, ModelError>;
}

/// Stand-in service for a session whose provider could not be built.
pub struct UnavailableCompletion {
    reason: String,
}

impl UnavailableCompletion {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionService for UnavailableCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionStream, ModelError> {
        Err(ModelError::Unavailable(self.reason.clone()))
    }
}

#[derive(Clone)]
pub struct ModelGateway {
    service: Arc<dyn CompletionService>,
    timeout: Duration,
    retry_delay: Duration,
}

impl ModelGateway {
    pub fn new(
        service: Arc<dyn CompletionService>,
        timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            service,
            timeout,
            retry_delay,
        }
    }

    /// Collect one full completion. Whitespace-only output is [`ModelError::Empty`].
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    pub async fn query(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let collect = async {
            let mut stream = self.service.complete(request).await?;
            let mut text = String::new();
            let mut chunks = 0usize;
            while let Some(chunk) = stream.next().await {
                text.push_str(&chunk?);
                chunks += 1;
            }
            debug!(chunks, chars = text.len(), "completion collected");
            Ok::<_, ModelError>(text)
        };

        let text = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))??;
        if text.trim().is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(text)
    }

    /// [`query`](Self::query) with one re-query after a short delay when the
    /// first attempt is empty or fails. Timeouts are terminal for the turn.
    pub async fn query_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ModelError> {
        match self.query(request).await {
            Ok(text) => Ok(text),
            Err(err) if err.is_timeout() || matches!(err, ModelError::Unavailable(_)) => Err(err),
            Err(err) => {
                warn!(
                    err = %err,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "completion failed, retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.query(request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;

    fn gateway(service: Arc<ScriptedCompletion>) -> ModelGateway {
        ModelGateway::new(service, Duration::from_secs(5), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn chunks_are_concatenated() {
        let service = Arc::new(ScriptedCompletion::new().respond_chunks(&["awesh: ", "echo hi"]));
        let text = gateway(service.clone())
            .query(&CompletionRequest::new("hi", None))
            .await
            .expect("query");
        assert_eq!(text, "awesh: echo hi");
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn empty_completion_is_retried_once() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .respond("   ")
                .respond("second try"),
        );
        let text = gateway(service.clone())
            .query_with_retry(&CompletionRequest::new("hi", None))
            .await
            .expect("retry succeeds");
        assert_eq!(text, "second try");
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn second_empty_completion_is_surfaced() {
        let service = Arc::new(ScriptedCompletion::new().respond("").respond(""));
        let err = gateway(service.clone())
            .query_with_retry(&CompletionRequest::new("hi", None))
            .await
            .expect_err("empty twice");
        assert!(matches!(err, ModelError::Empty));
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn unavailable_service_is_not_retried() {
        let gateway = ModelGateway::new(
            Arc::new(UnavailableCompletion::new("OPENAI_API_KEY not set")),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        let err = gateway
            .query_with_retry(&CompletionRequest::new("hi", None))
            .await
            .expect_err("unavailable");
        assert!(matches!(err, ModelError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_retried() {
        let service = Arc::new(ScriptedCompletion::new().stall());
        let gateway =
            ModelGateway::new(service.clone(), Duration::from_secs(300), Duration::from_secs(1));
        let err = gateway
            .query_with_retry(&CompletionRequest::new("hi", None))
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
        assert_eq!(service.calls(), 1);
    }
}
