//! Contract to the component that does the analytical reasoning
//!
//! The pipeline treats reasoning as opaque: a task hands over a
//! [`PromptContext`] and gets back a JSON object, which the dispatcher then
//! checks against the task's declared schema.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use filing_llm::{CompletionRequest, CompletionResponse, LLMProvider, Message};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Everything a collaborator needs to answer one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptContext {
    pub task_name: String,
    /// Rendered task instructions
    pub instructions: String,
    /// Structured input data
    pub data: Value,
    /// Description of the expected output object
    pub output_schema: Value,
}

/// Performs analysis for a named task
#[async_trait]
pub trait AnalysisCollaborator: Send + Sync {
    /// Submit a task and return the raw output object
    async fn submit(&self, task_name: &str, ctx: &PromptContext) -> Result<Value, CollaboratorError>;
}

const SYSTEM_PROMPT: &str = "You are a financial analyst reviewing regulatory filings. \
Base every statement on the data provided and cite line items by their labels. \
Respond with a single JSON object matching the output schema and nothing else.";

/// Collaborator backed by an [`LLMProvider`] in JSON mode
pub struct LlmCollaborator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: usize,
    temperature: f32,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmCollaborator {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 2048,
            temperature: 0.2,
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Retry transient provider failures; the delay grows linearly per attempt
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn complete_with_retry(&self, request: CompletionRequest) -> filing_llm::Result<CompletionResponse> {
        let mut attempt = 0;
        loop {
            match self.provider.complete(request.clone()).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Transient LLM failure; retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                result => return result,
            }
        }
    }

    fn user_message(ctx: &PromptContext) -> Result<String, CollaboratorError> {
        let data = serde_json::to_string_pretty(&ctx.data).map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        let schema =
            serde_json::to_string_pretty(&ctx.output_schema).map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        Ok(format!(
            "{}\n\n## Data\n{data}\n\n## Output schema\n{schema}",
            ctx.instructions.trim()
        ))
    }
}

impl std::fmt::Debug for LlmCollaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCollaborator")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AnalysisCollaborator for LlmCollaborator {
    #[instrument(skip(self, ctx), fields(provider = self.provider.name(), model = %self.model))]
    async fn submit(&self, task_name: &str, ctx: &PromptContext) -> Result<Value, CollaboratorError> {
        let request = CompletionRequest::builder(&self.model)
            .system(SYSTEM_PROMPT)
            .add_message(Message::user(Self::user_message(ctx)?))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .json_output()
            .build();

        let response = self.complete_with_retry(request).await?;
        debug!(
            task = task_name,
            output_tokens = response.usage.output_tokens,
            "Collaborator answered"
        );

        let text = response
            .message
            .text()
            .ok_or_else(|| CollaboratorError::Malformed("empty response".to_string()))?;
        parse_json_object(text)
    }
}

/// Parse a JSON object out of model output, tolerating code fences and
/// surrounding prose
pub fn parse_json_object(text: &str) -> Result<Value, CollaboratorError> {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(CollaboratorError::Malformed("no JSON object in response".to_string()));
    };
    if end <= start {
        return Err(CollaboratorError::Malformed("no JSON object in response".to_string()));
    }

    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(CollaboratorError::Malformed("response is not a JSON object".to_string())),
        Err(e) => Err(CollaboratorError::Malformed(e.to_string())),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filing_llm::{CompletionResponse, LLMError, StopReason, TokenUsage};
    use serde_json::json;
    use std::sync::Mutex;

    enum Reply {
        Text(String),
        Transient(String),
        Auth,
    }

    struct CannedProvider {
        reply: Reply,
        /// Transient failures to return before the reply
        flaky: Mutex<u32>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedProvider {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                flaky: Mutex::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn replying(text: &str) -> Self {
            Self::new(Reply::Text(text.to_string()))
        }

        fn failing(message: &str) -> Self {
            Self::new(Reply::Transient(message.to_string()))
        }

        fn flaky(self, failures: u32) -> Self {
            *self.flaky.lock().unwrap() = failures;
            self
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LLMProvider for CannedProvider {
        async fn complete(&self, request: CompletionRequest) -> filing_llm::Result<CompletionResponse> {
            self.seen.lock().unwrap().push(request);
            {
                let mut flaky = self.flaky.lock().unwrap();
                if *flaky > 0 {
                    *flaky -= 1;
                    return Err(LLMError::RateLimitExceeded("slow down".to_string()));
                }
            }
            match &self.reply {
                Reply::Text(text) => Ok(CompletionResponse {
                    message: Message::assistant(text.clone()),
                    stop_reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                }),
                Reply::Transient(message) => Err(LLMError::RequestFailed(message.clone())),
                Reply::Auth => Err(LLMError::AuthenticationFailed),
            }
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn context() -> PromptContext {
        PromptContext {
            task_name: "balance_sheet_analysis".to_string(),
            instructions: "Analyze the balance sheet of Tesla.".to_string(),
            data: json!({"totalAssets": 133_735_000_000_u64}),
            output_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_submit_sends_json_mode_request() {
        let provider = Arc::new(CannedProvider::replying(r#"{"executiveSummary": "Solid"}"#));
        let collaborator = LlmCollaborator::new(provider.clone(), "gpt-4o-mini").with_max_tokens(512);

        let output = collaborator.submit("balance_sheet_analysis", &context()).await.unwrap();
        assert_eq!(output["executiveSummary"], "Solid");

        let seen = provider.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.response_format, filing_llm::ResponseFormat::JsonObject);
        assert!(request.messages[0].content.contains("133735000000"));
        assert!(request.messages[0].content.starts_with("Analyze the balance sheet"));
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        let provider = Arc::new(CannedProvider::failing("503"));
        let collaborator = LlmCollaborator::new(provider.clone(), "m").with_retries(2, Duration::ZERO);
        let err = collaborator.submit("t", &context()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Upstream(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = Arc::new(CannedProvider::replying(r#"{"rating": "Strong"}"#).flaky(1));
        let collaborator = LlmCollaborator::new(provider.clone(), "m").with_retries(2, Duration::ZERO);

        let output = collaborator.submit("t", &context()).await.unwrap();
        assert_eq!(output["rating"], "Strong");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let provider = Arc::new(CannedProvider::new(Reply::Auth));
        let collaborator = LlmCollaborator::new(provider.clone(), "m").with_retries(2, Duration::ZERO);

        assert!(collaborator.submit("t", &context()).await.is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_malformed() {
        let collaborator = LlmCollaborator::new(Arc::new(CannedProvider::replying("  ")), "m");
        let err = collaborator.submit("t", &context()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[test]
    fn test_parse_fenced_json() {
        let value = parse_json_object("```json\n{\"rating\": \"Strong\"}\n```").unwrap();
        assert_eq!(value["rating"], "Strong");
    }

    #[test]
    fn test_parse_json_with_prose() {
        let value = parse_json_object("Here is the analysis: {\"a\": {\"b\": 1}} Hope it helps").unwrap();
        assert_eq!(value["a"]["b"], 1);
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_json_object("[1, 2, 3]").is_err());
        assert!(parse_json_object("no json here").is_err());
        assert!(parse_json_object("} backwards {").is_err());
    }
}
