use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tabrelay_core::config::AgentDefaults;
use tabrelay_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use tabrelay_core::{Error, Result};
use tabrelay_providers::Provider;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a browser automation agent. You operate the user's \
browser through the provided tools. Call getInteractiveSnapshot before clicking or typing so you \
know which nodeIds exist, and take a fresh snapshot after navigating or scrolling. Answer with a \
short summary once the task is done.";

/// Runs one browser action on behalf of the agent.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute_action(&self, action: &str, payload: Value) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_tool_iterations: u32,
    pub llm_max_retries: u32,
    pub llm_retry_delay_ms: u64,
    pub system_prompt: String,
}

impl From<&AgentDefaults> for AgentSettings {
    fn from(defaults: &AgentDefaults) -> Self {
        Self {
            max_tool_iterations: defaults.max_tool_iterations.max(1),
            llm_max_retries: defaults.llm_max_retries,
            llm_retry_delay_ms: defaults.llm_retry_delay_ms,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentDefaults::default())
    }
}

/// One conversation's agent: a provider, the tool surface, and history.
pub struct BrowserAgent {
    conversation_id: String,
    provider: Arc<dyn Provider>,
    executor: Arc<dyn ActionExecutor>,
    tools: Vec<Value>,
    settings: AgentSettings,
    history: Mutex<Vec<ChatMessage>>,
}

impl BrowserAgent {
    pub fn new(
        conversation_id: &str,
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ActionExecutor>,
        tools: Vec<Value>,
        settings: AgentSettings,
    ) -> Self {
        let history = vec![ChatMessage::system(&settings.system_prompt)];
        Self {
            conversation_id: conversation_id.to_string(),
            provider,
            executor,
            tools,
            settings,
            history: Mutex::new(history),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Number of messages in history, system prompt included.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// History length without waiting; `None` while a turn holds the history.
    pub fn try_history_len(&self) -> Option<usize> {
        self.history.try_lock().ok().map(|h| h.len())
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    /// Runs one user turn to completion and returns the final text.
    ///
    /// Turns on the same agent are serialized. A turn that fails leaves the
    /// history as it was before the turn started.
    pub async fn execute(&self, message: &str) -> Result<String> {
        let mut history = self.history.lock().await;
        let turn_start = history.len();
        history.push(ChatMessage::user(message));

        match self.run_turn(&mut history).await {
            Ok(text) => Ok(text),
            Err(e) => {
                history.truncate(turn_start);
                Err(e)
            }
        }
    }

    async fn run_turn(&self, history: &mut Vec<ChatMessage>) -> Result<String> {
        let max_iterations = self.settings.max_tool_iterations;

        for iteration in 0..max_iterations {
            debug!(conversation_id = %self.conversation_id, iteration, "LLM call iteration");
            let response = self.chat_with_retry(history, iteration).await?;

            info!(
                content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
                tool_calls_count = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response received"
            );

            if response.tool_calls.is_empty() {
                let text = response.content.unwrap_or_default();
                history.push(ChatMessage::assistant(&text));
                return Ok(text);
            }

            history.push(ChatMessage::assistant_tool_calls(
                response.content.as_deref(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = self.execute_tool_call(call).await;
                history.push(ChatMessage::tool_result(&call.id, &result));
            }
        }

        warn!(conversation_id = %self.conversation_id, max_iterations, "Reached max tool iterations");
        let text = "I've reached the maximum number of tool iterations.".to_string();
        history.push(ChatMessage::assistant(&text));
        Ok(text)
    }

    async fn chat_with_retry(&self, messages: &[ChatMessage], iteration: u32) -> Result<LLMResponse> {
        let max_retries = self.settings.llm_max_retries;
        let base_delay_ms = self.settings.llm_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, max_retries, delay_ms, iteration, "Retrying LLM call after transient error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.provider.chat(messages, &self.tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, iteration, "LLM call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt, max_retries, iteration, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response".to_string());
        Err(Error::Provider(format!(
            "LLM call failed after {} retries: {}",
            max_retries, detail
        )))
    }

    async fn execute_tool_call(&self, call: &ToolCallRequest) -> String {
        debug!(tool = %call.name, id = %call.id, "Executing tool call");
        match self
            .executor
            .execute_action(&call.name, call.arguments.clone())
            .await
        {
            Ok(data) => data.to_string(),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                json!({ "error": e.to_string(), "tool": call.name }).to_string()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_plain_answer() {
        let provider = ScriptedProvider::new(vec![Ok(text_reply("Hello!"))]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = BrowserAgent::new("c1", provider, executor, vec![], fast_settings());

        assert_eq!(agent.execute("hi").await.unwrap(), "Hello!");
        // system, user, assistant
        assert_eq!(agent.history_len().await, 3);
    }

    #[tokio::test]
    async fn test_tool_loop() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_reply("call_1", "getTabs", json!({}))),
            Ok(text_reply("You have one tab open.")),
        ]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = BrowserAgent::new("c1", provider.clone(), executor.clone(), vec![], fast_settings());

        let answer = agent.execute("how many tabs?").await.unwrap();
        assert_eq!(answer, "You have one tab open.");
        assert_eq!(executor.calls.lock().unwrap()[0].0, "getTabs");

        let history = agent.history().await;
        let tool_msg = history.iter().find(|m| m.role == "tool").unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(tool_msg.text().contains("Example"));
        // The second provider call saw the tool result.
        assert_eq!(provider.calls.lock().unwrap()[1].len(), 4);
    }

    #[tokio::test]
    async fn test_tool_error_goes_back_to_model() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_reply("call_1", "broken", json!({"nodeId": 3}))),
            Ok(text_reply("That element is gone.")),
        ]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = BrowserAgent::new("c1", provider, executor, vec![], fast_settings());

        agent.execute("click it").await.unwrap();
        let history = agent.history().await;
        let tool_msg = history.iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_msg.text().contains("element not found"));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::Provider("503".to_string())),
            Ok(text_reply("ok")),
        ]);
        let agent = BrowserAgent::new(
            "c1",
            provider.clone(),
            Arc::new(RecordingExecutor::default()),
            vec![],
            fast_settings(),
        );
        assert_eq!(agent.execute("hi").await.unwrap(), "ok");
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_turn_rolls_back_history() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::Provider("down".to_string())),
            Err(Error::Provider("down".to_string())),
            Err(Error::Provider("down".to_string())),
        ]);
        let agent = BrowserAgent::new(
            "c1",
            provider,
            Arc::new(RecordingExecutor::default()),
            vec![],
            fast_settings(),
        );
        let err = agent.execute("hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(agent.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let replies = (0..10)
            .map(|i| Ok(tool_reply(&format!("call_{}", i), "getTabs", json!({}))))
            .collect();
        let provider = ScriptedProvider::new(replies);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = BrowserAgent::new("c1", provider, executor.clone(), vec![], fast_settings());

        let answer = agent.execute("loop forever").await.unwrap();
        assert!(answer.contains("maximum number of tool iterations"));
        assert_eq!(executor.calls.lock().unwrap().len(), 5);
    }
}
