//! OpenAI 兼容的聊天客户端
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型（兼容 OpenAI API 的服务均可）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::{ChatClient, ChatRole, ChatTurn};
use crate::config::Config;
use crate::error::BackendError;

/// 消息中出现即视为临时性故障
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "overloaded",
    "server_error",
    "server error",
    "timeout",
    "timed out",
    "temporarily",
    "try again",
];

/// OpenAI 客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    name: String,
}

impl OpenAiClient {
    /// 创建新的 OpenAI 客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_api_base);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.openai_model.clone(),
            name: format!("openai/{}", config.openai_model),
        }
    }

    fn build_messages(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()?;
        messages.push(ChatCompletionRequestMessage::System(system_msg));

        for turn in turns {
            let message = match turn.role {
                ChatRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?,
                ),
                ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?,
                ),
            };
            messages.push(message);
        }

        Ok(messages)
    }

    fn classify(&self, err: OpenAIError) -> BackendError {
        match err {
            OpenAIError::ApiError(api) => {
                let message = api.to_string();
                let lowered = message.to_lowercase();
                if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
                    BackendError::retryable(&self.name, message)
                } else {
                    BackendError::terminal(&self.name, message)
                }
            }
            OpenAIError::Reqwest(e) => BackendError::retryable(&self.name, e.to_string()),
            other => BackendError::terminal(&self.name, other.to_string()),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String, BackendError> {
        debug!("调用 OpenAI API，模型: {}, 消息数: {}", self.model_name, turns.len());

        let messages = self
            .build_messages(system, turns)
            .map_err(|e| BackendError::terminal(&self.name, e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.0)
            .max_tokens(4096u32)
            .build()
            .map_err(|e| BackendError::terminal(&self.name, e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("OpenAI API 调用失败: {}", e);
            self.classify(e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| BackendError::retryable(&self.name, "返回内容为空"))?;

        debug!("OpenAI API 调用成功，响应长度: {} 字符", content.len());
        Ok(content.trim().to_string())
    }
}
