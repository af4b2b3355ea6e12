use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clients::{ChatClient, ChatRole, ChatTurn};
use crate::config::Config;
use crate::error::{AppError, AppResult, BackendError};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// 后端过载
const STATUS_OVERLOADED: u16 = 529;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API 客户端
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model_name: String,
    name: String,
}

impl AnthropicClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(config.llm_timeout)
            .build()
            .map_err(|e| AppError::Other(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.anthropic_api_key.clone(),
            base_url: config.anthropic_api_base.trim_end_matches('/').to_string(),
            model_name: config.anthropic_model.clone(),
            name: format!("anthropic/{}", config.anthropic_model),
        })
    }

    /// 按状态码区分可重试 / 终止性错误
    fn classify_status(
        &self,
        status: StatusCode,
        retry_after: Option<Duration>,
        body: String,
    ) -> BackendError {
        let reason = format!("HTTP {}: {}", status.as_u16(), body);
        if status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
            || status.as_u16() == STATUS_OVERLOADED
        {
            BackendError::Retryable {
                backend: self.name.clone(),
                reason,
                retry_after,
            }
        } else {
            BackendError::terminal(&self.name, reason)
        }
    }
}

/// 解析 `retry-after` 头（秒）
fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String, BackendError> {
        debug!("调用 Anthropic API，模型: {}, 消息数: {}", self.model_name, turns.len());

        let payload = MessagesRequest {
            model: &self.model_name,
            max_tokens: 4096,
            temperature: 0.0,
            system,
            messages: turns
                .iter()
                .map(|turn| RequestMessage {
                    role: match turn.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: &turn.content,
                })
                .collect(),
        };

        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!("Anthropic API 请求失败: {}", e);
                BackendError::retryable(&self.name, e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            warn!("Anthropic API 返回错误状态 {}", status);
            return Err(self.classify_status(status, retry_after, body));
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::retryable(&self.name, format!("响应解析失败: {}", e)))?;

        let text: String = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(BackendError::retryable(&self.name, "返回内容为空"));
        }

        debug!("Anthropic API 调用成功，响应长度: {} 字符", text.len());
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_classify_status() {
        let c = client();
        assert!(c
            .classify_status(StatusCode::TOO_MANY_REQUESTS, None, String::new())
            .is_retryable());
        assert!(c
            .classify_status(StatusCode::from_u16(529).unwrap(), None, String::new())
            .is_retryable());
        assert!(c
            .classify_status(StatusCode::BAD_GATEWAY, None, String::new())
            .is_retryable());
        assert!(!c
            .classify_status(StatusCode::BAD_REQUEST, None, "invalid".into())
            .is_retryable());
        let err = c.classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            String::new(),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_request_serialization() {
        let payload = MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            system: "sys",
            messages: vec![RequestMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["system"], "sys");
    }

    #[tokio::test]
    #[ignore = "需要真实的 ANTHROPIC_API_KEY"]
    async fn test_live_chat() {
        let config = Config::from_env().unwrap();
        let client = AnthropicClient::new(&config).unwrap();
        let reply = client
            .chat("Reply with OK.", &[ChatTurn::user("ping")])
            .await
            .unwrap();
        assert!(!reply.is_empty());
    }
}
