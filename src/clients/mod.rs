//! 评分后端的聊天客户端
//!
//! 两个提供方实现同一个 `ChatClient` 接口，上层的修复 / 重试 / 持久化逻辑
//! 不感知具体提供方。

pub mod anthropic_client;
pub mod openai_client;

use async_trait::async_trait;

use crate::error::BackendError;

pub use anthropic_client::AnthropicClient;
pub use openai_client::OpenAiClient;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// 一轮对话消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 聊天补全能力
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// 提供方名称，写入成绩记录
    fn name(&self) -> &str;

    /// 发送一次对话，返回助手回复文本
    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String, BackendError>;
}
