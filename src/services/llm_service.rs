//! LLM 评分服务 - 业务能力层
//!
//! 只负责"给一份提交打分"能力，不关心重试和持久化
//!
//! ## 技术栈
//! - 底层聊天由 `clients::ChatClient` 提供（OpenAI / Anthropic 可替换）
//! - 响应无法解析时追加修复对话，最多 `MAX_REPAIRS` 轮

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::{AnthropicClient, ChatClient, ChatTurn, OpenAiClient};
use crate::config::{Config, Provider};
use crate::error::{AppResult, BackendError};
use crate::models::{Exercise, GradeResult, RouteId};
use crate::services::grading_prompt::{
    build_repair_prompt, build_user_prompt, parse_grade_response, SYSTEM_PROMPT,
};

/// 响应修复的最大轮数
pub const MAX_REPAIRS: usize = 2;

/// 一次评分请求
#[derive(Debug, Clone)]
pub struct GradeRequest {
    pub route: RouteId,
    /// 路线说明（已格式化）
    pub route_text: String,
    pub exercises: Vec<Exercise>,
    pub submission_name: String,
    /// 渲染后的提交内容
    pub content: String,
}

/// 评分后端能力
///
/// 可重试错误由调用方按重试策略处理，终止性错误直接上报
#[async_trait]
pub trait GradingBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn grade_submission(&self, request: &GradeRequest) -> Result<GradeResult, BackendError>;
}

/// LLM 评分服务
///
/// 职责：
/// - 构建评分提示词
/// - 解析、校验响应，必要时请求修复
/// - 不做重试，不写文件
pub struct LlmService<C: ChatClient> {
    client: C,
    timeout: Duration,
    max_repairs: usize,
}

impl<C: ChatClient> LlmService<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_repairs: MAX_REPAIRS,
        }
    }

    async fn chat(&self, turns: &[ChatTurn]) -> Result<String, BackendError> {
        match tokio::time::timeout(self.timeout, self.client.chat(SYSTEM_PROMPT, turns)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::retryable(
                self.client.name(),
                format!("请求超时（{} 秒）", self.timeout.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl<C: ChatClient> GradingBackend for LlmService<C> {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn grade_submission(&self, request: &GradeRequest) -> Result<GradeResult, BackendError> {
        debug!(
            "开始评分: 路线 {} | 文件 {} | 内容长度 {} 字符",
            request.route,
            request.submission_name,
            request.content.len()
        );

        let mut turns = vec![ChatTurn::user(build_user_prompt(
            &request.route_text,
            &request.exercises,
            &request.submission_name,
            &request.content,
        ))];

        let mut repairs = 0;
        loop {
            let reply = self.chat(&turns).await?;
            match parse_grade_response(&reply, &request.exercises) {
                Ok(result) => {
                    if repairs > 0 {
                        debug!("第 {} 轮修复后解析成功", repairs);
                    }
                    return Ok(result);
                }
                Err(e) if repairs < self.max_repairs => {
                    repairs += 1;
                    warn!(
                        "评分响应无法使用（{}），发起第 {}/{} 轮修复",
                        e, repairs, self.max_repairs
                    );
                    turns.push(ChatTurn::assistant(reply));
                    turns.push(ChatTurn::user(build_repair_prompt(
                        &e.to_string(),
                        &request.exercises,
                    )));
                }
                Err(e) => {
                    return Err(BackendError::terminal(
                        self.client.name(),
                        format!("{} 轮修复后响应仍无法使用: {}", self.max_repairs, e),
                    ));
                }
            }
        }
    }
}

/// 根据配置创建评分后端
pub fn backend_from_config(config: &Config) -> AppResult<Arc<dyn GradingBackend>> {
    let backend: Arc<dyn GradingBackend> = match config.provider {
        Provider::OpenAi => Arc::new(LlmService::new(OpenAiClient::new(config), config.llm_timeout)),
        Provider::Anthropic => Arc::new(LlmService::new(
            AnthropicClient::new(config)?,
            config.llm_timeout,
        )),
    };
    tracing::info!("评分后端: {}", backend.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 按顺序返回预设回复的聊天客户端
    struct ScriptedChat {
        replies: Mutex<Vec<Result<String, BackendError>>>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedChat {
        fn new(mut replies: Vec<Result<String, BackendError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _system: &str, turns: &[ChatTurn]) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(turns.len());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(BackendError::terminal("scripted", "script exhausted")))
        }
    }

    fn request() -> GradeRequest {
        GradeRequest {
            route: RouteId::new("RID_001"),
            route_text: "# Route".into(),
            exercises: vec![Exercise {
                id: "Exercise 1".into(),
                title: None,
                instructions: "Do it".into(),
                optional: false,
            }],
            submission_name: "doe_john.ipynb".into(),
            content: "print(1)".into(),
        }
    }

    const VALID: &str = r#"{"exercises":[{"exercise_id":"Exercise 1","rating":"OK"}]}"#;

    #[tokio::test]
    async fn test_valid_reply_parsed() {
        let service = LlmService::new(
            ScriptedChat::new(vec![Ok(VALID.to_string())]),
            Duration::from_secs(5),
        );
        let result = service.grade_submission(&request()).await.unwrap();
        assert_eq!(result.exercises.len(), 1);
    }

    #[tokio::test]
    async fn test_repair_round_trip() {
        let service = LlmService::new(
            ScriptedChat::new(vec![Ok("sorry, no json".to_string()), Ok(VALID.to_string())]),
            Duration::from_secs(5),
        );
        assert!(service.grade_submission(&request()).await.is_ok());
        // 第二次调用带上了助手回复和修复提示
        assert_eq!(*service.client.calls.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_repairs_exhausted_is_terminal() {
        let service = LlmService::new(
            ScriptedChat::new(vec![
                Ok("bad".to_string()),
                Ok("bad".to_string()),
                Ok("bad".to_string()),
            ]),
            Duration::from_secs(5),
        );
        let err = service.grade_submission(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(service.client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retryable_error_bubbles_up() {
        let service = LlmService::new(
            ScriptedChat::new(vec![Err(BackendError::retryable("scripted", "429"))]),
            Duration::from_secs(5),
        );
        let err = service.grade_submission(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
