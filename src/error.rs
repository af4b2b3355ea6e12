use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 路线说明文档解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 评分后端错误
    #[error("评分后端错误: {0}")]
    Backend(#[from] BackendError),
    /// 评分最终失败（重试耗尽或终止性错误）
    #[error("评分失败: {0}")]
    Grading(#[from] GradingFailed),
    /// 学生身份解析错误
    #[error("身份解析错误: {0}")]
    Identity(#[from] IdentityError),
    /// 成绩存储错误
    #[error("成绩存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 正则表达式编译失败
    #[error("正则表达式错误: {0}")]
    Pattern(#[from] regex::Error),
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 路线说明文档解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 文档中没有任何可评分的练习
    #[error("路线 {route} 中没有找到任何练习")]
    NoExercises { route: String },
    /// 提交的 notebook 不是合法的 JSON
    #[error("无法解析 notebook {path}: {source}")]
    MalformedNotebook {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 评分后端返回的内容无法解析为评分结果
    #[error("无法解析评分响应: {reason}")]
    InvalidGradeResponse { reason: String },
}

/// 评分后端错误
///
/// 只有 `Retryable` 会被重试
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// 可重试错误：限流、网络抖动、后端临时故障
    #[error("[{backend}] 可重试错误: {reason}")]
    Retryable {
        backend: String,
        reason: String,
        retry_after: Option<Duration>,
    },
    /// 终止性错误：提交内容不合法、后端明确拒绝
    #[error("[{backend}] 终止性错误: {reason}")]
    Terminal { backend: String, reason: String },
}

impl BackendError {
    pub fn retryable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Retryable {
            backend: backend.into(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn terminal(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Terminal {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Retryable { .. })
    }

    /// 后端建议的等待时间（如 `retry-after` 头）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::Retryable { retry_after, .. } => *retry_after,
            BackendError::Terminal { .. } => None,
        }
    }
}

/// 单个提交评分的最终失败
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradingFailed {
    /// 连续可重试错误次数达到上限
    #[error("重试 {attempts} 次后仍失败: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
    /// 终止性错误，不重试
    #[error("{reason}")]
    Terminal { reason: String },
    /// 提交文件类型与路线要求不符，无法评分
    #[error("文件类型与路线要求不符: {file}")]
    FormatMismatch { file: String },
    /// 路线没有可用的练习列表
    #[error("路线 {route} 没有可用的练习列表")]
    RouteUnavailable { route: String },
}

/// 学生身份解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// 无法可靠地映射到名册中的学生，需要人工处理
    #[error("无法确定文件 '{raw}' 的学生身份: {reason}")]
    Ambiguous { raw: String, reason: String },
    /// 学生在排除名单中
    #[error("学生 {student} 在排除名单中")]
    Excluded { student: String },
}

/// 成绩存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 读写成绩记录失败
    #[error("读写成绩记录失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 成绩记录序列化 / 反序列化失败
    #[error("成绩记录格式错误 ({path}): {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 写入时持有的键锁与记录不一致
    #[error("键锁 {held} 与记录 {record} 不一致")]
    KeyMismatch { held: String, record: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 策略文件解析失败
    #[error("策略文件解析失败 ({path}): {source}")]
    PolicyParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建“没有练习”解析错误
    pub fn no_exercises(route: impl Into<String>) -> Self {
        AppError::Parse(ParseError::NoExercises {
            route: route.into(),
        })
    }
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_classification() {
        let retry = BackendError::Retryable {
            backend: "openai".into(),
            reason: "429".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(retry.is_retryable());
        assert_eq!(retry.retry_after(), Some(Duration::from_secs(3)));

        let terminal = BackendError::terminal("openai", "bad input");
        assert!(!terminal.is_retryable());
        assert_eq!(terminal.retry_after(), None);
    }

    #[test]
    fn test_nested_error_display() {
        let err: AppError = ParseError::NoExercises {
            route: "RID_001".into(),
        }
        .into();
        assert!(err.to_string().contains("RID_001"));

        let err: AppError = GradingFailed::RetryExhausted {
            attempts: 5,
            last_error: "rate limited".into(),
        }
        .into();
        assert!(err.to_string().contains("5"));
    }
}
