use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::{DeliverableKind, RouteId, StudentId};
use crate::workflow::RetryPolicy;

/// 评分后端提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            other => Err(ConfigError::Invalid {
                field: "LLM_PROVIDER".to_string(),
                reason: format!("未知的提供方 '{}'，可选 openai / anthropic", other),
            }),
        }
    }
}

/// 程序运行配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时评分的提交数量
    pub max_concurrent_grades: usize,
    /// 作业根目录（每条路线一个子目录）
    pub assignments_dir: PathBuf,
    /// 策略文件路径（TOML），不存在时使用默认策略
    pub policy_file: PathBuf,
    /// 无法识别身份的文件写入此处
    pub warn_file: PathBuf,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub provider: Provider,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub openai_model: String,
    pub anthropic_api_key: String,
    pub anthropic_api_base: String,
    pub anthropic_model: String,
    pub llm_timeout: Duration,
    // --- 重试配置 ---
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_grades: 4,
            assignments_dir: PathBuf::from("assignments"),
            policy_file: PathBuf::from("policy.toml"),
            warn_file: PathBuf::from("warn.txt"),
            verbose_logging: false,
            provider: Provider::OpenAi,
            openai_api_key: String::new(),
            openai_api_base: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o".to_string(),
            anthropic_api_key: String::new(),
            anthropic_api_base: "https://api.anthropic.com/v1".to_string(),
            anthropic_model: "claude-sonnet-4-20250514".to_string(),
            llm_timeout: Duration::from_secs(120),
            retry_max_attempts: 5,
            retry_initial_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            max_concurrent_grades: env_parse("MAX_CONCURRENT_GRADES", default.max_concurrent_grades)?
                .max(1),
            assignments_dir: std::env::var("ASSIGNMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.assignments_dir),
            policy_file: std::env::var("POLICY_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.policy_file),
            warn_file: std::env::var("WARN_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.warn_file),
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging)?,
            provider: match std::env::var("LLM_PROVIDER") {
                Ok(value) => value.parse()?,
                Err(_) => default.provider,
            },
            openai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or(default.openai_api_key),
            openai_api_base: std::env::var("OPENAI_API_BASE").unwrap_or(default.openai_api_base),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(default.openai_model),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .unwrap_or(default.anthropic_api_key),
            anthropic_api_base: std::env::var("ANTHROPIC_API_BASE")
                .unwrap_or(default.anthropic_api_base),
            anthropic_model: std::env::var("ANTHROPIC_MODEL").unwrap_or(default.anthropic_model),
            llm_timeout: Duration::from_secs(env_parse(
                "LLM_TIMEOUT_SECS",
                default.llm_timeout.as_secs(),
            )?),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", default.retry_max_attempts)?,
            retry_initial_delay: Duration::from_millis(env_parse(
                "RETRY_INITIAL_DELAY_MS",
                default.retry_initial_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(env_parse(
                "RETRY_MAX_DELAY_MS",
                default.retry_max_delay.as_millis() as u64,
            )?),
        })
    }

    /// 由配置构造重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_initial_delay,
            self.retry_max_delay,
        )
    }
}

fn env_parse<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }),
        Err(_) => Ok(default),
    }
}

/// 评分策略快照
///
/// 别名表、排除名单、免评路线等全部在这里，作为不可变值传给
/// 提交台账和对账引擎。两次对账可以使用不同的策略快照进行比较。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// 达标阈值：必做练习中 OK 及以上的比例
    pub send_threshold: f64,
    /// 免评路线：有任何提交即视为达标
    pub free_pass_routes: BTreeSet<RouteId>,
    /// 以文本文件交付的路线，其余路线交付 notebook
    pub text_routes: BTreeSet<RouteId>,
    /// 排除的学生（不计入任何统计）
    pub excluded_students: BTreeSet<StudentId>,
    /// 学生名册，为空时不做名册校验
    pub roster: BTreeSet<StudentId>,
    /// 手工维护的别名表：错误拼写 / 名字顺序颠倒 → 规范身份
    pub aliases: BTreeMap<String, StudentId>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            send_threshold: 0.8,
            free_pass_routes: BTreeSet::new(),
            text_routes: BTreeSet::new(),
            excluded_students: BTreeSet::new(),
            roster: BTreeSet::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Policy {
    /// 从 TOML 文本解析策略
    pub fn from_toml_str(content: &str, path: &str) -> Result<Self, ConfigError> {
        let policy: Policy =
            toml::from_str(content).map_err(|source| ConfigError::PolicyParseFailed {
                path: path.to_string(),
                source,
            })?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.send_threshold > 0.0 && self.send_threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "send_threshold".to_string(),
                reason: format!("必须在 (0, 1] 之间，实际为 {}", self.send_threshold),
            });
        }
        Ok(())
    }

    pub fn is_free_pass(&self, route: &RouteId) -> bool {
        self.free_pass_routes.contains(route)
    }

    pub fn is_excluded(&self, student: &StudentId) -> bool {
        self.excluded_students.contains(student)
    }

    pub fn deliverable_kind(&self, route: &RouteId) -> DeliverableKind {
        if self.text_routes.contains(route) {
            DeliverableKind::Text
        } else {
            DeliverableKind::Notebook
        }
    }

    /// 返回一个设置了免评路线的新快照（原快照不变）
    pub fn with_free_pass(&self, route: RouteId) -> Self {
        let mut next = self.clone();
        next.free_pass_routes.insert(route);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_toml() {
        let content = r#"
send_threshold = 0.75
free_pass_routes = ["RID_007"]
text_routes = ["RID_006", "RID_007"]
excluded_students = ["test_student"]

[aliases]
jaramilo_jonathan = "jaramillo_jonathan"
"#;
        let policy = Policy::from_toml_str(content, "policy.toml").unwrap();
        assert_eq!(policy.send_threshold, 0.75);
        assert!(policy.is_free_pass(&RouteId::new("RID_007")));
        assert!(!policy.is_free_pass(&RouteId::new("RID_001")));
        assert_eq!(
            policy.deliverable_kind(&RouteId::new("RID_006")),
            DeliverableKind::Text
        );
        assert_eq!(
            policy.deliverable_kind(&RouteId::new("RID_001")),
            DeliverableKind::Notebook
        );
        assert!(policy.is_excluded(&StudentId::new("test_student")));
        assert_eq!(
            policy.aliases.get("jaramilo_jonathan"),
            Some(&StudentId::new("jaramillo_jonathan"))
        );
    }

    #[test]
    fn test_policy_defaults_when_empty() {
        let policy = Policy::from_toml_str("", "policy.toml").unwrap();
        assert_eq!(policy.send_threshold, 0.8);
        assert!(policy.free_pass_routes.is_empty());
    }

    #[test]
    fn test_policy_rejects_bad_threshold() {
        let err = Policy::from_toml_str("send_threshold = 1.5", "policy.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_with_free_pass_keeps_original() {
        let policy = Policy::default();
        let next = policy.with_free_pass(RouteId::new("RID_002"));
        assert!(!policy.is_free_pass(&RouteId::new("RID_002")));
        assert!(next.is_free_pass(&RouteId::new("RID_002")));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("gemini".parse::<Provider>().is_err());
    }
}
