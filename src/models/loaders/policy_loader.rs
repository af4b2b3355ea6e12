use std::path::Path;

use tokio::fs;

use crate::config::Policy;
use crate::error::{AppError, AppResult};

/// 从 TOML 文件加载策略快照
///
/// 文件不存在时使用默认策略
pub async fn load_policy(policy_path: &Path) -> AppResult<Policy> {
    if !fs::try_exists(policy_path).await.unwrap_or(false) {
        tracing::info!(
            "策略文件 {} 不存在，使用默认策略",
            policy_path.display()
        );
        return Ok(Policy::default());
    }

    let content = fs::read_to_string(policy_path)
        .await
        .map_err(|e| AppError::file_read_failed(policy_path.display().to_string(), e))?;

    let policy = Policy::from_toml_str(&content, &policy_path.display().to_string())?;
    tracing::info!(
        "已加载策略: 阈值 {:.2}, 免评路线 {} 条, 排除学生 {} 人, 别名 {} 条",
        policy.send_threshold,
        policy.free_pass_routes.len(),
        policy.excluded_students.len(),
        policy.aliases.len()
    );

    Ok(policy)
}
