//! 警告写入服务 - 业务能力层
//!
//! 只负责"写 warn.txt"能力：无法确定学生身份的文件需要人工处理

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::services::submission_ledger::UnresolvedFile;

/// 警告写入服务
///
/// 职责：
/// - 将无法解析身份的提交文件追加到 warn.txt
/// - 不做任何猜测或修正
pub struct WarnWriter {
    warn_file_path: PathBuf,
}

impl WarnWriter {
    /// 创建新的警告写入服务
    pub fn new() -> Self {
        Self {
            warn_file_path: PathBuf::from("warn.txt"),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            warn_file_path: path.into(),
        }
    }

    /// 写入一条警告
    pub async fn write(&self, unresolved: &UnresolvedFile) -> AppResult<()> {
        debug!(
            "写入警告: 路线 {} | 文件 {}",
            unresolved.route, unresolved.file_name
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.warn_file_path)
            .await
            .map_err(|e| AppError::file_write_failed(self.warn_file_path.display().to_string(), e))?;

        let warn_msg = format!(
            "路线 {} | 文件 {} | 原因: {}\n",
            unresolved.route, unresolved.file_name, unresolved.reason
        );

        file.write_all(warn_msg.as_bytes())
            .await
            .map_err(|e| AppError::file_write_failed(self.warn_file_path.display().to_string(), e))?;

        Ok(())
    }

    /// 批量写入，返回写入条数
    pub async fn write_all(&self, unresolved: &[UnresolvedFile]) -> AppResult<usize> {
        for item in unresolved {
            self.write(item).await?;
        }
        Ok(unresolved.len())
    }
}

impl Default for WarnWriter {
    fn default() -> Self {
        Self::new()
    }
}
