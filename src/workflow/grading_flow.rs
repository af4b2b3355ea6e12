//! 评分流程 - 流程层
//!
//! 核心职责：定义"一份提交"的完整评分流程
//!
//! 流程顺序：
//! 1. 获取键锁 → 已有同指纹成绩则跳过
//! 2. 读取并渲染提交内容
//! 3. 调用评分后端（可重试错误按退避策略重试）
//! 4. 持久化成绩记录

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{AppResult, GradingFailed};
use crate::models::{FileKind, Fingerprint, GradeRecord, Route, Submission};
use crate::services::notebook_view::{truncate, NotebookView};
use crate::services::{GradeRequest, GradeStore, GradingBackend};
use crate::utils::logging::truncate_text;
use crate::workflow::grading_ctx::GradingCtx;
use crate::workflow::retry::RetryPolicy;

/// 单份提交的评分结果
#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    /// 评分成功并已写入
    Graded(GradeRecord),
    /// 该版本已经评过分
    Skipped,
    /// 评分失败，未写入任何记录
    Failed(GradingFailed),
}

/// 评分流程
///
/// - 编排单份提交的评分流程
/// - 决定何时跳过、何时重试、何时放弃
/// - 只依赖业务能力（services）
pub struct GradingFlow {
    backend: Arc<dyn GradingBackend>,
    store: Arc<GradeStore>,
    retry: RetryPolicy,
}

impl GradingFlow {
    pub fn new(backend: Arc<dyn GradingBackend>, store: Arc<GradeStore>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            store,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<GradeStore> {
        &self.store
    }

    /// 评分一份提交
    ///
    /// 只有成绩存储写入失败时返回 `Err`；评分失败体现在 `GradeOutcome::Failed`
    pub async fn run(
        &self,
        route: &Route,
        submission: &Submission,
        ctx: &GradingCtx,
    ) -> AppResult<GradeOutcome> {
        let key = submission.key();
        let guard = self.store.lock_key(&key).await;

        if self.store.has_fingerprint(&key, &submission.fingerprint).await {
            info!("{} ⏭ 已有该版本的成绩，跳过", ctx);
            return Ok(GradeOutcome::Skipped);
        }

        if !submission.is_gradable() {
            warn!(
                "{} ⚠️ 文件类型 {:?} 与路线要求 {:?} 不符，不评分",
                ctx, submission.kind, route.kind
            );
            return Ok(GradeOutcome::Failed(GradingFailed::FormatMismatch {
                file: submission.file_name.clone(),
            }));
        }

        let content = match load_content(submission).await {
            Ok(content) => content,
            Err(reason) => {
                error!("{} ❌ 无法读取提交内容: {}", ctx, reason);
                return Ok(GradeOutcome::Failed(GradingFailed::Terminal { reason }));
            }
        };

        let request = GradeRequest {
            route: route.id.clone(),
            route_text: route.document.format_for_prompt(),
            exercises: route.exercises().to_vec(),
            submission_name: submission.file_name.clone(),
            content,
        };

        let mut backoff = self.retry.backoff();
        let result = loop {
            match self.backend.grade_submission(&request).await {
                Ok(result) => break result,
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_delay(e.retry_after());
                    if backoff.exhausted() {
                        error!("{} ❌ 重试 {} 次后放弃: {}", ctx, backoff.failures(), e);
                        return Ok(GradeOutcome::Failed(GradingFailed::RetryExhausted {
                            attempts: backoff.failures(),
                            last_error: e.to_string(),
                        }));
                    }
                    warn!(
                        "{} ⚠️ 第 {}/{} 次尝试失败，{:.1} 秒后重试: {}",
                        ctx,
                        backoff.failures(),
                        self.retry.max_attempts,
                        delay.as_secs_f64(),
                        truncate_text(&e.to_string(), 200)
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("{} ❌ 终止性错误: {}", ctx, e);
                    return Ok(GradeOutcome::Failed(GradingFailed::Terminal {
                        reason: e.to_string(),
                    }));
                }
            }
        };

        let record = GradeRecord {
            route: submission.route.clone(),
            student: submission.student.clone(),
            source_fingerprint: submission.fingerprint.clone(),
            source_file: submission.file_name.clone(),
            source_modified: submission.modified,
            graded_at: Utc::now(),
            backend: self.backend.name().to_string(),
            result,
        };

        self.store.persist(&guard, record.clone()).await?;
        info!("{} ✅ 评分完成: {}", ctx, truncate_text(&record.result.overall_summary, 80));

        Ok(GradeOutcome::Graded(record))
    }
}

/// 读取并渲染提交内容；文件在扫描后被修改时放弃本次评分
async fn load_content(submission: &Submission) -> Result<String, String> {
    let bytes = tokio::fs::read(&submission.path)
        .await
        .map_err(|e| format!("读取 {} 失败: {}", submission.path.display(), e))?;

    if Fingerprint::of_bytes(&bytes) != submission.fingerprint {
        return Err(format!("{} 在扫描后被修改，请重新运行", submission.file_name));
    }

    let text = String::from_utf8(bytes)
        .map_err(|_| format!("{} 不是 UTF-8 文本", submission.file_name))?;

    match submission.kind {
        FileKind::Notebook => NotebookView::parse(&submission.file_name, &text)
            .map(|view| view.render())
            .map_err(|e| e.to_string()),
        FileKind::Text => Ok(truncate(&text)),
        FileKind::Document => Err(format!("{} 是文档文件，无法评分", submission.file_name)),
    }
}
