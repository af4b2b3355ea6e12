//! 批量评分处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量评分和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载策略、路线目录，并发扫描提交和加载成绩
//! 2. **并发控制**：使用 Semaphore 限制同时进行的评分数量，每份提交一个 tokio 任务
//! 3. **按路线分批**：每条路线一个批次，批次结束写入 `summary.json`
//! 4. **对账与报告**：基于成绩快照重新计算状态和统计
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单份提交的细节，委托 `GradingFlow`
//! - **部分失败**：单份提交失败只记入批次报告，不中断批次
//! - **可中断**：成绩写入按提交幂等，中断后重新运行即可续评

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::{Config, Policy};
use crate::error::GradingFailed;
use crate::models::{
    load_policy, load_route_catalog, Route, RouteCatalog, RouteId, RouteLayout, StudentId,
    Submission,
};
use crate::reconcile::{build_report, reconcile, Reconciliation, ReportView};
use crate::services::{
    backend_from_config, ExerciseExtractor, GradeIndex, GradeStore, GradingBackend, IdentityRules,
    SubmissionLedger, WarnWriter,
};
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_scan_complete, log_startup, print_final_stats,
};
use crate::workflow::{GradeOutcome, GradingCtx, GradingFlow};

const SUMMARY_FILE: &str = "summary.json";

/// 应用主结构
pub struct App {
    config: Config,
    policy: Policy,
    catalog: RouteCatalog,
    ledger: SubmissionLedger,
    flow: Arc<GradingFlow>,
}

/// 批次中失败的一份提交
#[derive(Debug, Clone, Serialize)]
pub struct FailedSubmission {
    pub student: StudentId,
    pub file_name: String,
    pub error: GradingFailed,
}

/// 单条路线的批次结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub route: RouteId,
    pub total: usize,
    pub graded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedSubmission>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    fn new(route: RouteId, total: usize) -> Self {
        let now = Utc::now();
        Self {
            route,
            total,
            graded: 0,
            skipped: 0,
            failed: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn record(&mut self, submission: &Submission, outcome: GradeOutcome) {
        match outcome {
            GradeOutcome::Graded(_) => self.graded += 1,
            GradeOutcome::Skipped => self.skipped += 1,
            GradeOutcome::Failed(error) => self.failed.push(FailedSubmission {
                student: submission.student.clone(),
                file_name: submission.file_name.clone(),
                error,
            }),
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

impl App {
    /// 初始化应用，评分后端由配置决定
    pub async fn new(config: Config) -> Result<Self> {
        let backend = backend_from_config(&config).context("创建评分后端失败")?;
        Self::with_backend(config, backend).await
    }

    /// 使用指定的评分后端初始化应用
    pub async fn with_backend(config: Config, backend: Arc<dyn GradingBackend>) -> Result<Self> {
        log_startup(&config);

        let policy = load_policy(&config.policy_file)
            .await
            .context("加载策略文件失败")?;
        let extractor = ExerciseExtractor::new()?;
        let rules = IdentityRules::from_policy(&policy)?;
        let layout = RouteLayout::new(&config.assignments_dir);

        info!("\n📁 正在加载路线说明...");
        let mut catalog = load_route_catalog(&layout, &policy, &extractor)
            .await
            .context("加载路线目录失败")?;

        // 提交扫描与成绩加载互不依赖，两者都完成后才能对账
        info!("📁 正在扫描提交并加载成绩...");
        let (ledger, store) = tokio::join!(
            SubmissionLedger::scan(&layout, &policy, &rules),
            GradeStore::load(layout.clone())
        );
        let ledger = ledger.context("扫描提交失败")?;
        let store = Arc::new(store.context("加载成绩失败")?);

        catalog.mark_active(ledger.active_routes().iter());

        if !ledger.unresolved().is_empty() {
            WarnWriter::with_path(&config.warn_file)
                .write_all(ledger.unresolved())
                .await
                .context("写入警告文件失败")?;
        }
        log_scan_complete(
            catalog.route_ids().len(),
            ledger.len(),
            ledger.unresolved().len(),
        );

        let flow = Arc::new(GradingFlow::new(backend, store, config.retry_policy()));

        Ok(Self {
            config,
            policy,
            catalog,
            ledger,
            flow,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &SubmissionLedger {
        &self.ledger
    }

    /// 评分单个文件（可以是当前提交，也可以是被取代的旧版本）
    pub async fn grade_one(&self, route: &RouteId, file_name: &str) -> Result<GradeOutcome> {
        let submission = self
            .find_submission(route, file_name)
            .with_context(|| format!("路线 {} 中没有可识别的提交文件 {}", route, file_name))?
            .clone();

        let Some(route_def) = self.catalog.get(route) else {
            warn!("⚠️ 路线 {} 没有可用的练习列表，无法评分", route);
            return Ok(GradeOutcome::Failed(GradingFailed::RouteUnavailable {
                route: route.to_string(),
            }));
        };

        let ctx = GradingCtx::new(route.clone(), submission.student.clone(), 1, 1);
        let outcome = self.flow.run(route_def, &submission, &ctx).await?;
        Ok(outcome)
    }

    /// 评分一条路线的所有当前提交
    ///
    /// 已有同版本成绩的提交会被跳过，因此中断后重新运行即为续评
    pub async fn grade_route(&self, route: &RouteId) -> Result<BatchReport> {
        let mut submissions: Vec<Submission> = self.ledger.for_route(route).cloned().collect();
        submissions.sort_by(|a, b| a.student.cmp(&b.student));

        let total = submissions.len();
        let mut report = BatchReport::new(route.clone(), total);
        log_batch_start(route.as_str(), total, self.config.max_concurrent_grades);

        match self.catalog.get(route) {
            Some(route_def) => {
                self.process_batch(route_def, submissions, &mut report)
                    .await?;
            }
            None => {
                let reason = self
                    .catalog
                    .failures()
                    .get(route)
                    .cloned()
                    .unwrap_or_else(|| "未找到说明文档".to_string());
                error!("❌ 路线 {} 无法评分: {}", route, reason);
                for submission in &submissions {
                    report.record(
                        submission,
                        GradeOutcome::Failed(GradingFailed::RouteUnavailable {
                            route: route.to_string(),
                        }),
                    );
                }
            }
        }

        report.finished_at = Utc::now();
        log_batch_complete(
            route.as_str(),
            report.graded,
            report.skipped,
            report.failed_count(),
        );
        self.write_summary(&report).await?;

        Ok(report)
    }

    /// 依次评分所有有提交的路线
    pub async fn grade_all(&self) -> Result<Vec<BatchReport>> {
        let routes = self.ledger.active_routes();
        if routes.is_empty() {
            warn!("⚠️ 没有找到任何提交，程序结束");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(routes.len());
        for route in &routes {
            reports.push(self.grade_route(route).await?);
        }

        let total: usize = reports.iter().map(|r| r.total).sum();
        let graded: usize = reports.iter().map(|r| r.graded).sum();
        let skipped: usize = reports.iter().map(|r| r.skipped).sum();
        let failed: usize = reports.iter().map(BatchReport::failed_count).sum();
        print_final_stats(graded, skipped, failed, total);

        Ok(reports)
    }

    /// 当前成绩索引的快照
    pub async fn grades(&self) -> GradeIndex {
        self.flow.store().snapshot().await
    }

    /// 基于当前成绩快照重新对账（只读）
    pub async fn reconcile(&self) -> Reconciliation {
        let grades = self.grades().await;
        reconcile(&self.ledger, &grades, &self.catalog, &self.policy)
    }

    /// 重新计算汇总报告（只读）
    pub async fn report(&self, lowest: usize) -> ReportView {
        let rec = self.reconcile().await;
        if let Err(violations) = rec.verify_invariants() {
            for v in &violations {
                error!("❌ 状态不一致: {}", v);
            }
        }
        build_report(&rec, lowest)
    }

    fn find_submission(&self, route: &RouteId, file_name: &str) -> Option<&Submission> {
        self.ledger
            .for_route(route)
            .find(|s| s.file_name == file_name)
            .or_else(|| {
                self.ledger
                    .for_route(route)
                    .flat_map(|s| self.ledger.history(&s.key()))
                    .find(|s| s.file_name == file_name)
            })
    }

    /// 处理单个批次
    async fn process_batch(
        &self,
        route: &Route,
        submissions: Vec<Submission>,
        report: &mut BatchReport,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_grades.max(1)));
        let route = Arc::new(route.clone());
        let total = submissions.len();
        let mut handles = Vec::with_capacity(total);

        // 为本批创建并发任务
        for (idx, submission) in submissions.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let flow = self.flow.clone();
            let route = route.clone();
            let task_submission = submission.clone();
            let ctx = GradingCtx::new(
                route.id.clone(),
                submission.student.clone(),
                idx + 1,
                total,
            );

            let handle = tokio::spawn(async move {
                let _permit = permit;
                match flow.run(&route, &task_submission, &ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("{} ❌ 处理过程中发生错误: {}", ctx, e);
                        GradeOutcome::Failed(GradingFailed::Terminal {
                            reason: e.to_string(),
                        })
                    }
                }
            });
            handles.push((submission, handle));
        }

        // 等待本批所有任务完成
        for (submission, handle) in handles {
            match handle.await {
                Ok(outcome) => report.record(&submission, outcome),
                Err(e) => {
                    error!("{} 任务执行失败: {}", submission.key(), e);
                    report.record(
                        &submission,
                        GradeOutcome::Failed(GradingFailed::Terminal {
                            reason: e.to_string(),
                        }),
                    );
                }
            }
        }

        report
            .failed
            .sort_by(|a, b| a.student.cmp(&b.student).then(a.file_name.cmp(&b.file_name)));
        Ok(())
    }

    /// 把批次结果写入路线的 results/summary.json
    async fn write_summary(&self, report: &BatchReport) -> Result<PathBuf> {
        let dir = self.flow.store().layout().results_dir(&report.route);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建目录 {} 失败", dir.display()))?;

        let path = dir.join(SUMMARY_FILE);
        let content = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("写入 {} 失败", path.display()))?;
        Ok(path)
    }
}
