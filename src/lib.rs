//! # Route Grader
//!
//! 作业评分与对账：扫描学生提交，调用 LLM 评分后端，并把提交和成绩
//! 合并为每个学生、每条路线的权威状态
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - OpenAI / Anthropic 聊天客户端，统一为 `ChatClient`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `ExerciseExtractor` - 从路线说明中提取练习
//! - `SubmissionLedger` - 扫描提交、解析身份、去重
//! - `GradeStore` - 成绩记录的幂等持久化
//! - `LlmService` - 给一份提交打分
//! - `WarnWriter` - 写 warn.txt 能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份提交"的完整评分流程
//! - `GradingCtx` - 上下文封装（路线 + 学生）
//! - `GradingFlow` - 流程编排（跳过 → 评分 → 重试 → 持久化）
//!
//! ### ④ 对账层（Reconcile）
//! - `reconcile/` - 状态判定、达标计算、统计与诊断
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量评分，管理并发和报告
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, Policy};
pub use error::{AppError, AppResult};
pub use models::{RouteId, StudentId, StudentRouteStatus, SubmissionKey};
pub use orchestrator::{App, BatchReport};
pub use reconcile::{reconcile, Reconciliation, ReportView};
pub use workflow::{GradeOutcome, GradingCtx, GradingFlow, RetryPolicy};
