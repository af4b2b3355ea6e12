//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量评分和流程调度，是整个系统的"指挥中心"。
//!
//! ### `batch_processor` - 批量评分处理器
//! - 管理应用生命周期（加载策略、路线、提交、成绩）
//! - 控制并发数量（Semaphore）
//! - 输出批次报告和全局统计
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理一条路线的 Vec<Submission>)
//!     ↓
//! workflow::GradingFlow (处理单份 Submission)
//!     ↓
//! services (能力层：ledger / grade store / llm / warn)
//!     ↓
//! clients (OpenAI / Anthropic)
//! ```
//!
//! ## 设计原则
//!
//! 1. **向下依赖**：编排层 → workflow → services → clients
//! 2. **无业务逻辑**：只做调度和统计，状态判定交给 `reconcile`

pub mod batch_processor;

pub use batch_processor::{App, BatchReport, FailedSubmission};
