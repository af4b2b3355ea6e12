//! 对账层
//!
//! 把提交台账和成绩存储合并为每个学生、每条路线的状态，并在其上
//! 提供统计和诊断视图。

pub mod engine;
pub mod send;
pub mod stats;

pub use engine::{evaluate, reconcile, Reconciliation, StatusEntry};
pub use send::{is_soft_send, send_score};
pub use stats::{
    all_route_stats, build_report, lowest_completion, route_stats, student_summaries,
    CompletionStats, ExerciseStats, ReportView, RouteStats, StudentSummary,
};
