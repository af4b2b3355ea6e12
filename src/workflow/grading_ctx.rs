//! 评分上下文
//!
//! 封装"我正在给哪条路线、哪个学生的第几份提交评分"这一信息

use std::fmt::Display;

use crate::models::{RouteId, StudentId};

/// 评分上下文
#[derive(Debug, Clone)]
pub struct GradingCtx {
    pub route: RouteId,
    pub student: StudentId,
    /// 在本批次中的序号（从 1 开始，仅用于日志显示）
    pub index: usize,
    /// 本批次总数
    pub total: usize,
}

impl GradingCtx {
    pub fn new(route: RouteId, student: StudentId, index: usize, total: usize) -> Self {
        Self {
            route,
            student,
            index,
            total,
        }
    }
}

impl Display for GradingCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[路线 {} 学生 {} {}/{}]",
            self.route, self.student, self.index, self.total
        )
    }
}
