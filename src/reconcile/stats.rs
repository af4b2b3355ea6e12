//! 统计与诊断视图
//!
//! 全部是对 [`Reconciliation`] 的只读投影，不持有额外状态。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Rating, RouteId, StatusReason, StudentId};
use crate::reconcile::engine::{Reconciliation, StatusEntry};

/// 每条诊断最多保留的评语样本数
const MAX_SAMPLE_RATIONALES: usize = 3;

/// 单个练习的评分分布
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExerciseStats {
    pub exercise_id: String,
    pub optional: bool,
    pub excellent: usize,
    pub ok: usize,
    pub needs_work: usize,
    /// 成绩中缺失或带有未尝试标记
    pub not_attempted: usize,
    /// 已尝试的评分中 OK 及以上的比例
    pub success_rate: f64,
    pub sample_rationales: Vec<String>,
}

impl ExerciseStats {
    fn new(exercise_id: impl Into<String>, optional: bool) -> Self {
        Self {
            exercise_id: exercise_id.into(),
            optional,
            ..Default::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.excellent + self.ok + self.needs_work
    }

    fn finish(&mut self) {
        let attempted = self.attempted();
        self.success_rate = if attempted == 0 {
            0.0
        } else {
            (self.excellent + self.ok) as f64 / attempted as f64
        };
    }
}

/// 单条路线的聚合统计
#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    pub route: RouteId,
    pub active: bool,
    pub free_pass: bool,
    pub roster_size: usize,
    pub submission_count: usize,
    pub graded_count: usize,
    pub completed: usize,
    pub sent: usize,
    pub not_sent: usize,
    pub missing: usize,
    /// sent / completed
    pub send_rate: f64,
    pub format_mismatches: usize,
    pub route_token_mismatches: usize,
    pub stale_grades: usize,
    pub orphaned_grades: usize,
    pub exercises: Vec<ExerciseStats>,
}

impl RouteStats {
    /// NEEDS_WORK 次数不少于 `min_needs_work` 的练习，按次数降序
    pub fn common_issues(&self, min_needs_work: usize) -> Vec<&ExerciseStats> {
        let mut issues: Vec<&ExerciseStats> = self
            .exercises
            .iter()
            .filter(|ex| ex.needs_work >= min_needs_work.max(1))
            .collect();
        issues.sort_by(|a, b| b.needs_work.cmp(&a.needs_work));
        issues
    }
}

/// 单个学生在所有路线上的完成情况
#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub student: StudentId,
    pub completed: usize,
    pub sent: usize,
    pub missing_routes: Vec<RouteId>,
}

/// 全班完成情况
#[derive(Debug, Clone, Serialize)]
pub struct CompletionStats {
    pub students: usize,
    pub routes: usize,
    pub average_completed: f64,
    pub min_completed: usize,
    pub max_completed: usize,
    pub average_sent: f64,
}

/// 汇总报告
#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub routes: Vec<RouteStats>,
    pub completion: CompletionStats,
    pub lowest_completion: Vec<StudentSummary>,
    /// 说明文档无法解析的路线及原因
    pub route_failures: BTreeMap<RouteId, String>,
}

/// 计算单条路线的统计
pub fn route_stats(rec: &Reconciliation, route: &RouteId) -> RouteStats {
    let catalog_route = rec.catalog().get(route);
    let mut stats = RouteStats {
        route: route.clone(),
        active: catalog_route.map(|r| r.active).unwrap_or(false),
        free_pass: rec.policy().is_free_pass(route),
        roster_size: rec.roster().len(),
        submission_count: 0,
        graded_count: 0,
        completed: 0,
        sent: 0,
        not_sent: 0,
        missing: 0,
        send_rate: 0.0,
        format_mismatches: 0,
        route_token_mismatches: 0,
        stale_grades: 0,
        orphaned_grades: 0,
        exercises: Vec::new(),
    };

    let mut exercises: Vec<ExerciseStats> = catalog_route
        .map(|r| {
            r.exercises()
                .iter()
                .map(|ex| ExerciseStats::new(&ex.id, ex.optional))
                .collect()
        })
        .unwrap_or_default();
    let known = !exercises.is_empty();

    for entry in rec.for_route(route) {
        tally(&mut stats, entry);
        if let Some(grade) = &entry.grade {
            if !known {
                for ex in &grade.result.exercises {
                    if !exercises.iter().any(|s| s.exercise_id == ex.exercise_id) {
                        exercises.push(ExerciseStats::new(&ex.exercise_id, false));
                    }
                }
            }
            for ex_stats in exercises.iter_mut() {
                match grade.result.exercise(&ex_stats.exercise_id) {
                    Some(g) if g.attempted() => {
                        match g.rating {
                            Rating::Excellent => ex_stats.excellent += 1,
                            Rating::Ok => ex_stats.ok += 1,
                            Rating::NeedsWork => ex_stats.needs_work += 1,
                        }
                        if g.rating == Rating::NeedsWork
                            && !g.rationale.is_empty()
                            && ex_stats.sample_rationales.len() < MAX_SAMPLE_RATIONALES
                        {
                            ex_stats.sample_rationales.push(g.rationale.clone());
                        }
                    }
                    _ => ex_stats.not_attempted += 1,
                }
            }
        }
    }

    for ex_stats in exercises.iter_mut() {
        ex_stats.finish();
    }
    stats.exercises = exercises;
    stats.send_rate = if stats.completed == 0 {
        0.0
    } else {
        stats.sent as f64 / stats.completed as f64
    };
    stats
}

fn tally(stats: &mut RouteStats, entry: &StatusEntry) {
    if let Some(sub) = &entry.submission {
        stats.submission_count += 1;
        if sub.format_mismatch {
            stats.format_mismatches += 1;
        }
        if sub.route_token_mismatch {
            stats.route_token_mismatches += 1;
        }
    }
    if entry.grade.is_some() {
        stats.graded_count += 1;
    }
    if entry.is_orphaned() {
        stats.orphaned_grades += 1;
    }
    if entry.reason == StatusReason::StaleGrade {
        stats.stale_grades += 1;
    }
    let status = entry.status;
    if status.completed() {
        stats.completed += 1;
    }
    if status.sent() {
        stats.sent += 1;
    }
    if status.not_sent() {
        stats.not_sent += 1;
    }
    if status.missing() {
        stats.missing += 1;
    }
}

/// 所有路线的统计，按路线标识排序
pub fn all_route_stats(rec: &Reconciliation) -> Vec<RouteStats> {
    rec.routes().iter().map(|r| route_stats(rec, r)).collect()
}

/// 每个学生的完成情况，按学生标识排序
pub fn student_summaries(rec: &Reconciliation) -> Vec<StudentSummary> {
    rec.roster()
        .iter()
        .map(|student| {
            let mut summary = StudentSummary {
                student: student.clone(),
                completed: 0,
                sent: 0,
                missing_routes: Vec::new(),
            };
            for entry in rec.for_student(student) {
                if entry.status.completed() {
                    summary.completed += 1;
                } else {
                    summary.missing_routes.push(entry.route.clone());
                }
                if entry.status.sent() {
                    summary.sent += 1;
                }
            }
            summary
        })
        .collect()
}

impl CompletionStats {
    pub fn from_summaries(summaries: &[StudentSummary], routes: usize) -> Self {
        if summaries.is_empty() {
            return Self {
                students: 0,
                routes,
                average_completed: 0.0,
                min_completed: 0,
                max_completed: 0,
                average_sent: 0.0,
            };
        }
        let n = summaries.len() as f64;
        Self {
            students: summaries.len(),
            routes,
            average_completed: summaries.iter().map(|s| s.completed).sum::<usize>() as f64 / n,
            min_completed: summaries.iter().map(|s| s.completed).min().unwrap_or(0),
            max_completed: summaries.iter().map(|s| s.completed).max().unwrap_or(0),
            average_sent: summaries.iter().map(|s| s.sent).sum::<usize>() as f64 / n,
        }
    }
}

/// 完成数最少的 `n` 名学生（外联名单）
///
/// 按完成数升序，其次达标数升序，再按学生标识
pub fn lowest_completion(rec: &Reconciliation, n: usize) -> Vec<StudentSummary> {
    let mut summaries = student_summaries(rec);
    summaries.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then(a.sent.cmp(&b.sent))
            .then_with(|| a.student.cmp(&b.student))
    });
    summaries.truncate(n);
    summaries
}

/// 构建完整报告
pub fn build_report(rec: &Reconciliation, lowest: usize) -> ReportView {
    let summaries = student_summaries(rec);
    ReportView {
        routes: all_route_stats(rec),
        completion: CompletionStats::from_summaries(&summaries, rec.routes().len()),
        lowest_completion: lowest_completion(rec, lowest),
        route_failures: rec.catalog().failures().clone(),
    }
}
