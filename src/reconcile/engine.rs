//! 对账引擎
//!
//! 把提交台账和成绩索引合并为每个 (路线, 学生) 的权威状态。
//! 只读取两者，从不修改；策略快照显式传入。

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::Policy;
use crate::models::{
    GradeRecord, RouteCatalog, RouteId, StatusReason, StudentId, StudentRouteStatus, Submission,
    SubmissionKey,
};
use crate::reconcile::send::send_score;
use crate::services::{GradeIndex, SubmissionLedger};

/// 单个 (路线, 学生) 的对账结果
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub route: RouteId,
    pub student: StudentId,
    pub status: StudentRouteStatus,
    /// 产生该状态的规则
    pub reason: StatusReason,
    pub submission: Option<Submission>,
    /// 用于判定的成绩（与当前提交指纹一致，或无提交时的最新成绩）
    pub grade: Option<GradeRecord>,
    /// 该键下是否存在任何成绩记录
    pub has_any_grade: bool,
}

impl StatusEntry {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.route.clone(), self.student.clone())
    }

    /// 成绩存在但提交文件已不在台账中
    pub fn is_orphaned(&self) -> bool {
        self.submission.is_none() && self.grade.is_some()
    }
}

/// 一次对账的完整结果
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub(crate) entries: BTreeMap<SubmissionKey, StatusEntry>,
    pub(crate) routes: Vec<RouteId>,
    pub(crate) roster: BTreeSet<StudentId>,
    pub(crate) catalog: RouteCatalog,
    pub(crate) policy: Policy,
}

/// 对账
pub fn reconcile(
    ledger: &SubmissionLedger,
    grades: &GradeIndex,
    catalog: &RouteCatalog,
    policy: &Policy,
) -> Reconciliation {
    let mut routes: BTreeSet<RouteId> = catalog.route_ids().into_iter().collect();
    routes.extend(ledger.active_routes());
    routes.extend(grades.keys().map(|k| k.route.clone()));

    let mut roster: BTreeSet<StudentId> = if policy.roster.is_empty() {
        let mut seen = ledger.students();
        seen.extend(grades.keys().map(|k| k.student.clone()));
        seen
    } else {
        policy.roster.clone()
    };
    roster.retain(|s| !policy.is_excluded(s));

    let mut entries = BTreeMap::new();
    for route in &routes {
        for student in &roster {
            let key = SubmissionKey::new(route.clone(), student.clone());
            let entry = evaluate(
                &key,
                ledger.current(&key),
                grades.records(&key),
                catalog,
                policy,
            );
            entries.insert(key, entry);
        }
    }

    let mut catalog = catalog.clone();
    catalog.mark_active(ledger.active_routes().iter());

    debug!(
        "对账完成: {} 条路线 × {} 名学生 = {} 项",
        routes.len(),
        roster.len(),
        entries.len()
    );

    Reconciliation {
        entries,
        routes: routes.into_iter().collect(),
        roster,
        catalog,
        policy: policy.clone(),
    }
}

/// 计算单个 (路线, 学生) 的状态
///
/// `grades` 按提交时间从新到旧排列
pub fn evaluate(
    key: &SubmissionKey,
    submission: Option<&Submission>,
    grades: &[GradeRecord],
    catalog: &RouteCatalog,
    policy: &Policy,
) -> StatusEntry {
    let free_pass = policy.is_free_pass(&key.route);
    let exercises = catalog.get(&key.route).map(|r| r.exercises());

    let (status, reason, grade) = match submission {
        Some(sub) => {
            let matching = grades
                .iter()
                .find(|g| g.source_fingerprint == sub.fingerprint);
            if free_pass {
                (StudentRouteStatus::Sent, StatusReason::FreePass, matching.cloned())
            } else if let Some(g) = matching {
                let score = send_score(&g.result, exercises);
                if score.meets(policy.send_threshold) {
                    (
                        StudentRouteStatus::Sent,
                        StatusReason::SoftSend {
                            score,
                            orphaned: false,
                        },
                        Some(g.clone()),
                    )
                } else {
                    (
                        StudentRouteStatus::Submitted,
                        StatusReason::BelowThreshold {
                            score,
                            orphaned: false,
                        },
                        Some(g.clone()),
                    )
                }
            } else if sub.format_mismatch {
                (StudentRouteStatus::Submitted, StatusReason::FormatMismatch, None)
            } else if !grades.is_empty() {
                (StudentRouteStatus::Submitted, StatusReason::StaleGrade, None)
            } else {
                (StudentRouteStatus::Submitted, StatusReason::AwaitingGrade, None)
            }
        }
        None => match grades.first() {
            Some(g) if free_pass => (StudentRouteStatus::Sent, StatusReason::FreePass, Some(g.clone())),
            Some(g) => {
                let score = send_score(&g.result, exercises);
                if score.meets(policy.send_threshold) {
                    (
                        StudentRouteStatus::Sent,
                        StatusReason::SoftSend {
                            score,
                            orphaned: true,
                        },
                        Some(g.clone()),
                    )
                } else {
                    (
                        StudentRouteStatus::Submitted,
                        StatusReason::BelowThreshold {
                            score,
                            orphaned: true,
                        },
                        Some(g.clone()),
                    )
                }
            }
            None => (
                StudentRouteStatus::Missing,
                StatusReason::NoSubmissionNoGrade,
                None,
            ),
        },
    };

    StatusEntry {
        route: key.route.clone(),
        student: key.student.clone(),
        status,
        reason,
        submission: submission.cloned(),
        grade,
        has_any_grade: !grades.is_empty(),
    }
}

impl Reconciliation {
    pub fn status(&self, route: &RouteId, student: &StudentId) -> Option<&StatusEntry> {
        self.entries
            .get(&SubmissionKey::new(route.clone(), student.clone()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.values()
    }

    pub fn for_route<'a>(&'a self, route: &'a RouteId) -> impl Iterator<Item = &'a StatusEntry> + 'a {
        self.entries.values().filter(move |e| &e.route == route)
    }

    pub fn for_student<'a>(
        &'a self,
        student: &'a StudentId,
    ) -> impl Iterator<Item = &'a StatusEntry> + 'a {
        self.entries.values().filter(move |e| &e.student == student)
    }

    pub fn routes(&self) -> &[RouteId] {
        &self.routes
    }

    pub fn roster(&self) -> &BTreeSet<StudentId> {
        &self.roster
    }

    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// 校验状态划分的一致性，返回所有违反项
    ///
    /// - completed == sent || not_sent，且二者互斥
    /// - missing == !completed
    /// - completed 的项必须有提交或成绩
    pub fn verify_invariants(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        for entry in self.entries.values() {
            let s = entry.status;
            if s.completed() != (s.sent() || s.not_sent()) || (s.sent() && s.not_sent()) {
                violations.push(format!("{}: completed 与 sent/not_sent 不一致", entry.key()));
            }
            if s.missing() == s.completed() {
                violations.push(format!("{}: missing 与 completed 不互补", entry.key()));
            }
            let has_evidence = entry.submission.is_some() || entry.has_any_grade;
            if s.completed() != has_evidence {
                violations.push(format!(
                    "{}: 状态 {} 与提交/成绩存在情况不一致",
                    entry.key(),
                    s
                ));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
