use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Fingerprint, RouteId, StudentId, SubmissionKey};

/// 选做练习未尝试时后端给出的标记
pub const FLAG_OPTIONAL_NOT_ATTEMPTED: &str = "optional_not_attempted";

/// 三级评分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rating {
    Excellent,
    Ok,
    NeedsWork,
}

impl Rating {
    /// OK 及以上
    pub fn is_passing(self) -> bool {
        matches!(self, Rating::Excellent | Rating::Ok)
    }
}

/// 单个练习的评分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseGrade {
    pub exercise_id: String,
    pub rating: Rating,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub missing_or_wrong: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl ExerciseGrade {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// 是否确实尝试过（选做练习未尝试时带有标记）
    pub fn attempted(&self) -> bool {
        !self.has_flag(FLAG_OPTIONAL_NOT_ATTEMPTED)
    }
}

/// 评分后端返回的评分结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub exercises: Vec<ExerciseGrade>,
    #[serde(default)]
    pub overall_summary: String,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl GradeResult {
    pub fn exercise(&self, id: &str) -> Option<&ExerciseGrade> {
        self.exercises.iter().find(|ex| ex.exercise_id == id)
    }

    pub fn needs_manual_review(&self) -> bool {
        self.exercises.iter().any(|ex| ex.has_flag("manual_review"))
    }
}

/// 持久化的成绩记录
///
/// 创建后不再修改；重新评分生成新记录并取代旧记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub route: RouteId,
    pub student: StudentId,
    /// 被评分提交的内容指纹
    pub source_fingerprint: Fingerprint,
    pub source_file: String,
    pub source_modified: DateTime<Utc>,
    pub graded_at: DateTime<Utc>,
    pub backend: String,
    pub result: GradeResult,
}

impl GradeRecord {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.route.clone(), self.student.clone())
    }
}
