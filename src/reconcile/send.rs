//! 达标（soft send）判定

use crate::models::{Exercise, GradeResult, SendScore};

/// 计算达标分数
///
/// 必做练习全部计入分母，缺失或 NEEDS_WORK 视为未通过；选做练习只有在
/// 尝试过且通过时才同时计入分子和分母，因此只会提高分数。
///
/// 路线没有练习列表时，以成绩本身的练习为准，带
/// `optional_not_attempted` 标记的视为未尝试的选做练习。
pub fn send_score(result: &GradeResult, exercises: Option<&[Exercise]>) -> SendScore {
    let mut score = SendScore {
        passing: 0,
        counted: 0,
    };

    match exercises {
        Some(exercises) if !exercises.is_empty() => {
            for exercise in exercises {
                let grade = result.exercise(&exercise.id);
                if exercise.optional {
                    if grade.is_some_and(|g| g.attempted() && g.rating.is_passing()) {
                        score.counted += 1;
                        score.passing += 1;
                    }
                } else {
                    score.counted += 1;
                    if grade.is_some_and(|g| g.attempted() && g.rating.is_passing()) {
                        score.passing += 1;
                    }
                }
            }
        }
        _ => {
            for grade in result.exercises.iter().filter(|g| g.attempted()) {
                score.counted += 1;
                if grade.rating.is_passing() {
                    score.passing += 1;
                }
            }
        }
    }

    score
}

/// 成绩是否达标
pub fn is_soft_send(result: &GradeResult, exercises: Option<&[Exercise]>, threshold: f64) -> bool {
    send_score(result, exercises).meets(threshold)
}
