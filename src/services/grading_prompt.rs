//! 评分提示词与响应解析

use std::collections::BTreeSet;

use crate::error::ParseError;
use crate::models::{Exercise, GradeResult};

pub const SCHEMA_VERSION: &str = "1.0";

pub const SYSTEM_PROMPT: &str = r#"You are an experienced teaching assistant grading student work for a data-science course.
Each assignment ("route") is split into exercises. For every exercise listed, judge the student's submission and give one rating:

- EXCELLENT: complete and correct, clearly explained, goes beyond the minimum.
- OK: the exercise was attempted and the core requirements are met, possibly with minor issues.
- NEEDS_WORK: missing, substantially incomplete, or incorrect.

Rules:
- Grade only what is in the submission. Do not invent work that is not there.
- Exercises marked [OPTIONAL] are extra. If an optional exercise was not attempted, rate it OK and add the flag "optional_not_attempted".
- If code cells were never executed, add the flag "not_executed" to the affected exercises.
- If you cannot judge an exercise reliably, add the flag "manual_review".
- Keep each rationale to one or two sentences. List concrete gaps in "missing_or_wrong".

Reply with ONLY a JSON object of this exact shape:
{
  "schema_version": "1.0",
  "exercises": [
    {
      "exercise_id": "<id exactly as listed>",
      "rating": "EXCELLENT" | "OK" | "NEEDS_WORK",
      "rationale": "<short explanation>",
      "missing_or_wrong": ["<gap>", "..."],
      "flags": ["<flag>", "..."]
    }
  ],
  "overall_summary": "<two or three sentences for the student>"
}
"#;

/// 构建用户消息：路线说明 + 练习列表 + 提交内容
pub fn build_user_prompt(
    route_text: &str,
    exercises: &[Exercise],
    submission_name: &str,
    submission_content: &str,
) -> String {
    let exercise_list = exercises
        .iter()
        .map(|ex| {
            if ex.optional {
                format!("- {} [OPTIONAL]", ex.id)
            } else {
                format!("- {}", ex.id)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "## Route instructions\n\n{}\n\n## Exercises to grade ({} total)\n\n{}\n\n## Student submission: {}\n\n{}\n\nGrade every exercise listed above and reply with the JSON object only.",
        route_text,
        exercises.len(),
        exercise_list,
        submission_name,
        submission_content
    )
}

/// 解析失败后的修复提示
pub fn build_repair_prompt(error: &str, exercises: &[Exercise]) -> String {
    let ids = exercises
        .iter()
        .map(|ex| format!("\"{}\"", ex.id))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Your previous reply could not be used: {}\n\nReply again with ONLY the JSON object described in the instructions. The \"exercises\" array must contain exactly one entry for each of these ids: [{}]. Ratings must be EXCELLENT, OK or NEEDS_WORK.",
        error, ids
    )
}

/// 从响应中提取 JSON 文本
///
/// 依次尝试：```json 代码块、整段 JSON、第一个 `{` 到最后一个 `}`
pub fn extract_json_from_response(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

/// 解析并校验评分响应
///
/// 每个练习必须恰好出现一次，不能出现未知练习
pub fn parse_grade_response(response: &str, exercises: &[Exercise]) -> Result<GradeResult, ParseError> {
    let json = extract_json_from_response(response).ok_or_else(|| ParseError::InvalidGradeResponse {
        reason: "no JSON object found in the reply".to_string(),
    })?;

    let result: GradeResult =
        serde_json::from_str(json).map_err(|e| ParseError::InvalidGradeResponse {
            reason: format!("invalid JSON: {}", e),
        })?;

    validate_grade_result(&result, exercises)?;
    Ok(result)
}

fn validate_grade_result(result: &GradeResult, exercises: &[Exercise]) -> Result<(), ParseError> {
    let expected: BTreeSet<&str> = exercises.iter().map(|ex| ex.id.as_str()).collect();
    let mut seen = BTreeSet::new();

    for grade in &result.exercises {
        let id = grade.exercise_id.as_str();
        if !expected.contains(id) {
            return Err(ParseError::InvalidGradeResponse {
                reason: format!("unknown exercise id \"{}\"", id),
            });
        }
        if !seen.insert(id) {
            return Err(ParseError::InvalidGradeResponse {
                reason: format!("exercise \"{}\" graded more than once", id),
            });
        }
    }

    let missing: Vec<&str> = expected.difference(&seen).copied().collect();
    if !missing.is_empty() {
        return Err(ParseError::InvalidGradeResponse {
            reason: format!("missing exercises: {}", missing.join(", ")),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn exercises() -> Vec<Exercise> {
        vec![
            Exercise {
                id: "Exercise 1".into(),
                title: None,
                instructions: "Load".into(),
                optional: false,
            },
            Exercise {
                id: "Exercise 2".into(),
                title: None,
                instructions: "Bonus plot".into(),
                optional: true,
            },
        ]
    }

    const GOOD: &str = r#"{"schema_version":"1.0","exercises":[
        {"exercise_id":"Exercise 1","rating":"OK","rationale":"fine"},
        {"exercise_id":"Exercise 2","rating":"NEEDS_WORK","flags":["optional_not_attempted"]}
    ],"overall_summary":"good"}"#;

    #[test]
    fn test_extract_json_variants() {
        let fenced = format!("Here you go:\n```json\n{}\n```\nThanks", GOOD);
        assert_eq!(extract_json_from_response(&fenced), Some(GOOD));
        assert_eq!(extract_json_from_response(GOOD), Some(GOOD));
        let wrapped = format!("Result: {} done", GOOD);
        assert_eq!(extract_json_from_response(&wrapped), Some(GOOD));
        assert_eq!(extract_json_from_response("no json here"), None);
    }

    #[test]
    fn test_parse_valid_response() {
        let result = parse_grade_response(GOOD, &exercises()).unwrap();
        assert_eq!(result.exercises.len(), 2);
        assert_eq!(result.exercises[1].rating, Rating::NeedsWork);
        assert!(!result.exercises[1].attempted());
    }

    #[test]
    fn test_missing_exercise_is_invalid() {
        let partial = r#"{"exercises":[{"exercise_id":"Exercise 1","rating":"OK"}]}"#;
        let err = parse_grade_response(partial, &exercises()).unwrap_err();
        assert!(err.to_string().contains("Exercise 2"));
    }

    #[test]
    fn test_unknown_and_duplicate_exercises_are_invalid() {
        let unknown = r#"{"exercises":[{"exercise_id":"Exercise 1","rating":"OK"},{"exercise_id":"Exercise 2","rating":"OK"},{"exercise_id":"Exercise 9","rating":"OK"}]}"#;
        assert!(parse_grade_response(unknown, &exercises()).is_err());
        let dup = r#"{"exercises":[{"exercise_id":"Exercise 1","rating":"OK"},{"exercise_id":"Exercise 1","rating":"OK"},{"exercise_id":"Exercise 2","rating":"OK"}]}"#;
        assert!(parse_grade_response(dup, &exercises()).is_err());
    }

    #[test]
    fn test_bad_rating_is_invalid() {
        let bad = r#"{"exercises":[{"exercise_id":"Exercise 1","rating":"GREAT"},{"exercise_id":"Exercise 2","rating":"OK"}]}"#;
        assert!(matches!(
            parse_grade_response(bad, &exercises()),
            Err(ParseError::InvalidGradeResponse { .. })
        ));
    }

    #[test]
    fn test_prompts_list_exercises() {
        let user = build_user_prompt("# Route", &exercises(), "a.ipynb", "content");
        assert!(user.contains("- Exercise 2 [OPTIONAL]"));
        assert!(user.contains("a.ipynb"));
        let repair = build_repair_prompt("missing exercises", &exercises());
        assert!(repair.contains("\"Exercise 1\", \"Exercise 2\""));
    }
}
