use regex::Regex;
use tracing::debug;

use crate::error::{AppResult, ParseError};
use crate::models::{Exercise, RouteDocument, RouteId};

/// 标题或首段中出现即视为选做练习
const OPTIONAL_MARKERS: &[&str] = &[
    "optional",
    "bonus",
    "extra practice",
    "anchor challenge",
    "dyno",
];

/// 路线说明文档解析能力
///
/// 识别 1~4 级标题中的 `Exercise N`、`Part X` 以及独立的选做小节，
/// 按文档顺序输出练习列表。同一文档多次解析结果完全相同。
pub struct ExerciseExtractor {
    exercise_re: Regex,
    part_re: Regex,
    optional_section_re: Regex,
    title_re: Regex,
}

struct ExerciseBuilder {
    id: String,
    title: Option<String>,
    heading: String,
    body: Vec<String>,
    forced_optional: bool,
}

impl ExerciseBuilder {
    fn build(self) -> Exercise {
        let instructions = self.body.join("\n").trim().to_string();
        let optional = self.forced_optional || has_optional_marker(&self.heading, &instructions);
        Exercise {
            id: self.id,
            title: self.title,
            instructions,
            optional,
        }
    }
}

impl ExerciseExtractor {
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            exercise_re: Regex::new(
                r"(?i)^#{1,4}\s+\*{0,2}(?:Exercise\s+)?(\d+[a-z]?(?:\.\d+)?)\*{0,2}[.\\\s:\-]*\*{0,2}\s*(.*)$",
            )?,
            part_re: Regex::new(r"(?i)^#{1,4}\s+\*{0,2}Part\s+([a-z])\b(.*)$")?,
            optional_section_re: Regex::new(
                r"(?i)^#{1,4}\s+\*{0,2}(Optional\s+Hold|The\s+Dyno|Bonus\s+Hold|Anchor\s+Challenge)\b(.*)$",
            )?,
            title_re: Regex::new(r"^#\s+(.+)$")?,
        })
    }

    /// 解析路线说明文档
    ///
    /// 没有任何练习时返回 `ParseError::NoExercises`
    pub fn parse(&self, route: &RouteId, text: &str) -> Result<RouteDocument, ParseError> {
        let mut title: Option<String> = None;
        let mut preamble: Vec<String> = Vec::new();
        let mut current: Option<ExerciseBuilder> = None;
        let mut exercises: Vec<Exercise> = Vec::new();
        let mut in_code_block = false;

        for raw_line in text.lines() {
            let line = raw_line.trim_end();

            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                push_body(&mut current, &mut preamble, line);
                continue;
            }
            if in_code_block {
                push_body(&mut current, &mut preamble, line);
                continue;
            }

            if let Some(builder) = self.match_heading(line) {
                if let Some(done) = current.take() {
                    merge_exercise(&mut exercises, done.build());
                }
                current = Some(builder);
                continue;
            }

            if current.is_none() && exercises.is_empty() && title.is_none() {
                if let Some(caps) = self.title_re.captures(line) {
                    title = non_empty(clean_heading_text(&caps[1]));
                    continue;
                }
            }

            push_body(&mut current, &mut preamble, line);
        }

        if let Some(done) = current.take() {
            merge_exercise(&mut exercises, done.build());
        }

        if exercises.is_empty() {
            return Err(ParseError::NoExercises {
                route: route.to_string(),
            });
        }

        debug!(
            "路线 {} 解析出 {} 个练习（选做 {} 个）",
            route,
            exercises.len(),
            exercises.iter().filter(|ex| ex.optional).count()
        );

        Ok(RouteDocument {
            title,
            preamble: non_empty(preamble.join("\n").trim().to_string()),
            exercises,
        })
    }

    fn match_heading(&self, line: &str) -> Option<ExerciseBuilder> {
        if let Some(caps) = self.exercise_re.captures(line) {
            return Some(ExerciseBuilder {
                id: format!("Exercise {}", caps[1].to_ascii_lowercase()),
                title: non_empty(clean_heading_text(&caps[2])),
                heading: line.to_string(),
                body: Vec::new(),
                forced_optional: false,
            });
        }

        if let Some(caps) = self.part_re.captures(line) {
            return Some(ExerciseBuilder {
                id: format!("Part {}", caps[1].to_ascii_uppercase()),
                title: non_empty(clean_heading_text(&caps[2])),
                heading: line.to_string(),
                body: Vec::new(),
                forced_optional: false,
            });
        }

        if let Some(caps) = self.optional_section_re.captures(line) {
            return Some(ExerciseBuilder {
                id: section_id(&caps[1]),
                title: non_empty(clean_heading_text(&caps[2])),
                heading: line.to_string(),
                body: Vec::new(),
                forced_optional: true,
            });
        }

        None
    }
}

fn push_body(current: &mut Option<ExerciseBuilder>, preamble: &mut Vec<String>, line: &str) {
    match current {
        Some(builder) => builder.body.push(line.to_string()),
        None => preamble.push(line.to_string()),
    }
}

/// 同一标识重复出现时合并正文，保留第一次出现的位置
fn merge_exercise(exercises: &mut Vec<Exercise>, exercise: Exercise) {
    if let Some(existing) = exercises.iter_mut().find(|ex| ex.id == exercise.id) {
        debug!("练习 {} 重复出现，合并正文", exercise.id);
        if !exercise.instructions.is_empty() {
            if !existing.instructions.is_empty() {
                existing.instructions.push_str("\n\n");
            }
            existing.instructions.push_str(&exercise.instructions);
        }
        existing.optional = existing.optional || exercise.optional;
        if existing.title.is_none() {
            existing.title = exercise.title;
        }
    } else {
        exercises.push(exercise);
    }
}

/// `The  Dyno` → `The_Dyno`
fn section_id(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn clean_heading_text(text: &str) -> String {
    text.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '*' | ':' | '-' | '—' | '–' | '.' | '\\')
    })
    .to_string()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// 首段：正文中第一个空行之前的内容
fn first_paragraph(instructions: &str) -> &str {
    instructions.split("\n\n").next().unwrap_or("")
}

fn has_optional_marker(heading: &str, instructions: &str) -> bool {
    let haystack = format!("{}\n{}", heading, first_paragraph(instructions)).to_lowercase();
    OPTIONAL_MARKERS.iter().any(|marker| haystack.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<RouteDocument, ParseError> {
        ExerciseExtractor::new()
            .unwrap()
            .parse(&RouteId::new("RID_001"), text)
    }

    const ROUTE_DOC: &str = r#"# Fourier Basics

Welcome to the route. Work through every exercise.

## Exercise 1: Load the data

Read `signal.csv` into a dataframe.

### **Exercise 2a** - Plot

Plot the signal.

```python
# 1. this is a code comment, not an exercise
plt.plot(x)
```

#### Exercise 3.1. Transform

Compute the FFT.

## Exercise 4 (Bonus)

Try a windowed FFT.

## Optional Hold: Filters

Design a low-pass filter.
"#;

    #[test]
    fn test_parse_exercises_in_document_order() {
        let doc = parse(ROUTE_DOC).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Fourier Basics"));
        assert!(doc.preamble.as_deref().unwrap().starts_with("Welcome"));
        assert_eq!(
            doc.exercise_ids(),
            vec![
                "Exercise 1",
                "Exercise 2a",
                "Exercise 3.1",
                "Exercise 4",
                "Optional_Hold"
            ]
        );
        assert_eq!(doc.exercises[0].title.as_deref(), Some("Load the data"));
        assert_eq!(doc.exercises[2].title.as_deref(), Some("Transform"));
        assert!(doc.exercises[1].instructions.contains("code comment"));
    }

    #[test]
    fn test_optional_markers() {
        let doc = parse(ROUTE_DOC).unwrap();
        let optional: Vec<_> = doc
            .exercises
            .iter()
            .filter(|ex| ex.optional)
            .map(|ex| ex.id.as_str())
            .collect();
        assert_eq!(optional, vec!["Exercise 4", "Optional_Hold"]);
    }

    #[test]
    fn test_marker_in_first_paragraph_only() {
        let text = "## Exercise 1\nExtra practice for the keen.\n\n## Exercise 2\nMain task.\n\nThe bonus is below.\n";
        let doc = parse(text).unwrap();
        assert!(doc.exercises[0].optional);
        assert!(!doc.exercises[1].optional);
    }

    #[test]
    fn test_part_structure() {
        let text = "# Route\n## Part A — Setup\nInstall.\n## Part b: Run\nRun it.\n### The Dyno\nJump.\n";
        let doc = parse(text).unwrap();
        assert_eq!(doc.exercise_ids(), vec!["Part A", "Part B", "The_Dyno"]);
        assert_eq!(doc.exercises[0].title.as_deref(), Some("Setup"));
        assert!(doc.exercises[2].optional);
    }

    #[test]
    fn test_no_exercises_is_error() {
        let err = parse("# Title\n\nJust prose.\n").unwrap_err();
        assert!(matches!(err, ParseError::NoExercises { route } if route == "RID_001"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = parse(ROUTE_DOC).unwrap();
        let second = parse(ROUTE_DOC).unwrap();
        assert_eq!(first, second);
    }
}
