//! 文件名 → 学生身份
//!
//! 解析过程是一个显式的有序规则列表，每条规则对当前候选名做一次变换，
//! 或者直接给出结果 / 拒绝。`resolve` 是纯函数，不接触文件系统。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::path::Path;

use regex::Regex;

use crate::config::Policy;
use crate::error::{AppResult, IdentityError};
use crate::models::{RouteId, StudentId};

/// 身份解析规则（按 `IdentityRules::order` 依次执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// 别名表精确匹配（整个文件名）
    ExactAlias,
    /// 去掉平台追加的 ` - 姓名` 后缀
    StripPlatformSuffix,
    /// `Route_003_code_Huang` 形式：只保留最后一个有意义的片段
    RoutePrefixedTrailingName,
    /// 去掉开头的路线标记，如 `RID_003_`
    StripLeadingRouteToken,
    /// 去掉交付物标签，如 `_deliverable`
    StripDeliverableTags,
    /// 去掉路线标记及其后的全部内容，如 `_R003_final`
    StripRouteToken,
    /// 去掉学号和 `_code` 后缀
    StripStudentNumber,
    /// 规范化：小写、标点清理、下划线合并
    Normalize,
    /// 结果看起来仍是路线标记或过短时拒绝
    RejectRouteLike,
    /// 别名表匹配（规范化后）
    AliasNormalized,
}

impl IdentityRule {
    pub const DEFAULT_ORDER: [IdentityRule; 10] = [
        IdentityRule::ExactAlias,
        IdentityRule::StripPlatformSuffix,
        IdentityRule::RoutePrefixedTrailingName,
        IdentityRule::StripLeadingRouteToken,
        IdentityRule::StripDeliverableTags,
        IdentityRule::StripRouteToken,
        IdentityRule::StripStudentNumber,
        IdentityRule::Normalize,
        IdentityRule::RejectRouteLike,
        IdentityRule::AliasNormalized,
    ];
}

impl Display for IdentityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// `Route_XXX_...` 文件名中不代表学生的片段
const FILLER_SEGMENTS: &[&str] = &["code", "notebook", "ipynb"];

/// 单条规则的执行结果
enum RuleOutcome {
    Continue(String),
    Resolved(StudentId),
    Reject(String),
}

/// 一条规则执行前后的候选名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStep {
    pub rule: IdentityRule,
    pub before: String,
    pub after: String,
}

/// 带执行轨迹的解析结果，用于人工排查
#[derive(Debug, Clone)]
pub struct Resolution {
    pub steps: Vec<RuleStep>,
    pub outcome: Result<StudentId, IdentityError>,
}

/// 身份解析规则集（不可变，由策略快照构造）
#[derive(Debug, Clone)]
pub struct IdentityRules {
    aliases: BTreeMap<String, StudentId>,
    excluded: BTreeSet<StudentId>,
    roster: BTreeSet<StudentId>,
    order: Vec<IdentityRule>,
    platform_suffix_re: Regex,
    leading_route_re: Regex,
    route_prefixed_re: Regex,
    deliverable_tag_re: Regex,
    route_token_re: Regex,
    numbered_suffix_re: Regex,
    student_number_re: Regex,
    route_like_re: Regex,
    route_number_re: Regex,
}

impl IdentityRules {
    pub fn new(
        aliases: BTreeMap<String, StudentId>,
        excluded: BTreeSet<StudentId>,
        roster: BTreeSet<StudentId>,
    ) -> AppResult<Self> {
        Ok(Self {
            aliases: aliases
                .into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
            excluded,
            roster,
            order: IdentityRule::DEFAULT_ORDER.to_vec(),
            platform_suffix_re: Regex::new(r"\s+-\s+.*$")?,
            leading_route_re: Regex::new(r"^(?:rid|route|rd|r)_?\d+_+")?,
            route_prefixed_re: Regex::new(r"^route_\d+_")?,
            deliverable_tag_re: Regex::new(
                r"_(?:text_submission|submission_file|deliverable|text)(_|$)",
            )?,
            route_token_re: Regex::new(
                r"_(?:r(?:id|d|oute)?_?(?:m(?:id|t|o)?)?_?\d+|m(?:id|t|o)?_?\d+)(?:[_\s].*)?$",
            )?,
            numbered_suffix_re: Regex::new(r"_0\d{2}(?:_.*)?$")?,
            student_number_re: Regex::new(r"_a\d{7,9}")?,
            route_like_re: Regex::new(r"^(?:(?:route|rid|rd|r)_?\d+|route|rid)(?:_|$)")?,
            route_number_re: Regex::new(r"(?:^|_)(?:rid|route|rd|r)_?(\d+)(?:_|$)")?,
        })
    }

    pub fn from_policy(policy: &Policy) -> AppResult<Self> {
        Self::new(
            policy.aliases.clone(),
            policy.excluded_students.clone(),
            policy.roster.clone(),
        )
    }

    /// 规则执行顺序
    pub fn order(&self) -> &[IdentityRule] {
        &self.order
    }

    /// 文件名中松散书写的路线编号，如 `_R003`、`_RID003` → 3
    pub fn extract_route_number(&self, raw: &str) -> Option<u32> {
        let stem = file_stem(raw).to_lowercase();
        self.route_number_re
            .captures(&stem)
            .and_then(|caps| caps[1].parse().ok())
    }

    fn apply(&self, rule: IdentityRule, current: String) -> RuleOutcome {
        match rule {
            IdentityRule::ExactAlias => match self.aliases.get(&current) {
                Some(id) => RuleOutcome::Resolved(id.clone()),
                None => RuleOutcome::Continue(current),
            },
            IdentityRule::StripPlatformSuffix => {
                RuleOutcome::Continue(self.platform_suffix_re.replace(&current, "").into_owned())
            }
            IdentityRule::RoutePrefixedTrailingName => {
                if !self.route_prefixed_re.is_match(&current) {
                    return RuleOutcome::Continue(current);
                }
                let trailing = current
                    .split('_')
                    .skip(2)
                    .filter(|seg| !seg.is_empty())
                    .filter(|seg| !seg.chars().all(|c| c.is_ascii_digit()))
                    .filter(|seg| !FILLER_SEGMENTS.contains(seg))
                    .last()
                    .map(str::to_string);
                match trailing {
                    Some(name) => RuleOutcome::Continue(name),
                    None => RuleOutcome::Reject(format!("'{}' 中没有学生名字", current)),
                }
            }
            IdentityRule::StripLeadingRouteToken => {
                RuleOutcome::Continue(self.leading_route_re.replace(&current, "").into_owned())
            }
            IdentityRule::StripDeliverableTags => {
                let mut value = current;
                loop {
                    let next = self.deliverable_tag_re.replace_all(&value, "$1").into_owned();
                    if next == value {
                        break;
                    }
                    value = next;
                }
                RuleOutcome::Continue(value)
            }
            IdentityRule::StripRouteToken => {
                let value = self.route_token_re.replace(&current, "");
                RuleOutcome::Continue(self.numbered_suffix_re.replace(&value, "").into_owned())
            }
            IdentityRule::StripStudentNumber => {
                let value = self.student_number_re.replace_all(&current, "");
                let value = value.strip_suffix("_code").unwrap_or(&value);
                RuleOutcome::Continue(value.to_string())
            }
            IdentityRule::Normalize => RuleOutcome::Continue(normalize(&current)),
            IdentityRule::RejectRouteLike => {
                if current.chars().count() < 2 {
                    RuleOutcome::Reject(format!("规范化后的名字 '{}' 过短", current))
                } else if self.route_like_re.is_match(&current) {
                    RuleOutcome::Reject(format!("规范化后的名字 '{}' 看起来是路线标记", current))
                } else {
                    RuleOutcome::Continue(current)
                }
            }
            IdentityRule::AliasNormalized => match self.aliases.get(&current) {
                Some(id) => RuleOutcome::Resolved(id.clone()),
                None => RuleOutcome::Resolved(StudentId::new(current)),
            },
        }
    }

    fn check_policy(&self, raw: &str, id: StudentId) -> Result<StudentId, IdentityError> {
        if self.excluded.contains(&id) {
            return Err(IdentityError::Excluded {
                student: id.to_string(),
            });
        }
        if !self.roster.is_empty() && !self.roster.contains(&id) {
            return Err(IdentityError::Ambiguous {
                raw: raw.to_string(),
                reason: format!("'{}' 不在学生名册中", id),
            });
        }
        Ok(id)
    }
}

/// 把原始文件名解析为规范学生身份
pub fn resolve(raw: &str, rules: &IdentityRules) -> Result<StudentId, IdentityError> {
    resolve_traced(raw, rules).outcome
}

/// 与 `resolve` 相同，但保留每条规则的执行轨迹
pub fn resolve_traced(raw: &str, rules: &IdentityRules) -> Resolution {
    let mut steps = Vec::new();
    let mut current = file_stem(raw).trim().to_lowercase();

    for &rule in rules.order() {
        let before = current.clone();
        match rules.apply(rule, current) {
            RuleOutcome::Continue(next) => {
                steps.push(RuleStep {
                    rule,
                    before,
                    after: next.clone(),
                });
                current = next;
            }
            RuleOutcome::Resolved(id) => {
                steps.push(RuleStep {
                    rule,
                    before,
                    after: id.to_string(),
                });
                let outcome = rules.check_policy(raw, id);
                return Resolution { steps, outcome };
            }
            RuleOutcome::Reject(reason) => {
                steps.push(RuleStep {
                    rule,
                    before: before.clone(),
                    after: before,
                });
                return Resolution {
                    steps,
                    outcome: Err(IdentityError::Ambiguous {
                        raw: raw.to_string(),
                        reason,
                    }),
                };
            }
        }
    }

    Resolution {
        steps,
        outcome: Err(IdentityError::Ambiguous {
            raw: raw.to_string(),
            reason: "规则列表没有给出结果".to_string(),
        }),
    }
}

/// 路线标识中的编号，如 `RID_007` → 7
pub fn route_number(route: &RouteId) -> Option<u32> {
    let digits: String = route
        .as_str()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

fn file_stem(raw: &str) -> &str {
    Path::new(raw)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(raw)
}

fn normalize(value: &str) -> String {
    let mapped: String = value
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' | '_' | '.' => Some('_'),
            c if c.is_alphanumeric() => Some(c),
            _ => None,
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    let mut result = collapsed.trim_matches('_').to_string();
    // 副本编号，如 `name_2`
    while let Some(idx) = result.rfind('_') {
        let tail = &result[idx + 1..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            result.truncate(idx);
        } else {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_with_alias() -> IdentityRules {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "jaramilo_jonathan".to_string(),
            StudentId::new("jaramillo_jonathan"),
        );
        aliases.insert(
            "smith_jane_final_v2".to_string(),
            StudentId::new("smith_jane"),
        );
        let mut excluded = BTreeSet::new();
        excluded.insert(StudentId::new("test_student"));
        IdentityRules::new(aliases, excluded, BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_alias_after_route_token_strip() {
        let rules = rules_with_alias();
        assert_eq!(
            resolve("jaramilo_jonathan_R003.ipynb", &rules).unwrap(),
            StudentId::new("jaramillo_jonathan")
        );
    }

    #[test]
    fn test_exact_alias_wins_first() {
        let rules = rules_with_alias();
        let resolution = resolve_traced("Smith_Jane_Final_v2.ipynb", &rules);
        assert_eq!(resolution.outcome.unwrap(), StudentId::new("smith_jane"));
        assert_eq!(resolution.steps.len(), 1);
        assert_eq!(resolution.steps[0].rule, IdentityRule::ExactAlias);
    }

    #[test]
    fn test_loose_route_tokens() {
        let rules = rules_with_alias();
        for name in [
            "doe_john_RID_003.ipynb",
            "doe_john_RID003.ipynb",
            "doe_john_R3_final.ipynb",
            "doe_john_MT1.txt",
            "doe_john_RID_MO2.ipynb",
            "RID_003_doe_john.ipynb",
            "Doe John_RID_003 - John Doe.ipynb",
            "doe_john_text_submission_RID_006.txt",
            "doe_john_A01234567_RID_003.ipynb",
            "doe-john_2.ipynb",
        ] {
            assert_eq!(
                resolve(name, &rules).unwrap(),
                StudentId::new("doe_john"),
                "failed for {}",
                name
            );
        }
    }

    #[test]
    fn test_route_prefixed_names_keep_trailing_segment() {
        let rules = rules_with_alias();
        assert_eq!(
            resolve("Route_003_code_Huang.ipynb", &rules).unwrap(),
            StudentId::new("huang")
        );
        assert_eq!(
            resolve("Route_005_notebook_Pineda.ipynb", &rules).unwrap(),
            StudentId::new("pineda")
        );
        assert_eq!(
            resolve("Route_005_Pineda_2.ipynb", &rules).unwrap(),
            StudentId::new("pineda")
        );
        assert!(matches!(
            resolve("Route_003_code_notebook.ipynb", &rules),
            Err(IdentityError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_route_like_name_is_ambiguous() {
        let rules = rules_with_alias();
        let err = resolve("RID_003.ipynb", &rules).unwrap_err();
        assert!(matches!(err, IdentityError::Ambiguous { .. }));
        let err = resolve("_.ipynb", &rules).unwrap_err();
        assert!(matches!(err, IdentityError::Ambiguous { .. }));
    }

    #[test]
    fn test_excluded_student() {
        let rules = rules_with_alias();
        let err = resolve("test_student_RID_001.ipynb", &rules).unwrap_err();
        assert_eq!(
            err,
            IdentityError::Excluded {
                student: "test_student".into()
            }
        );
    }

    #[test]
    fn test_roster_rejects_unknown() {
        let mut roster = BTreeSet::new();
        roster.insert(StudentId::new("doe_john"));
        let rules = IdentityRules::new(BTreeMap::new(), BTreeSet::new(), roster).unwrap();
        assert!(resolve("doe_john_R1.ipynb", &rules).is_ok());
        assert!(matches!(
            resolve("doe_jon_R1.ipynb", &rules),
            Err(IdentityError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_extract_route_number() {
        let rules = rules_with_alias();
        assert_eq!(rules.extract_route_number("a_b_R003.ipynb"), Some(3));
        assert_eq!(rules.extract_route_number("a_b_RID_007_final.ipynb"), Some(7));
        assert_eq!(rules.extract_route_number("a_b.ipynb"), None);
        assert_eq!(route_number(&RouteId::new("RID_007")), Some(7));
        assert_eq!(route_number(&RouteId::new("intro")), None);
    }
}
