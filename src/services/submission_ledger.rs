//! 提交台账 - 业务能力层
//!
//! 扫描每条路线的 `submissions/` 目录，把文件名解析为学生身份，
//! 并把同一 (路线, 学生) 的多个文件归并为最新的一份。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::Policy;
use crate::error::{AppError, AppResult, IdentityError};
use crate::models::{FileKind, Fingerprint, RouteId, RouteLayout, StudentId, Submission, SubmissionKey};
use crate::services::identity::{resolve, route_number, IdentityRules};

/// 多交付物路线中的日志文件，不参与评分
const LOGBOOK_MARKER: &str = "logbook";

/// 扫描得到的原始文件信息
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub route: RouteId,
    pub path: PathBuf,
    pub file_name: String,
    pub modified: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// 无法确定学生身份的文件，需要人工处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedFile {
    pub route: RouteId,
    pub file_name: String,
    pub reason: String,
}

/// 提交台账
///
/// 每个 (路线, 学生) 只有一份权威提交（最新的），其余保留为历史
#[derive(Debug, Clone, Default)]
pub struct SubmissionLedger {
    current: BTreeMap<SubmissionKey, Submission>,
    history: BTreeMap<SubmissionKey, Vec<Submission>>,
    unresolved: Vec<UnresolvedFile>,
    excluded_files: usize,
    scanned_routes: BTreeSet<RouteId>,
}

impl SubmissionLedger {
    /// 由扫描结果构造台账（纯函数，不接触文件系统）
    pub fn from_files(files: Vec<ScannedFile>, policy: &Policy, rules: &IdentityRules) -> Self {
        let mut ledger = SubmissionLedger::default();
        let mut grouped: BTreeMap<SubmissionKey, Vec<Submission>> = BTreeMap::new();

        for file in files {
            ledger.scanned_routes.insert(file.route.clone());

            if file.file_name.to_lowercase().contains(LOGBOOK_MARKER) {
                debug!("跳过日志文件: {}", file.file_name);
                continue;
            }
            let Some(kind) = FileKind::from_path(&file.path) else {
                debug!("跳过未知类型文件: {}", file.file_name);
                continue;
            };

            let student = match resolve(&file.file_name, rules) {
                Ok(student) => student,
                Err(IdentityError::Excluded { student }) => {
                    debug!("排除学生 {} 的文件 {}", student, file.file_name);
                    ledger.excluded_files += 1;
                    continue;
                }
                Err(IdentityError::Ambiguous { reason, .. }) => {
                    warn!(
                        "⚠ 无法确定身份: 路线 {} | 文件 {} | {}",
                        file.route, file.file_name, reason
                    );
                    ledger.unresolved.push(UnresolvedFile {
                        route: file.route,
                        file_name: file.file_name,
                        reason,
                    });
                    continue;
                }
            };

            let format_mismatch = !kind.matches(policy.deliverable_kind(&file.route));
            let route_token_mismatch = match (
                rules.extract_route_number(&file.file_name),
                route_number(&file.route),
            ) {
                (Some(token), Some(folder)) => token != folder,
                _ => false,
            };
            if route_token_mismatch {
                warn!(
                    "文件 {} 中的路线标记与所在路线 {} 不一致",
                    file.file_name, file.route
                );
            }

            let submission = Submission {
                route: file.route,
                student,
                path: file.path,
                file_name: file.file_name,
                kind,
                modified: file.modified,
                fingerprint: file.fingerprint,
                format_mismatch,
                route_token_mismatch,
            };
            grouped.entry(submission.key()).or_default().push(submission);
        }

        for (key, mut candidates) in grouped {
            // 格式正确的优先，其次最新的在前；时间相同时按文件名字典序
            candidates.sort_by(|a, b| {
                a.format_mismatch
                    .cmp(&b.format_mismatch)
                    .then_with(|| b.modified.cmp(&a.modified))
                    .then_with(|| a.file_name.cmp(&b.file_name))
            });
            let mut iter = candidates.into_iter();
            if let Some(head) = iter.next() {
                let rest: Vec<Submission> = iter.collect();
                if !rest.is_empty() {
                    debug!("{} 有 {} 个旧版本", key, rest.len());
                    ledger.history.insert(key.clone(), rest);
                }
                ledger.current.insert(key, head);
            }
        }

        ledger
    }

    /// 扫描作业根目录下所有路线的提交
    pub async fn scan(
        layout: &RouteLayout,
        policy: &Policy,
        rules: &IdentityRules,
    ) -> AppResult<Self> {
        let routes = layout.discover_routes().await?;
        let files: Vec<ScannedFile> =
            try_join_all(routes.iter().map(|route| scan_route_files(layout, route)))
                .await?
                .into_iter()
                .flatten()
                .collect();

        let ledger = Self::from_files(files, policy, rules);
        info!(
            "✓ 提交扫描完成: {} 份有效提交, {} 份历史版本, {} 个无法识别, {} 个已排除",
            ledger.current.len(),
            ledger.history.values().map(Vec::len).sum::<usize>(),
            ledger.unresolved.len(),
            ledger.excluded_files
        );
        Ok(ledger)
    }

    /// 某个键的权威提交
    pub fn current(&self, key: &SubmissionKey) -> Option<&Submission> {
        self.current.get(key)
    }

    /// 被取代的旧版本（最新的在前）
    pub fn history(&self, key: &SubmissionKey) -> &[Submission] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn submissions(&self) -> impl Iterator<Item = &Submission> {
        self.current.values()
    }

    pub fn for_route<'a>(&'a self, route: &RouteId) -> impl Iterator<Item = &'a Submission> + 'a {
        let route = route.clone();
        self.current.values().filter(move |s| s.route == route)
    }

    pub fn students(&self) -> BTreeSet<StudentId> {
        self.current.keys().map(|k| k.student.clone()).collect()
    }

    /// 有任何提交的路线
    pub fn active_routes(&self) -> BTreeSet<RouteId> {
        self.current.keys().map(|k| k.route.clone()).collect()
    }

    pub fn unresolved(&self) -> &[UnresolvedFile] {
        &self.unresolved
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

async fn scan_route_files(layout: &RouteLayout, route: &RouteId) -> AppResult<Vec<ScannedFile>> {
    let dir = layout.submissions_dir(route);
    if !fs::try_exists(&dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(&dir)
        .await
        .map_err(|e| AppError::file_read_failed(dir.display().to_string(), e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::file_read_failed(dir.display().to_string(), e))?
    {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if file_name.starts_with('.') || FileKind::from_path(&path).is_none() {
            continue;
        }

        let metadata = entry
            .metadata()
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        if !metadata.is_file() {
            continue;
        }
        let modified: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?
            .into();

        let bytes = fs::read(&path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;

        files.push(ScannedFile {
            route: route.clone(),
            fingerprint: Fingerprint::of_bytes(&bytes),
            path,
            file_name,
            modified,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rules(policy: &Policy) -> IdentityRules {
        IdentityRules::from_policy(policy).unwrap()
    }

    fn file(route: &str, name: &str, minute: u32, content: &str) -> ScannedFile {
        ScannedFile {
            route: RouteId::new(route),
            path: PathBuf::from(format!("/data/{}/submissions/{}", route, name)),
            file_name: name.to_string(),
            modified: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            fingerprint: Fingerprint::of_bytes(content.as_bytes()),
        }
    }

    fn key(route: &str, student: &str) -> SubmissionKey {
        SubmissionKey::new(RouteId::new(route), StudentId::new(student))
    }

    #[test]
    fn test_newest_file_wins() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_001", "doe_john_RID_001.ipynb", 1, "v1"),
                file("RID_001", "doe_john_RID_001_final.ipynb", 5, "v2"),
                file("RID_001", "Doe John - RID_001.ipynb", 3, "v3"),
            ],
            &policy,
            &rules(&policy),
        );

        let k = key("RID_001", "doe_john");
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.current(&k).unwrap().file_name,
            "doe_john_RID_001_final.ipynb"
        );
        assert_eq!(ledger.history(&k).len(), 2);
        assert_eq!(ledger.history(&k)[0].file_name, "Doe John - RID_001.ipynb");
    }

    #[test]
    fn test_timestamp_tie_breaks_on_file_name() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_001", "doe_john_b_RID_001.ipynb", 1, "b"),
                file("RID_001", "doe_john_RID_001.ipynb", 1, "a"),
            ],
            &policy,
            &rules(&policy),
        );
        // 两个文件解析为不同学生时互不影响；相同学生时取字典序最小
        let ledger_same = SubmissionLedger::from_files(
            vec![
                file("RID_001", "doe_john_RID_001_v2.ipynb", 1, "b"),
                file("RID_001", "doe_john_RID_001_v1.ipynb", 1, "a"),
            ],
            &policy,
            &rules(&policy),
        );
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger_same
                .current(&key("RID_001", "doe_john"))
                .unwrap()
                .file_name,
            "doe_john_RID_001_v1.ipynb"
        );
    }

    #[test]
    fn test_logbook_and_unknown_files_skipped() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_001", "doe_john_logbook_RID_001.txt", 1, "log"),
                file("RID_001", "doe_john_RID_001.png", 1, "img"),
            ],
            &policy,
            &rules(&policy),
        );
        assert!(ledger.is_empty());
        assert!(ledger.unresolved().is_empty());
    }

    #[test]
    fn test_excluded_students_are_invisible() {
        let mut policy = Policy::default();
        policy.excluded_students.insert(StudentId::new("test_student"));
        let ledger = SubmissionLedger::from_files(
            vec![file("RID_001", "test_student_RID_001.ipynb", 1, "x")],
            &policy,
            &rules(&policy),
        );
        assert!(ledger.is_empty());
        assert!(ledger.unresolved().is_empty());
    }

    #[test]
    fn test_ambiguous_names_are_reported() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![file("RID_001", "RID_001.ipynb", 1, "x")],
            &policy,
            &rules(&policy),
        );
        assert!(ledger.is_empty());
        assert_eq!(ledger.unresolved().len(), 1);
        assert_eq!(ledger.unresolved()[0].file_name, "RID_001.ipynb");
    }

    #[test]
    fn test_format_mismatch_still_recorded() {
        let mut policy = Policy::default();
        policy.text_routes.insert(RouteId::new("RID_006"));
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_006", "doe_john_RID_006.docx", 1, "doc"),
                file("RID_006", "roe_jane_RID_006.txt", 1, "txt"),
            ],
            &policy,
            &rules(&policy),
        );
        assert_eq!(ledger.len(), 2);
        assert!(ledger.current(&key("RID_006", "doe_john")).unwrap().format_mismatch);
        assert!(!ledger.current(&key("RID_006", "roe_jane")).unwrap().format_mismatch);
    }

    #[test]
    fn test_newer_wrong_format_does_not_displace_gradable_file() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_002", "doe_john_RID_002.ipynb", 1, "nb"),
                file("RID_002", "doe_john_RID_002.pdf", 5, "pdf"),
            ],
            &policy,
            &rules(&policy),
        );
        let k = key("RID_002", "doe_john");
        let current = ledger.current(&k).unwrap();
        assert_eq!(current.file_name, "doe_john_RID_002.ipynb");
        assert!(!current.format_mismatch);
        assert_eq!(ledger.history(&k).len(), 1);
        assert!(ledger.history(&k)[0].format_mismatch);
    }

    #[test]
    fn test_only_wrong_format_files_stay_current() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![
                file("RID_002", "doe_john_RID_002.pdf", 1, "old"),
                file("RID_002", "doe_john_RID_002.docx", 3, "new"),
            ],
            &policy,
            &rules(&policy),
        );
        let current = ledger.current(&key("RID_002", "doe_john")).unwrap();
        assert_eq!(current.file_name, "doe_john_RID_002.docx");
        assert!(current.format_mismatch);
    }

    #[test]
    fn test_route_token_mismatch_keeps_folder_route() {
        let policy = Policy::default();
        let ledger = SubmissionLedger::from_files(
            vec![file("RID_004", "doe_john_R003.ipynb", 1, "x")],
            &policy,
            &rules(&policy),
        );
        let submission = ledger.current(&key("RID_004", "doe_john")).unwrap();
        assert!(submission.route_token_mismatch);
        assert_eq!(ledger.active_routes().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_reads_layout() {
        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("RID_001/submissions");
        std::fs::create_dir_all(&subs).unwrap();
        std::fs::write(subs.join("doe_john_RID_001.ipynb"), "{}").unwrap();
        std::fs::write(subs.join(".DS_Store"), "").unwrap();

        let layout = RouteLayout::new(dir.path());
        let policy = Policy::default();
        let ledger = SubmissionLedger::scan(&layout, &policy, &rules(&policy))
            .await
            .unwrap();
        let submission = ledger.current(&key("RID_001", "doe_john")).unwrap();
        assert_eq!(submission.fingerprint, Fingerprint::of_bytes(b"{}"));
        assert_eq!(submission.kind, FileKind::Notebook);
    }
}
