//! 成绩存储 - 业务能力层
//!
//! 每次成功评分写入一个不可变的 JSON 记录；索引按 (路线, 学生) 分组，
//! 最新提交的成绩在前。写入路径按键串行化。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, StoreError};
use crate::models::{Fingerprint, GradeRecord, RouteLayout, SubmissionKey};

const RECORD_SUFFIX: &str = "_grade.json";

/// 成绩索引的只读快照
#[derive(Debug, Clone, Default)]
pub struct GradeIndex {
    records: BTreeMap<SubmissionKey, Vec<GradeRecord>>,
}

impl GradeIndex {
    pub fn from_records(records: impl IntoIterator<Item = GradeRecord>) -> Self {
        let mut index = GradeIndex::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: GradeRecord) {
        let entry = self.records.entry(record.key()).or_default();
        entry.push(record);
        entry.sort_by(|a, b| {
            b.source_modified
                .cmp(&a.source_modified)
                .then_with(|| b.graded_at.cmp(&a.graded_at))
        });
    }

    /// 该键下最新提交的成绩
    pub fn latest(&self, key: &SubmissionKey) -> Option<&GradeRecord> {
        self.records.get(key).and_then(|records| records.first())
    }

    /// 与指定提交指纹对应的成绩
    pub fn for_fingerprint(&self, key: &SubmissionKey, fingerprint: &Fingerprint) -> Option<&GradeRecord> {
        self.records
            .get(key)?
            .iter()
            .find(|r| &r.source_fingerprint == fingerprint)
    }

    pub fn records(&self, key: &SubmissionKey) -> &[GradeRecord] {
        self.records.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubmissionKey> {
        self.records.keys()
    }

    /// 记录总数（含被取代的）
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 持有某个 (路线, 学生) 键的写锁
pub struct KeyGuard {
    key: SubmissionKey,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &SubmissionKey {
        &self.key
    }
}

/// 成绩存储
pub struct GradeStore {
    layout: RouteLayout,
    index: RwLock<GradeIndex>,
    key_locks: Mutex<HashMap<SubmissionKey, Arc<Mutex<()>>>>,
}

impl GradeStore {
    pub fn empty(layout: RouteLayout) -> Self {
        Self {
            layout,
            index: RwLock::new(GradeIndex::default()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 从每条路线的 `results/` 目录加载全部成绩记录
    ///
    /// 格式错误的记录跳过并告警
    pub async fn load(layout: RouteLayout) -> AppResult<Self> {
        let mut records = Vec::new();
        for route in layout.discover_routes().await? {
            let dir = layout.results_dir(&route);
            if !fs::try_exists(&dir).await.unwrap_or(false) {
                continue;
            }
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::io(dir.display().to_string(), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(dir.display().to_string(), e))?
            {
                let path = entry.path();
                let is_record = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(RECORD_SUFFIX));
                if !is_record {
                    continue;
                }
                match read_record(&path).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("跳过无法读取的成绩记录: {}", e),
                }
            }
        }

        let index = GradeIndex::from_records(records);
        info!("✓ 成绩加载完成: {} 条记录, {} 个键", index.len(), index.records.len());

        Ok(Self {
            layout,
            index: RwLock::new(index),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &RouteLayout {
        &self.layout
    }

    /// 获取某个键的写锁；同一键的评分与写入串行执行
    pub async fn lock_key(&self, key: &SubmissionKey) -> KeyGuard {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        KeyGuard {
            key: key.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    pub async fn has_fingerprint(&self, key: &SubmissionKey, fingerprint: &Fingerprint) -> bool {
        self.index.read().await.for_fingerprint(key, fingerprint).is_some()
    }

    pub async fn latest(&self, key: &SubmissionKey) -> Option<GradeRecord> {
        self.index.read().await.latest(key).cloned()
    }

    pub async fn for_fingerprint(
        &self,
        key: &SubmissionKey,
        fingerprint: &Fingerprint,
    ) -> Option<GradeRecord> {
        self.index.read().await.for_fingerprint(key, fingerprint).cloned()
    }

    /// 当前索引的快照，供对账使用
    pub async fn snapshot(&self) -> GradeIndex {
        self.index.read().await.clone()
    }

    /// 持久化一条成绩记录
    ///
    /// 必须持有该记录键的写锁。先写临时文件再重命名。
    pub async fn persist(&self, guard: &KeyGuard, record: GradeRecord) -> AppResult<PathBuf> {
        if guard.key() != &record.key() {
            return Err(StoreError::KeyMismatch {
                held: guard.key().to_string(),
                record: record.key().to_string(),
            }
            .into());
        }

        let path = self.layout.grade_record_path(
            &record.route,
            &record.student,
            &record.source_fingerprint,
        );
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        let json = serde_json::to_string_pretty(&record).map_err(|source| StoreError::Serde {
            path: path.display().to_string(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .await
            .map_err(|e| AppError::file_write_failed(tmp_path.display().to_string(), e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;

        debug!("成绩已写入: {}", path.display());
        self.index.write().await.insert(record);
        Ok(path)
    }
}

async fn read_record(path: &Path) -> Result<GradeRecord, StoreError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::io(path.display().to_string(), e))?;
    serde_json::from_str(&content).map_err(|source| StoreError::Serde {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeResult, RouteId, StudentId};
    use chrono::{TimeZone, Utc};

    fn record(student: &str, fp: &str, minute: u32) -> GradeRecord {
        GradeRecord {
            route: RouteId::new("RID_001"),
            student: StudentId::new(student),
            source_fingerprint: Fingerprint::from_hex(fp),
            source_file: format!("{}.ipynb", student),
            source_modified: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            graded_at: Utc.with_ymd_and_hms(2025, 3, 2, 10, 0, 0).unwrap(),
            backend: "mock".into(),
            result: GradeResult {
                schema_version: "1.0".into(),
                exercises: vec![],
                overall_summary: String::new(),
            },
        }
    }

    #[test]
    fn test_index_newest_first() {
        let index = GradeIndex::from_records(vec![
            record("doe_john", "aaaa", 1),
            record("doe_john", "bbbb", 9),
            record("doe_john", "cccc", 5),
        ]);
        let key = SubmissionKey::new(RouteId::new("RID_001"), StudentId::new("doe_john"));
        assert_eq!(index.latest(&key).unwrap().source_fingerprint.as_str(), "bbbb");
        assert_eq!(
            index
                .for_fingerprint(&key, &Fingerprint::from_hex("aaaa"))
                .unwrap()
                .source_modified
                .format("%M")
                .to_string(),
            "01"
        );
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("RID_001/submissions")).unwrap();
        let layout = RouteLayout::new(dir.path());

        let store = GradeStore::load(layout.clone()).await.unwrap();
        let rec = record("doe_john", "0123456789abcdef", 3);
        let guard = store.lock_key(&rec.key()).await;
        let path = store.persist(&guard, rec.clone()).await.unwrap();
        drop(guard);

        assert!(path.ends_with("RID_001/results/doe_john__0123456789ab_grade.json"));
        assert!(store.has_fingerprint(&rec.key(), &rec.source_fingerprint).await);

        let reloaded = GradeStore::load(layout).await.unwrap();
        assert_eq!(reloaded.latest(&rec.key()).await, Some(rec));
    }

    #[tokio::test]
    async fn test_persist_rejects_wrong_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = GradeStore::empty(RouteLayout::new(dir.path()));
        let other = SubmissionKey::new(RouteId::new("RID_001"), StudentId::new("roe_jane"));
        let guard = store.lock_key(&other).await;
        let err = store
            .persist(&guard, record("doe_john", "ffff", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::KeyMismatch { .. })));
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("RID_001/results");
        std::fs::create_dir_all(&results).unwrap();
        std::fs::create_dir_all(dir.path().join("RID_001/submissions")).unwrap();
        std::fs::write(results.join("x__abc_grade.json"), "not json").unwrap();
        std::fs::write(results.join("summary.json"), "{}").unwrap();

        let store = GradeStore::load(RouteLayout::new(dir.path())).await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }
}
