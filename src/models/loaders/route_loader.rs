use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::Policy;
use crate::error::{AppError, AppResult, FileError};
use crate::models::{Fingerprint, Route, RouteCatalog, RouteId, StudentId};
use crate::services::ExerciseExtractor;

const INSTRUCTIONS_FILE: &str = "instructions.md";
const SUBMISSIONS_DIR: &str = "submissions";
const RESULTS_DIR: &str = "results";

/// 作业根目录布局
///
/// ```text
/// <root>/<ROUTE_ID>/instructions.md
/// <root>/<ROUTE_ID>/submissions/*
/// <root>/<ROUTE_ID>/results/<student>__<fp12>_grade.json
/// ```
#[derive(Debug, Clone)]
pub struct RouteLayout {
    root: PathBuf,
}

impl RouteLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn route_dir(&self, route: &RouteId) -> PathBuf {
        self.root.join(route.as_str())
    }

    pub fn instructions_path(&self, route: &RouteId) -> PathBuf {
        self.route_dir(route).join(INSTRUCTIONS_FILE)
    }

    pub fn submissions_dir(&self, route: &RouteId) -> PathBuf {
        self.route_dir(route).join(SUBMISSIONS_DIR)
    }

    pub fn results_dir(&self, route: &RouteId) -> PathBuf {
        self.route_dir(route).join(RESULTS_DIR)
    }

    pub fn grade_record_path(
        &self,
        route: &RouteId,
        student: &StudentId,
        fingerprint: &Fingerprint,
    ) -> PathBuf {
        self.results_dir(route)
            .join(format!("{}__{}_grade.json", student, fingerprint.short()))
    }

    /// 查找所有路线目录（包含 `submissions/` 或 `instructions.md` 的子目录）
    pub async fn discover_routes(&self) -> AppResult<Vec<RouteId>> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(AppError::File(FileError::DirectoryNotFound {
                path: self.root.display().to_string(),
            }));
        }

        let mut routes = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| AppError::file_read_failed(self.root.display().to_string(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::file_read_failed(self.root.display().to_string(), e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if path.join(SUBMISSIONS_DIR).is_dir() || path.join(INSTRUCTIONS_FILE).is_file() {
                routes.push(RouteId::new(name));
            }
        }

        routes.sort();
        Ok(routes)
    }
}

/// 加载所有路线的说明文档并构造路线目录
///
/// 单条路线解析失败只记录在目录中，不影响其他路线
pub async fn load_route_catalog(
    layout: &RouteLayout,
    policy: &Policy,
    extractor: &ExerciseExtractor,
) -> AppResult<RouteCatalog> {
    let mut catalog = RouteCatalog::new();

    for route_id in layout.discover_routes().await? {
        let path = layout.instructions_path(&route_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("路线 {} 缺少说明文档 {}: {}", route_id, path.display(), e);
                catalog.record_failure(route_id, format!("无法读取 {}: {}", INSTRUCTIONS_FILE, e));
                continue;
            }
        };

        match extractor.parse(&route_id, &content) {
            Ok(document) => {
                tracing::info!(
                    "正在加载路线 {}: {} 个练习",
                    route_id,
                    document.exercises.len()
                );
                catalog.insert(Route {
                    kind: policy.deliverable_kind(&route_id),
                    free_pass: policy.is_free_pass(&route_id),
                    id: route_id,
                    document,
                    active: false,
                });
            }
            Err(e) => {
                tracing::error!("路线 {} 解析失败: {}", route_id, e);
                catalog.record_failure(route_id, e.to_string());
            }
        }
    }

    Ok(catalog)
}
