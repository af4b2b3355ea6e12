use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::RouteId;

/// 路线要求的交付物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableKind {
    Notebook,
    Text,
}

/// 路线中的一个可评分练习
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    /// 练习标识，如 `Exercise 1`、`Part A`、`Optional_Hold`
    pub id: String,
    pub title: Option<String>,
    /// 练习正文
    pub instructions: String,
    /// 选做练习：未尝试不扣分
    pub optional: bool,
}

/// 路线说明文档的解析结果（不含策略）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDocument {
    pub title: Option<String>,
    pub preamble: Option<String>,
    pub exercises: Vec<Exercise>,
}

impl RouteDocument {
    /// 按文档顺序返回练习标识
    pub fn exercise_ids(&self) -> Vec<String> {
        self.exercises.iter().map(|ex| ex.id.clone()).collect()
    }

    /// 格式化为评分提示词中的路线文本
    pub fn format_for_prompt(&self) -> String {
        let mut parts = Vec::new();

        if let Some(title) = &self.title {
            parts.push(format!("# {}\n", title));
        }
        if let Some(preamble) = &self.preamble {
            parts.push(format!("{}\n", preamble));
        }

        for exercise in &self.exercises {
            let marker = if exercise.optional { " [OPTIONAL]" } else { "" };
            let heading = match &exercise.title {
                Some(title) => format!("## {}{}: {}", exercise.id, marker, title),
                None => format!("## {}{}", exercise.id, marker),
            };
            parts.push(heading);
            parts.push(exercise.instructions.clone());
            parts.push(String::new());
        }

        parts.join("\n")
    }
}

/// 一条作业路线：标识 + 交付物类型 + 练习列表 + 策略标记
///
/// 在一次评分运行内不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub kind: DeliverableKind,
    pub document: RouteDocument,
    /// 免评：有任何提交即达标
    pub free_pass: bool,
    /// 是否有任何提交
    pub active: bool,
}

impl Route {
    pub fn exercises(&self) -> &[Exercise] {
        &self.document.exercises
    }

    pub fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.document.exercises.iter().find(|ex| ex.id == id)
    }
}

/// 所有路线的目录
///
/// 说明文档无法解析的路线记录在 `failures` 中，不参与评分
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: BTreeMap<RouteId, Route>,
    failures: BTreeMap<RouteId, String>,
}

impl RouteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: Route) {
        self.failures.remove(&route.id);
        self.routes.insert(route.id.clone(), route);
    }

    pub fn record_failure(&mut self, route: RouteId, reason: impl Into<String>) {
        self.failures.insert(route, reason.into());
    }

    pub fn get(&self, id: &RouteId) -> Option<&Route> {
        self.routes.get(id)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn failures(&self) -> &BTreeMap<RouteId, String> {
        &self.failures
    }

    /// 所有已知路线（含解析失败的），按标识排序
    pub fn route_ids(&self) -> Vec<RouteId> {
        let mut ids: Vec<RouteId> = self
            .routes
            .keys()
            .chain(self.failures.keys())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// 根据是否有提交标记路线活跃状态
    pub fn mark_active<'a>(&mut self, active_routes: impl IntoIterator<Item = &'a RouteId>) {
        for route in self.routes.values_mut() {
            route.active = false;
        }
        for id in active_routes {
            if let Some(route) = self.routes.get_mut(id) {
                route.active = true;
            }
        }
    }
}
