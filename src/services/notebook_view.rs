//! Jupyter notebook → 紧凑的文本视图，供评分后端阅读

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ParseError;

/// 单段文本的最大长度
pub const MAX_TEXT_CHARS: usize = 15000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MultilineText {
    One(String),
    Many(Vec<String>),
}

impl MultilineText {
    fn joined(&self) -> String {
        match self {
            MultilineText::One(s) => s.clone(),
            MultilineText::Many(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineText {
    fn default() -> Self {
        MultilineText::One(String::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawNotebook {
    #[serde(default)]
    cells: Vec<RawCell>,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default)]
    source: MultilineText,
    #[serde(default)]
    execution_count: Option<u64>,
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
enum RawOutput {
    Stream {
        #[serde(default)]
        text: MultilineText,
    },
    ExecuteResult {
        #[serde(default)]
        data: BTreeMap<String, serde_json::Value>,
    },
    DisplayData {
        #[serde(default)]
        data: BTreeMap<String, serde_json::Value>,
    },
    Error {
        #[serde(default)]
        ename: String,
        #[serde(default)]
        evalue: String,
    },
}

/// 渲染后的单元格
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellView {
    pub index: usize,
    pub cell_type: String,
    pub execution_count: Option<u64>,
    pub source: String,
    pub outputs: Vec<String>,
}

/// notebook 的文本视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookView {
    pub cells: Vec<CellView>,
}

impl NotebookView {
    /// 解析 `.ipynb` 内容
    pub fn parse(path: &str, content: &str) -> Result<Self, ParseError> {
        let raw: RawNotebook =
            serde_json::from_str(content).map_err(|source| ParseError::MalformedNotebook {
                path: path.to_string(),
                source,
            })?;

        let cells = raw
            .cells
            .into_iter()
            .enumerate()
            .map(|(index, cell)| CellView {
                index,
                source: truncate(&cell.source.joined()),
                outputs: cell.outputs.iter().filter_map(render_output).collect(),
                cell_type: cell.cell_type,
                execution_count: cell.execution_count,
            })
            .collect();

        Ok(Self { cells })
    }

    pub fn code_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.cell_type == "code").count()
    }

    pub fn executed_cells(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.cell_type == "code" && c.execution_count.is_some())
            .count()
    }

    pub fn render(&self) -> String {
        let mut parts = vec![format!(
            "[Notebook: {} cells, {}/{} code cells executed]",
            self.cells.len(),
            self.executed_cells(),
            self.code_cells()
        )];

        for cell in &self.cells {
            let header = match cell.execution_count {
                Some(n) => format!("--- Cell {} [{}] (In [{}]) ---", cell.index, cell.cell_type, n),
                None => format!("--- Cell {} [{}] ---", cell.index, cell.cell_type),
            };
            parts.push(header);
            parts.push(cell.source.clone());
            for output in &cell.outputs {
                parts.push(format!(">>> {}", output));
            }
        }

        parts.join("\n")
    }
}

fn render_output(output: &RawOutput) -> Option<String> {
    match output {
        RawOutput::Stream { text } => Some(truncate(&text.joined())),
        RawOutput::ExecuteResult { data } | RawOutput::DisplayData { data } => {
            if let Some(text) = data.get("text/plain") {
                let text = match serde_json::from_value::<MultilineText>(text.clone()) {
                    Ok(text) => text.joined(),
                    Err(_) => text.to_string(),
                };
                Some(truncate(&text))
            } else if data.contains_key("text/html") {
                Some("[HTML output]".to_string())
            } else if data.keys().any(|k| k.starts_with("image/")) {
                Some("[Image output]".to_string())
            } else {
                None
            }
        }
        RawOutput::Error { ename, evalue } => Some(format!("[Error: {}: {}]", ename, evalue)),
    }
}

/// 按字符截断
pub fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_TEXT_CHARS {
        let head: String = text.chars().take(MAX_TEXT_CHARS).collect();
        format!("{}\n...[truncated]", head)
    } else {
        text.to_string()
    }
}
