use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{DeliverableKind, RouteId, StudentId, SubmissionKey};

/// 提交文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Notebook,
    Text,
    Document,
}

impl FileKind {
    /// 按扩展名识别，未知类型返回 None（不视为提交）
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ipynb" => Some(FileKind::Notebook),
            "txt" | "md" => Some(FileKind::Text),
            "docx" | "doc" | "pdf" => Some(FileKind::Document),
            _ => None,
        }
    }

    /// 是否符合路线要求的交付物类型
    pub fn matches(self, kind: DeliverableKind) -> bool {
        matches!(
            (self, kind),
            (FileKind::Notebook, DeliverableKind::Notebook) | (FileKind::Text, DeliverableKind::Text)
        )
    }
}

/// 提交内容指纹（SHA-256 十六进制）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 用于文件名的短指纹
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一个提交文件：某学生对某路线的一次尝试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub route: RouteId,
    pub student: StudentId,
    pub path: PathBuf,
    pub file_name: String,
    pub kind: FileKind,
    pub modified: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    /// 文件类型与路线交付物类型不符（仍计为已完成）
    pub format_mismatch: bool,
    /// 文件名中的路线标记与所在目录不一致
    pub route_token_mismatch: bool,
}

impl Submission {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.route.clone(), self.student.clone())
    }

    /// 是否可以送去评分
    pub fn is_gradable(&self) -> bool {
        !self.format_mismatch && self.kind != FileKind::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_from_path() {
        assert_eq!(
            FileKind::from_path(Path::new("a_RID_001.ipynb")),
            Some(FileKind::Notebook)
        );
        assert_eq!(FileKind::from_path(Path::new("log.TXT")), Some(FileKind::Text));
        assert_eq!(
            FileKind::from_path(Path::new("essay.docx")),
            Some(FileKind::Document)
        );
        assert_eq!(FileKind::from_path(Path::new("image.png")), None);
        assert_eq!(FileKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_file_kind_matches_deliverable() {
        assert!(FileKind::Notebook.matches(DeliverableKind::Notebook));
        assert!(FileKind::Text.matches(DeliverableKind::Text));
        assert!(!FileKind::Document.matches(DeliverableKind::Text));
        assert!(!FileKind::Notebook.matches(DeliverableKind::Text));
    }

    #[test]
    fn test_fingerprint_is_content_hash() {
        let a = Fingerprint::of_bytes(b"hello");
        let b = Fingerprint::of_bytes(b"hello");
        let c = Fingerprint::of_bytes(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_short_fingerprint_on_char_boundary() {
        assert_eq!(Fingerprint::from_hex("指纹指纹指纹指纹指纹指纹指纹").short(), "指纹指纹指纹指纹指纹指纹");
        assert_eq!(Fingerprint::from_hex("abc").short(), "abc");
    }
}
