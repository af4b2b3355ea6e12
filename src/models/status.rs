use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// 学生在某条路线上的状态（派生值，不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentRouteStatus {
    /// 既无提交也无成绩
    Missing,
    /// 已完成但未达标（未评分、旧成绩或分数不足）
    Submitted,
    /// 已达标
    Sent,
}

impl StudentRouteStatus {
    pub fn completed(self) -> bool {
        !matches!(self, StudentRouteStatus::Missing)
    }

    pub fn sent(self) -> bool {
        matches!(self, StudentRouteStatus::Sent)
    }

    pub fn not_sent(self) -> bool {
        matches!(self, StudentRouteStatus::Submitted)
    }

    pub fn missing(self) -> bool {
        matches!(self, StudentRouteStatus::Missing)
    }
}

impl Display for StudentRouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StudentRouteStatus::Missing => "MISSING",
            StudentRouteStatus::Submitted => "SUBMITTED",
            StudentRouteStatus::Sent => "SENT",
        };
        f.write_str(s)
    }
}

/// 达标分数：通过的练习数 / 计入的练习数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SendScore {
    pub passing: usize,
    pub counted: usize,
}

impl SendScore {
    /// 分母为 0 时返回 0
    pub fn fraction(&self) -> f64 {
        if self.counted == 0 {
            0.0
        } else {
            self.passing as f64 / self.counted as f64
        }
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.counted > 0 && self.fraction() >= threshold
    }
}

impl Display for SendScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.0}%)",
            self.passing,
            self.counted,
            self.fraction() * 100.0
        )
    }
}

/// 产生某个状态的规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StatusReason {
    NoSubmissionNoGrade,
    /// 免评路线，有提交即达标
    FreePass,
    /// 成绩达到阈值
    SoftSend { score: SendScore, orphaned: bool },
    /// 成绩未达到阈值
    BelowThreshold { score: SendScore, orphaned: bool },
    /// 有提交但还没有成绩
    AwaitingGrade,
    /// 只有旧提交的成绩，新提交尚未评分
    StaleGrade,
    /// 文件类型不符，无法评分
    FormatMismatch,
}

impl Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::NoSubmissionNoGrade => write!(f, "没有提交也没有成绩"),
            StatusReason::FreePass => write!(f, "免评路线，有提交即达标"),
            StatusReason::SoftSend { score, orphaned } => {
                write!(f, "达标 {}", score)?;
                if *orphaned {
                    write!(f, "（提交文件已不存在）")?;
                }
                Ok(())
            }
            StatusReason::BelowThreshold { score, orphaned } => {
                write!(f, "未达标 {}", score)?;
                if *orphaned {
                    write!(f, "（提交文件已不存在）")?;
                }
                Ok(())
            }
            StatusReason::AwaitingGrade => write!(f, "已提交，等待评分"),
            StatusReason::StaleGrade => write!(f, "已重新提交，新版本尚未评分"),
            StatusReason::FormatMismatch => write!(f, "文件类型与路线要求不符"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_partition() {
        for status in [
            StudentRouteStatus::Missing,
            StudentRouteStatus::Submitted,
            StudentRouteStatus::Sent,
        ] {
            assert_eq!(status.completed(), status.sent() || status.not_sent());
            assert!(!(status.sent() && status.not_sent()));
            assert_eq!(status.missing(), !status.completed());
        }
    }

    #[test]
    fn test_send_score_threshold() {
        let score = SendScore {
            passing: 4,
            counted: 5,
        };
        assert!(score.meets(0.8));
        assert!(!score.meets(0.81));

        let empty = SendScore {
            passing: 0,
            counted: 0,
        };
        assert!(!empty.meets(0.8));
        assert_eq!(empty.fraction(), 0.0);
    }
}
