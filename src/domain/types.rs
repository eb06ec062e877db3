// ==========================================
// 考试排程对账系统 - 领域类型定义
// ==========================================
// 职责: 身份层级 / 链接匹配策略 / 片段状态机 / 输入格式
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 身份层级 (Identity Tier)
// ==========================================
// 红线: 优先级固定 studentId > username > (fullName, dob)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityTier {
    StudentId, // 学号
    Username,  // 账号
    NameDob,   // 姓名 + 出生日期
}

impl IdentityTier {
    /// 按优先级排列的全部层级
    pub const ALL: [IdentityTier; 3] = [
        IdentityTier::StudentId,
        IdentityTier::Username,
        IdentityTier::NameDob,
    ];
}

impl fmt::Display for IdentityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityTier::StudentId => write!(f, "STUDENT_ID"),
            IdentityTier::Username => write!(f, "USERNAME"),
            IdentityTier::NameDob => write!(f, "NAME_DOB"),
        }
    }
}

// ==========================================
// 链接匹配策略 (Link Match Strategy)
// ==========================================
// Exact: 分组键完全一致（可信）
// Relaxed: 仅按考场/链接回退匹配（尽力而为）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkMatchStrategy {
    Exact,
    Relaxed,
}

impl fmt::Display for LinkMatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMatchStrategy::Exact => write!(f, "EXACT"),
            LinkMatchStrategy::Relaxed => write!(f, "RELAXED"),
        }
    }
}

// ==========================================
// 片段状态 (Fragment State)
// ==========================================
// 状态机: Pending → Classified → Applied | Skipped | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentState {
    Pending,
    Classified,
    Applied,
    Skipped,
    Failed,
}

impl FragmentState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FragmentState::Applied | FragmentState::Skipped | FragmentState::Failed
        )
    }

    /// 校验状态转换是否合法
    pub fn can_transition_to(&self, next: FragmentState) -> bool {
        matches!(
            (self, next),
            (FragmentState::Pending, FragmentState::Classified)
                | (FragmentState::Pending, FragmentState::Failed)
                | (FragmentState::Classified, FragmentState::Applied)
                | (FragmentState::Classified, FragmentState::Skipped)
                | (FragmentState::Classified, FragmentState::Failed)
        )
    }
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentState::Pending => write!(f, "PENDING"),
            FragmentState::Classified => write!(f, "CLASSIFIED"),
            FragmentState::Applied => write!(f, "APPLIED"),
            FragmentState::Skipped => write!(f, "SKIPPED"),
            FragmentState::Failed => write!(f, "FAILED"),
        }
    }
}

// ==========================================
// 输入格式提示 (Source Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,    // 分隔文本
    Binary, // 电子表格二进制（xlsx/xls/ods）
}

impl SourceFormat {
    /// 根据扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" | "txt" | "tsv" => Some(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Some(SourceFormat::Binary),
            _ => None,
        }
    }
}
