// ==========================================
// 考试排程对账系统 - 导入结果与诊断模型
// ==========================================
// 职责: 单行处理结果 / 运行报告 / 进度 / 表头诊断
// 说明: 运行报告是面向操作员的主要产物
// ==========================================

use crate::domain::record::{CanonicalField, FieldPatch};
use crate::domain::types::{FragmentState, IdentityTier, LinkMatchStrategy};
use serde::{Deserialize, Serialize};

// ==========================================
// ImportProgress - 实时进度
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub done: usize,
    pub total: usize,
}

// ==========================================
// RowAction - 单行最终动作
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowAction {
    /// 新建记录
    Created { record_id: String },
    /// 补全已有记录的空字段
    Updated {
        record_id: String,
        patch: FieldPatch,
        via: IdentityTier,
    },
    /// 更新目标已消失,按新建回退
    CreatedAfterVanished {
        vanished_id: String,
        record_id: String,
    },
    /// 重复（库内已有同一场考试,或文件内重复行）
    Duplicate {
        record_id: Option<String>,
        via: Option<IdentityTier>,
        in_file: bool,
    },
    /// 分组链接传播
    LinkPropagated {
        strategy: LinkMatchStrategy,
        updated_ids: Vec<String>,
        already_applied: usize,
    },
    /// 无任何身份/分组字段
    SkippedNoKey,
    /// 有键但无法确定匹配
    NoMatch { key: String, reason: String },
    /// 行级校验失败
    Invalid { message: String },
    /// 仓储错误
    Failed { message: String },
    /// 运行被取消,未派发
    Cancelled,
}

// ==========================================
// LinkConflict - 链接已存在,跳过
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConflict {
    pub record_id: String,
    pub existing_link: String,
    pub incoming_link: String,
}

// ==========================================
// RowOutcome - 单行处理结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub row_number: usize,
    pub state: FragmentState,
    pub action: RowAction,
    #[serde(default)]
    pub link_conflicts: Vec<LinkConflict>,
    /// 分组传播中个别记录写入失败（行本身仍计为已处理）
    #[serde(default)]
    pub store_errors: Vec<String>,
    #[serde(default)]
    pub raw_cells: Vec<(String, String)>,
}

impl RowOutcome {
    pub fn new(row_number: usize, state: FragmentState, action: RowAction) -> Self {
        Self {
            row_number,
            state,
            action,
            link_conflicts: Vec::new(),
            store_errors: Vec::new(),
            raw_cells: Vec::new(),
        }
    }
}

// ==========================================
// 报告条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowErrorEntry {
    pub fragment_ref: String,
    pub row_number: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoMatchRow {
    pub row_number: usize,
    /// 匹配失败时使用的身份键或分组键
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row_number: usize,
    /// 原始表头与单元格值
    pub context: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConflictRow {
    pub row_number: usize,
    pub record_id: String,
    pub existing_link: String,
    pub incoming_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMatchRow {
    pub row_number: usize,
    pub strategy: LinkMatchStrategy,
    pub updated: usize,
}

// ==========================================
// HeaderDiagnostics - 表头映射诊断
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderDiagnostics {
    /// 文件中读到的原始表头（按列顺序）
    pub raw_headers: Vec<String>,
    /// 规范字段 ← 原始表头
    pub mapped: Vec<(CanonicalField, String)>,
    /// 显式忽略的表头（如序号列 STT）
    pub ignored: Vec<String>,
    /// 未识别的表头
    pub unmapped: Vec<String>,
    /// 被同一字段更早的列覆盖的表头
    pub shadowed: Vec<String>,
}

// ==========================================
// ImportReport - 运行报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub run_id: String,
    pub total_count: usize,
    pub processed_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub duplicate_count: usize,
    pub link_updated_count: usize,
    pub skipped_count: usize,
    pub no_match_count: usize,
    pub error_count: usize,
    pub cancelled: bool,
    pub errors: Vec<RowErrorEntry>,
    pub no_match_rows: Vec<NoMatchRow>,
    pub skipped_rows: Vec<SkippedRow>,
    pub link_conflicts: Vec<LinkConflictRow>,
    pub link_matches: Vec<LinkMatchRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderDiagnostics>,
    pub elapsed_ms: u128,
}

impl ImportReport {
    /// 本次运行是否对仓储产生了写入
    pub fn has_writes(&self) -> bool {
        self.created_count > 0 || self.updated_count > 0 || self.link_updated_count > 0
    }
}
