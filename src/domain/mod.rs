// ==========================================
// 考试排程对账系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、导入结果模型
// 红线: 不含数据访问逻辑,不含匹配逻辑
// ==========================================

pub mod record;
pub mod report;
pub mod types;

// 重导出核心类型
pub use record::{CanonicalField, ExamRecord, FieldPatch, GroupKey, RecordFragment};
pub use report::{
    HeaderDiagnostics, ImportProgress, ImportReport, LinkConflict, LinkConflictRow, LinkMatchRow,
    NoMatchRow, RowAction, RowErrorEntry, RowOutcome, SkippedRow,
};
pub use types::{FragmentState, IdentityTier, LinkMatchStrategy, SourceFormat};
