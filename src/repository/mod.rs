// ==========================================
// 考试排程对账系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供记录集合的 CRUD 接口,屏蔽存储细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod exam_record_repo_impl;
pub mod memory_store;
pub mod record_store;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use exam_record_repo_impl::ExamRecordRepositoryImpl;
pub use memory_store::InMemoryRecordStore;
pub use record_store::RecordStore;
