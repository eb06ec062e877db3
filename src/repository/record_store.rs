// ==========================================
// 考试排程对账系统 - 记录仓储 Trait
// ==========================================
// 职责: 定义记录集合的抽象 CRUD 接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::record::{ExamRecord, FieldPatch};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// RecordStore Trait
// ==========================================
// 实现者: ExamRecordRepositoryImpl（rusqlite）, InMemoryRecordStore
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 读取全部记录（运行开始时取一次快照）
    async fn list_all(&self) -> RepositoryResult<Vec<ExamRecord>>;

    /// 按 id 读取实时记录
    ///
    /// # 返回
    /// - Err(NotFound): 记录不存在
    async fn get(&self, id: &str) -> RepositoryResult<ExamRecord>;

    /// 新建记录（分配 id）
    ///
    /// # 返回
    /// - Ok(ExamRecord): 带 id 的新记录
    async fn create(&self, fields: ExamRecord) -> RepositoryResult<ExamRecord>;

    /// 只写入补丁中出现的字段,其余字段不动
    ///
    /// # 返回
    /// - Err(NotFound): 记录已不存在（不得静默成功）
    async fn update(&self, id: &str, patch: &FieldPatch) -> RepositoryResult<()>;
}
