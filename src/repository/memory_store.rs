// ==========================================
// 考试排程对账系统 - 内存记录仓储
// ==========================================
// 职责: RecordStore 的内存实现（嵌入调用方 / 测试）
// 说明: 保持插入顺序; 读写锁保护整个集合
// ==========================================

use crate::domain::record::{ExamRecord, FieldPatch};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_store::RecordStore;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

const ENTITY: &str = "ExamRecord";

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<ExamRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有记录初始化（缺少 id 的记录分配新 id）
    pub fn with_records(records: Vec<ExamRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|mut r| {
                if r.id.is_none() {
                    r.id = Some(Uuid::new_v4().to_string());
                }
                r
            })
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// 删除记录（人工操作,不在自动对账路径上）
    pub async fn remove(&self, id: &str) -> RepositoryResult<ExamRecord> {
        let mut records = self.records.write().await;
        let pos = records
            .iter()
            .position(|r| r.id.as_deref() == Some(id))
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;
        Ok(records.remove(pos))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list_all(&self) -> RepositoryResult<Vec<ExamRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn get(&self, id: &str) -> RepositoryResult<ExamRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }

    async fn create(&self, fields: ExamRecord) -> RepositoryResult<ExamRecord> {
        let mut record = fields;
        record.id = Some(Uuid::new_v4().to_string());
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: &FieldPatch) -> RepositoryResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id.as_deref() == Some(id))
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;
        record.apply_patch(patch);
        Ok(())
    }
}
